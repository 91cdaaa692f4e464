use anyhow::Result;
use pkgprint_core::classify::{classify, matching_rule, Label};

/// Print the label of each value, one per line (or a JSON array with the
/// matching rule name).
pub fn classify_command(values: &[String], json: bool) -> Result<()> {
    if json {
        let labels: Vec<serde_json::Value> = values
            .iter()
            .map(|value| {
                let (rule, label) = match matching_rule(value) {
                    Some(rule) => (Some(rule.name), rule.label),
                    None => (None, Label::OtherText),
                };
                serde_json::json!({ "value": value, "label": label, "rule": rule })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&labels)?);
        return Ok(());
    }

    for value in values {
        println!("{}\t{}", classify(value), value);
    }
    Ok(())
}
