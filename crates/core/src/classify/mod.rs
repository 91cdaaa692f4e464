//! Lexical classification of string values.
//!
//! Classification is a pure function of the value: an ordered list of
//! `(label, predicate)` rules is evaluated top to bottom and the first match
//! wins. Values no rule accepts are [`Label::OtherText`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of classification labels.
///
/// The declaration order is the order used for map keys in every output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Label {
    SymbolOrIdentifier,
    FilesystemPath,
    UrlOrUri,
    VersionString,
    BuildMetadata,
    LicenseOrCopyrightText,
    StructuredData,
    OtherText,
}

impl Label {
    pub const ALL: [Label; 8] = [
        Label::SymbolOrIdentifier,
        Label::FilesystemPath,
        Label::UrlOrUri,
        Label::VersionString,
        Label::BuildMetadata,
        Label::LicenseOrCopyrightText,
        Label::StructuredData,
        Label::OtherText,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Label::SymbolOrIdentifier => "symbol-or-identifier",
            Label::FilesystemPath => "filesystem-path",
            Label::UrlOrUri => "url-or-uri",
            Label::VersionString => "version-string",
            Label::BuildMetadata => "build-metadata",
            Label::LicenseOrCopyrightText => "license-or-copyright-text",
            Label::StructuredData => "structured-data",
            Label::OtherText => "other-text",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One classification rule.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub label: Label,
    pub matches: fn(&str) -> bool,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule").field("name", &self.name).field("label", &self.label).finish()
    }
}

/// Rules in precedence order. A path-shaped URL is a URL, a versioned
/// toolchain banner is build metadata, a license id with a dotted version is
/// license text.
pub const RULES: &[Rule] = &[
    Rule { name: "url", label: Label::UrlOrUri, matches: is_url },
    Rule { name: "path", label: Label::FilesystemPath, matches: is_path },
    Rule { name: "build", label: Label::BuildMetadata, matches: is_build_metadata },
    Rule { name: "license", label: Label::LicenseOrCopyrightText, matches: is_license },
    Rule { name: "version", label: Label::VersionString, matches: is_version },
    Rule { name: "structured", label: Label::StructuredData, matches: is_structured },
    Rule { name: "identifier", label: Label::SymbolOrIdentifier, matches: is_identifier },
];

/// First rule accepting `value`, if any.
pub fn matching_rule(value: &str) -> Option<&'static Rule> {
    RULES.iter().find(|rule| (rule.matches)(value))
}

/// Classify a string value. Never fails; unmatched values are other-text.
pub fn classify(value: &str) -> Label {
    matching_rule(value).map_or(Label::OtherText, |rule| rule.label)
}

fn has_whitespace(s: &str) -> bool {
    s.chars().any(char::is_whitespace)
}

fn is_url(s: &str) -> bool {
    if has_whitespace(s) {
        return false;
    }
    if let Some(pos) = s.find("://") {
        let scheme = &s[..pos];
        let rest = &s[pos + 3..];
        let scheme_ok = scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && scheme.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        return scheme_ok && !rest.is_empty();
    }
    ["mailto:", "urn:", "www."]
        .iter()
        .any(|prefix| s.len() > prefix.len() + 2 && s.starts_with(prefix))
}

fn is_path_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | '@' | '%' | '~' | ',' | ':' | '=')
}

fn is_path(s: &str) -> bool {
    if has_whitespace(s) || !s.chars().all(is_path_char) || !s.chars().any(char::is_alphanumeric) {
        return false;
    }
    if s.starts_with("./") || s.starts_with("../") || s.starts_with("~/") {
        return true;
    }
    if let Some(rest) = s.strip_prefix('/') {
        return !rest.is_empty() && !rest.starts_with('/');
    }
    let segments: Vec<&str> = s.split('/').collect();
    if segments.len() < 2 || segments.iter().any(|seg| seg.is_empty()) {
        return false;
    }
    segments.len() >= 3 || segments.last().is_some_and(|last| last.contains('.'))
}

const BUILD_MARKERS: &[&str] = &[
    "GCC: (",
    "clang version",
    "rustc version",
    "Linker: ",
    "GNU ld ",
    "GNU assembler",
    "$Id: ",
    "@(#)",
    "Go build ID:",
    "Built with ",
    "Compiled with ",
    "built on ",
    "compiled on ",
];

fn is_build_metadata(s: &str) -> bool {
    BUILD_MARKERS.iter().any(|marker| s.contains(marker))
}

const LICENSE_PHRASES: &[&str] = &[
    "copyright",
    "(c) ",
    "\u{a9}",
    "license",
    "licence",
    "spdx-license-identifier",
    "all rights reserved",
];

const LICENSE_TOKENS: &[&str] =
    &["GPL", "LGPL", "AGPL", "GPLv2", "GPLv3", "LGPLv2", "LGPLv3", "MPL", "BSD"];

/// Phrases only count in text; a bare identifier such as `get_license_info`
/// mentions a license without being license text.
fn is_license(s: &str) -> bool {
    let lower = s.to_lowercase();
    let bare_identifier = !has_whitespace(s) && is_identifier(s);
    if !bare_identifier && LICENSE_PHRASES.iter().any(|phrase| lower.contains(phrase)) {
        return true;
    }
    s.split(|c: char| c.is_whitespace() || matches!(c, '-' | '+' | ',' | ';' | '(' | ')' | '/' | '.'))
        .any(|token| LICENSE_TOKENS.contains(&token))
}

/// `1.2.3`, `v2.38`, `9.4-3ubuntu6`, `1:2.0~rc1`.
fn is_version_token(token: &str) -> bool {
    let token = token.strip_prefix(['v', 'V']).unwrap_or(token);
    let token = match token.split_once(':') {
        Some((epoch, rest)) if !epoch.is_empty() && epoch.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => token,
    };
    let bytes = token.as_bytes();
    let mut i = 0;
    let mut groups = 0;
    loop {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return false;
        }
        groups += 1;
        if i < bytes.len() && bytes[i] == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit) {
            i += 1;
            continue;
        }
        break;
    }
    if groups < 2 {
        return false;
    }
    let suffix = &token[i..];
    match suffix.chars().next() {
        None => true,
        Some(first) if matches!(first, '-' | '+' | '~') || first.is_ascii_alphabetic() => suffix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '+' | '~')),
        Some(_) => false,
    }
}

/// GNU symbol version tags such as `GLIBC_2.2.5` or `CXXABI_1.3`.
fn is_symbol_version_tag(s: &str) -> bool {
    let Some((name, version)) = s.rsplit_once('_') else { return false };
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && !version.is_empty()
        && version.split('.').all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

fn is_version(s: &str) -> bool {
    let trimmed = s.trim();
    if is_version_token(trimmed) || is_symbol_version_tag(trimmed) {
        return true;
    }
    let lower = trimmed.to_lowercase();
    (lower.contains("version") || lower.contains("ver."))
        && trimmed
            .split_whitespace()
            .map(|word| word.trim_matches(|c: char| matches!(c, ',' | ';' | '(' | ')' | '"' | '\'')))
            .any(is_version_token)
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')
}

fn is_structured(s: &str) -> bool {
    let trimmed = s.trim();
    let inner_has_separator =
        |inner: &str| inner.contains(':') || inner.contains('=') || inner.contains(',');
    if trimmed.len() >= 4 {
        if let Some(inner) = trimmed.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
            return inner_has_separator(inner);
        }
        if let Some(inner) = trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return inner_has_separator(inner);
        }
        if let Some(inner) = trimmed.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
            return inner
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '?' | '!'));
        }
    }
    match trimmed.split_once('=') {
        Some((key, value)) => {
            let key = key.trim_end();
            key.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && key.chars().all(is_key_char)
                && !value.starts_with('=')
                && !value.trim().is_empty()
        }
        None => false,
    }
}

fn is_identifier(s: &str) -> bool {
    s.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '_' | '.' | '$'))
        && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '@'))
        && s.chars().any(|c| c.is_ascii_alphabetic())
}
