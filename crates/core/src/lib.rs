//! pkgprint-core
//!
//! Core library for corpus-scale string fingerprinting of ELF binaries shipped
//! in distribution packages.
//!
//! Strings are extracted from every binary of a package manifest, classified,
//! merged into an inverted index (value → binaries/packages containing it),
//! and summarized into aggregate counts, duplicate groups and per-package /
//! per-binary unique sets.
//!
//! All substantive logic lives here so it is testable and reusable from
//! multiple frontends; the `pkgprint` CLI is a thin driver.

pub mod model;
pub mod decode;
pub mod extract;
pub mod classify;
pub mod index;
pub mod aggregate;
pub mod partition;
pub mod manifest;
pub mod config;
pub mod store;
pub mod report;
pub mod pipeline;

/// Returns the library version as encoded at compile time.
///
/// Useful for tests and for frontends to report consistent version info.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
