//! Auto-tuning of compiler schedules through heuristic tree search.
//!
//! The [`search`] module implements a staged Monte Carlo tree search: every
//! level of the tree applies one kind of transformation (tiling,
//! parallelization, ...) and nodes are scored by measuring the transformed
//! program with an [`evaluation::Evaluator`]. [`kernel`] provides a concrete
//! program representation to search over.

// Rustdoc lints.
#![warn(
    rustdoc::private_doc_tests,
    rustdoc::missing_crate_level_docs,
    rustdoc::broken_intra_doc_links,
    rustdoc::invalid_codeblock_attributes,
    rustdoc::invalid_html_tags,
    rustdoc::invalid_rust_codeblocks,
    rustdoc::bare_urls
)]
// Clippy lints.
#![warn(
    clippy::correctness,
    clippy::suspicious,
    clippy::style,
    clippy::complexity,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo
)]
#![deny(clippy::perf)]

pub mod error;
pub mod evaluation;
pub mod kernel;
pub mod search;

pub use error::SearchError;
pub use search::{Config, Search, Strategy};
use shadow_rs::shadow;

shadow!(build);

/// Returns the full tuner version that can be used to identify how it was
/// built in the first place.
#[must_use]
pub fn version() -> String {
    format!(
        "{} (commit {}, branch {})",
        build::PKG_VERSION,
        build::SHORT_COMMIT,
        build::BRANCH
    )
}

