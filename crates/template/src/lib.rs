//! Template rendering for sequence emails
//!
//! Subjects and bodies use `[[key]]` / `[[key || fallback]]` placeholders.
//! Keys resolve against the flattened lead record first, then against a
//! small set of special generators (unsubscribe link, current date parts,
//! AI opener), then against the inline fallback literal.

pub mod ai;
pub mod processor;
pub mod special;

pub use ai::{GeminiOpener, OpenerGenerator};
pub use processor::{TemplateOptions, lead_variables, merge_custom_variables, render};
pub use special::{AI_OPENER_FALLBACK, SpecialContext, SpecialKey};
