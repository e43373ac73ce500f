//! Cleaning Strategies (C2): MIME-dispatched content normalizers producing
//! UTF-8 markdown/plaintext, per §4.2.

pub mod content;
pub mod converter;
pub mod html;
pub mod markdown;
pub mod strategy;

pub use content::RawContent;
pub use converter::DocumentConverter;
pub use strategy::{clean, CleanOutcome};
