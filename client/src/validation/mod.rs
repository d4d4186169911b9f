//! Input validation shared by the credential payloads.

pub mod rules;

pub use rules::*;
