//! Result export

pub mod json;
pub mod jsonl;
