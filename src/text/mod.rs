//! Text preparation: markdown cleanup and byte-bounded chunking.

pub mod chunker;
pub mod clean;

pub use chunker::split;
pub use clean::clean_text;
