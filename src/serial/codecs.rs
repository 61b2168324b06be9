/// Splits a byte stream into delimited lines.
pub(crate) mod lines;
