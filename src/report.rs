//! Textual dumps of detection results.

use std::io::{self, Write};

use crate::DetectionResult;

/// Describe each result in turn, lazily.
pub fn describe(results: &[DetectionResult]) -> impl Iterator<Item = String> + '_ {
    results.iter().map(|result| result.to_string())
}

/// Write every result to `out`, one block each. Returns how many were written.
pub fn print_results<W: Write + ?Sized>(
    results: &[DetectionResult],
    out: &mut W,
) -> io::Result<usize> {
    let mut written = 0;
    for description in describe(results) {
        writeln!(out, "{description}")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}
