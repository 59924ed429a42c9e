//! The statistics a run returns, and their report
use std::time::Duration;

use crate::emitter::ScanCounts;

/// What a run did, for the report on standard error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Line and token counts, summed over every pass over every input
    pub scan: ScanCounts,
    /// Tokens written to the output (or that would have been)
    pub tokens_written: u64,
    /// Total size of the input files
    pub bytes_to_process: u64,
    /// The number of tokens each bloom filter was sized for, if bloom
    /// filters were used
    pub estimated_tokens: Option<u64>,
    /// Wall clock time of the run
    pub elapsed: Duration,
}

impl RunStats {
    /// A multi-line report. Lines matched is only interesting when there's a
    /// match pattern, so it's only shown if `show_matched` is set.
    #[must_use]
    pub fn report(&self, show_matched: bool) -> String {
        let mut report = String::from("** Token Report **\n");
        report.push_str(&format!("Bytes to process: {}\n", self.bytes_to_process));
        if let Some(expected) = self.estimated_tokens {
            report.push_str(&format!("Filter size (tokens): {expected}\n"));
        }
        report.push_str(&format!("Lines scanned: {}\n", self.scan.lines_scanned));
        if show_matched {
            report.push_str(&format!("Lines matched: {}\n", self.scan.lines_matched));
        }
        report.push_str(&format!("Tokens emitted: {}\n", self.scan.tokens_emitted));
        report.push_str(&format!("Tokens written: {}\n", self.tokens_written));
        report.push_str(&format!("Time: {:?}\n", self.elapsed));
        report
    }
}
