//! The `Emitter` turns one input's bytes into a stream of tokens. A token is
//! a line of the input, optionally trimmed of surrounding whitespace, filtered
//! by a match pattern, and narrowed to the single group of a capture pattern.
use anyhow::{bail, Context, Result};
use bstr::ByteSlice;
use regex::bytes::Regex;
use std::io::BufRead;
use std::ops::{AddAssign, Range};
use std::path::Path;

use crate::io::{open_input, InputReader};

/// The rules that shape a raw line into a token (or reject it)
#[derive(Debug, Clone, Default)]
pub struct TokenRules {
    trim: bool,
    matcher: Option<Regex>,
    capture: Option<Regex>,
}

impl TokenRules {
    /// Compile the rules. A malformed pattern is an error, and so is a capture
    /// pattern that doesn't have exactly one capture group.
    pub fn new(trim: bool, match_pattern: Option<&str>, capture_pattern: Option<&str>) -> Result<Self> {
        let matcher = match match_pattern {
            None => None,
            Some(p) => Some(Regex::new(p).with_context(|| format!("Bad match pattern: {p}"))?),
        };
        let capture = match capture_pattern {
            None => None,
            Some(p) => {
                let re = Regex::new(p).with_context(|| format!("Bad capture pattern: {p}"))?;
                // `captures_len` counts the implicit group 0
                if re.captures_len() != 2 {
                    bail!(
                        "Capture pattern must have exactly one capture group, {p} has {}",
                        re.captures_len() - 1
                    );
                }
                Some(re)
            }
        };
        Ok(TokenRules { trim, matcher, capture })
    }

    /// Is a match pattern configured?
    #[must_use]
    pub fn has_match_pattern(&self) -> bool {
        self.matcher.is_some()
    }

    /// Returns the range of `line` that forms its token, or `None` if the
    /// line is rejected. Updates `counts` for everything but lines scanned.
    fn shape(&self, line: &[u8], counts: &mut ScanCounts) -> Option<Range<usize>> {
        let mut token = 0..line.len();
        if self.trim {
            let start = line.len() - line.trim_start().len();
            let end = line.trim_end().len().max(start);
            token = start..end;
        }
        if let Some(re) = &self.matcher {
            if !re.is_match(&line[token.clone()]) {
                return None;
            }
        }
        counts.lines_matched += 1;
        if let Some(re) = &self.capture {
            let captures = re.captures(&line[token.clone()])?;
            // An optional group that took no part in the match gives an empty token
            token = match captures.get(1) {
                Some(group) => token.start + group.start()..token.start + group.end(),
                None => token.start..token.start,
            };
        }
        counts.tokens_emitted += 1;
        Some(token)
    }
}

/// Counters kept while scanning. They're reported, but never change what
/// gets emitted.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounts {
    /// Every line read
    pub lines_scanned: u64,
    /// Lines that survived the match pattern (all lines, if there is none)
    pub lines_matched: u64,
    /// Tokens produced
    pub tokens_emitted: u64,
}

impl AddAssign for ScanCounts {
    fn add_assign(&mut self, other: Self) {
        self.lines_scanned += other.lines_scanned;
        self.lines_matched += other.lines_matched;
        self.tokens_emitted += other.tokens_emitted;
    }
}

/// Removes the line terminator (`\n` or `\r\n`) from the end of `line`
fn chomp(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// An `Emitter` owns one open input and yields its tokens one at a time:
/// ```text
/// while emitter.advance()? {
///     let token = emitter.current();
///     ...
/// }
/// ```
/// The slice returned by `current` is overwritten by the next `advance`, so
/// callers must copy it to keep it.
pub struct Emitter<'r, R: BufRead> {
    reader: Option<R>,
    rules: &'r TokenRules,
    line: Vec<u8>,
    token: Range<usize>,
    counts: ScanCounts,
    name: String,
}

impl<'r> Emitter<'r, InputReader> {
    /// Opens the file at `path`
    pub fn open(path: &Path, rules: &'r TokenRules, buffer_size: usize) -> Result<Self> {
        let reader = open_input(path, buffer_size)?;
        Ok(Emitter::named(reader, rules, path.display().to_string()))
    }
}

impl<'r, R: BufRead> Emitter<'r, R> {
    /// Emit the tokens of `reader`
    pub fn new(reader: R, rules: &'r TokenRules) -> Self {
        Emitter::named(reader, rules, String::from("<reader>"))
    }

    fn named(reader: R, rules: &'r TokenRules, name: String) -> Self {
        Emitter {
            reader: Some(reader),
            rules,
            line: Vec::new(),
            token: 0..0,
            counts: ScanCounts::default(),
            name,
        }
    }

    /// Moves to the next token, returning `false` once the input is exhausted
    /// (or the emitter has been closed). Any number of lines may be read and
    /// rejected along the way.
    pub fn advance(&mut self) -> Result<bool> {
        let Some(reader) = self.reader.as_mut() else { return Ok(false) };
        loop {
            self.line.clear();
            let n = reader
                .read_until(b'\n', &mut self.line)
                .with_context(|| format!("Error reading file: {}", self.name))?;
            if n == 0 {
                self.token = 0..0;
                return Ok(false);
            }
            self.counts.lines_scanned += 1;
            let line = chomp(&self.line);
            if let Some(token) = self.rules.shape(line, &mut self.counts) {
                self.token = token;
                return Ok(true);
            }
        }
    }

    /// The current token. Empty before the first successful `advance`.
    #[must_use]
    pub fn current(&self) -> &[u8] {
        &self.line[self.token.clone()]
    }

    /// The counters accumulated so far
    #[must_use]
    pub fn counts(&self) -> ScanCounts {
        self.counts
    }

    /// Releases the input. Calling it again does nothing.
    pub fn close(&mut self) {
        self.reader = None;
    }
}

/// Calls `each` for every token in `bytes`, an in-memory run of whole lines,
/// adding to `counts` as it goes.
pub fn for_each_token(
    bytes: &[u8],
    rules: &TokenRules,
    counts: &mut ScanCounts,
    mut each: impl FnMut(&[u8]),
) {
    for line in bytes.lines_with_terminator() {
        counts.lines_scanned += 1;
        let line = chomp(line);
        if let Some(token) = rules.shape(line, counts) {
            each(&line[token]);
        }
    }
}
