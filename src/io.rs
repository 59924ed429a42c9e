//! Input/Output structs and functions
use anyhow::{Context, Result};
use encoding_rs_io::{DecodeReaderBytes, DecodeReaderBytesBuilder};
use std::{
    fs,
    fs::File,
    io::{self, BufReader, Read, Write},
    path::{Path, PathBuf},
};

/// The reader for every input is a buffered reader with the ability to
/// decode UTF-16 files.
pub type InputReader = BufReader<DecodeReaderBytes<File, Vec<u8>>>;

/// Open `path` for reading, with a buffer of `buffer_size` bytes. A UTF-16
/// file (recognized by its Byte Order Mark) is translated to UTF-8; any other
/// bytes pass through unchanged.
pub fn open_input(path: &Path, buffer_size: usize) -> Result<InputReader> {
    let f = File::open(path).with_context(|| format!("Can't open file: {}", path.display()))?;
    // This results in double-buffering, with one buffer within the
    // `DecodeReaderBytes` value, and another in the `BufReader` that wraps it.
    let reader = BufReader::with_capacity(
        buffer_size.max(1),
        DecodeReaderBytesBuilder::new()
            .bom_sniffing(true) // Look at the BOM to detect UTF-16 files and convert to UTF-8
            .strip_bom(true) // Remove the BOM before sending data to us
            .utf8_passthru(true) // Don't enforce UTF-8 (BOM or no BOM)
            .build(f),
    );
    Ok(reader)
}

/// The total size, in bytes, of the files named in `paths`
pub fn bytes_to_process(paths: &[PathBuf]) -> Result<u64> {
    let mut total = 0_u64;
    for path in paths {
        let meta =
            fs::metadata(path).with_context(|| format!("Can't stat file: {}", path.display()))?;
        total += meta.len();
    }
    Ok(total)
}

/// Counts the newlines in the files named in `paths`, reading `buffer_size`
/// bytes at a time. A final line without a newline is not counted, so the
/// result is a lower bound on the number of lines.
pub fn count_lines(paths: &[PathBuf], buffer_size: usize) -> Result<u64> {
    let mut lines = 0_u64;
    let mut buf = vec![0_u8; buffer_size.max(1)];
    for path in paths {
        let mut f =
            File::open(path).with_context(|| format!("Can't open file: {}", path.display()))?;
        loop {
            let n = match f.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("Error reading file: {}", path.display()))
                }
            };
            lines += memchr::memchr_iter(b'\n', &buf[..n]).count() as u64;
        }
    }
    Ok(lines)
}

/// Where the tokens of a set operation go. Output is line oriented: every
/// token written is followed by a newline.
pub trait TokenSink {
    /// Write `token` as one line
    fn write_token(&mut self, token: &[u8]) -> Result<()>;
    /// Write `token` as one line, prefixed by `count` in the form `"<count>: "`
    fn write_counted(&mut self, count: u32, token: &[u8]) -> Result<()>;
    /// Flush anything buffered
    fn flush(&mut self) -> Result<()>;
}

/// A `LineSink` writes tokens to an underlying `io::Write`. Callers wanting
/// buffering should hand it an `io::BufWriter`.
pub struct LineSink<W: Write> {
    out: W,
}

impl<W: Write> LineSink<W> {
    /// Wrap `out`
    pub fn new(out: W) -> Self {
        LineSink { out }
    }
    /// Unwrap the `LineSink`, returning the underlying writer
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TokenSink for LineSink<W> {
    fn write_token(&mut self, token: &[u8]) -> Result<()> {
        self.out.write_all(token)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
    fn write_counted(&mut self, count: u32, token: &[u8]) -> Result<()> {
        write!(self.out, "{count}: ")?;
        self.write_token(token)
    }
    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// The `Discard` sink accepts every token and writes nothing. Useful for
/// timing a run without paying for output.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl TokenSink for Discard {
    fn write_token(&mut self, _token: &[u8]) -> Result<()> {
        Ok(())
    }
    fn write_counted(&mut self, _count: u32, _token: &[u8]) -> Result<()> {
        Ok(())
    }
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}
