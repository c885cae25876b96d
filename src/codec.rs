//! Decompression front end
//!
//! The codec itself is the `zstd` crate; this module only picks it by
//! extension, opens the file as a buffered line source and keeps a running
//! count of compressed bytes consumed so readers can report how far into a
//! file they are.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Dumps are compressed with `--long=31`; the decoder must accept that window
const ZSTD_WINDOW_LOG_MAX: u32 = 31;

const READ_BUFFER: usize = 1 << 20;

/// How a file's bytes are encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// zstd frames (`.zst`)
    Zstd,
    /// Uncompressed text
    Plain,
}

impl Codec {
    /// Pick a codec from the file extension
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("zst") => Codec::Zstd,
            _ => Codec::Plain,
        }
    }

    /// File extension this codec strips from a name, if any
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            Codec::Zstd => Some("zst"),
            Codec::Plain => None,
        }
    }

    /// Open a file for streaming line reads
    pub fn open(&self, path: &Path) -> io::Result<LineSource> {
        let consumed = ByteCounter::default();
        let file = CountingReader {
            inner: File::open(path)?,
            counter: consumed.clone(),
        };

        let reader: Box<dyn BufRead + Send> = match self {
            Codec::Zstd => {
                let mut decoder = zstd::stream::read::Decoder::new(file)?;
                decoder.window_log_max(ZSTD_WINDOW_LOG_MAX)?;
                Box::new(BufReader::with_capacity(READ_BUFFER, decoder))
            }
            Codec::Plain => Box::new(BufReader::with_capacity(READ_BUFFER, file)),
        };

        Ok(LineSource {
            reader,
            consumed,
            buf: Vec::with_capacity(4096),
        })
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Codec::Zstd => write!(f, "zstd"),
            Codec::Plain => write!(f, "plain"),
        }
    }
}

/// Shared count of compressed bytes pulled from disk
#[derive(Debug, Clone, Default)]
pub struct ByteCounter(Arc<AtomicU64>);

impl ByteCounter {
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

struct CountingReader<R> {
    inner: R,
    counter: ByteCounter,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.counter.0.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }
}

/// Newline-delimited reader over a decoded stream
pub struct LineSource {
    reader: Box<dyn BufRead + Send>,
    consumed: ByteCounter,
    buf: Vec<u8>,
}

impl LineSource {
    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Lines are bytes; invalid UTF-8 is left for the JSON decoder to reject.
    pub fn next_line(&mut self) -> io::Result<Option<Vec<u8>>> {
        self.buf.clear();
        if self.reader.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(self.buf.clone()))
    }

    /// Compressed bytes consumed so far
    pub fn compressed_offset(&self) -> u64 {
        self.consumed.get()
    }
}
