//! Capture file input for GNSS byte streams.
//!
//! Input formats:
//! - `Raw`: binary bytes exactly as they came off the receiver, read in
//!   fixed-size chunks
//! - `Hex`: hex dumps, one or more bytes per line (`#` starts a comment)
//!
//! `-` reads from stdin.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use log::warn;

use gnss_core::types::hex_decode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureFormat {
    Raw,
    Hex,
}

/// Chunked reader over a capture file or stdin.
pub struct CaptureReader {
    source: Box<dyn BufRead>,
    format: CaptureFormat,
    chunk_size: usize,
    line_no: u64,
    pub bytes_read: u64,
    /// Hex lines that did not decode
    pub bad_lines: u64,
}

impl CaptureReader {
    pub fn open(path: &Path, format: CaptureFormat, chunk_size: usize) -> io::Result<Self> {
        let source: Box<dyn BufRead> = if path.to_str() == Some("-") {
            Box::new(io::stdin().lock())
        } else {
            Box::new(BufReader::new(File::open(path)?))
        };
        Ok(Self::from_reader(source, format, chunk_size))
    }

    pub fn from_reader(source: Box<dyn BufRead>, format: CaptureFormat, chunk_size: usize) -> Self {
        CaptureReader {
            source,
            format,
            chunk_size: chunk_size.max(1),
            line_no: 0,
            bytes_read: 0,
            bad_lines: 0,
        }
    }

    /// Next chunk of stream bytes, `None` at end of input.
    ///
    /// Raw chunks are at most `chunk_size` bytes. Hex input yields one chunk
    /// per non-empty line.
    pub fn next_chunk(&mut self) -> io::Result<Option<Vec<u8>>> {
        let chunk = match self.format {
            CaptureFormat::Raw => self.next_raw()?,
            CaptureFormat::Hex => self.next_hex()?,
        };
        if let Some(bytes) = &chunk {
            self.bytes_read += bytes.len() as u64;
        }
        Ok(chunk)
    }

    fn next_raw(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            match self.source.read(&mut buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn next_hex(&mut self) -> io::Result<Option<Vec<u8>>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.source.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let Some(text) = clean_hex_line(&line) else {
                continue;
            };
            match hex_decode(text) {
                Some(bytes) if !bytes.is_empty() => return Ok(Some(bytes)),
                _ => {
                    self.bad_lines += 1;
                    warn!("line {}: not a hex dump, skipped", self.line_no);
                }
            }
        }
    }
}

impl Iterator for CaptureReader {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_chunk().transpose()
    }
}

/// Strip comments and surrounding whitespace from a hex dump line.
/// Returns `None` for blank and comment-only lines.
pub fn clean_hex_line(line: &str) -> Option<&str> {
    let text = match line.split_once('#') {
        Some((before, _)) => before,
        None => line,
    };
    let text = text.trim();
    (!text.is_empty()).then_some(text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    fn reader(data: &[u8], format: CaptureFormat, chunk_size: usize) -> CaptureReader {
        CaptureReader::from_reader(Box::new(Cursor::new(data.to_vec())), format, chunk_size)
    }

    #[test]
    fn test_raw_chunks() {
        let data: Vec<u8> = (0..=9).collect();
        let chunks: Vec<Vec<u8>> = reader(&data, CaptureFormat::Raw, 4)
            .map(|c| c.unwrap())
            .collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2], vec![8, 9]);
        assert_eq!(chunks.concat(), data);
    }

    #[test]
    fn test_raw_zero_chunk_size_reads_bytewise() {
        let mut r = reader(b"ab", CaptureFormat::Raw, 0);
        assert_eq!(r.next_chunk().unwrap(), Some(b"a".to_vec()));
        assert_eq!(r.next_chunk().unwrap(), Some(b"b".to_vec()));
        assert_eq!(r.next_chunk().unwrap(), None);
        assert_eq!(r.bytes_read, 2);
    }

    #[test]
    fn test_hex_lines() {
        let text = "# capture from the roof antenna\n\
                    D3 00 13 3E D7\n\
                    \n\
                    b562 0107 # NAV-PVT header\n\
                    zz\n\
                    0a0\n";
        let mut r = reader(text.as_bytes(), CaptureFormat::Hex, 4096);
        assert_eq!(r.next_chunk().unwrap(), Some(vec![0xD3, 0x00, 0x13, 0x3E, 0xD7]));
        assert_eq!(r.next_chunk().unwrap(), Some(vec![0xB5, 0x62, 0x01, 0x07]));
        assert_eq!(r.next_chunk().unwrap(), None);
        assert_eq!(r.bad_lines, 2);
        assert_eq!(r.bytes_read, 9);
    }

    #[test]
    fn test_clean_hex_line() {
        assert_eq!(clean_hex_line("  d3 00  \r\n"), Some("d3 00"));
        assert_eq!(clean_hex_line("# comment"), None);
        assert_eq!(clean_hex_line("   "), None);
        assert_eq!(clean_hex_line("24 47 # $G"), Some("24 47"));
    }

    #[test]
    fn test_open_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"$GNGGA,1*00\r\n").unwrap();
        let r = CaptureReader::open(file.path(), CaptureFormat::Raw, 5).unwrap();
        let bytes: Vec<u8> = r.map(|c| c.unwrap()).collect::<Vec<_>>().concat();
        assert_eq!(bytes, b"$GNGGA,1*00\r\n");
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CaptureReader::open(&dir.path().join("none.bin"), CaptureFormat::Raw, 16).is_err());
    }
}
