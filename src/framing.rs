//! Newline framing with a size cap.

use std::io::{self, BufRead, Read, Write};
use thiserror::Error;

/// Default cap on a request line, newline excluded.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("line exceeded {limit} bytes without a newline")]
    TooLarge { limit: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read up to the first `\n`, holding at most `max_bytes` of payload.
///
/// Returns `Ok(None)` on EOF before any byte. A final line without a
/// newline is returned as is. The newline (and a preceding `\r`) is
/// stripped.
pub fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    max_bytes: usize,
) -> Result<Option<Vec<u8>>, FramingError> {
    let mut buf = Vec::new();
    let read = reader
        .by_ref()
        .take(max_bytes as u64 + 1)
        .read_until(b'\n', &mut buf)?;

    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(Some(buf));
    }

    if buf.len() > max_bytes {
        return Err(FramingError::TooLarge { limit: max_bytes });
    }

    Ok(Some(buf))
}

/// Write one already-terminated NDJSON line and flush.
pub fn write_line<W: Write>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(line.as_bytes())?;
    writer.flush()
}
