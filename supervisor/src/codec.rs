//! Line-delimited JSON framing for the engine protocol.
//!
//! Each request and each response is one UTF-8 line terminated by `\n`.
//! [`LineReader`] and [`LineWriter`] wrap any async byte stream; the manager
//! uses them over TCP and the stub engine uses them on the server side.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum line size (64 MiB). Exported graphs of long-running sessions are large.
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line exceeds maximum of {MAX_LINE_BYTES} bytes")]
    TooLong,

    #[error("connection closed mid-line")]
    UnexpectedEof,

    #[error("line is not valid UTF-8")]
    NotUtf8,

    #[error("outgoing line contains an embedded newline")]
    EmbeddedNewline,
}

/// Reads newline-terminated lines from an async reader.
pub struct LineReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next line without its terminator (`\n` or `\r\n`).
    ///
    /// Returns `Ok(None)` on EOF at a line boundary.
    pub async fn read_line(&mut self) -> Result<Option<String>, CodecError> {
        let mut buf = Vec::new();
        let limit = (MAX_LINE_BYTES + 1) as u64;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut buf)
            .await?;

        if read == 0 {
            return Ok(None);
        }

        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        } else if buf.len() > MAX_LINE_BYTES {
            return Err(CodecError::TooLong);
        } else {
            return Err(CodecError::UnexpectedEof);
        }

        String::from_utf8(buf)
            .map(Some)
            .map_err(|_| CodecError::NotUtf8)
    }
}

/// Writes newline-terminated lines to an async writer.
pub struct LineWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write `line` followed by `\n` and flush.
    pub async fn write_line(&mut self, line: &str) -> Result<(), CodecError> {
        if line.contains(['\n', '\r']) {
            return Err(CodecError::EmbeddedNewline);
        }

        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Serialize `value` compactly and write it as one line.
    pub async fn write_json(&mut self, value: &serde_json::Value) -> Result<(), CodecError> {
        // Compact serialization escapes control characters, so the result is one line.
        self.write_line(&value.to_string()).await
    }
}
