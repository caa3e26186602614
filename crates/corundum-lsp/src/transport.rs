// Copyright 2026 James Casey
// SPDX-License-Identifier: Apache-2.0

//! `Content-Length`-framed JSON-RPC transport.
//!
//! Each message is one or more `Header: value` lines, a blank line, then
//! exactly `Content-Length` bytes of UTF-8 JSON. Only `Content-Length` is
//! honored; other headers are skipped. Header lines accept `\n`, `\r\n`,
//! or a bare `\r` as terminators, and a final unterminated line at EOF is
//! delivered as a complete line.
//!
//! The transport is generic over its byte streams so the whole server loop
//! can be driven from in-memory buffers in tests.

use std::io::{self, BufRead, Write};

use serde_json::Value;
use thiserror::Error;
use tracing::trace;

/// A failure to frame or parse a message. The loop treats any of these as a
/// clean shutdown signal, not a crash.
#[derive(Debug, Error)]
pub enum FramingError {
    /// The underlying stream failed.
    #[error("i/o error on the protocol stream")]
    Io(#[from] io::Error),

    /// The message body was not valid JSON.
    #[error("json parse error")]
    Parse(#[from] serde_json::Error),
}

/// Reads one header line, tolerating all three line-terminator styles.
///
/// Returns `Ok(None)` at end of stream with nothing accumulated; a final
/// unterminated line is returned as a complete line and the next call
/// reports EOF.
fn read_header_line<R: BufRead>(reader: &mut R) -> io::Result<Option<String>> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        let n = reader.read(&mut byte)?;
        if n == 0 {
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }
        match byte[0] {
            b'\n' => break,
            b'\r' => {
                let buffered = reader.fill_buf()?;
                if buffered.first() == Some(&b'\n') {
                    reader.consume(1);
                }
                break;
            }
            byte => line.push(byte),
        }
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// The framed read/write pair the event loop owns.
pub struct Transport<R, W> {
    pub(crate) reader: R,
    pub(crate) writer: W,
}

impl<R: BufRead, W: Write> Transport<R, W> {
    /// Wraps a reader/writer pair.
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Reads the next framed JSON document.
    ///
    /// Returns `Ok(None)` on a clean end of stream — EOF before a complete
    /// header block, or a header block with no `Content-Length`.
    pub fn read_message(&mut self) -> Result<Option<Value>, FramingError> {
        let mut length: Option<usize> = None;
        loop {
            let Some(line) = read_header_line(&mut self.reader)? else {
                break;
            };
            trace!("raw read: {line}");
            if line.is_empty() {
                break;
            }
            if let Some(rest) = line.strip_prefix("Content-Length:") {
                if let Ok(n) = rest.trim().parse::<usize>() {
                    length = Some(n);
                }
            }
        }
        let Some(length) = length else {
            return Ok(None);
        };
        let mut body = vec![0u8; length];
        self.reader.read_exact(&mut body)?;
        let document = serde_json::from_slice(&body)?;
        Ok(Some(document))
    }

    /// Serializes and writes one framed JSON document, flushing after.
    pub fn write_message(&mut self, document: &Value) -> io::Result<()> {
        let body = document.to_string();
        trace!("write: {body}");
        write!(self.writer, "Content-Length: {}\r\n\r\n{body}", body.len())?;
        self.writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;

    fn transport_over(bytes: Vec<u8>) -> Transport<Cursor<Vec<u8>>, Vec<u8>> {
        Transport::new(Cursor::new(bytes), Vec::new())
    }

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    #[test]
    fn reads_a_framed_message() {
        let mut transport = transport_over(frame(r#"{"method":"initialized"}"#));
        let doc = transport.read_message().unwrap().unwrap();
        assert_eq!(doc["method"], "initialized");
    }

    #[test]
    fn accepts_bare_lf_and_bare_cr_terminators() {
        for sep in ["\n", "\r", "\r\n"] {
            let body = r#"{"x":1}"#;
            let bytes = format!("Content-Length: {}{sep}{sep}{body}", body.len()).into_bytes();
            let mut transport = transport_over(bytes);
            let doc = transport.read_message().unwrap().unwrap();
            assert_eq!(doc["x"], 1, "separator {sep:?}");
        }
    }

    #[test]
    fn ignores_other_headers() {
        let body = r#"{"ok":true}"#;
        let bytes = format!(
            "Content-Type: application/vscode-jsonrpc\r\nContent-Length: {}\r\nX-Extra: 1\r\n\r\n{body}",
            body.len()
        )
        .into_bytes();
        let mut transport = transport_over(bytes);
        let doc = transport.read_message().unwrap().unwrap();
        assert_eq!(doc["ok"], true);
    }

    #[test]
    fn eof_before_headers_is_clean() {
        let mut transport = transport_over(Vec::new());
        assert!(transport.read_message().unwrap().is_none());
    }

    #[test]
    fn headers_without_content_length_are_clean_eof() {
        let mut transport = transport_over(b"X-Whatever: 3\r\n\r\n".to_vec());
        assert!(transport.read_message().unwrap().is_none());
    }

    #[test]
    fn unterminated_final_header_line_is_still_a_line() {
        // The header line has no terminator at all; it is delivered, carries
        // no Content-Length that parses, and the stream then reports EOF.
        let mut transport = transport_over(b"Content-Length".to_vec());
        assert!(transport.read_message().unwrap().is_none());
    }

    #[test]
    fn garbage_body_is_a_parse_error() {
        let mut transport = transport_over(frame("not json"));
        assert!(matches!(
            transport.read_message(),
            Err(FramingError::Parse(_))
        ));
    }

    #[test]
    fn truncated_body_is_an_io_error() {
        let body = r#"{"x":1}"#;
        let bytes = format!("Content-Length: 999\r\n\r\n{body}").into_bytes();
        let mut transport = transport_over(bytes);
        assert!(matches!(transport.read_message(), Err(FramingError::Io(_))));
    }

    #[test]
    fn write_emits_content_length_and_flushes() {
        let mut transport = transport_over(Vec::new());
        transport.write_message(&json!({"id": 1})).unwrap();
        let written = String::from_utf8(transport.writer.clone()).unwrap();
        assert_eq!(written, "Content-Length: 8\r\n\r\n{\"id\":1}");
    }

    #[test]
    fn messages_round_trip_back_to_back() {
        let mut out = frame(r#"{"id":1}"#);
        out.extend(frame(r#"{"id":2}"#));
        let mut transport = transport_over(out);
        assert_eq!(transport.read_message().unwrap().unwrap()["id"], 1);
        assert_eq!(transport.read_message().unwrap().unwrap()["id"], 2);
        assert!(transport.read_message().unwrap().is_none());
    }
}
