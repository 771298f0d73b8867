//! JSON-RPC wire framing.
//!
//! Every message to or from a language server is one frame:
//!
//! ```text
//! Content-Length: <N>\r\n
//! \r\n
//! <N bytes of UTF-8 JSON>
//! ```
//!
//! The decoder tolerates unknown headers (servers send `Content-Type`),
//! loops partial reads until the body is complete, and holds at most one
//! frame at a time. A missing or non-numeric `Content-Length` is a
//! protocol error, not a crash.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Writes one framed message.
pub async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message)
        .map_err(|e| Error::Protocol(format!("unserializable message: {e}")))?;
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one framed message.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. EOF inside a
/// header or body is a protocol error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut line = String::new();
    let mut in_frame = false;

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            if in_frame {
                return Err(Error::Protocol("eof inside frame header".to_string()));
            }
            return Ok(None);
        }
        in_frame = true;

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        let Some((name, value)) = trimmed.split_once(':') else {
            return Err(Error::Protocol(format!("malformed header line: {trimmed}")));
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            let parsed = value.trim().parse::<usize>().map_err(|_| {
                Error::Protocol(format!("non-numeric Content-Length: {}", value.trim()))
            })?;
            content_length = Some(parsed);
        }
        // Any other header is ignored.
    }

    let len = content_length
        .ok_or_else(|| Error::Protocol("missing Content-Length header".to_string()))?;

    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| Error::Protocol(format!("eof inside frame body: {e}")))?;

    serde_json::from_slice(&body)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("invalid JSON payload: {e}")))
}
