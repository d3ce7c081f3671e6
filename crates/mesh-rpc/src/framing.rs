//! Message framing over stream sockets.
//!
//! Two conventions, selected at listener start: newline-delimited text,
//! and length-prefixed binary (4-byte big-endian payload length followed
//! by exactly that many bytes).

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single length-prefixed frame. A header above this is
/// treated as a protocol violation, not an allocation request.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// How messages are delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// One message per line, terminated by `\n`.
    Newline,
    /// 4-byte big-endian length header, then the payload.
    LengthPrefixed,
}

impl std::str::FromStr for Framing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newline" => Ok(Framing::Newline),
            "length_prefixed" => Ok(Framing::LengthPrefixed),
            other => Err(format!("unknown framing: {other}")),
        }
    }
}

/// Read one frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, framing: Framing) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match framing {
        Framing::Newline => {
            let mut line = String::new();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            Ok(Some(line))
        }
        Framing::LengthPrefixed => {
            let mut header = [0u8; 4];
            match reader.read_exact(&mut header).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e),
            }
            let len = u32::from_be_bytes(header);
            if len > MAX_FRAME_LEN {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
                ));
            }
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload).await?;
            let text = String::from_utf8(payload).map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
            Ok(Some(text))
        }
    }
}

/// Write one frame and flush it.
pub async fn write_frame<W>(
    writer: &mut W,
    framing: Framing,
    payload: &str,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    match framing {
        Framing::Newline => {
            writer.write_all(payload.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        Framing::LengthPrefixed => {
            let len = payload.len() as u32;
            writer.write_all(&len.to_be_bytes()).await?;
            writer.write_all(payload.as_bytes()).await?;
        }
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn test_newline_roundtrip() {
        let (receiver, mut sender) = tokio::io::duplex(1024);

        write_frame(&mut sender, Framing::Newline, r#"{"a":1}"#)
            .await
            .unwrap();
        drop(sender);

        let mut reader = BufReader::new(receiver);
        let frame = read_frame(&mut reader, Framing::Newline).await.unwrap();
        assert_eq!(frame.as_deref(), Some(r#"{"a":1}"#));
        assert!(read_frame(&mut reader, Framing::Newline)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_length_prefixed_roundtrip() {
        let (receiver, mut sender) = tokio::io::duplex(1024);

        write_frame(&mut sender, Framing::LengthPrefixed, "hello")
            .await
            .unwrap();
        write_frame(&mut sender, Framing::LengthPrefixed, "world")
            .await
            .unwrap();
        drop(sender);

        let mut reader = BufReader::new(receiver);
        assert_eq!(
            read_frame(&mut reader, Framing::LengthPrefixed)
                .await
                .unwrap()
                .as_deref(),
            Some("hello")
        );
        assert_eq!(
            read_frame(&mut reader, Framing::LengthPrefixed)
                .await
                .unwrap()
                .as_deref(),
            Some("world")
        );
        assert!(read_frame(&mut reader, Framing::LengthPrefixed)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_oversized_header_rejected() {
        let (receiver, mut sender) = tokio::io::duplex(64);

        sender.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let mut reader = BufReader::new(receiver);
        let err = read_frame(&mut reader, Framing::LengthPrefixed)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
