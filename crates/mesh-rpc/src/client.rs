//! Minimal calling side: dial a listener, send one framed request, read
//! one framed response. Enough for command handlers and tests; anything
//! fancier (pooling, TLS verification policy) belongs to the caller.

use tokio::io::BufReader;
use tokio::net::TcpStream;

use crate::framing::{read_frame, write_frame, Framing};

/// Send one raw request to `addr` and return the raw response text.
pub async fn call_remote(addr: &str, framing: Framing, request: &str) -> std::io::Result<String> {
    let stream = TcpStream::connect(addr).await?;
    let (read_half, mut write_half) = tokio::io::split(stream);

    write_frame(&mut write_half, framing, request).await?;

    let mut reader = BufReader::new(read_half);
    match read_frame(&mut reader, framing).await? {
        Some(response) => Ok(response),
        None => Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed before a response arrived",
        )),
    }
}
