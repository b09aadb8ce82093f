//! Shared wire encoding for the disk simulator and the file-system service.
//!
//! Both services exchange NUL-terminated text commands (and, for the disk
//! backend's `R`/`W` verbs, a raw 512-byte block payload glued onto the text
//! header). A bare NUL-scan is not safe framing once binary payloads are in
//! play — a data block or a `w`/`i` argument can legitimately contain a zero
//! byte — so every message is carried inside a 4-byte big-endian length
//! prefix on the wire. The NUL terminator some messages still carry is a
//! leftover convenience for C string handling on the original side; callers
//! here never rely on it to find the end of a message.

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size in bytes of a disk block, the unit of all I/O between the file
/// system and the disk simulator.
pub const BSIZE: usize = 512;

/// Largest frame this crate will read before giving up and returning an
/// error. Generous relative to the largest legitimate payload (`BSIZE` plus a
/// short text header), guards against a misbehaving peer driving unbounded
/// allocation.
const MAX_FRAME: u32 = 1 << 20;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("peer closed the connection")]
    Closed,
    #[error("frame of {0} bytes exceeds the {MAX_FRAME} byte limit")]
    TooLarge(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Reads one length-prefixed frame from `stream`.
///
/// Returns [`WireError::Closed`] if the peer closes before a length prefix
/// arrives (a clean EOF between messages); any other truncation surfaces as
/// an I/O error through `AsyncReadExt`.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, WireError> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Err(WireError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME {
        return Err(WireError::TooLarge(len));
    }
    let mut body = vec![0u8; len as usize];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Writes `body` as one length-prefixed frame to `stream`.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, body: &[u8]) -> Result<(), WireError> {
    let len = u32::try_from(body.len()).map_err(|_| WireError::TooLarge(u32::MAX))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;
    Ok(())
}

/// Text reply prefix the disk backend and the file-system service both use
/// for an affirmative reply that carries no further structured payload.
pub const YES: &[u8] = b"Yes";
/// Text reply for a refused request.
pub const NO: &[u8] = b"No";

/// Builds the `I` geometry request.
pub fn disk_geometry_request() -> Vec<u8> {
    b"I\0".to_vec()
}

/// Parses a reply to `I`: `Yes <ncyl> <nsec>`.
pub fn parse_geometry_reply(body: &[u8]) -> Option<(u32, u32)> {
    let text = std::str::from_utf8(body).ok()?.trim_end_matches('\0');
    let rest = text.strip_prefix("Yes ")?;
    let mut parts = rest.split_whitespace();
    let ncyl = parts.next()?.parse().ok()?;
    let nsec = parts.next()?.parse().ok()?;
    Some((ncyl, nsec))
}

/// Builds the `R <cyl> <sec>` request.
pub fn disk_read_request(cyl: u32, sec: u32) -> Vec<u8> {
    format!("R {cyl} {sec}\0").into_bytes()
}

/// Parses a reply to `R`: `Yes ` followed by exactly [`BSIZE`] raw bytes, or
/// `No` on failure.
pub fn parse_read_reply(body: &[u8]) -> Option<[u8; BSIZE]> {
    let prefix = b"Yes ";
    if body.len() < prefix.len() + BSIZE || &body[..prefix.len()] != prefix {
        return None;
    }
    let mut block = [0u8; BSIZE];
    block.copy_from_slice(&body[prefix.len()..prefix.len() + BSIZE]);
    Some(block)
}

/// Builds the `W <cyl> <sec> <len> <payload>` request. `data` must be at
/// most [`BSIZE`] bytes; shorter writes zero-fill the remainder of the block
/// on the disk side.
pub fn disk_write_request(cyl: u32, sec: u32, data: &[u8]) -> Vec<u8> {
    let header = format!("W {cyl} {sec} {} ", data.len());
    let mut out = Vec::with_capacity(header.len() + data.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(data);
    out
}

/// Parses a reply to `W`: `true` for `Yes`, `false` for anything else.
pub fn parse_write_reply(body: &[u8]) -> bool {
    body.starts_with(YES)
}

/// Builds the `E` request that tears down a disk connection.
pub fn disk_exit_request() -> Vec<u8> {
    b"E\0".to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_roundtrip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello").await.unwrap();
        let mut cursor = std::io::Cursor::new(buf);
        let got = read_frame(&mut cursor).await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn read_frame_on_empty_stream_is_closed() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        let err = read_frame(&mut cursor).await.unwrap_err();
        assert!(matches!(err, WireError::Closed));
    }

    #[test]
    fn geometry_roundtrip() {
        let (ncyl, nsec) = parse_geometry_reply(b"Yes 4 8").unwrap();
        assert_eq!((ncyl, nsec), (4, 8));
    }

    #[test]
    fn read_reply_requires_exact_block_size() {
        let mut body = b"Yes ".to_vec();
        body.extend_from_slice(&[7u8; BSIZE]);
        let block = parse_read_reply(&body).unwrap();
        assert_eq!(block[0], 7);
        assert_eq!(block.len(), BSIZE);
        assert!(parse_read_reply(b"No").is_none());
    }

    #[test]
    fn write_request_formats_header() {
        let req = disk_write_request(1, 2, b"ab");
        assert_eq!(req, b"W 1 2 2 ab".to_vec());
    }
}
