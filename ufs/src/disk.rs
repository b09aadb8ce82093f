//! `DiskClient`: the engine's side of the disk-simulator wire protocol.
//!
//! Translates block numbers into `(cyl, sec)` pairs and speaks `wire`'s `I`
//! / `R` / `W` requests over any `AsyncRead + AsyncWrite` transport —
//! normally a `tokio::net::TcpStream`, but any stream works, which is what
//! lets tests drive this against an in-process pipe instead of a socket.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tracing::warn;

use crate::consts::BSIZE;
use crate::device::BlockDevice;

#[derive(Debug, thiserror::Error)]
pub enum DiskClientError {
    #[error(transparent)]
    Wire(#[from] wire::WireError),
    #[error("disk did not reply with a valid geometry")]
    BadGeometry,
}

/// A connection to the disk simulator. The protocol is strictly
/// request/reply with no pipelining, so all access goes through the single
/// `stream` mutex: only one request may be in flight at a time.
pub struct DiskClient<S> {
    stream: Mutex<S>,
    ncyl: u32,
    nsec: u32,
}

impl<S> DiskClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Queries geometry over `stream` and wraps it as a client.
    pub async fn connect(mut stream: S) -> Result<Self, DiskClientError> {
        wire::write_frame(&mut stream, &wire::disk_geometry_request()).await?;
        let reply = wire::read_frame(&mut stream).await?;
        let (ncyl, nsec) = wire::parse_geometry_reply(&reply).ok_or(DiskClientError::BadGeometry)?;
        Ok(Self {
            stream: Mutex::new(stream),
            ncyl,
            nsec,
        })
    }

    pub fn geometry(&self) -> (u32, u32) {
        (self.ncyl, self.nsec)
    }

    fn locate(&self, bno: u32) -> (u32, u32) {
        (bno / self.nsec, bno % self.nsec)
    }
}

#[async_trait::async_trait]
impl<S> BlockDevice for DiskClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read_block(&self, bno: u32) -> [u8; BSIZE] {
        let (cyl, sec) = self.locate(bno);
        let mut stream = self.stream.lock().await;
        let result: Result<[u8; BSIZE], DiskClientError> = async {
            wire::write_frame(&mut *stream, &wire::disk_read_request(cyl, sec)).await?;
            let reply = wire::read_frame(&mut *stream).await?;
            wire::parse_read_reply(&reply).ok_or_else(|| wire::WireError::Closed.into())
        }
        .await;
        match result {
            Ok(block) => block,
            Err(e) => {
                warn!(bno, cyl, sec, error = %e, "read_block failed, returning zeroed block");
                [0u8; BSIZE]
            }
        }
    }

    async fn write_block(&self, bno: u32, data: &[u8; BSIZE]) {
        let (cyl, sec) = self.locate(bno);
        let mut stream = self.stream.lock().await;
        let result: Result<bool, DiskClientError> = async {
            wire::write_frame(&mut *stream, &wire::disk_write_request(cyl, sec, data)).await?;
            let reply = wire::read_frame(&mut *stream).await?;
            Ok(wire::parse_write_reply(&reply))
        }
        .await;
        match result {
            Ok(true) => {}
            Ok(false) => warn!(bno, cyl, sec, "write_block refused by disk"),
            Err(e) => warn!(bno, cyl, sec, error = %e, "write_block failed"),
        }
    }

    fn capacity(&self) -> Option<u32> {
        Some(self.ncyl * self.nsec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    /// Drives a `DiskClient` against an in-process disk simulator speaking
    /// the same wire protocol over a duplex pipe, so the client's framing
    /// and geometry math are exercised without a real socket.
    async fn toy_disk_server(mut server: impl AsyncRead + AsyncWrite + Unpin) {
        let mut blocks = vec![[0u8; BSIZE]; 4];
        loop {
            let frame = match wire::read_frame(&mut server).await {
                Ok(f) => f,
                Err(_) => return,
            };
            let text = String::from_utf8_lossy(&frame);
            let trimmed = text.trim_end_matches('\0');
            if trimmed == "I" {
                wire::write_frame(&mut server, b"Yes 2 2").await.unwrap();
            } else if let Some(rest) = trimmed.strip_prefix("R ") {
                let mut it = rest.split_whitespace();
                let cyl: u32 = it.next().unwrap().parse().unwrap();
                let sec: u32 = it.next().unwrap().parse().unwrap();
                let idx = (cyl * 2 + sec) as usize;
                let mut reply = b"Yes ".to_vec();
                reply.extend_from_slice(&blocks[idx]);
                wire::write_frame(&mut server, &reply).await.unwrap();
            } else if trimmed.starts_with("W ") {
                let header_len = "W ".len();
                let rest = &frame[header_len..];
                let mut fields = rest.splitn(4, |&b| b == b' ');
                let cyl: u32 = std::str::from_utf8(fields.next().unwrap()).unwrap().parse().unwrap();
                let sec: u32 = std::str::from_utf8(fields.next().unwrap()).unwrap().parse().unwrap();
                let len: usize = std::str::from_utf8(fields.next().unwrap()).unwrap().parse().unwrap();
                let payload = fields.next().unwrap();
                let idx = (cyl * 2 + sec) as usize;
                blocks[idx][..len].copy_from_slice(&payload[..len]);
                wire::write_frame(&mut server, b"Yes").await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn client_reads_geometry_and_roundtrips_a_block() {
        let (client_io, server_io) = duplex(4096);
        tokio::spawn(toy_disk_server(server_io));
        let client = DiskClient::connect(client_io).await.unwrap();
        assert_eq!(client.geometry(), (2, 2));

        let mut block = [0u8; BSIZE];
        block[0] = 7;
        client.write_block(3, &block).await;
        let got = client.read_block(3).await;
        assert_eq!(got[0], 7);
    }
}
