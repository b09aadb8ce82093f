//! `diskd` — the simulated disk backend service.
//!
//! Speaks the wire protocol from `wire::disk_*`: `I` for geometry, `R cyl
//! sec` / `W cyl sec len data` for block I/O, `E` to end the connection.

use std::sync::Arc;

use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use disk::Disk;
use wire::{read_frame, write_frame, BSIZE};

/// Simulated seek-timed block device service.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the backing file for the disk image.
    file: String,
    /// Number of cylinders.
    ncyl: u32,
    /// Sectors per cylinder.
    nsec: u32,
    /// Track-to-track seek delay in milliseconds.
    ttd: u64,
    /// TCP port to listen on.
    port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let disk = Arc::new(Disk::open(&args.file, args.ncyl, args.nsec, args.ttd).await?);
    info!(file = %args.file, ncyl = args.ncyl, nsec = args.nsec, ttd = args.ttd, "disk initialized");

    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!(port = args.port, "diskd listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let disk = Arc::clone(&disk);
        tokio::spawn(async move {
            info!(%peer, "client connected");
            if let Err(e) = handle_connection(socket, disk).await {
                warn!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn handle_connection(mut socket: TcpStream, disk: Arc<Disk>) -> anyhow::Result<()> {
    loop {
        let frame = match read_frame(&mut socket).await {
            Ok(f) => f,
            Err(wire::WireError::Closed) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&frame);
        let trimmed = text.trim_end_matches('\0');
        let mut parts = trimmed.splitn(2, ' ');
        let verb = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("");

        let reply = match verb {
            "I" => handle_geometry(&disk),
            "R" => handle_read(&disk, rest).await,
            "W" => handle_write(&disk, frame.splitn(2, |&b| b == b' ').nth(1).unwrap_or(b"")).await,
            "E" => {
                write_frame(&mut socket, b"Bye!\0").await?;
                return Ok(());
            }
            _ => b"No".to_vec(),
        };
        write_frame(&mut socket, &reply).await?;
    }
}

fn handle_geometry(disk: &Disk) -> Vec<u8> {
    let (ncyl, nsec) = disk.geometry();
    format!("Yes {ncyl} {nsec}").into_bytes()
}

async fn handle_read(disk: &Disk, args: &str) -> Vec<u8> {
    let mut it = args.split_whitespace();
    let cyl: Option<u32> = it.next().and_then(|s| s.parse().ok());
    let sec: Option<u32> = it.next().and_then(|s| s.parse().ok());
    let (Some(cyl), Some(sec)) = (cyl, sec) else {
        warn!(args, "invalid READ request");
        return b"No".to_vec();
    };
    match disk.read(cyl, sec).await {
        Ok(block) => {
            let mut reply = Vec::with_capacity(4 + BSIZE);
            reply.extend_from_slice(b"Yes ");
            reply.extend_from_slice(&block);
            reply
        }
        Err(e) => {
            warn!(cyl, sec, error = %e, "read_block failed");
            b"No".to_vec()
        }
    }
}

/// `args` is everything after the `W ` verb: `<cyl> <sec> <len> <payload>`,
/// where `<payload>` is exactly `<len>` raw bytes that may contain spaces or
/// NULs — so only the first three space-delimited fields are tokenized, and
/// the payload is sliced out by byte offset rather than re-tokenized.
async fn handle_write(disk: &Disk, args: &[u8]) -> Vec<u8> {
    let mut fields = args.splitn(4, |&b| b == b' ');
    let parse_u32 = |f: Option<&[u8]>| f.and_then(|f| std::str::from_utf8(f).ok()).and_then(|s| s.parse::<u32>().ok());
    let cyl = parse_u32(fields.next());
    let sec = parse_u32(fields.next());
    let len = parse_u32(fields.next()).map(|l| l as usize);
    let payload = fields.next().unwrap_or(b"");

    let (Some(cyl), Some(sec), Some(len)) = (cyl, sec, len) else {
        warn!("invalid WRITE header");
        return b"No".to_vec();
    };
    if len == 0 || len > BSIZE {
        warn!(len, "invalid WRITE data length");
        return b"No".to_vec();
    }
    if payload.len() < len {
        warn!(expected = len, got = payload.len(), "truncated WRITE payload");
        return b"No".to_vec();
    }
    match disk.write(cyl, sec, &payload[..len]).await {
        Ok(()) => b"Yes".to_vec(),
        Err(e) => {
            warn!(cyl, sec, error = %e, "write_block failed");
            b"No".to_vec()
        }
    }
}
