//! Simulated seek-timed block device.
//!
//! Grounded in `disk.c`/`server.c` from the originating course project: a
//! disk is a flat file of `ncyl * nsec` fixed-size blocks, a "current
//! cylinder" register tracks the last cylinder served, and every request
//! sleeps `abs(cyl - cur_cyl) * ttd` milliseconds before touching the backing
//! file to simulate a track-to-track seek.

use std::io;
use std::path::Path;
use std::time::Duration;

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

pub use wire::BSIZE;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("cylinder {cyl} or sector {sec} out of range (ncyl={ncyl}, nsec={nsec})")]
    OutOfRange { cyl: u32, sec: u32, ncyl: u32, nsec: u32 },
    #[error("write payload of {0} bytes exceeds block size {BSIZE}")]
    PayloadTooLarge(usize),
    #[error(transparent)]
    Io(#[from] io::Error),
}

struct DiskState {
    file: File,
    cur_cyl: u32,
}

/// A single simulated disk: `ncyl` cylinders of `nsec` sectors each, one
/// [`BSIZE`]-byte block per sector.
pub struct Disk {
    state: Mutex<DiskState>,
    ncyl: u32,
    nsec: u32,
    ttd_ms: u64,
}

impl Disk {
    /// Opens (creating if absent) the backing file and stretches it to the
    /// full volume size, mirroring `init_disk`'s `ftruncate` call.
    pub async fn open(path: impl AsRef<Path>, ncyl: u32, nsec: u32, ttd_ms: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .await?;
        let size = BSIZE as u64 * ncyl as u64 * nsec as u64;
        file.set_len(size).await?;
        Ok(Self {
            state: Mutex::new(DiskState { file, cur_cyl: 0 }),
            ncyl,
            nsec,
            ttd_ms,
        })
    }

    pub fn geometry(&self) -> (u32, u32) {
        (self.ncyl, self.nsec)
    }

    fn validate(&self, cyl: u32, sec: u32) -> Result<(), DiskError> {
        if cyl >= self.ncyl || sec >= self.nsec {
            return Err(DiskError::OutOfRange { cyl, sec, ncyl: self.ncyl, nsec: self.nsec });
        }
        Ok(())
    }

    /// Sleeps the simulated seek time and updates the current-cylinder
    /// register. Caller already holds `state`.
    async fn seek(&self, state: &mut DiskState, cyl: u32) {
        let delta = cyl.abs_diff(state.cur_cyl) as u64;
        if delta > 0 && self.ttd_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delta * self.ttd_ms)).await;
        }
        state.cur_cyl = cyl;
    }

    pub async fn read(&self, cyl: u32, sec: u32) -> Result<[u8; BSIZE], DiskError> {
        self.validate(cyl, sec)?;
        let mut state = self.state.lock().await;
        self.seek(&mut state, cyl).await;
        let offset = BSIZE as u64 * (cyl as u64 * self.nsec as u64 + sec as u64);
        state.file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = [0u8; BSIZE];
        state.file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    pub async fn write(&self, cyl: u32, sec: u32, data: &[u8]) -> Result<(), DiskError> {
        self.validate(cyl, sec)?;
        if data.len() > BSIZE {
            return Err(DiskError::PayloadTooLarge(data.len()));
        }
        let mut block = [0u8; BSIZE];
        block[..data.len()].copy_from_slice(data);

        let mut state = self.state.lock().await;
        self.seek(&mut state, cyl).await;
        let offset = BSIZE as u64 * (cyl as u64 * self.nsec as u64 + sec as u64);
        state.file.seek(io::SeekFrom::Start(offset)).await?;
        state.file.write_all(&block).await?;
        state.file.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::open(dir.path().join("disk.img"), 2, 4, 0).await.unwrap();
        disk.write(1, 2, b"hello").await.unwrap();
        let block = disk.read(1, 2).await.unwrap();
        assert_eq!(&block[..5], b"hello");
        assert!(block[5..].iter().all(|&b| b == 0));
    }

    #[tokio::test]
    async fn out_of_range_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::open(dir.path().join("disk.img"), 2, 4, 0).await.unwrap();
        assert!(disk.read(5, 0).await.is_err());
        assert!(disk.write(0, 9, b"x").await.is_err());
    }

    #[tokio::test]
    async fn oversized_write_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let disk = Disk::open(dir.path().join("disk.img"), 1, 1, 0).await.unwrap();
        let too_big = vec![0u8; BSIZE + 1];
        assert!(disk.write(0, 0, &too_big).await.is_err());
    }
}
