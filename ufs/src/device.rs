//! Block-device abstraction: the cache and everything above it talks to
//! whatever implements [`BlockDevice`], whether that's a real disk-simulator
//! connection or an in-memory double used in tests.

use async_trait::async_trait;

use crate::consts::BSIZE;

/// A device that serves fixed-size block reads and writes. Matches
/// `block.c`'s `read_block`/`write_block` contract: failures are logged by
/// the implementation, not surfaced as an error, so callers always get a
/// block-shaped buffer back (zeroed on a failed read).
#[async_trait]
pub trait BlockDevice: Send + Sync {
    async fn read_block(&self, bno: u32) -> [u8; BSIZE];
    async fn write_block(&self, bno: u32, data: &[u8; BSIZE]);

    /// Total addressable blocks, if known. `None` when the device doesn't
    /// track a fixed geometry (not expected in practice, but kept so the
    /// trait doesn't force every implementor to know its own size up front).
    fn capacity(&self) -> Option<u32> {
        None
    }
}

/// In-memory block device used by unit tests so the engine's algorithms can
/// be exercised without a live `diskd` connection.
pub struct MemDisk {
    blocks: tokio::sync::Mutex<Vec<[u8; BSIZE]>>,
}

impl MemDisk {
    pub fn new(nblocks: u32) -> Self {
        Self {
            blocks: tokio::sync::Mutex::new(vec![[0u8; BSIZE]; nblocks as usize]),
        }
    }
}

#[async_trait]
impl BlockDevice for MemDisk {
    async fn read_block(&self, bno: u32) -> [u8; BSIZE] {
        let blocks = self.blocks.lock().await;
        blocks
            .get(bno as usize)
            .copied()
            .unwrap_or_else(|| [0u8; BSIZE])
    }

    async fn write_block(&self, bno: u32, data: &[u8; BSIZE]) {
        let mut blocks = self.blocks.lock().await;
        if let Some(slot) = blocks.get_mut(bno as usize) {
            *slot = *data;
        }
    }

    fn capacity(&self) -> Option<u32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mem_disk_write_then_read_roundtrips() {
        let disk = MemDisk::new(4);
        let mut block = [0u8; BSIZE];
        block[0] = 42;
        disk.write_block(2, &block).await;
        let got = disk.read_block(2).await;
        assert_eq!(got[0], 42);
    }

    #[tokio::test]
    async fn mem_disk_out_of_range_read_is_zeroed() {
        let disk = MemDisk::new(1);
        let got = disk.read_block(99).await;
        assert_eq!(got, [0u8; BSIZE]);
    }
}
