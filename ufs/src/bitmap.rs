//! Linear-scan first-fit allocator over the volume's free-space bitmap.

use tracing::warn;

use crate::consts::BITS_PER_BLOCK;
use crate::error::AllocError;
use crate::volume::Volume;

fn locate(bno: u32) -> (u32, usize, u8) {
    let bit = bno % BITS_PER_BLOCK;
    let byte = (bit / 8) as usize;
    let mask = 1u8 << (bit % 8);
    (bno / BITS_PER_BLOCK, byte, mask)
}

/// Scans block numbers from the data region through the end of the volume,
/// returning and marking-allocated the first clear bit it finds. Block 0 is
/// reserved and can never be returned.
pub async fn allocate(volume: &mut Volume) -> Result<u32, AllocError> {
    let sb = volume.superblock().expect("volume must be formatted");
    let bitmap_start = sb.bitmap_start;
    let data_start = sb.data_start;
    let size = sb.size;

    let mut b = data_start;
    while b < size {
        let (rel_block, byte, mask) = locate(b);
        let bitmap_blk = bitmap_start + rel_block;
        let mut block = volume.read_block(bitmap_blk).await;
        if block[byte] & mask == 0 {
            block[byte] |= mask;
            volume.write_block(bitmap_blk, &block).await;
            let zero = [0u8; crate::consts::BSIZE];
            volume.write_block(b, &zero).await;
            return Ok(b);
        }
        b += 1;
    }
    Err(AllocError::NoSpace)
}

/// Clears the bit for `bno` and zero-fills the block. Refuses to free block
/// 0 or anything outside the volume, logging a warning instead of erroring
/// since freeing is usually best-effort cleanup in this codebase.
pub async fn free(volume: &mut Volume, bno: u32) {
    let sb = volume.superblock().expect("volume must be formatted");
    if bno == 0 || bno >= sb.size {
        warn!(bno, "refusing to free block 0 or an out-of-range block");
        return;
    }
    let bitmap_start = sb.bitmap_start;
    let (rel_block, byte, mask) = locate(bno);
    let bitmap_blk = bitmap_start + rel_block;
    let mut block = volume.read_block(bitmap_blk).await;
    block[byte] &= !mask;
    volume.write_block(bitmap_blk, &block).await;
    let zero = [0u8; crate::consts::BSIZE];
    volume.write_block(bno, &zero).await;
}

/// Marks `bno` allocated without scanning — used during `format` to reserve
/// block 0 and every bitmap block up front.
pub async fn mark_allocated(volume: &mut Volume, bno: u32) {
    let bitmap_start = volume.superblock().expect("volume must be formatted").bitmap_start;
    let (rel_block, byte, mask) = locate(bno);
    let bitmap_blk = bitmap_start + rel_block;
    let mut block = volume.read_block(bitmap_blk).await;
    block[byte] |= mask;
    volume.write_block(bitmap_blk, &block).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use crate::superblock::Superblock;
    use std::sync::Arc;

    async fn fresh_volume(nblocks: u32) -> Volume {
        let device = Arc::new(MemDisk::new(nblocks));
        let mut volume = Volume::new(device, 4);
        volume.set_superblock(Superblock::new(nblocks));
        volume.flush_superblock().await;
        volume
    }

    #[tokio::test]
    async fn allocate_skips_already_marked_blocks() {
        let mut volume = fresh_volume(4096).await;
        let data_start = volume.superblock().unwrap().data_start;
        mark_allocated(&mut volume, data_start).await;
        let b = allocate(&mut volume).await.unwrap();
        assert_eq!(b, data_start + 1);
    }

    #[tokio::test]
    async fn free_then_allocate_reuses_the_block() {
        let mut volume = fresh_volume(4096).await;
        let b = allocate(&mut volume).await.unwrap();
        free(&mut volume, b).await;
        let b2 = allocate(&mut volume).await.unwrap();
        assert_eq!(b, b2);
    }

    #[tokio::test]
    async fn freeing_block_zero_is_a_no_op() {
        let mut volume = fresh_volume(4096).await;
        free(&mut volume, 0).await;
        // Block 0 holds the superblock; it must remain intact.
        assert!(volume.superblock().unwrap().is_formatted());
    }
}
