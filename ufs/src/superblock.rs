//! The single block-0 record describing a volume's layout.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::consts::{BSIZE, MAGIC, MAX_INODEBLOCKS};
use crate::dinode::IPB;

/// Block 0's contents: magic, total block count, where the bitmap and data
/// regions begin, how many inode blocks currently exist, and the scattered
/// list of those inode blocks' physical addresses.
#[repr(C)]
#[derive(Copy, Clone, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Superblock {
    pub magic: u32,
    pub size: u32,
    pub bitmap_start: u32,
    pub data_start: u32,
    pub ninodeblock: u32,
    pub inodeblock: [u32; MAX_INODEBLOCKS],
}

static_assertions::const_assert_eq!(core::mem::size_of::<Superblock>(), BSIZE);

impl Superblock {
    /// Builds a fresh superblock for a volume of `ncyl * nsec` blocks: the
    /// bitmap region immediately follows block 0 and is sized to cover every
    /// block in the volume, the data region (and lazily-allocated inode
    /// blocks within it) follows the bitmap, and no inode blocks exist yet.
    pub fn new(nblocks: u32) -> Self {
        let nbitmap = nblocks.div_ceil(crate::consts::BITS_PER_BLOCK).max(1);
        Self {
            magic: MAGIC,
            size: nblocks,
            bitmap_start: 1,
            data_start: 1 + nbitmap,
            ninodeblock: 0,
            inodeblock: [0; MAX_INODEBLOCKS],
        }
    }

    pub fn is_formatted(&self) -> bool {
        self.magic == MAGIC
    }

    /// Number of bitmap blocks this volume carries.
    pub fn nbitmap(&self) -> u32 {
        self.data_start - self.bitmap_start
    }

    /// Physical block number holding inode `inum`'s record.
    pub fn iblock(&self, inum: u32) -> Option<u32> {
        let idx = inum as usize / IPB;
        if idx >= self.ninodeblock as usize {
            return None;
        }
        Some(self.inodeblock[idx])
    }

    /// Largest inode number this volume's current inode blocks can hold,
    /// exclusive.
    pub fn ninodes(&self) -> u32 {
        self.ninodeblock * IPB as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_superblock_reserves_bitmap_region() {
        let sb = Superblock::new(4096 * 3);
        assert!(sb.is_formatted());
        assert_eq!(sb.bitmap_start, 1);
        assert!(sb.data_start > sb.bitmap_start);
    }

    #[test]
    fn iblock_is_none_before_any_inode_block_exists() {
        let sb = Superblock::new(4096);
        assert_eq!(sb.iblock(0), None);
    }
}
