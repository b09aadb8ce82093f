//! On-disk layout constants shared by every layer of the engine.

pub use wire::BSIZE;

/// Number of direct block addresses an inode carries.
pub const NDIRECT: usize = 8;

/// Length of an inode's address table: `NDIRECT` direct slots, one
/// single-indirect slot, and one reserved (unused) second-indirect slot.
pub const NADDRS: usize = NDIRECT + 2;

/// Index of the single-indirect address within an inode's table.
pub const INDIRECT_SLOT: usize = NDIRECT;

/// Addresses per block: how many `u32` block numbers fit in one indirect
/// block.
pub const APB: usize = BSIZE / core::mem::size_of::<u32>();

/// Largest logical block number an inode can address through direct and
/// single-indirect entries.
pub const MAXFILE: usize = NDIRECT + APB;

/// Longest name (excluding NUL padding) a directory entry can hold.
pub const MAXNAME: usize = 12;

/// Superblock magic number identifying a formatted volume.
pub const MAGIC: u32 = 0x2303_A514;

/// Length of the superblock's `inodeblock` array: the inode region is a
/// scattered list of blocks, not a contiguous range, so this bounds how many
/// inode blocks a volume can ever grow to hold.
pub const MAX_INODEBLOCKS: usize = 123;

/// Bits covered by a single bitmap block (one bit per volume block).
pub const BITS_PER_BLOCK: u32 = (BSIZE * 8) as u32;

/// Root directory's inode number.
pub const ROOTINO: u32 = 0;

/// Reserved uid for the superuser; cannot log out, can bypass permission
/// checks.
pub const SUPERUSER: u32 = 1;

/// Permission levels. None grants no access; Read allows `cat`/`ls`/`cd`;
/// ReadWrite additionally allows mutation.
pub mod perm {
    pub const NONE: u16 = 0;
    pub const READ: u16 = 1;
    pub const READ_WRITE: u16 = 2;
}
