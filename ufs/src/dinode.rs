//! On-disk record layouts.
//!
//! `Dinode` and `DirEntry` are read from and written to raw 512-byte block
//! buffers via `zerocopy`, the same technique the teacher's kernel uses for
//! its own `Dinode`/`Dirent` (`fs/ufs/inode.rs`): no manual byte-twiddling,
//! just a `#[repr(C)]` struct with derived (de)serialization.

use static_assertions::const_assert_eq;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::consts::{BSIZE, MAXNAME, NADDRS};

/// Packed on-disk inode record. `BSIZE % size_of::<Dinode>() == 0` is
/// asserted below so inode blocks always hold a whole number of records.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Dinode {
    /// `InodeType` discriminant; 0 means the slot is free.
    pub typ: u16,
    pub perm: u16,
    pub size: u32,
    pub nblocks: u32,
    pub addrs: [u32; NADDRS],
    pub mtime: u32,
    pub ctime: u32,
    pub owner: u32,
}

const_assert_eq!(BSIZE % core::mem::size_of::<Dinode>(), 0);

/// Number of `Dinode` records packed into one block.
pub const IPB: usize = BSIZE / core::mem::size_of::<Dinode>();

/// Packed on-disk directory-entry record. A zeroed record (`inum == 0` and
/// an all-zero `name`) is a tombstone: a slot that once named something but
/// has been removed without shrinking the directory file.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct DirEntry {
    pub name: [u8; MAXNAME],
    /// `InodeType` discriminant of the entry's target.
    pub typ: u32,
    pub inum: u32,
    pub size: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub owner: u32,
    pub perm: u32,
}

impl DirEntry {
    /// A tombstone is an all-zero record. Checking the name rather than
    /// `inum == 0` matters here because `ROOTINO == 0`: the root's own `.`
    /// and `..` entries legitimately point at inode 0.
    pub fn is_free(&self) -> bool {
        self.name[0] == 0
    }

    pub fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(MAXNAME);
        core::str::from_utf8(&self.name[..len]).unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; MAXNAME];
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAXNAME);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }
}
