//! Directories: fixed-size entry records packed into an otherwise ordinary
//! file, plus recursive subtree teardown.

use tracing::warn;
use zerocopy::{FromBytes, IntoBytes};

use crate::dinode::DirEntry;
use crate::error::DirError;
use crate::inode::{self, Inode};
use crate::types::InodeType;
use crate::volume::Volume;

const ENTRY_SIZE: usize = core::mem::size_of::<DirEntry>();

async fn read_entry_at(volume: &mut Volume, dir: &Inode, off: u32) -> DirEntry {
    let mut buf = [0u8; ENTRY_SIZE];
    let _ = inode::readi(volume, dir, &mut buf, off).await;
    DirEntry::read_from_bytes(&buf).unwrap_or_default()
}

async fn write_entry_at(volume: &mut Volume, dir: &mut Inode, off: u32, entry: &DirEntry) {
    let _ = inode::writei(volume, dir, entry.as_bytes(), off).await;
}

/// Linear scan of `dir`'s entries for one named `name`. Skips tombstones
/// (zeroed, `inum == 0`).
pub async fn dir_lookup(volume: &mut Volume, dir: &Inode, name: &str) -> Option<(InodeType, u32)> {
    let mut off = 0u32;
    while off < dir.size {
        let entry = read_entry_at(volume, dir, off).await;
        if !entry.is_free() && entry.name_str() == name {
            let typ = InodeType::try_from(entry.typ as u16).ok()?;
            return Some((typ, entry.inum));
        }
        off += ENTRY_SIZE as u32;
    }
    None
}

/// Appends a new entry to `dir`. Rejects a duplicate name.
pub async fn dir_add(
    volume: &mut Volume,
    dir: &mut Inode,
    name: &str,
    typ: InodeType,
    inum: u32,
    owner: u32,
    perm: u16,
) -> Result<(), DirError> {
    if dir_lookup(volume, dir, name).await.is_some() {
        return Err(DirError::AlreadyExists);
    }
    let mut entry = DirEntry::default();
    entry.set_name(name);
    entry.typ = typ as u32;
    entry.inum = inum;
    entry.owner = owner;
    entry.perm = perm as u32;
    let off = dir.size;
    write_entry_at(volume, dir, off, &entry).await;
    Ok(())
}

/// Zeroes `name`'s entry in place. The directory file does not shrink: the
/// slot becomes a tombstone that later lookups and listings skip, and later
/// adds still append rather than reuse it (an accepted design limitation
/// carried over from the system this repository is based on).
pub async fn dir_remove(volume: &mut Volume, dir: &mut Inode, name: &str) -> Result<(), DirError> {
    let mut off = 0u32;
    while off < dir.size {
        let entry = read_entry_at(volume, dir, off).await;
        if !entry.is_free() && entry.name_str() == name {
            write_entry_at(volume, dir, off, &DirEntry::default()).await;
            return Ok(());
        }
        off += ENTRY_SIZE as u32;
    }
    Err(DirError::NotFound)
}

/// Enumerates `dir`'s live entries (skipping `.`, `..`, and tombstones).
pub async fn list_entries(volume: &mut Volume, dir: &Inode) -> Vec<DirEntry> {
    let mut out = Vec::new();
    let mut off = 0u32;
    while off < dir.size {
        let entry = read_entry_at(volume, dir, off).await;
        if !entry.is_free() && entry.name_str() != "." && entry.name_str() != ".." {
            out.push(entry);
        }
        off += ENTRY_SIZE as u32;
    }
    out
}

/// Recursive sum of every file's byte size transitively contained in
/// `dir`, used by `ls` to report a directory's displayed size.
pub async fn calc_total_file_size(volume: &mut Volume, dir: &Inode) -> u64 {
    let mut total = 0u64;
    for entry in list_entries(volume, dir).await {
        match InodeType::try_from(entry.typ as u16) {
            Ok(InodeType::File) => {
                if let Ok(Some(child)) = inode::iget(volume, entry.inum).await {
                    total += child.size as u64;
                }
            }
            Ok(InodeType::Dir) => {
                if let Ok(Some(child)) = inode::iget(volume, entry.inum).await {
                    total += Box::pin(calc_total_file_size(volume, &child)).await;
                }
            }
            _ => {}
        }
    }
    total
}

/// Deletes `ip` and, if it's a directory, everything beneath it. A child
/// inode that fails to load (a corrupt entry) is logged and skipped; the
/// walk continues rather than aborting, since there is no journal to roll
/// back to.
pub async fn recursive_delete(volume: &mut Volume, ip: Inode) {
    if ip.typ == InodeType::Dir {
        for entry in list_entries(volume, &ip).await {
            match inode::iget(volume, entry.inum).await {
                Ok(Some(child)) => Box::pin(recursive_delete(volume, child)).await,
                Ok(None) => {}
                Err(e) => warn!(inum = entry.inum, error = %e, "recursive_delete: failed to load child, skipping"),
            }
        }
    }
    if let Err(e) = inode::free_data_blocks(volume, &ip).await {
        warn!(inum = ip.inum, error = %e, "recursive_delete: failed to free data blocks");
    }
    if let Err(e) = inode::ifree(volume, ip.inum).await {
        warn!(inum = ip.inum, error = %e, "recursive_delete: failed to free inode");
    }
}

/// Populates a freshly allocated directory's `.` and `..` entries.
pub async fn init_dir_entries(volume: &mut Volume, dir: &mut Inode, parent_inum: u32, owner: u32, perm: u16) {
    let mut dot = DirEntry::default();
    dot.set_name(".");
    dot.typ = InodeType::Dir as u32;
    dot.inum = dir.inum;
    dot.owner = owner;
    dot.perm = perm as u32;
    write_entry_at(volume, dir, 0, &dot).await;

    let mut dotdot = DirEntry::default();
    dotdot.set_name("..");
    dotdot.typ = InodeType::Dir as u32;
    dotdot.inum = parent_inum;
    dotdot.owner = owner;
    dotdot.perm = perm as u32;
    write_entry_at(volume, dir, ENTRY_SIZE as u32, &dotdot).await;
}
