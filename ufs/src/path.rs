//! Path resolution: splitting on `/`, walking `.`/`..`, and looking up the
//! remaining components through the directory layer.

use crate::dir;
use crate::error::DirError;
use crate::inode::{self, Inode};
use crate::types::InodeType;
use crate::volume::Volume;

/// Resolves `path` starting from `root` (used for a leading `/`) or `cwd`
/// (otherwise), returning the final inode and the name of its last
/// component (empty if the path ended in `/` or was entirely `.`/`..`).
pub async fn resolve_path(
    volume: &mut Volume,
    root: &Inode,
    cwd: &Inode,
    path: &str,
) -> Result<(Inode, String), DirError> {
    if path.is_empty() {
        return Err(DirError::NotFound);
    }

    let mut current = if path.starts_with('/') { root.clone() } else { cwd.clone() };
    let mut last_name = String::new();

    let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if components.is_empty() {
        // Path was "/" or a run of slashes: resolves to root itself.
        return Ok((root.clone(), String::new()));
    }

    for (i, comp) in components.iter().enumerate() {
        let is_last = i == components.len() - 1;
        if *comp == "." {
            last_name = String::new();
            continue;
        }
        if current.typ != InodeType::Dir {
            return Err(DirError::NotADirectory);
        }
        let (_, inum) = dir::dir_lookup(volume, &current, comp).await.ok_or(DirError::NotFound)?;
        current = inode::iget(volume, inum)
            .await?
            .ok_or(DirError::NotFound)?;
        last_name = if is_last { comp.to_string() } else { String::new() };
    }

    Ok((current, last_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use crate::superblock::Superblock;
    use std::sync::Arc;

    async fn fresh_root(nblocks: u32) -> (Volume, Inode) {
        let device = Arc::new(MemDisk::new(nblocks));
        let mut volume = Volume::new(device, 4);
        volume.set_superblock(Superblock::new(nblocks));
        volume.flush_superblock().await;
        let mut root = inode::ialloc(&mut volume, InodeType::Dir, 1).await.unwrap();
        dir::init_dir_entries(&mut volume, &mut root, root.inum, 1, 1).await;
        (volume, root)
    }

    #[tokio::test]
    async fn resolves_nested_absolute_path() {
        let (mut volume, root) = fresh_root(4096).await;
        let mut sub = inode::ialloc(&mut volume, InodeType::Dir, 1).await.unwrap();
        dir::init_dir_entries(&mut volume, &mut sub, root.inum, 1, 1).await;
        let mut root_mut = root.clone();
        dir::dir_add(&mut volume, &mut root_mut, "sub", InodeType::Dir, sub.inum, 1, 1).await.unwrap();

        let (resolved, name) = resolve_path(&mut volume, &root, &root_mut, "/sub").await.unwrap();
        assert_eq!(resolved.inum, sub.inum);
        assert_eq!(name, "sub");
    }

    #[tokio::test]
    async fn dotdot_walks_up_to_parent() {
        let (mut volume, root) = fresh_root(4096).await;
        let mut sub = inode::ialloc(&mut volume, InodeType::Dir, 1).await.unwrap();
        dir::init_dir_entries(&mut volume, &mut sub, root.inum, 1, 1).await;

        let (resolved, _) = resolve_path(&mut volume, &root, &sub, "..").await.unwrap();
        assert_eq!(resolved.inum, root.inum);
    }

    #[tokio::test]
    async fn missing_component_is_not_found() {
        let (mut volume, root) = fresh_root(4096).await;
        let err = resolve_path(&mut volume, &root, &root, "nope").await.unwrap_err();
        assert!(matches!(err, DirError::NotFound));
    }
}
