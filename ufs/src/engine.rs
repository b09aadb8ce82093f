//! FS command API: `format`, `mk`, `mkdir`, `rm`, `rmdir`, `cd`, `ls`, `cat`,
//! `w`, `insert`, `delete`, `chmod`, `login`, `logout`.
//!
//! Grounded in `fs.c`'s `cmd_*` functions from the originating course
//! project: each method here is a direct translation of one `cmd_*`, with
//! the permission/login/format preconditions from `has_permission` and the
//! per-command guard clauses kept in the same order. [`Engine`] owns the
//! volume shared by every connection; [`crate::session::Session`] (uid, cwd,
//! display path) is owned by the caller, one per connection, matching the
//! service layer described in the design notes.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::consts::{perm, ROOTINO};
use crate::dir;
use crate::error::EngineError;
use crate::inode::{self, Inode};
use crate::path;
use crate::session::Session;
use crate::superblock::Superblock;
use crate::types::InodeType;
use crate::volume::Volume;

/// One row of a directory listing, already resolved against the child
/// inode's live fields (the directory entry itself carries stale copies of
/// these — see `dinode::DirEntry`'s doc comment).
#[derive(Debug, Clone)]
pub struct LsEntry {
    pub name: String,
    pub typ: InodeType,
    pub owner: u32,
    pub perm: u16,
    pub size: u64,
    pub mtime: u32,
    pub ctime: u32,
}

fn has_permission(session: &Session, ip: &Inode, required: u16) -> bool {
    session.is_superuser() || ip.owner == session.uid || ip.perm >= required
}

fn require_logged_in(session: &Session) -> Result<(), EngineError> {
    if session.is_logged_in() {
        Ok(())
    } else {
        Err(EngineError::NotLoggedIn)
    }
}

fn require_formatted(volume: &Volume) -> Result<(), EngineError> {
    if volume.is_formatted() {
        Ok(())
    } else {
        Err(EngineError::NotFormatted)
    }
}

fn cwd(session: &Session) -> Result<Inode, EngineError> {
    session.cwd.clone().ok_or(EngineError::NotLoggedIn)
}

/// Updates the display path the way `cmd_cd` does: absolute names replace it
/// outright, `..` drops one trailing segment (never below `/`), `.` is a
/// no-op, anything else is appended.
fn advance_display_path(current: &str, name: &str) -> String {
    if name.starts_with('/') {
        return name.to_string();
    }
    if name == ".." {
        return match current.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => current[..idx].to_string(),
        };
    }
    if name == "." {
        return current.to_string();
    }
    if current == "/" {
        format!("/{name}")
    } else {
        format!("{current}/{name}")
    }
}

/// The shared, mutex-guarded volume one `fsd` process holds. Cheaply
/// cloneable: every connection gets its own [`Engine`] handle pointing at
/// the same underlying [`Volume`].
#[derive(Clone)]
pub struct Engine {
    volume: Arc<Mutex<Volume>>,
}

impl Engine {
    pub fn new(volume: Arc<Mutex<Volume>>) -> Self {
        Self { volume }
    }

    /// Superuser only. Lays down a fresh superblock, zeroes the bitmap
    /// region, marks the superblock and bitmap blocks allocated, and
    /// allocates the root directory as inode 0.
    pub async fn format(&self, session: &mut Session, ncyl: u32, nsec: u32) -> Result<(), EngineError> {
        if !session.is_logged_in() {
            return Err(EngineError::NotLoggedIn);
        }
        if !session.is_superuser() {
            return Err(EngineError::PermissionDenied);
        }
        let nblocks = ncyl
            .checked_mul(nsec)
            .filter(|&n| n > 0)
            .ok_or_else(|| EngineError::Generic("invalid disk geometry".into()))?;

        let mut volume = self.volume.lock().await;
        volume.clear_cache();
        let sb = Superblock::new(nblocks);
        volume.set_superblock(sb);

        let zero = [0u8; crate::consts::BSIZE];
        for i in 0..sb.nbitmap() {
            volume.write_block(sb.bitmap_start + i, &zero).await;
        }
        // Marks block 0 (the superblock) and every bitmap block allocated,
        // mirroring cmd_f's `for (b = 0; b <= nbitmap; b++)` loop.
        for b in 0..=sb.nbitmap() {
            crate::bitmap::mark_allocated(&mut volume, b).await;
        }

        let mut root = inode::ialloc(&mut volume, InodeType::Dir, session.uid).await?;
        dir::init_dir_entries(&mut volume, &mut root, root.inum, root.owner, root.perm).await;
        inode::iupdate(&mut volume, &root).await?;
        volume.flush_superblock().await;

        session.cwd = Some(root);
        session.path = "/".to_string();
        Ok(())
    }

    /// Rejects `uid == 0` and logging in over an existing session. Creates
    /// `/<uid>/` on first login for a given uid, temporarily raising root's
    /// permission to create it and restoring it afterward.
    ///
    /// `session.uid` is set before the root directory is ever touched: on an
    /// unformatted volume there is no root to load, but login must still
    /// succeed so a superuser can reach `format`. When root can't be loaded,
    /// home-directory bootstrap is simply skipped and the session is left
    /// without a cwd.
    pub async fn login(&self, session: &mut Session, uid: u32) -> Result<(), EngineError> {
        if uid == 0 {
            return Err(EngineError::Generic("uid must be positive".into()));
        }
        if session.is_logged_in() {
            return Err(EngineError::PermissionDenied);
        }

        session.uid = uid;

        let mut volume = self.volume.lock().await;
        let Some(mut root) = inode::iget(&mut volume, ROOTINO).await.ok().flatten() else {
            session.cwd = None;
            session.path = "/".to_string();
            return Ok(());
        };

        let username = uid.to_string();
        if dir::dir_lookup(&mut volume, &root, &username).await.is_none() {
            let original_perm = root.perm;
            root.perm = perm::READ_WRITE;
            inode::iupdate(&mut volume, &root).await?;

            let mut home = inode::ialloc(&mut volume, InodeType::Dir, uid).await?;
            home.perm = perm::READ_WRITE;
            dir::init_dir_entries(&mut volume, &mut home, root.inum, uid, perm::READ_WRITE).await;
            inode::iupdate(&mut volume, &home).await?;
            dir::dir_add(&mut volume, &mut root, &username, InodeType::Dir, home.inum, uid, perm::READ_WRITE).await?;

            root.perm = original_perm;
            inode::iupdate(&mut volume, &root).await?;
        }

        session.cwd = Some(root);
        session.path = "/".to_string();
        Ok(())
    }

    /// Forbidden for the superuser. Recursively deletes `/<uid>/` and clears
    /// the session.
    pub async fn logout(&self, session: &mut Session) -> Result<(), EngineError> {
        if !session.is_logged_in() {
            return Err(EngineError::NotLoggedIn);
        }
        if session.is_superuser() {
            return Err(EngineError::PermissionDenied);
        }
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;

        let username = session.uid.to_string();
        let mut root = inode::iget(&mut volume, ROOTINO)
            .await?
            .ok_or_else(|| EngineError::Generic("root directory missing".into()))?;
        let (_, inum) = dir::dir_lookup(&mut volume, &root, &username)
            .await
            .ok_or_else(|| EngineError::Generic("home directory missing".into()))?;
        let home = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("home directory inode missing".into()))?;
        if home.typ != InodeType::Dir {
            return Err(EngineError::Generic("home entry is not a directory".into()));
        }

        dir::recursive_delete(&mut volume, home).await;
        dir::dir_remove(&mut volume, &mut root, &username).await?;
        inode::iupdate(&mut volume, &root).await?;

        session.cwd = None;
        session.uid = 0;
        session.path.clear();
        Ok(())
    }

    pub async fn mk(&self, session: &mut Session, name: &str) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let mut dir_ip = cwd(session)?;
        if !has_permission(session, &dir_ip, perm::READ_WRITE) {
            return Err(EngineError::PermissionDenied);
        }
        if dir::dir_lookup(&mut volume, &dir_ip, name).await.is_some() {
            return Err(EngineError::Generic(format!("'{name}' already exists")));
        }
        let ip = inode::ialloc(&mut volume, InodeType::File, session.uid).await?;
        dir::dir_add(&mut volume, &mut dir_ip, name, InodeType::File, ip.inum, ip.owner, ip.perm).await?;
        inode::iupdate(&mut volume, &dir_ip).await?;
        session.cwd = Some(dir_ip);
        Ok(())
    }

    pub async fn mkdir(&self, session: &mut Session, name: &str) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let mut dir_ip = cwd(session)?;
        if !has_permission(session, &dir_ip, perm::READ_WRITE) {
            return Err(EngineError::PermissionDenied);
        }
        if dir::dir_lookup(&mut volume, &dir_ip, name).await.is_some() {
            return Err(EngineError::Generic(format!("'{name}' already exists")));
        }
        let mut child = inode::ialloc(&mut volume, InodeType::Dir, session.uid).await?;
        dir::init_dir_entries(&mut volume, &mut child, dir_ip.inum, child.owner, child.perm).await;
        inode::iupdate(&mut volume, &child).await?;
        dir::dir_add(&mut volume, &mut dir_ip, name, InodeType::Dir, child.inum, child.owner, child.perm).await?;
        inode::iupdate(&mut volume, &dir_ip).await?;
        session.cwd = Some(dir_ip);
        Ok(())
    }

    pub async fn rm(&self, session: &mut Session, name: &str) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let mut dir_ip = cwd(session)?;
        let (_, inum) = dir::dir_lookup(&mut volume, &dir_ip, name)
            .await
            .ok_or_else(|| EngineError::Generic(format!("no such entry '{name}'")))?;
        let target = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("stale directory entry".into()))?;
        if !has_permission(session, &target, perm::READ_WRITE) || !has_permission(session, &dir_ip, perm::READ_WRITE) {
            return Err(EngineError::PermissionDenied);
        }
        if target.typ != InodeType::File {
            return Err(EngineError::Generic(format!("'{name}' is not a file")));
        }
        dir::dir_remove(&mut volume, &mut dir_ip, name).await?;
        inode::iupdate(&mut volume, &dir_ip).await?;
        inode::free_data_blocks(&mut volume, &target).await?;
        inode::ifree(&mut volume, target.inum).await?;
        session.cwd = Some(dir_ip);
        Ok(())
    }

    pub async fn rmdir(&self, session: &mut Session, name: &str) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let mut dir_ip = cwd(session)?;
        let (_, inum) = dir::dir_lookup(&mut volume, &dir_ip, name)
            .await
            .ok_or_else(|| EngineError::Generic(format!("no such entry '{name}'")))?;
        let target = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("stale directory entry".into()))?;
        if !has_permission(session, &target, perm::READ_WRITE) || !has_permission(session, &dir_ip, perm::READ_WRITE) {
            return Err(EngineError::PermissionDenied);
        }
        if target.typ != InodeType::Dir {
            return Err(EngineError::Generic(format!("'{name}' is not a directory")));
        }
        dir::recursive_delete(&mut volume, target).await;
        dir::dir_remove(&mut volume, &mut dir_ip, name).await?;
        inode::iupdate(&mut volume, &dir_ip).await?;
        session.cwd = Some(dir_ip);
        Ok(())
    }

    pub async fn cd(&self, session: &mut Session, name: &str) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let current = cwd(session)?;
        let root = inode::iget(&mut volume, ROOTINO)
            .await?
            .ok_or_else(|| EngineError::Generic("root directory missing".into()))?;
        let (resolved, _) = path::resolve_path(&mut volume, &root, &current, name).await?;
        if resolved.typ != InodeType::Dir {
            return Err(EngineError::Generic(format!("'{name}' is not a directory")));
        }
        if !has_permission(session, &resolved, perm::READ) {
            return Err(EngineError::PermissionDenied);
        }
        session.path = advance_display_path(&session.path, name);
        session.cwd = Some(resolved);
        Ok(())
    }

    pub async fn ls(&self, session: &Session) -> Result<Vec<LsEntry>, EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let dir_ip = cwd(session)?;
        let mut out = Vec::new();
        for entry in dir::list_entries(&mut volume, &dir_ip).await {
            let Some(child) = inode::iget(&mut volume, entry.inum).await? else {
                continue;
            };
            let size = if child.typ == InodeType::Dir {
                dir::calc_total_file_size(&mut volume, &child).await
            } else {
                child.size as u64
            };
            out.push(LsEntry {
                name: entry.name_str().to_string(),
                typ: child.typ,
                owner: child.owner,
                perm: child.perm,
                size,
                mtime: child.mtime,
                ctime: child.ctime,
            });
        }
        Ok(out)
    }

    pub async fn cat(&self, session: &Session, name: &str) -> Result<Vec<u8>, EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let dir_ip = cwd(session)?;
        let (_, inum) = dir::dir_lookup(&mut volume, &dir_ip, name)
            .await
            .ok_or_else(|| EngineError::Generic(format!("no such entry '{name}'")))?;
        let ip = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("stale directory entry".into()))?;
        if !has_permission(session, &ip, perm::READ) {
            return Err(EngineError::PermissionDenied);
        }
        if ip.typ != InodeType::File {
            return Err(EngineError::Generic(format!("'{name}' is not a file")));
        }
        let mut buf = vec![0u8; ip.size as usize];
        inode::readi(&mut volume, &ip, &mut buf, 0).await?;
        Ok(buf)
    }

    pub async fn write(&self, session: &Session, name: &str, data: &[u8]) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let dir_ip = cwd(session)?;
        let (_, inum) = dir::dir_lookup(&mut volume, &dir_ip, name)
            .await
            .ok_or_else(|| EngineError::Generic(format!("no such entry '{name}'")))?;
        let mut ip = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("stale directory entry".into()))?;
        if !has_permission(session, &ip, perm::READ_WRITE) || !has_permission(session, &dir_ip, perm::READ_WRITE) {
            return Err(EngineError::PermissionDenied);
        }
        if ip.typ != InodeType::File {
            return Err(EngineError::Generic(format!("'{name}' is not a file")));
        }
        inode::writei(&mut volume, &mut ip, data, 0).await?;
        Ok(())
    }

    /// Insertion with mid-file shift: clamps `pos` to the file's current
    /// size, then rewrites the whole file as `prefix ++ data ++ suffix`.
    pub async fn insert(&self, session: &Session, name: &str, pos: u32, data: &[u8]) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let dir_ip = cwd(session)?;
        let (_, inum) = dir::dir_lookup(&mut volume, &dir_ip, name)
            .await
            .ok_or_else(|| EngineError::Generic(format!("no such entry '{name}'")))?;
        let mut ip = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("stale directory entry".into()))?;
        if !has_permission(session, &ip, perm::READ_WRITE) || !has_permission(session, &dir_ip, perm::READ_WRITE) {
            return Err(EngineError::PermissionDenied);
        }
        if ip.typ != InodeType::File {
            return Err(EngineError::Generic(format!("'{name}' is not a file")));
        }
        let pos = pos.min(ip.size);
        let old_size = ip.size;
        let mut buf = vec![0u8; old_size as usize + data.len()];
        inode::readi(&mut volume, &ip, &mut buf[..pos as usize], 0).await?;
        buf[pos as usize..pos as usize + data.len()].copy_from_slice(data);
        inode::readi(&mut volume, &ip, &mut buf[pos as usize + data.len()..], pos).await?;
        inode::writei(&mut volume, &mut ip, &buf, 0).await?;
        Ok(())
    }

    /// Deletion with shift. A no-op success when `pos` is past end-of-file.
    pub async fn delete(&self, session: &Session, name: &str, pos: u32, len: u32) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        let dir_ip = cwd(session)?;
        let (_, inum) = dir::dir_lookup(&mut volume, &dir_ip, name)
            .await
            .ok_or_else(|| EngineError::Generic(format!("no such entry '{name}'")))?;
        let mut ip = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("stale directory entry".into()))?;
        if !has_permission(session, &ip, perm::READ_WRITE) || !has_permission(session, &dir_ip, perm::READ_WRITE) {
            return Err(EngineError::PermissionDenied);
        }
        if ip.typ != InodeType::File {
            return Err(EngineError::Generic(format!("'{name}' is not a file")));
        }
        if pos >= ip.size {
            return Ok(());
        }
        let old_size = ip.size;
        let actual = len.min(old_size - pos);
        let new_len = old_size - actual;
        let mut buf = vec![0u8; new_len as usize];
        inode::readi(&mut volume, &ip, &mut buf[..pos as usize], 0).await?;
        inode::readi(&mut volume, &ip, &mut buf[pos as usize..], pos + actual).await?;
        inode::writei(&mut volume, &mut ip, &buf, 0).await?;
        // writei only grows `size`; this command is the one path that
        // shrinks a file, so the size must be forced down explicitly.
        ip.size = new_len;
        inode::iupdate(&mut volume, &ip).await?;
        Ok(())
    }

    pub async fn chmod(&self, session: &Session, name: &str, new_perm: u16, kernel_mode: bool) -> Result<(), EngineError> {
        require_logged_in(session)?;
        let mut volume = self.volume.lock().await;
        require_formatted(&volume)?;
        if new_perm > perm::READ_WRITE {
            return Err(EngineError::Generic("perm must be 0, 1, or 2".into()));
        }
        let dir_ip = cwd(session)?;
        let (_, inum) = dir::dir_lookup(&mut volume, &dir_ip, name)
            .await
            .ok_or_else(|| EngineError::Generic(format!("no such entry '{name}'")))?;
        let mut ip = inode::iget(&mut volume, inum)
            .await?
            .ok_or_else(|| EngineError::Generic("stale directory entry".into()))?;
        if !kernel_mode && ip.owner != session.uid && !session.is_superuser() {
            return Err(EngineError::PermissionDenied);
        }
        ip.perm = new_perm;
        inode::iupdate(&mut volume, &ip).await?;
        Ok(())
    }

    /// Invalidates the shared block cache (`clearcache` wire command).
    pub async fn clear_cache(&self) {
        self.volume.lock().await.clear_cache();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDisk;
    use std::sync::Arc as StdArc;

    async fn fresh_engine(nblocks: u32) -> (Engine, Session) {
        let device = StdArc::new(MemDisk::new(nblocks));
        let volume = Volume::new(device, 4);
        let engine = Engine::new(Arc::new(Mutex::new(volume)));
        let mut session = Session::new();
        session.uid = crate::consts::SUPERUSER;
        engine.format(&mut session, 4, nblocks / 4).await.unwrap();
        (engine, session)
    }

    #[tokio::test]
    async fn format_then_hello_roundtrips() {
        let (engine, mut session) = fresh_engine(4096).await;
        engine.mk(&mut session, "hello").await.unwrap();
        engine.write(&session, "hello", b"hello").await.unwrap();
        let got = engine.cat(&session, "hello").await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn insert_then_delete_roundtrips() {
        let (engine, mut session) = fresh_engine(4096).await;
        engine.mk(&mut session, "t").await.unwrap();
        engine.write(&session, "t", b"ABCDE").await.unwrap();
        engine.insert(&session, "t", 2, b"XYZ").await.unwrap();
        assert_eq!(engine.cat(&session, "t").await.unwrap(), b"ABXYZCDE");
        engine.delete(&session, "t", 0, 2).await.unwrap();
        assert_eq!(engine.cat(&session, "t").await.unwrap(), b"XYZCDE");
    }

    #[tokio::test]
    async fn ls_reports_dirs_and_files() {
        let (engine, mut session) = fresh_engine(4096).await;
        engine.mkdir(&mut session, "a").await.unwrap();
        engine.mkdir(&mut session, "b").await.unwrap();
        engine.mk(&mut session, "c").await.unwrap();
        let mut entries = engine.ls(&session).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(entries[0].typ, InodeType::Dir);
        assert_eq!(entries[2].typ, InodeType::File);
    }

    #[tokio::test]
    async fn recursive_remove_clears_directory() {
        let (engine, mut session) = fresh_engine(8192).await;
        engine.mkdir(&mut session, "a").await.unwrap();
        engine.cd(&mut session, "a").await.unwrap();
        engine.mk(&mut session, "x").await.unwrap();
        engine.write(&session, "x", b"abc").await.unwrap();
        engine.cd(&mut session, "..").await.unwrap();
        engine.rmdir(&mut session, "a").await.unwrap();
        assert!(engine.ls(&session).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn permission_denied_across_users() {
        let (engine, mut session) = fresh_engine(4096).await;
        engine.mk(&mut session, "s").await.unwrap();
        engine.chmod(&session, "s", 0, false).await.unwrap();

        let mut other = Session::new();
        engine.login(&mut other, 2).await.unwrap();
        let err = engine.cat(&other, "s").await.unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied));
    }

    #[tokio::test]
    async fn login_creates_home_directory_owned_by_uid() {
        let (engine, _session) = fresh_engine(4096).await;
        let mut other = Session::new();
        engine.login(&mut other, 7).await.unwrap();
        assert_eq!(other.path, "/");

        let entries = engine.ls(&other).await.unwrap();
        let home = entries.iter().find(|e| e.name == "7").unwrap();
        assert_eq!(home.typ, InodeType::Dir);
        assert_eq!(home.owner, 7);
        assert_eq!(home.perm, perm::READ_WRITE);
    }
}
