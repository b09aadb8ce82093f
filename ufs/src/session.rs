//! Per-connection session state: who's logged in, and where they are.
//!
//! Unlike the superblock and cache (shared, held behind `Volume`'s mutex),
//! uid/cwd/path are genuinely per-connection and need no synchronization.

use crate::inode::Inode;

pub struct Session {
    pub uid: u32,
    pub cwd: Option<Inode>,
    pub path: String,
}

impl Session {
    pub fn new() -> Self {
        Self {
            uid: 0,
            cwd: None,
            path: String::new(),
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.uid != 0
    }

    pub fn is_superuser(&self) -> bool {
        self.uid == crate::consts::SUPERUSER
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
