//! The file-system engine: on-disk layout, block cache, bitmap allocator,
//! inode layer, directory/path layer, and the command-level API that sits on
//! top of all of it. Everything below [`engine`] is disk-shaped state with
//! no notion of a network client; `fsd` (the companion binary crate) is the
//! only thing that speaks the wire protocol and owns a [`Session`] per
//! connection.

pub mod bitmap;
pub mod cache;
pub mod consts;
pub mod device;
pub mod dinode;
pub mod dir;
pub mod disk;
pub mod engine;
pub mod error;
pub mod inode;
pub mod path;
pub mod session;
pub mod superblock;
pub mod types;
pub mod volume;

pub use consts::{BSIZE, MAXFILE, MAXNAME, NDIRECT};
pub use engine::{Engine, LsEntry};
pub use error::EngineError;
pub use session::Session;
pub use volume::Volume;
