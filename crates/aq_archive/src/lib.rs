// crates/aq_archive/src/lib.rs

//! AquAssim 归档层
//!
//! 将粒子集合快照以制表符分隔的文本文件落盘，按表示时刻命名，
//! 供驱动层续算与跨前瞻期链式预报使用。

#![warn(clippy::all)]

pub mod archive;
pub mod error;

pub use archive::{load_snapshot, StateArchive, DEFAULT_MAX_FILES};
pub use error::{ArchiveError, ArchiveResult};
