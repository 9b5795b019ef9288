//! 文件系统层：驱动注册表与 POSIX 驱动

pub mod posix;
pub mod registry;

pub use posix::PosixFilesystem;
pub use registry::{FilesystemEntry, FilesystemRegistry};
