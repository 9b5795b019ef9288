//! 对外能力接口
//!
//! 核心通过这两个窄接口与外部协作者交互：文件系统驱动负责目标识别与
//! 属性读取，执行器负责把渲染好的脚本提交到计算资源上运行。

pub mod executor;
pub mod filesystem;

pub use executor::{ExecutionOutcome, Executor, ResourceRequest};
pub use filesystem::{DataStub, DataStubIter, FileAttrs, FilesystemDriver};
