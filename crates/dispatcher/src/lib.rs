//! Shepherd 分发循环
//!
//! 每轮：事务性地从 `todo` 认领一批任务（认领即插入在途尝试，
//! 原子占用文件系统并发额度），把脚本交给执行器，完成后回写
//! 退出码。协调完全依赖状态库，多个分发进程可以并行运行同一
//! 作业。

pub mod transfer;

pub use transfer::{DispatchConfig, JobOutcome, TransferDispatcher};
