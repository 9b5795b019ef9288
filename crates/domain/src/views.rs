//! 派生视图的行类型
//!
//! 状态库以只读视图的形式对外提供聚合信息，每次查询时重新计算。

use serde::{Deserialize, Serialize};

use crate::entities::DataLocation;

/// `task_status` 视图行
///
/// 每个任务按时间顺序列出其全部尝试，最近一次标记为 `latest`；
/// 从未尝试过的任务以 `attempt = 0, latest = true, succeeded = false`
/// 出现。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusRow {
    pub task: i64,
    pub job: i64,
    pub attempt: i64,
    pub exit_code: Option<i32>,
    pub latest: bool,
    pub succeeded: bool,
}

/// `job_status` 视图行：按 (作业, 源文件系统, 目标文件系统) 统计
/// 各任务最近一次尝试的状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatusRow {
    pub job: i64,
    pub source_filesystem: String,
    pub target_filesystem: String,
    pub pending: i64,
    pub running: i64,
    pub failed: i64,
    pub succeeded: i64,
}

/// 作业状态汇总
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct JobStatusTotals {
    pub pending: i64,
    pub running: i64,
    pub failed: i64,
    pub succeeded: i64,
}

impl JobStatusTotals {
    /// 所有任务均已到达终态（成功或终失败）
    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.running == 0
    }

    pub fn total(&self) -> i64 {
        self.pending + self.running + self.failed + self.succeeded
    }
}

/// `filesystem_status` 视图行
///
/// `concurrency` 为该文件系统当前作为源或目标参与的在途任务数，
/// 是派生聚合而非递减计数器。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemStatusRow {
    pub job: i64,
    pub filesystem: String,
    pub concurrency: i64,
    pub max_concurrency: i64,
}

/// `job_throughput` 视图行
///
/// `transfer_rate` 为成功尝试的平均字节每秒；`failure_rate` 为已完成
/// 尝试中的失败占比。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThroughputRow {
    pub job: i64,
    pub source_filesystem: String,
    pub target_filesystem: String,
    pub transfer_rate: Option<f64>,
    pub failure_rate: Option<f64>,
}

/// `todo` 视图行：当前可分发的任务投影
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoRow {
    pub job: i64,
    pub task: i64,
    pub source: DataLocation,
    pub target: DataLocation,
    pub script: String,
    pub eta_seconds: Option<f64>,
}
