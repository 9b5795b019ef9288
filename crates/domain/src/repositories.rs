//! 状态库抽象
//!
//! 状态库是全部持久状态的唯一事实来源，跨节点协调仅通过它进行。
//! 具体实现见 shepherd-state（PostgreSQL 与 SQLite 两种后端）。

use async_trait::async_trait;

use shepherd_errors::ShepherdResult;

use crate::entities::{
    ClaimedTask, DataItem, Filesystem, FilesystemSpec, Job, JobPhase, NewTask, PhaseWindow, Task,
};
use crate::views::{
    FilesystemStatusRow, JobStatusRow, JobStatusTotals, TaskStatusRow, ThroughputRow, TodoRow,
};

/// 作业状态库
#[async_trait]
pub trait JobStore: Send + Sync {
    // ------------------------------------------------------------------
    // 作业与阶段
    // ------------------------------------------------------------------

    async fn create_job(&self, client_ref: &str, max_attempts: i32) -> ShepherdResult<Job>;

    async fn find_job(&self, id: i64) -> ShepherdResult<Option<Job>>;

    /// 恢复既有作业
    ///
    /// `force_restart` 会把在途尝试标记为失败（exit_code = 1，
    /// finish = 当前时间），用于上次运行中断后的重启。
    async fn resume_job(&self, id: i64, force_restart: bool) -> ShepherdResult<Job>;

    async fn open_phase(&self, job: i64, phase: JobPhase) -> ShepherdResult<PhaseWindow>;

    async fn close_phase(&self, job: i64, phase: JobPhase) -> ShepherdResult<PhaseWindow>;

    async fn phase(&self, job: i64, phase: JobPhase) -> ShepherdResult<Option<PhaseWindow>>;

    // ------------------------------------------------------------------
    // 文件系统与数据对象
    // ------------------------------------------------------------------

    async fn register_filesystem(
        &self,
        job: i64,
        spec: &FilesystemSpec,
    ) -> ShepherdResult<Filesystem>;

    async fn find_filesystem(&self, job: i64, name: &str) -> ShepherdResult<Option<Filesystem>>;

    async fn get_or_create_data(
        &self,
        filesystem: i64,
        address: &str,
        size: Option<i64>,
    ) -> ShepherdResult<DataItem>;

    async fn record_checksum(
        &self,
        data: i64,
        algorithm: &str,
        checksum: &str,
    ) -> ShepherdResult<()>;

    async fn set_metadata(&self, data: i64, key: &str, value: &str) -> ShepherdResult<()>;

    // ------------------------------------------------------------------
    // 任务与尝试
    // ------------------------------------------------------------------

    /// 原子写入一个文件的任务链
    ///
    /// 链内第 i 个任务的依赖自动指向第 i-1 个；数据对象的
    /// get-or-create 与任务写入在同一事务内完成，要么全部成功
    /// 要么全部回滚。
    async fn insert_task_chain(&self, job: i64, chain: &[NewTask]) -> ShepherdResult<Vec<Task>>;

    /// 事务性认领至多 `limit` 个可分发任务
    ///
    /// 对每个选中的任务插入一条在途尝试记录（这使其立即从 `todo`
    /// 消失并占用文件系统并发额度），按 `eta` 升序、空值最后、
    /// 任务号升序排序。
    async fn claim_tasks(&self, job: i64, limit: i64) -> ShepherdResult<Vec<ClaimedTask>>;

    /// 记录尝试完成
    async fn finish_attempt(&self, attempt: i64, exit_code: i32) -> ShepherdResult<()>;

    // ------------------------------------------------------------------
    // 派生视图
    // ------------------------------------------------------------------

    async fn task_status(&self, task: i64) -> ShepherdResult<Vec<TaskStatusRow>>;

    async fn todo(&self, job: i64) -> ShepherdResult<Vec<TodoRow>>;

    async fn job_status(&self, job: i64) -> ShepherdResult<Vec<JobStatusRow>>;

    async fn job_status_totals(&self, job: i64) -> ShepherdResult<JobStatusTotals>;

    async fn filesystem_status(&self, job: i64) -> ShepherdResult<Vec<FilesystemStatusRow>>;

    async fn job_throughput(&self, job: i64) -> ShepherdResult<Vec<ThroughputRow>>;
}
