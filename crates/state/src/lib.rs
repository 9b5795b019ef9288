//! Shepherd 状态库
//!
//! 关系型架构与派生视图（`task_status`、`job_status`、
//! `job_throughput`、`filesystem_status`、`todo`）是作业、任务、
//! 尝试与文件系统负载的唯一事实来源。提供 PostgreSQL（多分发器）
//! 与 SQLite（嵌入式）两个后端，按连接 URL 的 scheme 选择。

use std::sync::Arc;

use shepherd_domain::JobStore;
use shepherd_errors::{ShepherdError, ShepherdResult};

pub mod postgres;
pub mod retry;
pub mod sqlite;

pub use postgres::PostgresJobStore;
pub use retry::{with_transient_retry, RetryPolicy};
pub use sqlite::SqliteJobStore;

/// 架构版本哨兵，写入 `shepherd_meta` 的 `__version__` 行
///
/// 没有迁移机制：任何不匹配都是致命的。
pub const SCHEMA_VERSION: &str = "20260802";

pub(crate) fn verify_schema_version(found: &str) -> ShepherdResult<()> {
    if found != SCHEMA_VERSION {
        return Err(ShepherdError::SchemaMismatch {
            expected: SCHEMA_VERSION.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// 按 URL scheme 连接相应后端
pub async fn connect(url: &str) -> ShepherdResult<Arc<dyn JobStore>> {
    if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        Ok(Arc::new(PostgresJobStore::connect(url).await?))
    } else if url.starts_with("sqlite:") {
        Ok(Arc::new(SqliteJobStore::connect(url).await?))
    } else {
        Err(ShepherdError::config_error(format!(
            "无法识别的状态库 URL: {url}"
        )))
    }
}
