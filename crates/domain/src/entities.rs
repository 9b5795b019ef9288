//! Domain Entities
//!
//! 核心领域实体定义，包含作业、任务、尝试、数据对象和文件系统等业务核心
//! 概念。这些实体是系统的核心业务模型，不依赖于外部技术实现。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// 作业相关实体
// ============================================================================

/// 传输作业
///
/// 一次提交对应一个作业。作业拥有其任务、数据对象和尝试记录
/// （删除作业时级联删除）。
///
/// # 字段说明
///
/// - `id`: 作业的唯一标识符
/// - `client_ref`: 客户端引用（由提交方生成，通常为 UUID）
/// - `max_attempts`: 每个任务允许的最大尝试次数（≥ 1）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub client_ref: String,
    pub max_attempts: i32,
}

/// 作业阶段
///
/// `Prepare` 覆盖规划与任务写入；`Transfer` 覆盖分发执行。
/// 当 `Transfer` 阶段的 `finish` 被设置后，作业即告结束。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobPhase {
    #[serde(rename = "prepare")]
    Prepare,
    #[serde(rename = "transfer")]
    Transfer,
}

impl JobPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobPhase::Prepare => "prepare",
            JobPhase::Transfer => "transfer",
        }
    }
}

// SQLx 数据库类型支持 - JobPhase
impl sqlx::Type<sqlx::Postgres> for JobPhase {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        sqlx::postgres::PgTypeInfo::with_name("VARCHAR")
    }
}

impl sqlx::Type<sqlx::Sqlite> for JobPhase {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for JobPhase {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        match s {
            "prepare" => Ok(JobPhase::Prepare),
            "transfer" => Ok(JobPhase::Transfer),
            _ => Err(format!("Invalid job phase: {s}").into()),
        }
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for JobPhase {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        match s {
            "prepare" => Ok(JobPhase::Prepare),
            "transfer" => Ok(JobPhase::Transfer),
            _ => Err(format!("Invalid job phase: {s}").into()),
        }
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for JobPhase {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Postgres>>::encode(self.as_str(), buf)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for JobPhase {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 阶段时间窗口
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseWindow {
    pub job: i64,
    pub phase: JobPhase,
    pub start: DateTime<Utc>,
    pub finish: Option<DateTime<Utc>>,
}

impl PhaseWindow {
    /// 阶段是否仍然开放
    pub fn is_open(&self) -> bool {
        self.finish.is_none()
    }
}

// ============================================================================
// 文件系统与数据对象
// ============================================================================

/// 已注册的文件系统
///
/// 在作业提交时创建，此后不可变。同一作业内以 `name` 为标识。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filesystem {
    pub id: i64,
    pub job: i64,
    pub name: String,
    pub driver: String,
    pub max_concurrency: i32,
}

/// 文件系统注册参数
#[derive(Debug, Clone)]
pub struct FilesystemSpec {
    pub name: String,
    pub driver: String,
    pub max_concurrency: i32,
}

/// 数据对象
///
/// `address` 对核心而言是不透明的（POSIX 路径、URI、iRODS 逻辑名等）。
/// 首次引用时创建，此后不再修改；重新校验和会写入新的
/// `(data, algorithm)` 行而非覆盖。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataItem {
    pub id: i64,
    pub filesystem: i64,
    pub address: String,
    pub size: Option<i64>,
}

/// 以文件系统名称定位的数据地址（跨进程传递用）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataLocation {
    pub filesystem: String,
    pub address: String,
}

impl DataLocation {
    pub fn new<F: Into<String>, A: Into<String>>(filesystem: F, address: A) -> Self {
        Self {
            filesystem: filesystem.into(),
            address: address.into(),
        }
    }
}

// ============================================================================
// 任务与尝试
// ============================================================================

/// 传输任务
///
/// 单个文件的一跳传输，是分发的最小单元。脚本在写入时已完成渲染。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub job: i64,
    pub source: i64,
    pub target: i64,
    pub script: String,
    pub dependency: Option<i64>,
}

/// 待写入的数据对象
#[derive(Debug, Clone)]
pub struct NewData {
    pub filesystem: i64,
    pub address: String,
    pub size: Option<i64>,
}

/// 待写入的任务
///
/// 链内任务按顺序写入，第 i 个任务的依赖自动指向第 i-1 个。
#[derive(Debug, Clone)]
pub struct NewTask {
    pub source: NewData,
    pub target: NewData,
    pub script: String,
}

/// 任务的一次执行尝试
///
/// `exit_code` 为空表示在途；0 表示成功；非 0 表示失败。
/// `(task, start)` 唯一，以区分并发尝试。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub id: i64,
    pub task: i64,
    pub start: DateTime<Utc>,
    pub finish: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
}

impl Attempt {
    pub fn is_inflight(&self) -> bool {
        self.exit_code.is_none()
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn failed(&self) -> bool {
        matches!(self.exit_code, Some(code) if code != 0)
    }
}

/// 已认领的任务
///
/// 认领即为该任务插入一条在途尝试记录，使其从 `todo` 中消失，
/// 同时原子性地占用源/目标文件系统的并发额度。
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub attempt: i64,
    pub task: i64,
    pub job: i64,
    pub script: String,
    pub source: DataLocation,
    pub target: DataLocation,
    pub eta_seconds: Option<f64>,
}

/// 任务状态机
///
/// ```text
/// New ──插入尝试──▶ Running ──exit=0──▶ Succeeded (终态)
///                  │
///                  └─exit≠0──▶ FailedRetry ──(尝试数<上限)──▶ Running
///                             └─(尝试数=上限)──▶ FailedTerminal (终态)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Running,
    FailedRetry,
    FailedTerminal,
    Succeeded,
}

impl TaskState {
    /// 由任务最近一次尝试与作业重试上限推导当前状态
    pub fn derive(attempt_count: i64, exit_code: Option<i32>, max_attempts: i32) -> Self {
        if attempt_count == 0 {
            return TaskState::New;
        }
        match exit_code {
            None => TaskState::Running,
            Some(0) => TaskState::Succeeded,
            Some(_) if attempt_count < max_attempts as i64 => TaskState::FailedRetry,
            Some(_) => TaskState::FailedTerminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::FailedTerminal)
    }
}
