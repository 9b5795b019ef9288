use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShepherdError {
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),
    #[error("数据库操作错误: {0}")]
    DatabaseOperation(String),
    #[error("配置错误: {0}")]
    Configuration(String),
    #[error("模板变量未定义: {variable} (模板位置: {site})")]
    UnresolvedVariable { variable: String, site: String },
    #[error("模板渲染失败: {site} - {message}")]
    Template { site: String, message: String },
    #[error("找不到传输路线: {route_source} -> {target}")]
    NoRoute { route_source: String, target: String },
    #[error("命名路线无效: {name} - {reason}")]
    InvalidNamedRoute { name: String, reason: String },
    #[error("文件系统不支持该查询谓词: {0}")]
    UnsupportedPredicate(String),
    #[error("文件系统不支持该操作: {0}")]
    UnsupportedOperation(String),
    #[error("状态库架构版本不匹配: 期望 {expected}, 实际 {found}")]
    SchemaMismatch { expected: String, found: String },
    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },
    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },
    #[error("文件系统未注册: {name}")]
    FilesystemNotFound { name: String },
    #[error("任务展开失败: {0}")]
    TaskExpansion(String),
    #[error("脚本执行失败: {0}")]
    Execution(String),
    #[error("查询解析失败: {0}")]
    Query(String),
    #[error("查询执行失败: {0}")]
    QueryExecution(String),
    #[error("用法错误: {0}")]
    Usage(String),
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type ShepherdResult<T> = Result<T, ShepherdError>;

impl ShepherdError {
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }
    pub fn unresolved_variable<V: Into<String>, S: Into<String>>(variable: V, site: S) -> Self {
        Self::UnresolvedVariable {
            variable: variable.into(),
            site: site.into(),
        }
    }
    pub fn invalid_named_route<N: Into<String>, R: Into<String>>(name: N, reason: R) -> Self {
        Self::InvalidNamedRoute {
            name: name.into(),
            reason: reason.into(),
        }
    }
    pub fn job_not_found(id: i64) -> Self {
        Self::JobNotFound { id }
    }
    pub fn task_not_found(id: i64) -> Self {
        Self::TaskNotFound { id }
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ShepherdError::Configuration(_)
                | ShepherdError::UnresolvedVariable { .. }
                | ShepherdError::Template { .. }
                | ShepherdError::InvalidNamedRoute { .. }
                | ShepherdError::SchemaMismatch { .. }
                | ShepherdError::Internal(_)
        )
    }

    /// 事务冲突、死锁等瞬时性数据库错误，允许带退避重试
    pub fn is_transient(&self) -> bool {
        match self {
            ShepherdError::Database(sqlx::Error::Database(db)) => {
                match db.code().as_deref() {
                    // PostgreSQL: serialization_failure / deadlock_detected
                    Some("40001") | Some("40P01") => true,
                    // SQLite: SQLITE_BUSY / SQLITE_LOCKED
                    Some("5") | Some("6") => true,
                    _ => false,
                }
            }
            ShepherdError::Database(sqlx::Error::PoolTimedOut) => true,
            _ => false,
        }
    }

    /// 映射到 CLI 退出码
    ///
    /// 0 成功、1 用法、2 配置/模板、3 无法解析路线、5 内部错误。
    /// 退出码 4（部分失败）由作业结果决定，不经由错误类型。
    pub fn exit_code(&self) -> i32 {
        match self {
            ShepherdError::Usage(_) => 1,
            ShepherdError::Configuration(_)
            | ShepherdError::UnresolvedVariable { .. }
            | ShepherdError::Template { .. }
            | ShepherdError::Serialization(_)
            | ShepherdError::Query(_) => 2,
            ShepherdError::NoRoute { .. } | ShepherdError::InvalidNamedRoute { .. } => 3,
            _ => 5,
        }
    }
}

impl From<serde_json::Error> for ShepherdError {
    fn from(err: serde_json::Error) -> Self {
        ShepherdError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ShepherdError {
    fn from(err: serde_yaml::Error) -> Self {
        ShepherdError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ShepherdError {
    fn from(err: anyhow::Error) -> Self {
        ShepherdError::Internal(err.to_string())
    }
}
