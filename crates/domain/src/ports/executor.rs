//! 执行器能力接口

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use shepherd_errors::ShepherdResult;

/// 提交脚本时的资源请求，来自配置的 `phase` 块
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cores: u32,
    pub memory_mb: u64,
    pub group: Option<String>,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            cores: 1,
            memory_mb: 1000,
            group: None,
        }
    }
}

/// 一次脚本执行的结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// 执行器驱动
///
/// 接收已完成渲染的脚本并运行，返回退出码与起止时间。脚本运行
/// 发生在状态库事务之外。
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    async fn submit(
        &self,
        attempt_id: i64,
        script: &str,
        resources: &ResourceRequest,
    ) -> ShepherdResult<ExecutionOutcome>;
}
