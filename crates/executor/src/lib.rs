//! 执行器驱动
//!
//! 本地执行器把渲染好的脚本落盘为私有临时文件并作为子进程运行，
//! 捕获退出码。批处理集群（LSF 等）驱动经由同一能力接口接入，
//! 不在本 crate 范围内。

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use shepherd_config::ExecutorConfig;
use shepherd_domain::{ExecutionOutcome, Executor, ResourceRequest};
use shepherd_errors::{ShepherdError, ShepherdResult};

/// 本地执行器
///
/// 资源请求仅记录，不做本机配额控制；脚本写入 0700 的临时文件，
/// 工作目录即临时目录。
pub struct LocalExecutor {
    /// 在途尝试的子进程 PID，取消时使用
    running: Arc<RwLock<HashMap<i64, u32>>>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn is_running(&self, attempt_id: i64) -> bool {
        self.running.read().await.contains_key(&attempt_id)
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    fn name(&self) -> &str {
        "local"
    }

    async fn submit(
        &self,
        attempt_id: i64,
        script: &str,
        resources: &ResourceRequest,
    ) -> ShepherdResult<ExecutionOutcome> {
        let started_at = Utc::now();

        debug!(
            "本地执行尝试 {}: cores={}, memory={}MB",
            attempt_id, resources.cores, resources.memory_mb
        );

        let dir = tempfile::tempdir()
            .map_err(|e| ShepherdError::Execution(format!("创建临时目录失败: {e}")))?;
        let path = dir.path().join("task");
        std::fs::write(&path, script)
            .map_err(|e| ShepherdError::Execution(format!("写入脚本失败: {e}")))?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .map_err(|e| ShepherdError::Execution(format!("设置脚本权限失败: {e}")))?;

        let mut child = Command::new(&path)
            .current_dir(dir.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ShepherdError::Execution(format!("启动脚本失败: {e}")))?;

        if let Some(pid) = child.id() {
            self.running.write().await.insert(attempt_id, pid);
        }

        // 脚本输出转入日志，stderr 逐行透传
        let stderr = child.stderr.take();
        let stderr_task = async {
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("尝试 {} stderr: {}", attempt_id, line);
                }
            }
        };
        let stdout = child.stdout.take();
        let stdout_task = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("尝试 {} stdout: {}", attempt_id, line);
                }
            }
        };

        let (status, _, _) = tokio::join!(
            async {
                child
                    .wait()
                    .await
                    .map_err(|e| ShepherdError::Execution(format!("等待脚本结束失败: {e}")))
            },
            stdout_task,
            stderr_task,
        );
        let status = status?;

        self.running.write().await.remove(&attempt_id);

        let exit_code = status.code().unwrap_or(1);
        let finished_at = Utc::now();

        info!(
            "尝试 {} 执行完成: exit_code={}, 耗时 {}ms",
            attempt_id,
            exit_code,
            (finished_at - started_at).num_milliseconds()
        );

        Ok(ExecutionOutcome {
            exit_code,
            started_at,
            finished_at,
        })
    }
}

/// 按配置构造执行器
pub fn build_executor(config: &ExecutorConfig) -> ShepherdResult<Arc<dyn Executor>> {
    match config.driver.as_str() {
        "local" => Ok(Arc::new(LocalExecutor::new())),
        other => Err(ShepherdError::config_error(format!(
            "未知的执行器驱动: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_successful_script() {
        let executor = LocalExecutor::new();
        let outcome = executor
            .submit(
                1,
                "#!/usr/bin/env bash\necho hello\nexit 0\n",
                &ResourceRequest::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 0);
        assert!(outcome.succeeded());
        assert!(outcome.finished_at >= outcome.started_at);
        assert!(!executor.is_running(1).await);
    }

    #[tokio::test]
    async fn test_failing_script_reports_exit_code() {
        let executor = LocalExecutor::new();
        let outcome = executor
            .submit(
                2,
                "#!/usr/bin/env bash\necho oops >&2\nexit 3\n",
                &ResourceRequest::default(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, 3);
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn test_build_executor() {
        let config = ExecutorConfig {
            driver: "local".to_string(),
            options: Default::default(),
        };
        let executor = build_executor(&config).unwrap();
        assert_eq!(executor.name(), "local");

        let config = ExecutorConfig {
            driver: "lsf".to_string(),
            options: Default::default(),
        };
        assert!(build_executor(&config).is_err());
    }
}
