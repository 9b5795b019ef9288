//! 传输阶段的分发器

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use shepherd_domain::{ClaimedTask, Executor, JobPhase, JobStore, ResourceRequest};
use shepherd_errors::{ShepherdError, ShepherdResult};
use shepherd_state::{with_transient_retry, RetryPolicy};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// 每轮认领的任务数上限
    pub batch_size: i64,
    /// 本地无事可做但作业未完成时的轮询间隔
    pub poll_interval: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// 传输阶段结束时的作业结果
#[derive(Debug, Clone, Copy)]
pub struct JobOutcome {
    pub succeeded: i64,
    pub failed: i64,
    /// 依赖已终失败、永远无法变为可分发的任务数
    pub unreachable: i64,
}

impl JobOutcome {
    /// 全部任务成功
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.unreachable == 0
    }
}

pub struct TransferDispatcher {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn Executor>,
    resources: ResourceRequest,
    config: DispatchConfig,
    retry_policy: RetryPolicy,
}

impl TransferDispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn Executor>,
        resources: ResourceRequest,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            executor,
            resources,
            config,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// 运行作业的传输阶段直至所有任务到达终态
    ///
    /// 终止条件：本地没有在途尝试、认领不到任何任务、且状态库中
    /// 也没有（其他分发器的）在途尝试。依赖已终失败的任务永远不会
    /// 进入 `todo`，这类任务计入结果的 `unreachable`。
    pub async fn run(&self, job: i64) -> ShepherdResult<JobOutcome> {
        self.store.open_phase(job, JobPhase::Transfer).await?;
        info!("作业 {} 进入 transfer 阶段", job);

        let mut inflight: JoinSet<ShepherdResult<()>> = JoinSet::new();

        loop {
            // 先收割已完成的提交
            while let Some(result) = inflight.try_join_next() {
                result.map_err(|e| ShepherdError::internal(format!("执行任务崩溃: {e}")))??;
            }

            let claimed = with_transient_retry(&self.retry_policy, "claim_tasks", || {
                self.store.claim_tasks(job, self.config.batch_size)
            })
            .await?;

            if claimed.is_empty() {
                if !inflight.is_empty() {
                    // 等待一个在途提交完成后重新评估（依赖可能因此解锁）
                    if let Some(result) = inflight.join_next().await {
                        result
                            .map_err(|e| ShepherdError::internal(format!("执行任务崩溃: {e}")))??;
                    }
                    continue;
                }

                let totals = self.store.job_status_totals(job).await?;
                if totals.running == 0 {
                    // 空认领与 running 归零之间，别的分发器可能恰好
                    // 完成了某个依赖，复核 todo 再决定收尾
                    if self.store.todo(job).await?.is_empty() {
                        break;
                    }
                    continue;
                }
                // 其他分发器仍有在途尝试
                debug!("作业 {} 等待其他分发器: running = {}", job, totals.running);
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            for task in claimed {
                inflight.spawn(self.submit_one(task));
            }
        }

        self.store.close_phase(job, JobPhase::Transfer).await?;

        let totals = self.store.job_status_totals(job).await?;
        let outcome = JobOutcome {
            succeeded: totals.succeeded,
            failed: totals.failed,
            unreachable: totals.pending,
        };

        if outcome.is_clean() {
            info!("作业 {} 完成: {} 个任务全部成功", job, outcome.succeeded);
        } else {
            warn!(
                "作业 {} 结束但有失败: 成功 {}, 终失败 {}, 不可达 {}",
                job, outcome.succeeded, outcome.failed, outcome.unreachable
            );
        }
        Ok(outcome)
    }

    /// 提交单个已认领的任务并回写结果
    fn submit_one(
        &self,
        task: ClaimedTask,
    ) -> impl std::future::Future<Output = ShepherdResult<()>> + Send + 'static {
        let store = self.store.clone();
        let executor = self.executor.clone();
        let resources = self.resources.clone();
        let policy = self.retry_policy.clone();

        async move {
            debug!(
                "分发任务 {}: {}:{} -> {}:{}",
                task.task,
                task.source.filesystem,
                task.source.address,
                task.target.filesystem,
                task.target.address
            );

            // 脚本运行在状态库事务之外
            let exit_code = match executor
                .submit(task.attempt, &task.script, &resources)
                .await
            {
                Ok(outcome) => outcome.exit_code,
                Err(e) => {
                    error!("任务 {} 提交执行器失败: {e}", task.task);
                    1
                }
            };

            with_transient_retry(&policy, "finish_attempt", || {
                store.finish_attempt(task.attempt, exit_code)
            })
            .await
        }
    }
}
