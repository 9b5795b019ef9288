//! SQLite 状态库后端
//!
//! 原生嵌入式引擎：单写者、无外部服务依赖，适合单节点作业与测试。
//! 跨进程并发由 SQLite 的写锁与 busy_timeout 保障。

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use shepherd_domain::{
    ClaimedTask, DataItem, DataLocation, Filesystem, FilesystemSpec, FilesystemStatusRow, Job,
    JobPhase, JobStatusRow, JobStatusTotals, JobStore, NewTask, PhaseWindow, Task, TaskStatusRow,
    ThroughputRow, TodoRow,
};
use shepherd_errors::{ShepherdError, ShepherdResult};

use crate::{verify_schema_version, SCHEMA_VERSION};

const SCHEMA: &str = include_str!("schema.sql");

#[derive(Debug)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// 连接并初始化状态库
    ///
    /// 连接池固定为单连接：嵌入式引擎依赖 SQLite 的串行写者，
    /// 同时让 `sqlite::memory:` 在测试中表现正确。
    pub async fn connect(url: &str) -> ShepherdResult<Self> {
        let mut options = SqliteConnectOptions::from_str(url)
            .map_err(ShepherdError::Database)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(3600));
        if !url.contains(":memory:") {
            options = options.journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(ShepherdError::Database)?;

        let store = Self { pool };
        store.initialise().await?;
        Ok(store)
    }

    /// 建表建视图并核对架构版本；重复执行是无操作
    async fn initialise(&self) -> ShepherdResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(ShepherdError::Database)?;

        sqlx::query(
            "insert into shepherd_meta(key, value) values ('__version__', $1)
             on conflict(key) do nothing",
        )
        .bind(SCHEMA_VERSION)
        .execute(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        let found: String =
            sqlx::query_scalar("select value from shepherd_meta where key = '__version__'")
                .fetch_one(&self.pool)
                .await
                .map_err(ShepherdError::Database)?;
        verify_schema_version(&found)?;

        debug!("SQLite 状态库初始化完成");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_job(row: &sqlx::sqlite::SqliteRow) -> ShepherdResult<Job> {
        Ok(Job {
            id: row.try_get("id")?,
            client_ref: row.try_get("client_ref")?,
            max_attempts: row.try_get("max_attempts")?,
        })
    }

    fn row_to_phase(row: &sqlx::sqlite::SqliteRow) -> ShepherdResult<PhaseWindow> {
        Ok(PhaseWindow {
            job: row.try_get("job")?,
            phase: row.try_get("phase")?,
            start: row.try_get("start")?,
            finish: row.try_get("finish")?,
        })
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> ShepherdResult<Task> {
        Ok(Task {
            id: row.try_get("id")?,
            job: row.try_get("job")?,
            source: row.try_get("source")?,
            target: row.try_get("target")?,
            script: row.try_get("script")?,
            dependency: row.try_get("dependency")?,
        })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, client_ref: &str, max_attempts: i32) -> ShepherdResult<Job> {
        let row = sqlx::query(
            "insert into jobs(client_ref, max_attempts) values ($1, $2)
             returning id, client_ref, max_attempts",
        )
        .bind(client_ref)
        .bind(max_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        let job = Self::row_to_job(&row)?;
        debug!("创建作业成功: ID {}", job.id);
        Ok(job)
    }

    async fn find_job(&self, id: i64) -> ShepherdResult<Option<Job>> {
        let row = sqlx::query("select id, client_ref, max_attempts from jobs where id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(ShepherdError::Database)?;

        row.map(|r| Self::row_to_job(&r)).transpose()
    }

    async fn resume_job(&self, id: i64, force_restart: bool) -> ShepherdResult<Job> {
        let job = self
            .find_job(id)
            .await?
            .ok_or(ShepherdError::JobNotFound { id })?;

        if force_restart {
            // 把上次运行遗留的在途尝试记为失败，使任务重新可分发
            let reset = sqlx::query(
                "update attempts set finish = $1, exit_code = 1
                 where exit_code is null
                   and task in (select id from tasks where job = $2)",
            )
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(ShepherdError::Database)?;

            if reset.rows_affected() > 0 {
                debug!("作业 {} 重启: 重置了 {} 条在途尝试", id, reset.rows_affected());
            }
        }

        Ok(job)
    }

    async fn open_phase(&self, job: i64, phase: JobPhase) -> ShepherdResult<PhaseWindow> {
        let row = sqlx::query(
            "insert into job_phases(job, phase, start) values ($1, $2, $3)
             on conflict(job, phase) do update set finish = null
             returning job, phase, start, finish",
        )
        .bind(job)
        .bind(phase)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        Self::row_to_phase(&row)
    }

    async fn close_phase(&self, job: i64, phase: JobPhase) -> ShepherdResult<PhaseWindow> {
        let row = sqlx::query(
            "update job_phases set finish = $1 where job = $2 and phase = $3
             returning job, phase, start, finish",
        )
        .bind(Utc::now())
        .bind(job)
        .bind(phase)
        .fetch_optional(&self.pool)
        .await
        .map_err(ShepherdError::Database)?
        .ok_or(ShepherdError::JobNotFound { id: job })?;

        Self::row_to_phase(&row)
    }

    async fn phase(&self, job: i64, phase: JobPhase) -> ShepherdResult<Option<PhaseWindow>> {
        let row = sqlx::query(
            "select job, phase, start, finish from job_phases where job = $1 and phase = $2",
        )
        .bind(job)
        .bind(phase)
        .fetch_optional(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        row.map(|r| Self::row_to_phase(&r)).transpose()
    }

    async fn register_filesystem(
        &self,
        job: i64,
        spec: &FilesystemSpec,
    ) -> ShepherdResult<Filesystem> {
        // 文件系统注册后不可变；重复注册返回既有行（作业恢复场景）
        sqlx::query(
            "insert into filesystems(job, name, driver, max_concurrency)
             values ($1, $2, $3, $4)
             on conflict(job, name) do nothing",
        )
        .bind(job)
        .bind(&spec.name)
        .bind(&spec.driver)
        .bind(spec.max_concurrency)
        .execute(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        self.find_filesystem(job, &spec.name)
            .await?
            .ok_or_else(|| ShepherdError::FilesystemNotFound {
                name: spec.name.clone(),
            })
    }

    async fn find_filesystem(&self, job: i64, name: &str) -> ShepherdResult<Option<Filesystem>> {
        let row = sqlx::query(
            "select id, job, name, driver, max_concurrency
             from filesystems where job = $1 and name = $2",
        )
        .bind(job)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        Ok(row.map(|r| Filesystem {
            id: r.get("id"),
            job: r.get("job"),
            name: r.get("name"),
            driver: r.get("driver"),
            max_concurrency: r.get("max_concurrency"),
        }))
    }

    async fn get_or_create_data(
        &self,
        filesystem: i64,
        address: &str,
        size: Option<i64>,
    ) -> ShepherdResult<DataItem> {
        let row = sqlx::query(
            "insert into data(filesystem, address, size) values ($1, $2, $3)
             on conflict(filesystem, address)
             do update set size = coalesce(data.size, excluded.size)
             returning id, filesystem, address, size",
        )
        .bind(filesystem)
        .bind(address)
        .bind(size)
        .fetch_one(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        Ok(DataItem {
            id: row.get("id"),
            filesystem: row.get("filesystem"),
            address: row.get("address"),
            size: row.get("size"),
        })
    }

    async fn record_checksum(
        &self,
        data: i64,
        algorithm: &str,
        checksum: &str,
    ) -> ShepherdResult<()> {
        sqlx::query(
            "insert into checksums(data, algorithm, checksum) values ($1, $2, $3)
             on conflict(data, algorithm) do nothing",
        )
        .bind(data)
        .bind(algorithm)
        .bind(checksum)
        .execute(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;
        Ok(())
    }

    async fn set_metadata(&self, data: i64, key: &str, value: &str) -> ShepherdResult<()> {
        sqlx::query(
            "insert into metadata(data, key, value) values ($1, $2, $3)
             on conflict(data, key) do nothing",
        )
        .bind(data)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;
        Ok(())
    }

    #[instrument(skip(self, chain), fields(job = %job, chain_len = chain.len()))]
    async fn insert_task_chain(&self, job: i64, chain: &[NewTask]) -> ShepherdResult<Vec<Task>> {
        let mut tx = self.pool.begin().await.map_err(ShepherdError::Database)?;
        let mut inserted = Vec::with_capacity(chain.len());
        let mut dependency: Option<i64> = None;

        for new_task in chain {
            let mut data_ids = [0i64; 2];
            for (slot, data) in [&new_task.source, &new_task.target].into_iter().enumerate() {
                let row = sqlx::query(
                    "insert into data(filesystem, address, size) values ($1, $2, $3)
                     on conflict(filesystem, address)
                     do update set size = coalesce(data.size, excluded.size)
                     returning id",
                )
                .bind(data.filesystem)
                .bind(&data.address)
                .bind(data.size)
                .fetch_one(&mut *tx)
                .await
                .map_err(ShepherdError::Database)?;
                data_ids[slot] = row.get("id");
            }

            let row = sqlx::query(
                "insert into tasks(job, source, target, script, dependency)
                 values ($1, $2, $3, $4, $5)
                 returning id, job, source, target, script, dependency",
            )
            .bind(job)
            .bind(data_ids[0])
            .bind(data_ids[1])
            .bind(&new_task.script)
            .bind(dependency)
            .fetch_one(&mut *tx)
            .await
            .map_err(ShepherdError::Database)?;

            let task = Self::row_to_task(&row)?;
            dependency = Some(task.id);
            inserted.push(task);
        }

        // 展开器按构造产出严格链；依赖集的环检查
        debug_assert!(inserted
            .windows(2)
            .all(|pair| pair[1].dependency == Some(pair[0].id)));

        tx.commit().await.map_err(ShepherdError::Database)?;
        Ok(inserted)
    }

    #[instrument(skip(self), fields(job = %job, limit = %limit))]
    async fn claim_tasks(&self, job: i64, limit: i64) -> ShepherdResult<Vec<ClaimedTask>> {
        let mut tx = self.pool.begin().await.map_err(ShepherdError::Database)?;

        let now = Utc::now();
        let mut claimed = Vec::new();

        // 逐个认领：每插入一条尝试都会改变并发额度，下一次选取必须
        // 看到前一次的占用，否则一批认领可能冲破文件系统上限
        while (claimed.len() as i64) < limit {
            let row = sqlx::query(
                "select task, source_filesystem, source_address,
                        target_filesystem, target_address, script, eta
                 from todo where job = $1
                 order by eta asc nulls last, task asc
                 limit 1",
            )
            .bind(job)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ShepherdError::Database)?;

            let Some(row) = row else { break };

            let task: i64 = row.try_get("task")?;
            let attempt_row = sqlx::query(
                "insert into attempts(task, start) values ($1, $2) returning id",
            )
            .bind(task)
            .bind(now)
            .fetch_one(&mut *tx)
            .await
            .map_err(ShepherdError::Database)?;

            claimed.push(ClaimedTask {
                attempt: attempt_row.get("id"),
                task,
                job,
                script: row.try_get("script")?,
                source: DataLocation::new(
                    row.try_get::<String, _>("source_filesystem")?,
                    row.try_get::<String, _>("source_address")?,
                ),
                target: DataLocation::new(
                    row.try_get::<String, _>("target_filesystem")?,
                    row.try_get::<String, _>("target_address")?,
                ),
                eta_seconds: row.try_get("eta")?,
            });
        }

        tx.commit().await.map_err(ShepherdError::Database)?;

        if !claimed.is_empty() {
            debug!("作业 {} 认领了 {} 个任务", job, claimed.len());
        }
        Ok(claimed)
    }

    async fn finish_attempt(&self, attempt: i64, exit_code: i32) -> ShepherdResult<()> {
        let result = sqlx::query(
            "update attempts set finish = $1, exit_code = $2 where id = $3",
        )
        .bind(Utc::now())
        .bind(exit_code)
        .bind(attempt)
        .execute(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        if result.rows_affected() == 0 {
            return Err(ShepherdError::DatabaseOperation(format!(
                "尝试记录不存在: {attempt}"
            )));
        }

        debug!("尝试 {} 完成: exit_code = {}", attempt, exit_code);
        Ok(())
    }

    async fn task_status(&self, task: i64) -> ShepherdResult<Vec<TaskStatusRow>> {
        let rows = sqlx::query(
            "select task, job, attempt, exit_code, latest, succeeded
             from task_status where task = $1 order by attempt",
        )
        .bind(task)
        .fetch_all(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(TaskStatusRow {
                    task: row.try_get("task")?,
                    job: row.try_get("job")?,
                    attempt: row.try_get("attempt")?,
                    exit_code: row.try_get("exit_code")?,
                    latest: row.try_get("latest")?,
                    succeeded: row.try_get("succeeded")?,
                })
            })
            .collect()
    }

    async fn todo(&self, job: i64) -> ShepherdResult<Vec<TodoRow>> {
        let rows = sqlx::query(
            "select job, task, source_filesystem, source_address,
                    target_filesystem, target_address, script, eta
             from todo where job = $1
             order by eta asc nulls last, task asc",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(TodoRow {
                    job: row.try_get("job")?,
                    task: row.try_get("task")?,
                    source: DataLocation::new(
                        row.try_get::<String, _>("source_filesystem")?,
                        row.try_get::<String, _>("source_address")?,
                    ),
                    target: DataLocation::new(
                        row.try_get::<String, _>("target_filesystem")?,
                        row.try_get::<String, _>("target_address")?,
                    ),
                    script: row.try_get("script")?,
                    eta_seconds: row.try_get("eta")?,
                })
            })
            .collect()
    }

    async fn job_status(&self, job: i64) -> ShepherdResult<Vec<JobStatusRow>> {
        let rows = sqlx::query(
            "select job, source_filesystem, target_filesystem,
                    pending, running, failed, succeeded
             from job_status where job = $1
             order by source_filesystem, target_filesystem",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(JobStatusRow {
                    job: row.try_get("job")?,
                    source_filesystem: row.try_get("source_filesystem")?,
                    target_filesystem: row.try_get("target_filesystem")?,
                    pending: row.try_get("pending")?,
                    running: row.try_get("running")?,
                    failed: row.try_get("failed")?,
                    succeeded: row.try_get("succeeded")?,
                })
            })
            .collect()
    }

    async fn job_status_totals(&self, job: i64) -> ShepherdResult<JobStatusTotals> {
        let row = sqlx::query(
            "select coalesce(sum(pending), 0)   as pending,
                    coalesce(sum(running), 0)   as running,
                    coalesce(sum(failed), 0)    as failed,
                    coalesce(sum(succeeded), 0) as succeeded
             from job_status where job = $1",
        )
        .bind(job)
        .fetch_one(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        Ok(JobStatusTotals {
            pending: row.try_get("pending")?,
            running: row.try_get("running")?,
            failed: row.try_get("failed")?,
            succeeded: row.try_get("succeeded")?,
        })
    }

    async fn filesystem_status(&self, job: i64) -> ShepherdResult<Vec<FilesystemStatusRow>> {
        let rows = sqlx::query(
            "select job, filesystem, concurrency, max_concurrency
             from filesystem_status where job = $1 order by filesystem",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(FilesystemStatusRow {
                    job: row.try_get("job")?,
                    filesystem: row.try_get("filesystem")?,
                    concurrency: row.try_get("concurrency")?,
                    max_concurrency: row.try_get::<i32, _>("max_concurrency")? as i64,
                })
            })
            .collect()
    }

    async fn job_throughput(&self, job: i64) -> ShepherdResult<Vec<ThroughputRow>> {
        let rows = sqlx::query(
            "select job, source_filesystem, target_filesystem, transfer_rate, failure_rate
             from job_throughput where job = $1
             order by source_filesystem, target_filesystem",
        )
        .bind(job)
        .fetch_all(&self.pool)
        .await
        .map_err(ShepherdError::Database)?;

        rows.iter()
            .map(|row| {
                Ok(ThroughputRow {
                    job: row.try_get("job")?,
                    source_filesystem: row.try_get("source_filesystem")?,
                    target_filesystem: row.try_get("target_filesystem")?,
                    transfer_rate: row.try_get("transfer_rate")?,
                    failure_rate: row.try_get("failure_rate")?,
                })
            })
            .collect()
    }
}
