//! SQLite 状态库的存取、约束与派生视图测试

use chrono::{Duration, TimeZone, Utc};

use shepherd_domain::{FilesystemSpec, JobPhase, JobStore, NewData, NewTask};
use shepherd_state::{SqliteJobStore, SCHEMA_VERSION};
use shepherd_testing_utils::{
    insert_attempt, seed_xyzzy_scenario, set_attempt_exit, JobFixtureBuilder,
};

async fn memory_store() -> SqliteJobStore {
    SqliteJobStore::connect("sqlite::memory:")
        .await
        .expect("connect in-memory store")
}

fn new_task(filesystem: i64, source: &str, target: &str) -> NewTask {
    NewTask {
        source: NewData {
            filesystem,
            address: source.to_string(),
            size: None,
        },
        target: NewData {
            filesystem,
            address: target.to_string(),
            size: None,
        },
        script: "#!/bin/sh\ntrue\n".to_string(),
    }
}

#[tokio::test]
async fn test_schema_idempotence() {
    // 架构幂等律：对已初始化的库重跑建库是无操作
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("state.db").display());

    let store = SqliteJobStore::connect(&url).await.unwrap();
    let job = store.create_job("client-1", 3).await.unwrap();
    drop(store);

    let store = SqliteJobStore::connect(&url).await.unwrap();
    let found = store.find_job(job.id).await.unwrap().unwrap();
    assert_eq!(found.client_ref, "client-1");
    assert_eq!(found.max_attempts, 3);
}

#[tokio::test]
async fn test_schema_version_mismatch_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("state.db").display());

    let store = SqliteJobStore::connect(&url).await.unwrap();
    sqlx::query("update shepherd_meta set value = '19700101' where key = '__version__'")
        .execute(store.pool())
        .await
        .unwrap();
    drop(store);

    let err = SqliteJobStore::connect(&url).await.unwrap_err();
    match err {
        shepherd_errors::ShepherdError::SchemaMismatch { expected, found } => {
            assert_eq!(expected, SCHEMA_VERSION);
            assert_eq!(found, "19700101");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_task_constraints() {
    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new().build(&store).await.unwrap();
    let fs = fixture.filesystem_id;
    let job = fixture.job.id;

    // source != target
    let err = store
        .insert_task_chain(job, &[new_task(fs, "same", "same")])
        .await;
    assert!(err.is_err());

    // 同一作业内 target 唯一
    store
        .insert_task_chain(job, &[new_task(fs, "a", "shared-target")])
        .await
        .unwrap();
    let err = store
        .insert_task_chain(job, &[new_task(fs, "b", "shared-target")])
        .await;
    assert!(err.is_err());

    // (source, target) 唯一
    let err = store
        .insert_task_chain(job, &[new_task(fs, "a", "shared-target")])
        .await;
    assert!(err.is_err());

    // 任务不能依赖自身（架构级 check）
    let task = store
        .insert_task_chain(job, &[new_task(fs, "c", "d")])
        .await
        .unwrap()
        .remove(0);
    let err = sqlx::query("update tasks set dependency = $1 where id = $1")
        .bind(task.id)
        .execute(store.pool())
        .await;
    assert!(err.is_err());
}

#[tokio::test]
async fn test_chain_insertion_is_atomic() {
    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new().build(&store).await.unwrap();
    let fs = fixture.filesystem_id;
    let job = fixture.job.id;
    store.open_phase(job, JobPhase::Transfer).await.unwrap();

    store
        .insert_task_chain(job, &[new_task(fs, "x", "occupied")])
        .await
        .unwrap();

    // 链的第二个任务违反 target 唯一约束：整条链都不应落库
    let chain = [
        new_task(fs, "f1", "staging-f1"),
        new_task(fs, "staging-f1", "occupied"),
    ];
    assert!(store.insert_task_chain(job, &chain).await.is_err());

    let todo = store.todo(job).await.unwrap();
    assert!(!todo.iter().any(|row| row.source.address == "f1"));
}

#[tokio::test]
async fn test_claim_respects_concurrency_cap() {
    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new()
        .with_filesystem("xyzzy", 1)
        .build(&store)
        .await
        .unwrap();
    let fs = fixture.filesystem_id;
    let job = fixture.job.id;
    store.open_phase(job, JobPhase::Transfer).await.unwrap();

    store
        .insert_task_chain(job, &[new_task(fs, "a", "a.out")])
        .await
        .unwrap();
    store
        .insert_task_chain(job, &[new_task(fs, "b", "b.out")])
        .await
        .unwrap();

    // 单次批量认领也不得冲破并发上限
    let claimed = store.claim_tasks(job, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    // 额度占满时second认领为空
    assert!(store.claim_tasks(job, 10).await.unwrap().is_empty());

    // 尝试完成后额度释放
    store.finish_attempt(claimed[0].attempt, 0).await.unwrap();
    let next = store.claim_tasks(job, 10).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_ne!(next[0].task, claimed[0].task);
}

#[tokio::test]
async fn test_claim_and_finish_roundtrip() {
    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let job = scenario.fixture.job.id;

    // 认领 T1，任务从 todo 消失
    let claimed = store.claim_tasks(job, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].task, scenario.t1.id);
    assert_eq!(claimed[0].script, "abc123");
    assert_eq!(claimed[0].source.address, "foo");
    assert_eq!(claimed[0].target.address, "bar");
    assert!(store.claim_tasks(job, 10).await.unwrap().is_empty());

    // 失败但有预算：立即重新可认领
    store.finish_attempt(claimed[0].attempt, 1).await.unwrap();
    let retried = store.claim_tasks(job, 10).await.unwrap();
    assert_eq!(retried.len(), 1);
    assert_eq!(retried[0].task, scenario.t1.id);

    // 成功后轮到 T2
    store.finish_attempt(retried[0].attempt, 0).await.unwrap();
    let next = store.claim_tasks(job, 10).await.unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].task, scenario.t2.id);
}

#[tokio::test]
async fn test_force_restart_resets_inflight_attempts() {
    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let job = scenario.fixture.job.id;

    let claimed = store.claim_tasks(job, 1).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(store.todo(job).await.unwrap().is_empty());

    // 模拟进程中断后重启：在途尝试记为失败，任务重新可分发
    store.resume_job(job, true).await.unwrap();
    let todo = store.todo(job).await.unwrap();
    assert_eq!(todo.len(), 1);
    assert_eq!(todo[0].task, scenario.t1.id);

    let status = store.task_status(scenario.t1.id).await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].exit_code, Some(1));
}

#[tokio::test]
async fn test_task_status_view() {
    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    // 零尝试任务：attempt = 0, latest = true, succeeded = false
    let status = store.task_status(scenario.t1.id).await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].attempt, 0);
    assert!(status[0].latest);
    assert!(!status[0].succeeded);

    insert_attempt(store.pool(), scenario.t1.id, t, Some(1)).await;
    insert_attempt(store.pool(), scenario.t1.id, t + Duration::seconds(5), Some(0)).await;

    let status = store.task_status(scenario.t1.id).await.unwrap();
    assert_eq!(status.len(), 2);
    // 按时间顺序编号，仅最近一条标记 latest
    assert_eq!(status[0].attempt, 1);
    assert!(!status[0].latest);
    assert!(!status[0].succeeded);
    assert_eq!(status[1].attempt, 2);
    assert!(status[1].latest);
    assert!(status[1].succeeded);
}

#[tokio::test]
async fn test_job_status_and_filesystem_status() {
    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new()
        .with_filesystem("xyzzy", 10)
        .with_max_attempts(2)
        .build(&store)
        .await
        .unwrap();
    let fs = fixture.filesystem_id;
    let job = fixture.job.id;
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let tasks: Vec<_> = [
        ("p", "p.out"),  // pending
        ("r", "r.out"),  // running
        ("f", "f.out"),  // failed terminal
        ("s", "s.out"),  // succeeded
    ]
    .iter()
    .map(|(s, d)| new_task(fs, s, d))
    .collect();

    let mut ids = Vec::new();
    for task in &tasks {
        ids.push(
            store
                .insert_task_chain(job, std::slice::from_ref(task))
                .await
                .unwrap()
                .remove(0)
                .id,
        );
    }

    insert_attempt(store.pool(), ids[1], t, None).await;
    insert_attempt(store.pool(), ids[2], t, Some(1)).await;
    insert_attempt(store.pool(), ids[2], t + Duration::seconds(1), Some(1)).await;
    insert_attempt(store.pool(), ids[3], t, Some(0)).await;

    let totals = store.job_status_totals(job).await.unwrap();
    assert_eq!(totals.pending, 1);
    assert_eq!(totals.running, 1);
    assert_eq!(totals.failed, 1);
    assert_eq!(totals.succeeded, 1);
    assert!(!totals.is_complete());

    let rows = store.job_status(job).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].source_filesystem, "xyzzy");
    assert_eq!(rows[0].target_filesystem, "xyzzy");

    // 在途任务同时占用源与目标（此处同一文件系统，计一次）
    let fs_status = store.filesystem_status(job).await.unwrap();
    assert_eq!(fs_status.len(), 1);
    assert_eq!(fs_status[0].concurrency, 1);
    assert_eq!(fs_status[0].max_concurrency, 10);
}

#[tokio::test]
async fn test_throughput_and_eta_ordering() {
    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new()
        .with_filesystem("xyzzy", 10)
        .build(&store)
        .await
        .unwrap();
    let fs = fixture.filesystem_id;
    let job = fixture.job.id;
    store.open_phase(job, JobPhase::Transfer).await.unwrap();
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    // 历史任务建立吞吐统计: 1000 字节 / 1 秒 = 1000 B/s，失败率 0
    let seed = store
        .insert_task_chain(
            job,
            &[NewTask {
                source: NewData {
                    filesystem: fs,
                    address: "seed".to_string(),
                    size: Some(1000),
                },
                target: NewData {
                    filesystem: fs,
                    address: "seed.out".to_string(),
                    size: None,
                },
                script: "x".to_string(),
            }],
        )
        .await
        .unwrap()
        .remove(0);
    insert_attempt(store.pool(), seed.id, t, Some(0)).await;

    let throughput = store.job_throughput(job).await.unwrap();
    assert_eq!(throughput.len(), 1);
    let rate = throughput[0].transfer_rate.unwrap();
    assert!((rate - 1000.0).abs() < 1.0, "rate = {rate}");
    assert_eq!(throughput[0].failure_rate, Some(0.0));

    // 三个待分发任务：大文件、小文件、无大小
    for (addr, size) in [("big", Some(1_000_000i64)), ("small", Some(10)), ("nosize", None)] {
        store
            .insert_task_chain(
                job,
                &[NewTask {
                    source: NewData {
                        filesystem: fs,
                        address: addr.to_string(),
                        size,
                    },
                    target: NewData {
                        filesystem: fs,
                        address: format!("{addr}.out"),
                        size: None,
                    },
                    script: "x".to_string(),
                }],
            )
            .await
            .unwrap();
    }

    // eta 升序、空值最后
    let todo = store.todo(job).await.unwrap();
    assert_eq!(todo.len(), 3);
    assert_eq!(todo[0].source.address, "small");
    assert_eq!(todo[1].source.address, "big");
    assert_eq!(todo[2].source.address, "nosize");
    assert!(todo[0].eta_seconds.unwrap() < todo[1].eta_seconds.unwrap());
    assert!(todo[2].eta_seconds.is_none());
}

#[tokio::test]
async fn test_failure_rate_mixture() {
    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new().build(&store).await.unwrap();
    let fs = fixture.filesystem_id;
    let job = fixture.job.id;
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    let task = store
        .insert_task_chain(
            job,
            &[NewTask {
                source: NewData {
                    filesystem: fs,
                    address: "mix".to_string(),
                    size: Some(100),
                },
                target: NewData {
                    filesystem: fs,
                    address: "mix.out".to_string(),
                    size: None,
                },
                script: "x".to_string(),
            }],
        )
        .await
        .unwrap()
        .remove(0);

    // 一败一成：失败率 0.5；在途尝试不计入
    insert_attempt(store.pool(), task.id, t, Some(1)).await;
    insert_attempt(store.pool(), task.id, t + Duration::seconds(2), Some(0)).await;

    let throughput = store.job_throughput(job).await.unwrap();
    assert_eq!(throughput[0].failure_rate, Some(0.5));
}

#[tokio::test]
async fn test_get_or_create_data() {
    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new().build(&store).await.unwrap();
    let fs = fixture.filesystem_id;

    let first = store.get_or_create_data(fs, "/d/file", None).await.unwrap();
    let second = store
        .get_or_create_data(fs, "/d/file", Some(42))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    // 大小只回填，不覆盖
    assert_eq!(second.size, Some(42));
    let third = store
        .get_or_create_data(fs, "/d/file", Some(99))
        .await
        .unwrap();
    assert_eq!(third.size, Some(42));

    store.record_checksum(first.id, "md5", "abc").await.unwrap();
    store.record_checksum(first.id, "md5", "def").await.unwrap();
    let checksum: String =
        sqlx::query_scalar("select checksum from checksums where data = $1 and algorithm = 'md5'")
            .bind(first.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
    // 重新校验不覆盖首次记录
    assert_eq!(checksum, "abc");

    store.set_metadata(first.id, "study", "xyz").await.unwrap();
    store.set_metadata(first.id, "study", "other").await.unwrap();
    let value: String =
        sqlx::query_scalar("select value from metadata where data = $1 and key = 'study'")
            .bind(first.id)
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(value, "xyz");
}

#[tokio::test]
async fn test_phase_lifecycle() {
    let store = memory_store().await;
    let job = store.create_job("client", 3).await.unwrap();

    let opened = store.open_phase(job.id, JobPhase::Prepare).await.unwrap();
    assert!(opened.is_open());

    let closed = store.close_phase(job.id, JobPhase::Prepare).await.unwrap();
    assert!(!closed.is_open());
    assert!(closed.finish.unwrap() >= closed.start);

    // 文件系统登记是幂等的
    let spec = FilesystemSpec {
        name: "fs".to_string(),
        driver: "posix".to_string(),
        max_concurrency: 4,
    };
    let a = store.register_filesystem(job.id, &spec).await.unwrap();
    let b = store.register_filesystem(job.id, &spec).await.unwrap();
    assert_eq!(a.id, b.id);
}
