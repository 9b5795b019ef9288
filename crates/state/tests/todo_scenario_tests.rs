//! todo 视图的验收场景
//!
//! 架构初始化后：max_attempts = 3，文件系统 "xyzzy"
//! （max_concurrency = 10），数据对象 foo、bar、quux，任务
//! T1: foo→bar（脚本 "abc123"）与 T2: bar→quux（脚本 "123abc"，
//! 依赖 T1），transfer 阶段已开放。逐步操作尝试记录并断言 todo
//! 的内容。

use chrono::{Duration, TimeZone, Utc};

use shepherd_state::SqliteJobStore;
use shepherd_testing_utils::{
    insert_attempt, latest_attempt_id, seed_xyzzy_scenario, set_attempt_exit,
};

async fn memory_store() -> SqliteJobStore {
    SqliteJobStore::connect("sqlite::memory:")
        .await
        .expect("connect in-memory store")
}

async fn todo_tasks(store: &SqliteJobStore, job: i64) -> Vec<i64> {
    use shepherd_domain::JobStore;
    store
        .todo(job)
        .await
        .expect("todo view")
        .iter()
        .map(|row| row.task)
        .collect()
}

#[tokio::test]
async fn test_todo_scenario_table() {
    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.expect("seed scenario");
    let job = scenario.fixture.job.id;
    let (t1, t2) = (scenario.t1.id, scenario.t2.id);
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    // 1. 初始：仅 T1（T2 的依赖未满足）
    assert_eq!(todo_tasks(&store, job).await, vec![t1]);

    // 2. T1 在途 → 空
    let a1 = insert_attempt(store.pool(), t1, t, None).await;
    assert!(todo_tasks(&store, job).await.is_empty());

    // 3. T1 第一次失败 → 仅 T1
    set_attempt_exit(store.pool(), a1, Some(1)).await;
    assert_eq!(todo_tasks(&store, job).await, vec![t1]);

    // 4. T1 第二次尝试成功 → 仅 T2
    insert_attempt(store.pool(), t1, t + Duration::seconds(10), Some(0)).await;
    assert_eq!(todo_tasks(&store, job).await, vec![t2]);

    // 5. 人为把最近一次尝试改回失败 → 仅 T1
    let latest = latest_attempt_id(store.pool(), t1).await;
    set_attempt_exit(store.pool(), latest, Some(1)).await;
    assert_eq!(todo_tasks(&store, job).await, vec![t1]);

    // 6. 第三次失败，预算耗尽 → 空（T1 终失败）
    insert_attempt(store.pool(), t1, t + Duration::seconds(20), Some(1)).await;
    assert!(todo_tasks(&store, job).await.is_empty());

    // 7. 把最后一次尝试改成成功 → 仅 T2
    let latest = latest_attempt_id(store.pool(), t1).await;
    set_attempt_exit(store.pool(), latest, Some(0)).await;
    assert_eq!(todo_tasks(&store, job).await, vec![t2]);

    // 8. T2 成功 → 空
    insert_attempt(store.pool(), t2, t + Duration::seconds(30), Some(0)).await;
    assert!(todo_tasks(&store, job).await.is_empty());
}

#[tokio::test]
async fn test_inflight_attempt_excludes_task() {
    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let job = scenario.fixture.job.id;
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    // 不变量 6: 有在途尝试的任务绝不出现在 todo
    insert_attempt(store.pool(), scenario.t1.id, t, None).await;
    assert!(todo_tasks(&store, job).await.is_empty());

    // 依赖者也不会因此变得可分发
    assert!(!todo_tasks(&store, job).await.contains(&scenario.t2.id));
}

#[tokio::test]
async fn test_succeeded_is_absorbing_for_claims() {
    use shepherd_domain::JobStore;

    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let job = scenario.fixture.job.id;
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    insert_attempt(store.pool(), scenario.t1.id, t, Some(0)).await;
    insert_attempt(store.pool(), scenario.t2.id, t + Duration::seconds(5), Some(0)).await;

    // 不变量 5: 两个任务都已成功，认领不再发生
    let claimed = store.claim_tasks(job, 10).await.unwrap();
    assert!(claimed.is_empty());
    assert!(todo_tasks(&store, job).await.is_empty());
}

#[tokio::test]
async fn test_dependency_gates_eligibility() {
    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let job = scenario.fixture.job.id;
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    // T1 失败两次（仍有预算）：T2 始终被依赖阻塞
    insert_attempt(store.pool(), scenario.t1.id, t, Some(1)).await;
    assert_eq!(todo_tasks(&store, job).await, vec![scenario.t1.id]);
    insert_attempt(store.pool(), scenario.t1.id, t + Duration::seconds(1), Some(1)).await;
    assert_eq!(todo_tasks(&store, job).await, vec![scenario.t1.id]);
}

#[tokio::test]
async fn test_attempt_budget_in_todo() {
    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let job = scenario.fixture.job.id;
    let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();

    // 不变量 4: todo 中的任务尝试数必然 < max_attempts
    for i in 0..3 {
        insert_attempt(
            store.pool(),
            scenario.t1.id,
            t + Duration::seconds(i),
            Some(1),
        )
        .await;
    }
    assert!(todo_tasks(&store, job).await.is_empty());
}

#[tokio::test]
async fn test_transfer_phase_close_empties_todo() {
    use shepherd_domain::{JobPhase, JobStore};

    let store = memory_store().await;
    let scenario = seed_xyzzy_scenario(&store).await.unwrap();
    let job = scenario.fixture.job.id;

    // 固件已开放 transfer 阶段
    assert_eq!(todo_tasks(&store, job).await, vec![scenario.t1.id]);

    store.close_phase(job, JobPhase::Transfer).await.unwrap();
    assert!(todo_tasks(&store, job).await.is_empty());

    // 重新开放后恢复
    store.open_phase(job, JobPhase::Transfer).await.unwrap();
    assert_eq!(todo_tasks(&store, job).await, vec![scenario.t1.id]);
}

#[tokio::test]
async fn test_todo_requires_open_transfer_phase() {
    use shepherd_domain::{JobPhase, JobStore};
    use shepherd_testing_utils::JobFixtureBuilder;

    let store = memory_store().await;
    let fixture = JobFixtureBuilder::new().build(&store).await.unwrap();
    let job = fixture.job.id;
    fixture
        .insert_task(&store, "foo", "bar", "abc123")
        .await
        .unwrap();

    // 准则 1: 从未开放 transfer 阶段的作业不产出任何 todo 行，
    // prepare 阶段的开闭也不改变这一点
    assert!(todo_tasks(&store, job).await.is_empty());
    store.open_phase(job, JobPhase::Prepare).await.unwrap();
    assert!(todo_tasks(&store, job).await.is_empty());

    store.open_phase(job, JobPhase::Transfer).await.unwrap();
    assert_eq!(todo_tasks(&store, job).await.len(), 1);
}
