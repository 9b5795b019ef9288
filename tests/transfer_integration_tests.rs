//! 端到端集成测试
//!
//! 真实文件、嵌入式 SQLite 状态库、本地执行器：从配置装配一路
//! 跑到文件落盘。通过把二进制 crate 的装配逻辑当作库函数来驱动
//! 是不可行的（bin crate 不可被依赖），因此这里直接用各 crate
//! 组装同样的流程。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use shepherd_config::{TransformationConfig, VariableSet};
use shepherd_dispatcher::{DispatchConfig, TransferDispatcher};
use shepherd_domain::{
    FilesystemDriver, FilesystemSpec, JobPhase, JobStore, NewData, NewTask, QuerySource,
    ResourceRequest,
};
use shepherd_executor::LocalExecutor;
use shepherd_filesystems::PosixFilesystem;
use shepherd_planning::{
    resolve_planned, TaskExpander, TemplateEngine, TransferGraph, TransferRoute,
};
use shepherd_state::SqliteJobStore;

const COPY_SCRIPT: &str = r#"#!/usr/bin/env bash
set -e
mkdir -p "$(dirname "{{ target.address | sh_escape }}")"
cp -- "{{ source.address | sh_escape }}" "{{ target.address | sh_escape }}"
"#;

fn prefix_transformation(path: &str) -> TransformationConfig {
    TransformationConfig {
        name: "prefix".to_string(),
        options: [(
            "path".to_string(),
            serde_yaml::Value::String(path.to_string()),
        )]
        .into_iter()
        .collect(),
    }
}

struct Pipeline {
    store: Arc<SqliteJobStore>,
    job: i64,
}

/// 装配一条单跳 lustre -> warehouse 行程并完成 prepare 阶段
async fn prepare_single_hop(source_root: &Path, target_root: &Path) -> Pipeline {
    let mut graph = TransferGraph::new();
    graph.add_filesystem("lustre").unwrap();
    graph.add_filesystem("warehouse").unwrap();
    graph
        .add_route(TransferRoute {
            name: "stage".to_string(),
            source: "lustre".to_string(),
            target: "warehouse".to_string(),
            cost: 1,
            script_template: COPY_SCRIPT.to_string(),
            transformations: vec![prefix_transformation(&target_root.to_string_lossy())],
        })
        .unwrap();

    let engine = TemplateEngine::new();
    let vars = VariableSet::from_map(Default::default()).unwrap();
    let itinerary = resolve_planned(&graph, "lustre", "warehouse", &engine, &vars).unwrap();

    let store = Arc::new(SqliteJobStore::connect("sqlite::memory:").await.unwrap());
    let job = store.create_job("integration-test", 3).await.unwrap();
    store.open_phase(job.id, JobPhase::Prepare).await.unwrap();

    let mut filesystem_ids = BTreeMap::new();
    for name in ["lustre", "warehouse"] {
        let fs = store
            .register_filesystem(
                job.id,
                &FilesystemSpec {
                    name: name.to_string(),
                    driver: "posix".to_string(),
                    max_concurrency: 10,
                },
            )
            .await
            .unwrap();
        filesystem_ids.insert(name.to_string(), fs.id);
    }

    let driver = PosixFilesystem::new();
    let source = QuerySource::Roots(vec![source_root.to_string_lossy().into_owned()]);
    let expander = TaskExpander::new(&itinerary, &engine, &vars);

    for stub in driver.query(&source, None).unwrap() {
        let stub = stub.unwrap();
        let chain: Vec<NewTask> = expander
            .expand(&stub.address)
            .unwrap()
            .into_iter()
            .enumerate()
            .map(|(i, bp)| NewTask {
                source: NewData {
                    filesystem: filesystem_ids[&bp.source.filesystem],
                    address: bp.source.address,
                    size: if i == 0 { stub.size } else { None },
                },
                target: NewData {
                    filesystem: filesystem_ids[&bp.target.filesystem],
                    address: bp.target.address,
                    size: None,
                },
                script: bp.script,
            })
            .collect();
        store.insert_task_chain(job.id, &chain).await.unwrap();
    }

    store.close_phase(job.id, JobPhase::Prepare).await.unwrap();
    Pipeline { store, job: job.id }
}

async fn dispatch(pipeline: &Pipeline) -> shepherd_dispatcher::JobOutcome {
    let dispatcher = TransferDispatcher::new(
        pipeline.store.clone(),
        Arc::new(LocalExecutor::new()),
        ResourceRequest::default(),
        DispatchConfig {
            batch_size: 4,
            poll_interval: Duration::from_millis(20),
        },
    );
    dispatcher.run(pipeline.job).await.unwrap()
}

#[tokio::test]
async fn test_copy_tree_end_to_end() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();

    std::fs::create_dir_all(source_dir.path().join("run1")).unwrap();
    std::fs::write(source_dir.path().join("run1/a.cram"), b"payload-a").unwrap();
    std::fs::write(source_dir.path().join("run1/b.cram"), b"payload-b").unwrap();
    std::fs::write(source_dir.path().join("top.txt"), b"top").unwrap();

    let pipeline = prepare_single_hop(source_dir.path(), target_dir.path()).await;
    let outcome = dispatch(&pipeline).await;

    assert!(outcome.is_clean());
    assert_eq!(outcome.succeeded, 3);

    // prefix 变换在目标根下镜像完整源路径
    let mirrored = target_dir
        .path()
        .join(source_dir.path().strip_prefix("/").unwrap());
    assert_eq!(
        std::fs::read(mirrored.join("run1/a.cram")).unwrap(),
        b"payload-a"
    );
    assert_eq!(
        std::fs::read(mirrored.join("run1/b.cram")).unwrap(),
        b"payload-b"
    );
    assert_eq!(std::fs::read(mirrored.join("top.txt")).unwrap(), b"top");

    // 吞吐视图有了成功尝试的统计
    let throughput = pipeline.store.job_throughput(pipeline.job).await.unwrap();
    assert_eq!(throughput.len(), 1);
    assert_eq!(throughput[0].failure_rate, Some(0.0));
}

#[tokio::test]
async fn test_failing_script_reports_partial_failure() {
    let source_dir = tempfile::tempdir().unwrap();
    std::fs::write(source_dir.path().join("f.txt"), b"x").unwrap();

    // 目标目录不可写出：脚本以只读根为前缀，cp 必然失败
    let pipeline = prepare_single_hop(source_dir.path(), Path::new("/proc/shepherd-nope")).await;
    let outcome = dispatch(&pipeline).await;

    assert!(!outcome.is_clean());
    assert_eq!(outcome.failed, 1);

    // 每个任务恰好重试到预算上限
    let todo = pipeline.store.todo(pipeline.job).await.unwrap();
    assert!(todo.is_empty());
    let totals = pipeline.store.job_status_totals(pipeline.job).await.unwrap();
    assert_eq!(totals.failed, 1);
}
