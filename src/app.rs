//! 应用装配
//!
//! 把配置、变量环境、规划引擎、状态库、文件系统驱动与执行器
//! 接成一个完整的作业流程：规划 → 展开入库（prepare 阶段）→
//! 分发执行（transfer 阶段）。

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use shepherd_config::{PhaseResources, Settings, ShepherdConfig, VariableSet};
use shepherd_dispatcher::{DispatchConfig, JobOutcome, TransferDispatcher};
use shepherd_domain::{
    Expression, FilesystemSpec, JobPhase, JobStore, NewData, NewTask, QuerySource,
    ResourceRequest,
};
use shepherd_errors::{ShepherdError, ShepherdResult};
use shepherd_executor::build_executor;
use shepherd_filesystems::FilesystemRegistry;
use shepherd_planning::{
    resolve_named, resolve_planned, validate_named_route, Itinerary, TaskExpander,
    TemplateEngine, TransferGraph,
};

/// 一次调用要做的事
#[derive(Debug, Clone)]
pub enum Action {
    /// `from FS_A to FS_B QUERY`：自动规划路线
    Transfer {
        source_fs: String,
        target_fs: String,
        query: Vec<String>,
    },
    /// `through NAMED_ROUTE QUERY`：按命名路线
    Through { route: String, query: Vec<String> },
    /// 恢复既有作业，仅运行 transfer 阶段
    Resume { job_id: i64, force_restart: bool },
}

pub struct Application {
    settings: Settings,
    config: ShepherdConfig,
    vars: VariableSet,
    engine: TemplateEngine,
    registry: FilesystemRegistry,
    graph: TransferGraph,
}

impl Application {
    pub fn new(
        settings: Settings,
        config: ShepherdConfig,
        vars: VariableSet,
    ) -> ShepherdResult<Self> {
        let engine = TemplateEngine::new();
        let registry = FilesystemRegistry::from_config(&config.filesystems)?;
        let graph = TransferGraph::from_config(&config)?;

        // 命名路线的邻接不变量在装载时校验
        for route in &config.named_routes {
            validate_named_route(&graph, route)?;
        }

        Ok(Self {
            settings,
            config,
            vars,
            engine,
            registry,
            graph,
        })
    }

    pub async fn run(&self, action: Action) -> ShepherdResult<JobOutcome> {
        let store = shepherd_state::connect(&self.settings.state.url).await?;

        match action {
            Action::Resume {
                job_id,
                force_restart,
            } => {
                let job = store.resume_job(job_id, force_restart).await?;
                info!("恢复作业 {} (client_ref {})", job.id, job.client_ref);
                self.dispatch(store, job.id).await
            }
            Action::Transfer {
                source_fs,
                target_fs,
                query,
            } => {
                let itinerary = resolve_planned(
                    &self.graph,
                    &source_fs,
                    &target_fs,
                    &self.engine,
                    &self.vars,
                )?;
                info!(
                    "规划 {} -> {}: {} 跳",
                    source_fs,
                    target_fs,
                    itinerary.len()
                );
                let job = self.prepare(store.as_ref(), &itinerary, &query).await?;
                self.dispatch(store, job).await
            }
            Action::Through { route, query } => {
                let itinerary = resolve_named(
                    &self.graph,
                    &self.config.named_routes,
                    &route,
                    &self.engine,
                    &self.vars,
                )?;
                info!("命名路线 {}: {} 跳", route, itinerary.len());
                let job = self.prepare(store.as_ref(), &itinerary, &query).await?;
                self.dispatch(store, job).await
            }
        }
    }

    /// prepare 阶段：识别文件、展开任务链并入库
    async fn prepare(
        &self,
        store: &dyn JobStore,
        itinerary: &Itinerary,
        query: &[String],
    ) -> ShepherdResult<i64> {
        let (source, criteria) = crate::query::parse_query(query)?;

        let client_ref = Uuid::new_v4().to_string();
        let job = store
            .create_job(&client_ref, self.config.defaults.max_attempts)
            .await?;
        info!("创建作业 {} (client_ref {})", job.id, client_ref);

        store.open_phase(job.id, JobPhase::Prepare).await?;

        // 登记行程涉及的全部文件系统并记下各自的行 id
        let mut filesystem_ids: BTreeMap<String, i64> = BTreeMap::new();
        for name in itinerary.filesystems() {
            let entry = self.registry.get(name)?;
            let registered = store
                .register_filesystem(
                    job.id,
                    &FilesystemSpec {
                        name: entry.name.clone(),
                        driver: entry.driver.driver_key().to_string(),
                        max_concurrency: entry.max_concurrency,
                    },
                )
                .await?;
            filesystem_ids.insert(entry.name.clone(), registered.id);
        }

        let files = self
            .expand_into_store(store, job.id, itinerary, &source, criteria.as_ref(), &filesystem_ids)
            .await?;

        store.close_phase(job.id, JobPhase::Prepare).await?;
        info!(
            "作业 {} 规划完成: {} 个文件, {} 跳",
            job.id,
            files,
            itinerary.len()
        );
        Ok(job.id)
    }

    async fn expand_into_store(
        &self,
        store: &dyn JobStore,
        job: i64,
        itinerary: &Itinerary,
        source: &QuerySource,
        criteria: Option<&Expression>,
        filesystem_ids: &BTreeMap<String, i64>,
    ) -> ShepherdResult<usize> {
        let entry = self.registry.get(itinerary.source_filesystem())?;
        let stubs = entry.driver.query(source, criteria)?;
        let expander = TaskExpander::new(itinerary, &self.engine, &self.vars);

        let mut files = 0usize;
        for stub in stubs {
            let stub = stub?;
            let blueprints = expander.expand(&stub.address)?;

            let chain: Vec<NewTask> = blueprints
                .iter()
                .enumerate()
                .map(|(i, blueprint)| {
                    let fs_id = |name: &str| {
                        filesystem_ids.get(name).copied().ok_or_else(|| {
                            ShepherdError::FilesystemNotFound {
                                name: name.to_string(),
                            }
                        })
                    };
                    Ok(NewTask {
                        source: NewData {
                            filesystem: fs_id(&blueprint.source.filesystem)?,
                            address: blueprint.source.address.clone(),
                            size: if i == 0 { stub.size } else { None },
                        },
                        target: NewData {
                            filesystem: fs_id(&blueprint.target.filesystem)?,
                            address: blueprint.target.address.clone(),
                            size: None,
                        },
                        script: blueprint.script.clone(),
                    })
                })
                .collect::<ShepherdResult<_>>()?;

            store.insert_task_chain(job, &chain).await?;
            files += 1;
            debug!("文件 {} 展开为 {} 个任务", stub.address, chain.len());
        }
        Ok(files)
    }

    /// transfer 阶段：分发直至全部任务到达终态
    async fn dispatch(
        &self,
        store: Arc<dyn JobStore>,
        job: i64,
    ) -> ShepherdResult<JobOutcome> {
        let executor = build_executor(&self.config.executor)?;
        let dispatcher = TransferDispatcher::new(
            store,
            executor,
            resource_request(&self.config.phase.transfer),
            DispatchConfig {
                batch_size: self.settings.dispatch.batch_size,
                poll_interval: std::time::Duration::from_secs(
                    self.settings.dispatch.poll_interval_seconds,
                ),
            },
        );
        dispatcher.run(job).await
    }
}

fn resource_request(resources: &PhaseResources) -> ResourceRequest {
    ResourceRequest {
        cores: resources.cores,
        memory_mb: resources.memory,
        group: resources.group.clone(),
    }
}

/// 把 CLI 的自由动作词解析为 Action
pub fn parse_action(words: &[String]) -> ShepherdResult<Action> {
    let usage = || {
        ShepherdError::Usage(
            "期望 'from FS_A to FS_B take ...'、'through ROUTE take ...' 或 'help'".to_string(),
        )
    };

    match words.first().map(String::as_str) {
        Some("from") => {
            if words.len() < 5 || words[2] != "to" {
                return Err(usage());
            }
            Ok(Action::Transfer {
                source_fs: words[1].clone(),
                target_fs: words[3].clone(),
                query: words[4..].to_vec(),
            })
        }
        Some("through") => {
            if words.len() < 3 {
                return Err(usage());
            }
            Ok(Action::Through {
                route: words[1].clone(),
                query: words[2..].to_vec(),
            })
        }
        _ => Err(usage()),
    }
}
