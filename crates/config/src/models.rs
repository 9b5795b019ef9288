//! 配置文件模型
//!
//! 顶层键：`filesystems`、`transfers`、`named_routes`、`executor`、
//! `phase`、`defaults`。多个配置文件按给出顺序合并，后者覆盖前者。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use shepherd_errors::{ShepherdError, ShepherdResult};

/// 单个配置文件的原始内容，所有段都可缺省
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub filesystems: Vec<FilesystemConfig>,
    #[serde(default)]
    pub transfers: Vec<TransferConfig>,
    #[serde(default)]
    pub named_routes: Vec<NamedRouteConfig>,
    #[serde(default)]
    pub executor: Option<ExecutorConfig>,
    #[serde(default)]
    pub phase: Option<PhaseConfig>,
    #[serde(default)]
    pub defaults: Option<DefaultsConfig>,
}

/// 合并后的有效配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShepherdConfig {
    pub filesystems: Vec<FilesystemConfig>,
    pub transfers: Vec<TransferConfig>,
    pub named_routes: Vec<NamedRouteConfig>,
    pub executor: ExecutorConfig,
    pub phase: PhaseConfig,
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    pub name: String,
    pub driver: String,
    /// 省略时取驱动默认值
    #[serde(default)]
    pub max_concurrency: Option<i32>,
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    pub name: String,
    pub source: String,
    pub target: String,
    /// 多项式复杂度 O(n^k) 中的 k
    #[serde(default = "default_cost")]
    pub cost: u32,
    pub script: String,
    #[serde(default)]
    pub transformations: Vec<TransformationConfig>,
}

fn default_cost() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationConfig {
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedRouteConfig {
    pub name: String,
    pub hops: Vec<NamedRouteHop>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedRouteHop {
    /// 引用 `transfers` 中的路线名
    pub transfer: String,
    /// 该跳额外追加的变换，在路线自带变换之后执行
    #[serde(default)]
    pub transformations: Vec<TransformationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub driver: String,
    #[serde(default)]
    pub options: BTreeMap<String, serde_yaml::Value>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            driver: "local".to_string(),
            options: BTreeMap::new(),
        }
    }
}

/// 两个阶段各自的资源请求
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseConfig {
    #[serde(default)]
    pub prepare: PhaseResources,
    #[serde(default)]
    pub transfer: PhaseResources,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResources {
    #[serde(default = "default_cores")]
    pub cores: u32,
    /// 单位 MB
    #[serde(default = "default_memory")]
    pub memory: u64,
    #[serde(default)]
    pub group: Option<String>,
}

fn default_cores() -> u32 {
    1
}

fn default_memory() -> u64 {
    1000
}

impl Default for PhaseResources {
    fn default() -> Self {
        Self {
            cores: default_cores(),
            memory: default_memory(),
            group: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
}

fn default_max_attempts() -> i32 {
    3
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            variables: BTreeMap::new(),
        }
    }
}

impl ShepherdConfig {
    /// 配置自身的结构校验；图层面的校验（如命名路线的邻接性）
    /// 在规划层完成
    pub fn validate(&self) -> ShepherdResult<()> {
        let mut seen = std::collections::BTreeSet::new();
        for fs in &self.filesystems {
            if !seen.insert(&fs.name) {
                return Err(ShepherdError::config_error(format!(
                    "文件系统名称重复: {}",
                    fs.name
                )));
            }
            if let Some(limit) = fs.max_concurrency {
                if limit < 1 {
                    return Err(ShepherdError::config_error(format!(
                        "文件系统 {} 的 max_concurrency 必须为正数",
                        fs.name
                    )));
                }
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for transfer in &self.transfers {
            if !seen.insert(&transfer.name) {
                return Err(ShepherdError::config_error(format!(
                    "传输路线名称重复: {}",
                    transfer.name
                )));
            }
            if transfer.cost < 1 {
                return Err(ShepherdError::config_error(format!(
                    "传输路线 {} 的 cost 必须 >= 1",
                    transfer.name
                )));
            }
        }

        let mut seen = std::collections::BTreeSet::new();
        for route in &self.named_routes {
            if !seen.insert(&route.name) {
                return Err(ShepherdError::config_error(format!(
                    "命名路线名称重复: {}",
                    route.name
                )));
            }
            if route.hops.is_empty() {
                return Err(ShepherdError::config_error(format!(
                    "命名路线 {} 不包含任何跳",
                    route.name
                )));
            }
        }

        if self.defaults.max_attempts < 1 {
            return Err(ShepherdError::config_error(
                "defaults.max_attempts 必须 >= 1",
            ));
        }

        crate::variables::reject_reserved(self.defaults.variables.keys(), "config defaults")?;

        Ok(())
    }
}
