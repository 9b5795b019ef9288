//! Shepherd 配置层
//!
//! YAML 配置文件的模型与多文件合并、运行设置、以及进程级不可变的
//! 模板变量环境。

pub mod loader;
pub mod models;
pub mod settings;
pub mod variables;

pub use loader::load_config;
pub use models::{
    ConfigFile, DefaultsConfig, ExecutorConfig, FilesystemConfig, NamedRouteConfig, NamedRouteHop,
    PhaseConfig, PhaseResources, ShepherdConfig, TransferConfig, TransformationConfig,
};
pub use settings::{DispatchSettings, LogSettings, Settings, StateSettings};
pub use variables::{parse_cli_variables, reject_reserved, VariableSet, ENV_PREFIX, RESERVED_NAMES};
