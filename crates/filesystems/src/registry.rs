//! 文件系统注册表
//!
//! 配置装载后不可变。每个条目持有驱动句柄与生效的并发上限
//! （配置值，缺省时取驱动默认值）。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use shepherd_config::FilesystemConfig;
use shepherd_domain::FilesystemDriver;
use shepherd_errors::{ShepherdError, ShepherdResult};

use crate::posix::PosixFilesystem;

/// 注册表条目
pub struct FilesystemEntry {
    pub name: String,
    pub driver: Arc<dyn FilesystemDriver>,
    pub max_concurrency: i32,
}

impl fmt::Debug for FilesystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilesystemEntry")
            .field("name", &self.name)
            .field("max_concurrency", &self.max_concurrency)
            .finish()
    }
}

#[derive(Debug)]
pub struct FilesystemRegistry {
    entries: BTreeMap<String, FilesystemEntry>,
}

impl FilesystemRegistry {
    /// 由配置装配注册表
    pub fn from_config(configs: &[FilesystemConfig]) -> ShepherdResult<Self> {
        let mut entries = BTreeMap::new();
        for config in configs {
            if entries.contains_key(&config.name) {
                return Err(ShepherdError::config_error(format!(
                    "文件系统名称重复: {}",
                    config.name
                )));
            }

            let driver = build_driver(&config.driver)?;
            let max_concurrency = config
                .max_concurrency
                .unwrap_or_else(|| driver.max_concurrency_default());
            if max_concurrency < 1 {
                return Err(ShepherdError::config_error(format!(
                    "文件系统 {} 的 max_concurrency 必须为正数",
                    config.name
                )));
            }

            entries.insert(
                config.name.clone(),
                FilesystemEntry {
                    name: config.name.clone(),
                    driver,
                    max_concurrency,
                },
            );
        }
        Ok(Self { entries })
    }

    pub fn get(&self, name: &str) -> ShepherdResult<&FilesystemEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| ShepherdError::FilesystemNotFound {
                name: name.to_string(),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilesystemEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_driver(key: &str) -> ShepherdResult<Arc<dyn FilesystemDriver>> {
    match key {
        "posix" => Ok(Arc::new(PosixFilesystem::new())),
        other => Err(ShepherdError::config_error(format!(
            "未知的文件系统驱动: {other}"
        ))),
    }
}
