//! 模板变量环境
//!
//! 进程级、初始化后不可变。优先级：CLI `-v` > 环境变量 `SHEPHERD_*`
//! > `--variables` 文件 > 配置 `defaults`。`source` 与 `target` 为
//! 保留名，任何层注入都会在装配时被拒绝。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use shepherd_errors::{ShepherdError, ShepherdResult};

pub const RESERVED_NAMES: [&str; 2] = ["source", "target"];

pub const ENV_PREFIX: &str = "SHEPHERD_";

/// 检查一组变量名里是否混入了保留名
pub fn reject_reserved<'a, I>(names: I, layer: &str) -> ShepherdResult<()>
where
    I: IntoIterator<Item = &'a String>,
{
    for name in names {
        if RESERVED_NAMES.contains(&name.as_str()) {
            return Err(ShepherdError::config_error(format!(
                "变量名 '{name}' 为保留名，不允许在 {layer} 中定义"
            )));
        }
    }
    Ok(())
}

/// 不可变的变量环境
#[derive(Debug, Clone, Default, Serialize)]
pub struct VariableSet {
    inner: BTreeMap<String, String>,
}

impl VariableSet {
    /// 按优先级装配变量环境
    ///
    /// `cli` 为重复 `-v NAME=VALUE` 的解析结果；`files` 为
    /// `--variables` 给出的 YAML 映射文件；`environment` 为当前进程
    /// 环境中带 `SHEPHERD_` 前缀的变量（前缀剥除后进入模板）。
    pub fn build(
        defaults: &BTreeMap<String, String>,
        files: &[PathBuf],
        environment: impl IntoIterator<Item = (String, String)>,
        cli: &[(String, String)],
    ) -> ShepherdResult<Self> {
        let mut inner = BTreeMap::new();

        reject_reserved(defaults.keys(), "config defaults")?;
        for (key, value) in defaults {
            inner.insert(key.clone(), value.clone());
        }

        for file in files {
            let text = std::fs::read_to_string(file).map_err(|e| {
                ShepherdError::config_error(format!(
                    "读取变量文件 {} 失败: {e}",
                    file.display()
                ))
            })?;
            let parsed: BTreeMap<String, String> = serde_yaml::from_str(&text).map_err(|e| {
                ShepherdError::config_error(format!(
                    "解析变量文件 {} 失败: {e}",
                    file.display()
                ))
            })?;
            reject_reserved(parsed.keys(), "variables file")?;
            for (key, value) in parsed {
                inner.insert(key, value);
            }
        }

        for (key, value) in environment {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                if stripped.is_empty() {
                    continue;
                }
                let name = stripped.to_lowercase();
                reject_reserved(std::iter::once(&name), "environment")?;
                inner.insert(name, value);
            }
        }

        let cli_names: Vec<String> = cli.iter().map(|(k, _)| k.clone()).collect();
        reject_reserved(cli_names.iter(), "-v")?;
        for (key, value) in cli {
            inner.insert(key.clone(), value.clone());
        }

        Ok(Self { inner })
    }

    pub fn from_map(map: BTreeMap<String, String>) -> ShepherdResult<Self> {
        reject_reserved(map.keys(), "variables")?;
        Ok(Self { inner: map })
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// 解析重复的 `-v NAME=VALUE` 参数
pub fn parse_cli_variables(args: &[String]) -> ShepherdResult<Vec<(String, String)>> {
    let mut parsed = Vec::with_capacity(args.len());
    for arg in args {
        match arg.split_once('=') {
            Some((name, value)) if !name.is_empty() => {
                parsed.push((name.to_string(), value.to_string()));
            }
            _ => {
                return Err(ShepherdError::Usage(format!(
                    "无法解析变量定义 '{arg}'，期望 NAME=VALUE"
                )))
            }
        }
    }
    Ok(parsed)
}
