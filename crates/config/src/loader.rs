//! 配置加载与合并
//!
//! `-C` 可重复给出，可以指向单个文件或包含多个 YAML 的目录；
//! 后出现的来源覆盖先出现的。命名集合（filesystems、transfers、
//! named_routes）按条目名合并，后者整体替换同名条目；标量段
//! （executor、phase）整段替换；defaults.variables 按键合并。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use shepherd_errors::{ShepherdError, ShepherdResult};

use crate::models::{ConfigFile, ShepherdConfig};

/// 依次加载并合并全部配置来源
pub fn load_config(sources: &[PathBuf]) -> ShepherdResult<ShepherdConfig> {
    if sources.is_empty() {
        return Err(ShepherdError::config_error("未指定任何配置文件"));
    }

    let mut merged = ShepherdConfig::default();
    let mut any_defaults = false;

    for source in sources {
        for file in expand_source(source)? {
            debug!("加载配置文件: {}", file.display());
            let text = std::fs::read_to_string(&file).map_err(|e| {
                ShepherdError::config_error(format!("读取配置文件 {} 失败: {e}", file.display()))
            })?;
            let parsed: ConfigFile = serde_yaml::from_str(&text).map_err(|e| {
                ShepherdError::config_error(format!("解析配置文件 {} 失败: {e}", file.display()))
            })?;
            reject_file_duplicates(&parsed, &file)?;
            merge_file(&mut merged, parsed, &mut any_defaults);
        }
    }

    merged.validate()?;
    Ok(merged)
}

/// 目录展开为其中按文件名排序的 YAML 文件
fn expand_source(source: &Path) -> ShepherdResult<Vec<PathBuf>> {
    if source.is_dir() {
        let mut files: Vec<PathBuf> = std::fs::read_dir(source)
            .map_err(|e| {
                ShepherdError::config_error(format!(
                    "读取配置目录 {} 失败: {e}",
                    source.display()
                ))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yml") | Some("yaml")
                )
            })
            .collect();
        files.sort();
        Ok(files)
    } else if source.is_file() {
        Ok(vec![source.to_path_buf()])
    } else {
        Err(ShepherdError::config_error(format!(
            "配置路径不存在: {}",
            source.display()
        )))
    }
}

/// 跨文件同名条目由后者覆盖前者；同一文件内的重名没有可辩护的
/// 取舍，直接拒绝
fn reject_file_duplicates(file: &ConfigFile, path: &Path) -> ShepherdResult<()> {
    fn check<'a, I: Iterator<Item = &'a String>>(
        names: I,
        kind: &str,
        path: &Path,
    ) -> ShepherdResult<()> {
        let mut seen = BTreeMap::new();
        for name in names {
            if seen.insert(name, ()).is_some() {
                return Err(ShepherdError::config_error(format!(
                    "配置文件 {} 内{}名称重复: {}",
                    path.display(),
                    kind,
                    name
                )));
            }
        }
        Ok(())
    }

    check(file.filesystems.iter().map(|f| &f.name), "文件系统", path)?;
    check(file.transfers.iter().map(|t| &t.name), "传输路线", path)?;
    check(file.named_routes.iter().map(|r| &r.name), "命名路线", path)?;
    Ok(())
}

fn merge_file(merged: &mut ShepherdConfig, file: ConfigFile, any_defaults: &mut bool) {
    merge_named(&mut merged.filesystems, file.filesystems, |f| {
        f.name.clone()
    });
    merge_named(&mut merged.transfers, file.transfers, |t| t.name.clone());
    merge_named(&mut merged.named_routes, file.named_routes, |r| {
        r.name.clone()
    });

    if let Some(executor) = file.executor {
        merged.executor = executor;
    }
    if let Some(phase) = file.phase {
        merged.phase = phase;
    }
    if let Some(defaults) = file.defaults {
        if *any_defaults {
            merged.defaults.max_attempts = defaults.max_attempts;
            for (key, value) in defaults.variables {
                merged.defaults.variables.insert(key, value);
            }
        } else {
            merged.defaults = defaults;
            *any_defaults = true;
        }
    }
}

fn merge_named<T, F>(existing: &mut Vec<T>, incoming: Vec<T>, key: F)
where
    F: Fn(&T) -> String,
{
    let mut index: BTreeMap<String, usize> = existing
        .iter()
        .enumerate()
        .map(|(i, item)| (key(item), i))
        .collect();

    for item in incoming {
        let name = key(&item);
        match index.get(&name) {
            Some(&i) => existing[i] = item,
            None => {
                index.insert(name, existing.len());
                existing.push(item);
            }
        }
    }
}
