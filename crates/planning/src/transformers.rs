//! 地址变换器
//!
//! 变换器是纯函数 `(source, target, env) -> (source', target')`，
//! 不做任何 I/O，是目标地址的唯一生产者。选项在路线解析时用有效
//! 变量环境渲染一次，随后冻结在构造好的变换器里。管线严格从左到
//! 右组合。

use std::collections::BTreeMap;

use tracing::debug;

use shepherd_config::{TransformationConfig, VariableSet};
use shepherd_errors::{ShepherdError, ShepherdResult};

use crate::templating::{TemplateContext, TemplateEngine};

pub trait Transformer: Send + Sync {
    fn name(&self) -> &str;

    fn apply(
        &self,
        source: &str,
        target: &str,
        vars: &VariableSet,
    ) -> ShepherdResult<(String, String)>;
}

impl std::fmt::Debug for dyn Transformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transformer").field("name", &self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// 路径工具：地址对核心不透明，但内置变换器按 POSIX 路径语义操作
// ---------------------------------------------------------------------------

fn split(address: &str) -> Vec<&str> {
    address.split('/').filter(|c| !c.is_empty()).collect()
}

fn join_rooted(components: &[&str]) -> String {
    format!("/{}", components.join("/"))
}

// ---------------------------------------------------------------------------
// 内置变换器
// ---------------------------------------------------------------------------

/// 为目标地址加上固定前缀
pub struct Prefix {
    path: String,
}

impl Transformer for Prefix {
    fn name(&self) -> &str {
        "prefix"
    }

    fn apply(
        &self,
        source: &str,
        target: &str,
        _vars: &VariableSet,
    ) -> ShepherdResult<(String, String)> {
        let new_target = format!(
            "{}/{}",
            self.path.trim_end_matches('/'),
            target.trim_start_matches('/')
        );
        Ok((source.to_string(), new_target))
    }
}

/// 从目标地址剥除与源地址共有的前导路径
///
/// 永不吞掉目标的最后一个组件；对未经改写的地址对（target == source）
/// 即退化为只保留文件名。
pub struct StripCommonPath;

impl Transformer for StripCommonPath {
    fn name(&self) -> &str {
        "strip_common_path"
    }

    fn apply(
        &self,
        source: &str,
        target: &str,
        _vars: &VariableSet,
    ) -> ShepherdResult<(String, String)> {
        let source_parts = split(source);
        let target_parts = split(target);

        let mut common = 0;
        while common < source_parts.len()
            && common + 1 < target_parts.len()
            && source_parts[common] == target_parts[common]
        {
            common += 1;
        }

        Ok((source.to_string(), join_rooted(&target_parts[common..])))
    }
}

/// 目标地址只保留末尾至多 n 个组件
pub struct LastNComponents {
    n: usize,
}

impl Transformer for LastNComponents {
    fn name(&self) -> &str {
        "last_n_components"
    }

    fn apply(
        &self,
        source: &str,
        target: &str,
        _vars: &VariableSet,
    ) -> ShepherdResult<(String, String)> {
        let parts = split(target);
        let keep = parts.len().saturating_sub(self.n);
        Ok((source.to_string(), join_rooted(&parts[keep..])))
    }
}

/// 把目标地址里安全字母表之外的字节做百分号编码
pub struct PercentEncode;

const SAFE_EXTRA: &[u8] = b"()[]{}-_#%&+,.:;<>=@$";

fn encode_component(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for byte in component.bytes() {
        if byte.is_ascii_alphanumeric() || SAFE_EXTRA.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

impl Transformer for PercentEncode {
    fn name(&self) -> &str {
        "percent_encode"
    }

    fn apply(
        &self,
        source: &str,
        target: &str,
        _vars: &VariableSet,
    ) -> ShepherdResult<(String, String)> {
        let encoded: Vec<String> = split(target).iter().map(|c| encode_component(c)).collect();
        let borrowed: Vec<&str> = encoded.iter().map(String::as_str).collect();
        Ok((source.to_string(), join_rooted(&borrowed)))
    }
}

/// 在目标地址中做子串替换
///
/// `name_only` 为真时只处理文件名，否则处理每个路径组件。
pub struct CharTranslate {
    to_replace: String,
    replace_with: String,
    name_only: bool,
}

impl Transformer for CharTranslate {
    fn name(&self) -> &str {
        "char_translate"
    }

    fn apply(
        &self,
        source: &str,
        target: &str,
        _vars: &VariableSet,
    ) -> ShepherdResult<(String, String)> {
        let parts = split(target);
        let translated: Vec<String> = if self.name_only {
            parts
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    if i + 1 == parts.len() {
                        c.replace(&self.to_replace, &self.replace_with)
                    } else {
                        (*c).to_string()
                    }
                })
                .collect()
        } else {
            parts
                .iter()
                .map(|c| c.replace(&self.to_replace, &self.replace_with))
                .collect()
        };
        let borrowed: Vec<&str> = translated.iter().map(String::as_str).collect();
        Ok((source.to_string(), join_rooted(&borrowed)))
    }
}

/// 调试包装器：原样转发，仅记录经过的地址对
pub struct Debugging;

impl Transformer for Debugging {
    fn name(&self) -> &str {
        "debugging"
    }

    fn apply(
        &self,
        source: &str,
        target: &str,
        _vars: &VariableSet,
    ) -> ShepherdResult<(String, String)> {
        debug!("debugging transformer: {} -> {}", source, target);
        Ok((source.to_string(), target.to_string()))
    }
}

/// 遥测包装器：原样转发
pub struct Telemetry;

impl Transformer for Telemetry {
    fn name(&self) -> &str {
        "telemetry"
    }

    fn apply(
        &self,
        source: &str,
        target: &str,
        _vars: &VariableSet,
    ) -> ShepherdResult<(String, String)> {
        debug!("telemetry transformer: {} -> {}", source, target);
        Ok((source.to_string(), target.to_string()))
    }
}

// ---------------------------------------------------------------------------
// 注册表
// ---------------------------------------------------------------------------

/// 渲染后的选项集合
struct RenderedOptions<'a> {
    raw: &'a BTreeMap<String, serde_yaml::Value>,
    engine: &'a TemplateEngine,
    vars: &'a VariableSet,
    site: &'a str,
}

impl<'a> RenderedOptions<'a> {
    fn require_str(&self, key: &str) -> ShepherdResult<String> {
        let value = self.raw.get(key).ok_or_else(|| {
            ShepherdError::config_error(format!("{} 缺少必需选项 '{key}'", self.site))
        })?;
        let text = match value {
            serde_yaml::Value::String(s) => s.clone(),
            other => serde_yaml::to_string(other)
                .map(|s| s.trim_end().to_string())
                .map_err(|e| ShepherdError::config_error(format!("{}: {e}", self.site)))?,
        };
        let ctx = TemplateContext::from_variables(self.vars);
        let site = format!("{} option '{key}'", self.site);
        self.engine.render(&text, &site, &ctx)
    }

    fn require_usize(&self, key: &str) -> ShepherdResult<usize> {
        let rendered = self.require_str(key)?;
        rendered.parse().map_err(|_| {
            ShepherdError::config_error(format!(
                "{} 的选项 '{key}' 不是合法的非负整数: {rendered}",
                self.site
            ))
        })
    }

    fn bool_or(&self, key: &str, default: bool) -> ShepherdResult<bool> {
        match self.raw.get(key) {
            None => Ok(default),
            Some(serde_yaml::Value::Bool(b)) => Ok(*b),
            Some(_) => {
                let rendered = self.require_str(key)?;
                rendered.parse().map_err(|_| {
                    ShepherdError::config_error(format!(
                        "{} 的选项 '{key}' 不是布尔值: {rendered}",
                        self.site
                    ))
                })
            }
        }
    }
}

/// 依据配置构造一个变换器
///
/// 字符串选项此刻用有效变量环境渲染并冻结；缺失的变量在这里就
/// 以 `UnresolvedVariable` 失败，而不是等到展开阶段。
pub fn build_transformer(
    config: &TransformationConfig,
    engine: &TemplateEngine,
    vars: &VariableSet,
    site: &str,
) -> ShepherdResult<Box<dyn Transformer>> {
    let opts = RenderedOptions {
        raw: &config.options,
        engine,
        vars,
        site,
    };

    match config.name.as_str() {
        "prefix" => {
            let path = opts.require_str("path")?;
            if !path.starts_with('/') {
                return Err(ShepherdError::config_error(format!(
                    "{site} 的 prefix 选项 'path' 必须是绝对路径: {path}"
                )));
            }
            Ok(Box::new(Prefix { path }))
        }
        "strip_common_path" => Ok(Box::new(StripCommonPath)),
        "last_n_components" => {
            let n = opts.require_usize("n")?;
            if n == 0 {
                return Err(ShepherdError::config_error(format!(
                    "{site} 的 last_n_components 选项 'n' 必须 >= 1"
                )));
            }
            Ok(Box::new(LastNComponents { n }))
        }
        "percent_encode" => Ok(Box::new(PercentEncode)),
        "char_translate" => Ok(Box::new(CharTranslate {
            to_replace: opts.require_str("to_replace")?,
            replace_with: opts.require_str("replace_with")?,
            name_only: opts.bool_or("name_only", false)?,
        })),
        "debugging" => Ok(Box::new(Debugging)),
        "telemetry" => Ok(Box::new(Telemetry)),
        other => Err(ShepherdError::config_error(format!(
            "{site} 引用了未知的变换器 '{other}'"
        ))),
    }
}

/// 按序应用一条变换管线
pub fn apply_pipeline(
    transformers: &[Box<dyn Transformer>],
    source: &str,
    target: &str,
    vars: &VariableSet,
) -> ShepherdResult<(String, String)> {
    let mut current = (source.to_string(), target.to_string());
    for transformer in transformers {
        current = transformer.apply(&current.0, &current.1, vars)?;
    }
    Ok(current)
}
