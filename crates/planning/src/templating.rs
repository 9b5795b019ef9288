//! 模板引擎
//!
//! 基于 minijinja，未定义变量一律报错，绝不静默替换为空串。
//! `source` 与 `target` 由任务展开器注入，是模板上下文中的保留名。

use std::collections::{BTreeMap, BTreeSet};

use minijinja::{Environment, UndefinedBehavior};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use shepherd_config::VariableSet;
use shepherd_errors::{ShepherdError, ShepherdResult};

/// 脚本中 source/target 的绑定对象，模板内可访问
/// `.filesystem` 与 `.address`
#[derive(Debug, Clone, Serialize)]
pub struct Binding {
    pub filesystem: String,
    pub address: String,
}

impl Binding {
    pub fn new<F: Into<String>, A: Into<String>>(filesystem: F, address: A) -> Self {
        Self {
            filesystem: filesystem.into(),
            address: address.into(),
        }
    }
}

/// 一次渲染的变量上下文
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    values: BTreeMap<String, minijinja::Value>,
}

impl TemplateContext {
    pub fn from_variables(vars: &VariableSet) -> Self {
        let mut values = BTreeMap::new();
        for (name, value) in vars.iter() {
            values.insert(name.to_string(), minijinja::Value::from(value));
        }
        Self { values }
    }

    /// 注入保留的 source/target 绑定
    pub fn with_endpoints(mut self, source: Binding, target: Binding) -> Self {
        self.values.insert(
            "source".to_string(),
            minijinja::Value::from_serialize(&source),
        );
        self.values.insert(
            "target".to_string(),
            minijinja::Value::from_serialize(&target),
        );
        self
    }

    fn known_names(&self) -> BTreeSet<&str> {
        self.values.keys().map(String::as_str).collect()
    }

    fn to_value(&self) -> minijinja::Value {
        minijinja::Value::from_serialize(&self.values)
    }
}

/// 确定性模板引擎与过滤器注册表
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.add_filter("sh_escape", filters::sh_escape);
        env.add_filter("dirname", filters::dirname);
        env.add_filter("basename", filters::basename);
        Self { env }
    }

    /// 渲染模板
    ///
    /// `site` 描述模板出处（哪条路线、哪个选项），用于报错定位。
    /// 先对未声明变量做整体预检，再交给严格模式渲染，以便属性级
    /// 的缺失（如 `source.oops`）也能失败。
    pub fn render(
        &self,
        template: &str,
        site: &str,
        ctx: &TemplateContext,
    ) -> ShepherdResult<String> {
        let known = ctx.known_names();
        for variable in self.undeclared_variables(template, site)? {
            if !known.contains(variable.as_str()) {
                return Err(ShepherdError::unresolved_variable(variable, site));
            }
        }

        self.env
            .render_str(template, ctx.to_value())
            .map_err(|e| ShepherdError::Template {
                site: site.to_string(),
                message: e.to_string(),
            })
    }

    /// 模板引用的全部顶层变量名
    pub fn undeclared_variables(
        &self,
        template: &str,
        site: &str,
    ) -> ShepherdResult<BTreeSet<String>> {
        let compiled =
            self.env
                .template_from_str(template)
                .map_err(|e| ShepherdError::Template {
                    site: site.to_string(),
                    message: e.to_string(),
                })?;
        Ok(compiled.undeclared_variables(false).into_iter().collect())
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

mod filters {
    use super::*;

    static SH_SPECIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"(["$])"#).unwrap());

    /// POSIX 双引号内的安全转义：反斜杠转义 `"` 与 `$`
    pub fn sh_escape(value: String) -> String {
        SH_SPECIAL.replace_all(&value, r"\$1").into_owned()
    }

    pub fn dirname(value: String) -> String {
        std::path::Path::new(&value)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn basename(value: String) -> String {
        std::path::Path::new(&value)
            .file_name()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}
