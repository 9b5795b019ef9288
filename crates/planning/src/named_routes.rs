//! 路线解析
//!
//! 把自动规划的结果或预先声明的命名路线物化为一条可展开的行程
//! （Itinerary）：每跳携带脚本模板与已构造好的变换器管线。命名
//! 路线的邻接不变量在配置装载时校验；每跳选项的模板渲染发生在
//! 路线解析时，之后冻结。

use std::collections::BTreeSet;

use shepherd_config::{NamedRouteConfig, VariableSet};
use shepherd_errors::{ShepherdError, ShepherdResult};

use crate::graph::{TransferGraph, TransferRoute};
use crate::templating::TemplateEngine;
use crate::transformers::{build_transformer, Transformer};

/// 行程中的一跳
#[derive(Debug)]
pub struct ResolvedHop {
    pub route_name: String,
    pub source: String,
    pub target: String,
    pub script_template: String,
    /// 路线自带变换在前，命名路线的每跳附加变换在后
    pub transformers: Vec<Box<dyn Transformer>>,
}

/// 已解析的多跳行程
#[derive(Debug)]
pub struct Itinerary {
    pub hops: Vec<ResolvedHop>,
}

impl Itinerary {
    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    /// 行程起点的文件系统
    pub fn source_filesystem(&self) -> &str {
        &self.hops[0].source
    }

    /// 行程涉及的全部文件系统名
    pub fn filesystems(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        for hop in &self.hops {
            names.insert(hop.source.as_str());
            names.insert(hop.target.as_str());
        }
        names
    }
}

fn build_hop(
    route: &TransferRoute,
    extra: &[shepherd_config::TransformationConfig],
    extra_site: Option<&str>,
    engine: &TemplateEngine,
    vars: &VariableSet,
) -> ShepherdResult<ResolvedHop> {
    let mut transformers = Vec::with_capacity(route.transformations.len() + extra.len());
    for t in &route.transformations {
        let site = format!("transfer '{}' transformation '{}'", route.name, t.name);
        transformers.push(build_transformer(t, engine, vars, &site)?);
    }
    for t in extra {
        let site = format!(
            "{} transformation '{}'",
            extra_site.unwrap_or("route"),
            t.name
        );
        transformers.push(build_transformer(t, engine, vars, &site)?);
    }

    Ok(ResolvedHop {
        route_name: route.name.clone(),
        source: route.source.clone(),
        target: route.target.clone(),
        script_template: route.script_template.clone(),
        transformers,
    })
}

/// 物化一条自动规划的路线
pub fn resolve_planned(
    graph: &TransferGraph,
    source: &str,
    target: &str,
    engine: &TemplateEngine,
    vars: &VariableSet,
) -> ShepherdResult<Itinerary> {
    let routes = graph.plan(source, target)?;
    let mut hops = Vec::with_capacity(routes.len());
    for route in routes {
        hops.push(build_hop(route, &[], None, engine, vars)?);
    }
    Ok(Itinerary { hops })
}

/// 校验命名路线的结构（装载时调用，不渲染选项）
pub fn validate_named_route(
    graph: &TransferGraph,
    config: &NamedRouteConfig,
) -> ShepherdResult<()> {
    let mut previous: Option<&TransferRoute> = None;
    for (i, hop) in config.hops.iter().enumerate() {
        let route = graph.route(&hop.transfer).ok_or_else(|| {
            ShepherdError::invalid_named_route(
                &config.name,
                format!("hop {} 引用了未知路线 '{}'", i + 1, hop.transfer),
            )
        })?;
        if let Some(prev) = previous {
            if route.source != prev.target {
                return Err(ShepherdError::invalid_named_route(
                    &config.name,
                    format!(
                        "hop {} source '{}' != hop {} target '{}'",
                        i + 1,
                        route.source,
                        i,
                        prev.target
                    ),
                ));
            }
        }
        previous = Some(route);
    }
    Ok(())
}

/// 物化一条命名路线
pub fn resolve_named(
    graph: &TransferGraph,
    named_routes: &[NamedRouteConfig],
    name: &str,
    engine: &TemplateEngine,
    vars: &VariableSet,
) -> ShepherdResult<Itinerary> {
    let config = named_routes
        .iter()
        .find(|r| r.name == name)
        .ok_or_else(|| ShepherdError::invalid_named_route(name, "未在配置中定义"))?;

    validate_named_route(graph, config)?;

    let mut hops = Vec::with_capacity(config.hops.len());
    for (i, hop) in config.hops.iter().enumerate() {
        // validate_named_route 已确认路线存在
        let route = graph.route(&hop.transfer).expect("validated hop");
        let site = format!("named route '{}' hop {}", name, i + 1);
        hops.push(build_hop(
            route,
            &hop.transformations,
            Some(&site),
            engine,
            vars,
        )?);
    }
    Ok(Itinerary { hops })
}
