//! 任务展开器
//!
//! 把一条已解析的行程与一组源地址展开为逐文件的任务链：为每跳
//! 派生中间地址、应用变换管线、渲染脚本，并给出依赖顺序。展开
//! 只产出蓝图，持久化由状态库按文件原子完成。

use shepherd_config::VariableSet;
use shepherd_domain::DataLocation;
use shepherd_errors::ShepherdResult;

use crate::named_routes::Itinerary;
use crate::templating::{Binding, TemplateContext, TemplateEngine};
use crate::transformers::apply_pipeline;

/// 单个任务的蓝图：脚本已渲染完毕
#[derive(Debug, Clone)]
pub struct TaskBlueprint {
    pub source: DataLocation,
    pub target: DataLocation,
    pub script: String,
}

pub struct TaskExpander<'a> {
    itinerary: &'a Itinerary,
    engine: &'a TemplateEngine,
    vars: &'a VariableSet,
}

impl<'a> TaskExpander<'a> {
    pub fn new(itinerary: &'a Itinerary, engine: &'a TemplateEngine, vars: &'a VariableSet) -> Self {
        Self {
            itinerary,
            engine,
            vars,
        }
    }

    /// 把一个源地址展开为 k 个链式任务蓝图
    ///
    /// 每跳以上一跳落点作为 (source, target) 初值，变换器是目标
    /// 地址的唯一生产者。任一跳渲染失败则整个文件失败，不产出
    /// 任何蓝图。
    pub fn expand(&self, source_address: &str) -> ShepherdResult<Vec<TaskBlueprint>> {
        let mut blueprints = Vec::with_capacity(self.itinerary.len());
        let mut current = source_address.to_string();

        for hop in &self.itinerary.hops {
            let (source, target) =
                apply_pipeline(&hop.transformers, &current, &current, self.vars)?;

            let site = format!("transfer '{}' script", hop.route_name);
            let ctx = TemplateContext::from_variables(self.vars).with_endpoints(
                Binding::new(hop.source.clone(), source.clone()),
                Binding::new(hop.target.clone(), target.clone()),
            );
            let script = self.engine.render(&hop.script_template, &site, &ctx)?;

            blueprints.push(TaskBlueprint {
                source: DataLocation::new(hop.source.clone(), source),
                target: DataLocation::new(hop.target.clone(), target.clone()),
                script,
            });
            current = target;
        }

        Ok(blueprints)
    }
}
