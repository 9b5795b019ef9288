//! Shepherd 规划引擎
//!
//! 模板引擎、地址变换器、传输图与最短路规划、命名路线解析，
//! 以及把行程 × 文件集展开为依赖有序任务链的展开器。

pub mod expander;
pub mod graph;
pub mod named_routes;
pub mod templating;
pub mod transformers;

pub use expander::{TaskBlueprint, TaskExpander};
pub use graph::{TransferGraph, TransferRoute};
pub use named_routes::{
    resolve_named, resolve_planned, validate_named_route, Itinerary, ResolvedHop,
};
pub use templating::{Binding, TemplateContext, TemplateEngine};
pub use transformers::{apply_pipeline, build_transformer, Transformer};
