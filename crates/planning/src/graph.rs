//! 传输图
//!
//! 文件系统为顶点、传输路线为有向边的多重图。边权是路线的多项式
//! 复杂度 O(n^k) 中的 k；一条路径的权重取各边代价的最大值而非求和
//! （链路的规模特性由其扩展性最差的一跳决定），代价相同时优先较短
//! 路径，再按路线名序列的字典序裁决。这保证了规划的确定性，也保证
//! 了增加一个廉价中转跳永远不会让方案变差。

use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use shepherd_config::{ShepherdConfig, TransformationConfig};
use shepherd_errors::{ShepherdError, ShepherdResult};

/// 传输路线（图中的一条有向边）
#[derive(Debug, Clone)]
pub struct TransferRoute {
    pub name: String,
    pub source: String,
    pub target: String,
    pub cost: u32,
    pub script_template: String,
    pub transformations: Vec<TransformationConfig>,
}

/// 路径权重，按字段顺序做字典序比较
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
struct PathWeight {
    cost: u32,
    hops: usize,
    names: Vec<String>,
}

impl PathWeight {
    fn extend(&self, route: &TransferRoute) -> Self {
        let mut names = self.names.clone();
        names.push(route.name.clone());
        Self {
            cost: self.cost.max(route.cost),
            hops: self.hops + 1,
            names,
        }
    }

    /// 支配关系：每个分量都不劣于对方
    ///
    /// 路径权重的代价分量取最大值而非求和，不满足保序性：一跳饱和
    /// 之后，此前代价更高但跳数更少的标签可能反超。因此剪枝只能依据
    /// 支配关系，代价更高而跳数更少的标签必须保留。跳数不同时名称
    /// 序列长度不同，追加同一后缀不保持字典序，故名称只在跳数相同
    /// 时参与比较。
    fn dominates(&self, other: &Self) -> bool {
        self.cost <= other.cost
            && self.hops <= other.hops
            && (self.hops < other.hops || self.names <= other.names)
    }
}

struct SearchState {
    weight: PathWeight,
    node: NodeIndex,
    path: Vec<usize>,
}

impl PartialEq for SearchState {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight && self.node == other.node
    }
}

impl Eq for SearchState {}

impl PartialOrd for SearchState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SearchState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // BinaryHeap 是最大堆，反转得到最小权重优先
        other
            .weight
            .cmp(&self.weight)
            .then_with(|| other.node.index().cmp(&self.node.index()))
    }
}

/// 文件系统与传输路线构成的有向多重图
pub struct TransferGraph {
    graph: DiGraph<String, usize>,
    nodes: BTreeMap<String, NodeIndex>,
    routes: Vec<TransferRoute>,
    route_names: BTreeSet<String>,
}

impl TransferGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: BTreeMap::new(),
            routes: Vec::new(),
            route_names: BTreeSet::new(),
        }
    }

    /// 由合并后的配置装配整张图
    pub fn from_config(config: &ShepherdConfig) -> ShepherdResult<Self> {
        let mut graph = Self::new();
        for fs in &config.filesystems {
            graph.add_filesystem(&fs.name)?;
        }
        for transfer in &config.transfers {
            graph.add_route(TransferRoute {
                name: transfer.name.clone(),
                source: transfer.source.clone(),
                target: transfer.target.clone(),
                cost: transfer.cost,
                script_template: transfer.script.clone(),
                transformations: transfer.transformations.clone(),
            })?;
        }
        Ok(graph)
    }

    pub fn add_filesystem(&mut self, name: &str) -> ShepherdResult<()> {
        if self.nodes.contains_key(name) {
            return Err(ShepherdError::config_error(format!(
                "文件系统名称重复: {name}"
            )));
        }
        let index = self.graph.add_node(name.to_string());
        self.nodes.insert(name.to_string(), index);
        Ok(())
    }

    pub fn contains_filesystem(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn add_route(&mut self, route: TransferRoute) -> ShepherdResult<()> {
        if self.route_names.contains(&route.name) {
            return Err(ShepherdError::config_error(format!(
                "传输路线名称重复: {}",
                route.name
            )));
        }
        if route.cost < 1 {
            return Err(ShepherdError::config_error(format!(
                "传输路线 {} 的 cost 必须 >= 1",
                route.name
            )));
        }
        let source = *self.nodes.get(&route.source).ok_or_else(|| {
            ShepherdError::config_error(format!(
                "传输路线 {} 引用了未注册的文件系统 {}",
                route.name, route.source
            ))
        })?;
        let target = *self.nodes.get(&route.target).ok_or_else(|| {
            ShepherdError::config_error(format!(
                "传输路线 {} 引用了未注册的文件系统 {}",
                route.name, route.target
            ))
        })?;

        let index = self.routes.len();
        self.route_names.insert(route.name.clone());
        self.routes.push(route);
        self.graph.add_edge(source, target, index);
        Ok(())
    }

    /// 按名查找路线（命名路线解析用）
    pub fn route(&self, name: &str) -> Option<&TransferRoute> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// 规划从 source 到 target 的最优路线序列
    pub fn plan(&self, source: &str, target: &str) -> ShepherdResult<Vec<&TransferRoute>> {
        let no_route = || ShepherdError::NoRoute {
            route_source: source.to_string(),
            target: target.to_string(),
        };

        let &src = self.nodes.get(source).ok_or_else(no_route)?;
        let &tgt = self.nodes.get(target).ok_or_else(no_route)?;
        if src == tgt {
            return Err(no_route());
        }

        // 每个顶点保留全部帕累托非支配标签。扩展对字典序权重单调
        // （跳数严格递增），所以首次弹出终点即为最优
        let mut labels: HashMap<NodeIndex, Vec<PathWeight>> = HashMap::new();
        let mut heap = BinaryHeap::new();
        labels.entry(src).or_default().push(PathWeight::default());
        heap.push(SearchState {
            weight: PathWeight::default(),
            node: src,
            path: Vec::new(),
        });

        while let Some(state) = heap.pop() {
            if state.node == tgt {
                return Ok(state.path.iter().map(|&i| &self.routes[i]).collect());
            }
            // 入队之后可能已被后来的支配者移除
            let still_live = labels
                .get(&state.node)
                .map_or(false, |ls| ls.contains(&state.weight));
            if !still_live {
                continue;
            }

            for edge in self.graph.edges(state.node) {
                let route_index = *edge.weight();
                let next_weight = state.weight.extend(&self.routes[route_index]);
                let entry = labels.entry(edge.target()).or_default();
                if entry.iter().any(|label| label.dominates(&next_weight)) {
                    continue;
                }
                entry.retain(|label| !next_weight.dominates(label));
                entry.push(next_weight.clone());

                let mut path = state.path.clone();
                path.push(route_index);
                heap.push(SearchState {
                    weight: next_weight,
                    node: edge.target(),
                    path,
                });
            }
        }

        Err(no_route())
    }
}

impl Default for TransferGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, source: &str, target: &str, cost: u32) -> TransferRoute {
        TransferRoute {
            name: name.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            cost,
            script_template: "#!/usr/bin/env bash\ntrue\n".to_string(),
            transformations: Vec::new(),
        }
    }

    fn graph_with(filesystems: &[&str], routes: Vec<TransferRoute>) -> TransferGraph {
        let mut graph = TransferGraph::new();
        for fs in filesystems {
            graph.add_filesystem(fs).unwrap();
        }
        for r in routes {
            graph.add_route(r).unwrap();
        }
        graph
    }

    fn plan_names(graph: &TransferGraph, source: &str, target: &str) -> Vec<String> {
        graph
            .plan(source, target)
            .unwrap()
            .iter()
            .map(|r| r.name.clone())
            .collect()
    }

    #[test]
    fn test_direct_route_beats_costlier_detour() {
        // A→B cost 1、A→C cost 2、C→B cost 1：应当直走 A→B
        let graph = graph_with(
            &["A", "B", "C"],
            vec![
                route("ab", "A", "B", 1),
                route("ac", "A", "C", 2),
                route("cb", "C", "B", 1),
            ],
        );
        assert_eq!(plan_names(&graph, "A", "B"), vec!["ab"]);
    }

    #[test]
    fn test_max_cost_combination_prefers_cheap_chain() {
        // 直达代价 3，两跳各代价 1：路径权重取最大值，两跳获胜
        let graph = graph_with(
            &["A", "B", "C"],
            vec![
                route("direct", "A", "B", 3),
                route("leg1", "A", "C", 1),
                route("leg2", "C", "B", 1),
            ],
        );
        assert_eq!(plan_names(&graph, "A", "B"), vec!["leg1", "leg2"]);
    }

    #[test]
    fn test_saturating_hop_keeps_fewer_hop_alternative() {
        // A→C(1)、C→X(1)、A→X(3)、X→B(5)：经 X 的两条前缀在最后
        // 一跳被代价 5 饱和后同为 5，此时跳数少的 [ax, xb] 必须胜出；
        // 单标签剪枝会在 X 处把 (代价3, 1跳) 误判为劣而丢弃
        let graph = graph_with(
            &["A", "B", "C", "X"],
            vec![
                route("ac", "A", "C", 1),
                route("cx", "C", "X", 1),
                route("ax", "A", "X", 3),
                route("xb", "X", "B", 5),
            ],
        );
        assert_eq!(plan_names(&graph, "A", "B"), vec!["ax", "xb"]);
    }

    #[test]
    fn test_equal_cost_prefers_shorter_path() {
        let graph = graph_with(
            &["A", "B", "C"],
            vec![
                route("direct", "A", "B", 2),
                route("leg1", "A", "C", 2),
                route("leg2", "C", "B", 2),
            ],
        );
        assert_eq!(plan_names(&graph, "A", "B"), vec!["direct"]);
    }

    #[test]
    fn test_tie_break_by_route_name() {
        // 并行边同代价：字典序较小的路线名获胜
        let graph = graph_with(
            &["A", "B"],
            vec![route("zulu", "A", "B", 1), route("alpha", "A", "B", 1)],
        );
        assert_eq!(plan_names(&graph, "A", "B"), vec!["alpha"]);
    }

    #[test]
    fn test_plan_is_idempotent() {
        let graph = graph_with(
            &["A", "B", "C"],
            vec![
                route("ab", "A", "B", 1),
                route("bc", "B", "C", 2),
                route("ac", "A", "C", 2),
            ],
        );
        let first = plan_names(&graph, "A", "C");
        let second = plan_names(&graph, "A", "C");
        assert_eq!(first, second);
    }

    #[test]
    fn test_no_route() {
        let graph = graph_with(&["A", "B", "C"], vec![route("ab", "A", "B", 1)]);
        assert!(matches!(
            graph.plan("B", "C"),
            Err(ShepherdError::NoRoute { .. })
        ));
        assert!(matches!(
            graph.plan("A", "unknown"),
            Err(ShepherdError::NoRoute { .. })
        ));
        assert!(matches!(
            graph.plan("A", "A"),
            Err(ShepherdError::NoRoute { .. })
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut graph = TransferGraph::new();
        graph.add_filesystem("A").unwrap();
        assert!(graph.add_filesystem("A").is_err());

        graph.add_filesystem("B").unwrap();
        graph.add_route(route("ab", "A", "B", 1)).unwrap();
        assert!(graph.add_route(route("ab", "B", "A", 1)).is_err());
    }

    #[test]
    fn test_route_referencing_unknown_filesystem() {
        let mut graph = TransferGraph::new();
        graph.add_filesystem("A").unwrap();
        let err = graph.add_route(route("ax", "A", "X", 1)).unwrap_err();
        assert!(matches!(err, ShepherdError::Configuration(_)));
    }
}
