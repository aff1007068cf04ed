//! 由相关矩阵构造阈值化的加权网络图，并计算常用的图论指标。

use crate::error::{ConnectivityError, Result};
use crate::stats::CorrelationMatrix;
use json::JsonValue;
use std::collections::VecDeque;
use tracing::debug;

/// 一条无向加权边，`source < target`。
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// 图的统计指标。按节点排列的向量与`NetworkGraph::names()`一一对应。
#[derive(Clone, Debug, PartialEq)]
pub struct GraphStats {
    /// 实际边数与可能边数之比。
    pub density: f64,
    pub n_edges: usize,
    pub degree: Vec<usize>,
    /// 相连边的权重之和。
    pub strength: Vec<f64>,
    /// 局部聚类系数。
    pub clustering: Vec<f64>,
    /// 可达节点数除以到它们的最短路径长度之和；孤立节点为0。
    pub closeness: Vec<f64>,
    /// 连通分量个数。
    pub components: usize,
    pub global_efficiency: Option<f64>,
    pub local_efficiency: Option<Vec<f64>>,
}

impl GraphStats {
    /// 局部效率的节点平均。
    pub fn mean_local_efficiency(&self) -> Option<f64> {
        let le = self.local_efficiency.as_ref()?;
        if le.is_empty() {
            return Some(0.0);
        }
        Some(le.iter().sum::<f64>() / le.len() as f64)
    }
}

/// 无向加权网络图：节点为脑区，边为保留下来的正相关。
#[derive(Clone, Debug, PartialEq)]
pub struct NetworkGraph {
    labels: Vec<u32>,
    names: Vec<String>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<usize>>,
    stats: GraphStats,
}

/// 按相关强度保留最强的`round(density × R(R-1)/2)`条正相关边，构造网络图。
///
/// 相等的权重按`(source, target)`升序决出先后，因此结果是确定的。
/// 正相关边不足时全部保留。`compute_efficiency`为`false`时效率指标为`None`。
pub fn build_network_graph(
    corr: &CorrelationMatrix,
    density: f64,
    compute_efficiency: bool,
) -> Result<NetworkGraph> {
    if !(density > 0.0 && density <= 1.0) {
        return Err(ConnectivityError::InvalidParameter(format!(
            "graph density must be in (0, 1], but got {density}"
        )));
    }
    let k = corr.dim();
    let r = corr.r();
    let mut candidates: Vec<Edge> = Vec::new();
    for i in 0..k {
        for j in i + 1..k {
            let w = r[[i, j]];
            if w > 0.0 && w.is_finite() {
                candidates.push(Edge {
                    source: i,
                    target: j,
                    weight: w,
                });
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.weight
            .total_cmp(&a.weight)
            .then(a.source.cmp(&b.source))
            .then(a.target.cmp(&b.target))
    });
    let possible = k * k.saturating_sub(1) / 2;
    let keep = ((density * possible as f64).round() as usize).min(candidates.len());
    candidates.truncate(keep);
    candidates.sort_by(|a, b| a.source.cmp(&b.source).then(a.target.cmp(&b.target)));

    let mut adjacency = vec![Vec::new(); k];
    for e in &candidates {
        adjacency[e.source].push(e.target);
        adjacency[e.target].push(e.source);
    }
    adjacency.iter_mut().for_each(|n| n.sort_unstable());

    let stats = graph_stats(k, &candidates, &adjacency, compute_efficiency);
    debug!(
        nodes = k,
        edges = stats.n_edges,
        density = stats.density,
        "网络图构造完成"
    );
    Ok(NetworkGraph {
        labels: corr.labels().to_vec(),
        names: corr.names().to_vec(),
        edges: candidates,
        adjacency,
        stats,
    })
}

fn graph_stats(
    k: usize,
    edges: &[Edge],
    adjacency: &[Vec<usize>],
    compute_efficiency: bool,
) -> GraphStats {
    let possible = k * k.saturating_sub(1) / 2;
    let density = if possible == 0 {
        0.0
    } else {
        edges.len() as f64 / possible as f64
    };
    let degree: Vec<usize> = adjacency.iter().map(Vec::len).collect();
    let mut strength = vec![0.0; k];
    for e in edges {
        strength[e.source] += e.weight;
        strength[e.target] += e.weight;
    }

    let clustering = (0..k)
        .map(|i| {
            let n = &adjacency[i];
            if n.len() < 2 {
                return 0.0;
            }
            let mut triangles = 0;
            for (a, &u) in n.iter().enumerate() {
                for &v in &n[a + 1..] {
                    if adjacency[u].binary_search(&v).is_ok() {
                        triangles += 1;
                    }
                }
            }
            2.0 * triangles as f64 / (n.len() * (n.len() - 1)) as f64
        })
        .collect();

    let all = vec![true; k];
    let distances: Vec<Vec<Option<usize>>> =
        (0..k).map(|i| bfs_distances(adjacency, i, &all)).collect();
    let closeness = distances
        .iter()
        .map(|d| {
            let (count, sum) = d
                .iter()
                .filter_map(|x| x.filter(|&x| x > 0))
                .fold((0, 0), |(c, s), x| (c + 1, s + x));
            if sum == 0 {
                0.0
            } else {
                count as f64 / sum as f64
            }
        })
        .collect();

    let mut seen = vec![false; k];
    let mut components = 0;
    for (i, d) in distances.iter().enumerate() {
        if seen[i] {
            continue;
        }
        components += 1;
        for (j, x) in d.iter().enumerate() {
            if x.is_some() {
                seen[j] = true;
            }
        }
    }

    let (global_efficiency, local_efficiency) = if compute_efficiency {
        let global = efficiency_of(&distances, &all);
        let local = (0..k)
            .map(|i| {
                let n = &adjacency[i];
                if n.len() < 2 {
                    return 0.0;
                }
                let mut allowed = vec![false; k];
                n.iter().for_each(|&j| allowed[j] = true);
                let sub: Vec<Vec<Option<usize>>> = (0..k)
                    .map(|j| {
                        if allowed[j] {
                            bfs_distances(adjacency, j, &allowed)
                        } else {
                            Vec::new()
                        }
                    })
                    .collect();
                efficiency_of(&sub, &allowed)
            })
            .collect();
        (Some(global), Some(local))
    } else {
        (None, None)
    };

    GraphStats {
        density,
        n_edges: edges.len(),
        degree,
        strength,
        clustering,
        closeness,
        components,
        global_efficiency,
        local_efficiency,
    }
}

/// 只经过`allowed`节点的BFS最短路径长度；不可达为`None`。
fn bfs_distances(adjacency: &[Vec<usize>], start: usize, allowed: &[bool]) -> Vec<Option<usize>> {
    let mut dist = vec![None; adjacency.len()];
    let mut q = VecDeque::with_capacity(adjacency.len());
    dist[start] = Some(0);
    q.push_back(start);
    while let Some(u) = q.pop_front() {
        let du = dist[u].unwrap_or(0);
        for &v in &adjacency[u] {
            if allowed[v] && dist[v].is_none() {
                dist[v] = Some(du + 1);
                q.push_back(v);
            }
        }
    }
    dist
}

/// `allowed`节点集合上所有有序节点对`1/d`的平均；不可达的节点对记0。
fn efficiency_of(distances: &[Vec<Option<usize>>], allowed: &[bool]) -> f64 {
    let nodes: Vec<usize> = (0..allowed.len()).filter(|&i| allowed[i]).collect();
    let n = nodes.len();
    if n < 2 {
        return 0.0;
    }
    let mut sum = 0.0;
    for &i in &nodes {
        for &j in &nodes {
            if i != j {
                if let Some(Some(d)) = distances[i].get(j) {
                    sum += 1.0 / *d as f64;
                }
            }
        }
    }
    sum / (n * (n - 1)) as f64
}

impl NetworkGraph {
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    #[inline]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// 节点`i`的邻居（升序）。
    #[inline]
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.adjacency[i]
    }

    #[inline]
    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    #[inline]
    pub fn density(&self) -> f64 {
        self.stats.density
    }

    #[inline]
    pub fn global_efficiency(&self) -> Option<f64> {
        self.stats.global_efficiency
    }
}

impl From<&NetworkGraph> for JsonValue {
    fn from(g: &NetworkGraph) -> Self {
        let s = &g.stats;
        let nodes: Vec<JsonValue> = (0..g.n_nodes())
            .map(|i| {
                let mut node = JsonValue::new_object();
                node["index"] = i.into();
                node["label"] = g.labels[i].into();
                node["name"] = g.names[i].as_str().into();
                node["degree"] = s.degree[i].into();
                node["strength"] = s.strength[i].into();
                node["clustering"] = s.clustering[i].into();
                node["closeness"] = s.closeness[i].into();
                node["local_efficiency"] = s.local_efficiency.as_ref().map(|le| le[i]).into();
                node
            })
            .collect();
        let edges: Vec<JsonValue> = g
            .edges
            .iter()
            .map(|e| json::array![e.source, e.target, e.weight])
            .collect();
        let mut stats = JsonValue::new_object();
        stats["nodes"] = g.n_nodes().into();
        stats["edges"] = s.n_edges.into();
        stats["density"] = s.density.into();
        stats["components"] = s.components.into();
        stats["global_efficiency"] = s.global_efficiency.into();
        stats["mean_local_efficiency"] = s.mean_local_efficiency().into();

        let mut root = JsonValue::new_object();
        root["nodes"] = JsonValue::Array(nodes);
        root["edges"] = JsonValue::Array(edges);
        root["stats"] = stats;
        root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atlas::RegionSeries;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    /// 4个脑区：0、1、2强正相关，3与它们负相关。
    fn corr() -> CorrelationMatrix {
        let n = 50;
        let m = Array2::from_shape_fn((n, 4), |(t, j)| {
            let s = (t as f64 * 0.37).sin();
            let e = (t as f64 * 1.91).cos();
            match j {
                0 => s,
                1 => s + 0.2 * e,
                2 => s - 0.5 * e,
                _ => -s,
            }
        });
        let names = ["PCC", "mPFC", "Angular", "Other"].map(String::from).to_vec();
        CorrelationMatrix::from_series(&RegionSeries::new(m, vec![1, 2, 3, 4], names).unwrap())
            .unwrap()
    }

    #[test]
    fn test_full_density_keeps_positive_edges() {
        let g = build_network_graph(&corr(), 1.0, true).unwrap();
        assert_eq!(g.stats().n_edges, 3);
        assert_relative_eq!(g.density(), 0.5);
        assert_eq!(g.stats().components, 2);
        assert_eq!(g.stats().degree, vec![2, 2, 2, 0]);
        assert_eq!(g.stats().clustering[0], 1.0);
        // 三角形内效率为1，孤立节点贡献0：6/12
        assert_relative_eq!(g.global_efficiency().unwrap(), 0.5);
        assert_eq!(g.stats().local_efficiency.as_ref().unwrap()[0], 1.0);
        assert_eq!(g.stats().closeness[3], 0.0);
    }

    #[test]
    fn test_sparse_density() {
        // round(0.2 × 6) = 1：只保留最强的一条边
        let g = build_network_graph(&corr(), 0.2, false).unwrap();
        assert_eq!(g.edges().len(), 1);
        let e = g.edges()[0];
        assert_eq!((e.source, e.target), (0, 1));
        assert!(g.global_efficiency().is_none());
        assert_eq!(g.neighbors(0), &[1]);
    }

    #[test]
    fn test_bad_density() {
        assert!(build_network_graph(&corr(), 0.0, true).is_err());
        assert!(build_network_graph(&corr(), 1.5, true).is_err());
    }

    #[test]
    fn test_json() {
        let g = build_network_graph(&corr(), 1.0, true).unwrap();
        let j = JsonValue::from(&g);
        assert_eq!(j["nodes"].len(), 4);
        assert_eq!(j["edges"].len(), 3);
        assert_eq!(j["nodes"][1]["name"], "mPFC");
        assert_eq!(j["stats"]["components"], 2);
    }
}
