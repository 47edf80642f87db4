use serde::Deserialize;

use super::NodeInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStrategy {
    #[default]
    LeastLoad,
    LeastPlayers,
}

/// Picks a node for a new or recovering session. Stateless: every call works
/// from the stats it is handed, so concurrent callers may pick the same node.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeSelector {
    use_priority: bool,
    strategy: NodeStrategy,
}

impl NodeSelector {
    pub fn new(use_priority: bool, strategy: NodeStrategy) -> Self {
        Self {
            use_priority,
            strategy,
        }
    }

    pub fn select<'a>(&self, nodes: &'a [NodeInfo]) -> Option<&'a NodeInfo> {
        self.select_with_draw(nodes, rand::random::<f64>())
    }

    /// Same as [`select`](Self::select) with the weighted draw supplied.
    pub fn select_with_draw<'a>(&self, nodes: &'a [NodeInfo], draw: f64) -> Option<&'a NodeInfo> {
        if self.use_priority
            && let Some(node) = weighted(nodes, draw)
        {
            return Some(node);
        }
        match self.strategy {
            NodeStrategy::LeastLoad => least_load(nodes),
            NodeStrategy::LeastPlayers => least_players(nodes),
        }
    }
}

fn primaries(nodes: &[NodeInfo]) -> impl Iterator<Item = &NodeInfo> {
    nodes.iter().filter(|n| n.connected && !n.is_backup)
}

pub fn least_load(nodes: &[NodeInfo]) -> Option<&NodeInfo> {
    primaries(nodes).min_by(|a, b| {
        a.stats
            .load_per_core()
            .total_cmp(&b.stats.load_per_core())
    })
}

pub fn least_players(nodes: &[NodeInfo]) -> Option<&NodeInfo> {
    primaries(nodes).min_by_key(|n| n.stats.players)
}

/// Walks connected nodes with a positive priority, accumulating
/// `priority / total`, and returns the first whose running total reaches
/// `draw`.
pub fn weighted(nodes: &[NodeInfo], draw: f64) -> Option<&NodeInfo> {
    let eligible: Vec<&NodeInfo> = nodes
        .iter()
        .filter(|n| n.connected && n.priority > 0)
        .collect();
    let total: f64 = eligible.iter().map(|n| f64::from(n.priority)).sum();
    if total <= 0.0 {
        return None;
    }
    let mut cumulative = 0.0;
    for node in eligible {
        cumulative += f64::from(node.priority) / total;
        if cumulative >= draw {
            return Some(node);
        }
    }
    None
}
