use adcg::{id, Arg, Graph, Op};

/// Variable ids of one graph, as an emitter numbers them.
///
/// Independents get `index + 1`. Temporaries are numbered in postorder from the dependents,
/// starting right after the independents, and temporary arrays by the cumulative offset of their
/// elements starting at 1. Loop structure nodes are not variables and have no id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Ids {
    ids: Vec<Option<usize>>,
    /// Lowest temporary id; one more than `max` if there are no temporaries.
    pub min: usize,
    pub max: usize,
    pub max_array: usize,
}

impl Ids {
    pub fn get(&self, node: id::Node) -> Option<usize> {
        self.ids.get(node.node()).copied().flatten()
    }

    pub fn temporaries(&self) -> usize {
        (self.max + 1).saturating_sub(self.min)
    }
}

pub fn assign_ids(graph: &Graph, dependents: &[Arg]) -> Ids {
    let mut ids = vec![None; graph.len()];
    let independents = graph
        .nodes()
        .filter_map(|(_, node)| match node.op {
            Op::Inv { index } => Some(index + 1),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    let min = independents + 1;
    let mut next = min;
    let mut next_array = 1;

    let mut visited = vec![false; graph.len()];
    // `true` once the node's arguments have been pushed
    let mut stack: Vec<(id::Node, bool)> = dependents
        .iter()
        .rev()
        .filter_map(|arg| arg.node())
        .map(|node| (node, false))
        .collect();
    while let Some((node, expanded)) = stack.pop() {
        if expanded {
            let op = graph.op(node);
            ids[node.node()] = match op {
                Op::Inv { index } => Some(index + 1),
                Op::Unary { .. } | Op::Binary { .. } => {
                    next += 1;
                    Some(next - 1)
                }
                Op::Array => {
                    let id = next_array;
                    next_array += graph.args(node).len();
                    Some(id)
                }
                _ => None,
            };
            continue;
        }
        if visited[node.node()] {
            continue;
        }
        visited[node.node()] = true;
        stack.push((node, true));
        for arg in graph.args(node).iter().rev() {
            if let Some(child) = arg.node() {
                if !visited[child.node()] {
                    stack.push((child, false));
                }
            }
        }
    }

    log::debug!(
        "assigned {} temporary ids and {} array elements",
        next - min,
        next_array - 1
    );
    Ids {
        ids,
        min,
        max: next - 1,
        max_array: next_array - 1,
    }
}
