//! Dependency ordering for calculated points
//!
//! A calculated point may reference other calculated points, so evaluation
//! must run in dependency order and circular references must be caught up
//! front. The graph is an explicit adjacency map walked iteratively; a
//! cycle can never overflow the stack or loop forever.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::warn;

/// Outcome of ordering a set of calculated points
#[derive(Debug, Default)]
pub struct DependencyOrder {
    /// Evaluation stages: points in stage N only reference points in
    /// stages < N. Points within a stage are mutually independent.
    pub stages: Vec<Vec<String>>,
    /// Points participating in a reference cycle, directly or transitively
    pub cyclic: FxHashSet<String>,
}

impl DependencyOrder {
    pub fn is_cyclic(&self, id: &str) -> bool {
        self.cyclic.contains(id)
    }

    /// Stage index for a point, None when it is cyclic or unknown
    pub fn stage_of(&self, id: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.iter().any(|p| p == id))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Grey,
    Black,
}

/// Order calculated points by dependency. `deps` maps each point id to the
/// ids of calculated points its expression references; references to ids
/// outside the map (plain sensors) are ignored.
pub fn order_points(deps: &FxHashMap<String, Vec<String>>) -> DependencyOrder {
    let mut color: FxHashMap<&str, Color> =
        deps.keys().map(|k| (k.as_str(), Color::White)).collect();
    let mut cyclic: FxHashSet<String> = FxHashSet::default();

    // iterative DFS, (node, next child index) frames
    let mut roots: Vec<&str> = deps.keys().map(String::as_str).collect();
    roots.sort_unstable();
    for root in roots {
        if color[root] != Color::White {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        color.insert(root, Color::Grey);
        while let Some(top) = stack.len().checked_sub(1) {
            let (node, next) = stack[top];
            let children = &deps[node];
            if next >= children.len() {
                color.insert(node, Color::Black);
                stack.pop();
                continue;
            }
            stack[top].1 += 1;
            let child = children[next].as_str();
            match color.get(child).copied() {
                None => {} // plain sensor, not a calculated point
                Some(Color::White) => {
                    color.insert(child, Color::Grey);
                    stack.push((child, 0));
                }
                Some(Color::Grey) => {
                    // back edge: everything on the stack from the child up
                    // is on a cycle
                    let from = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    for (n, _) in &stack[from..] {
                        cyclic.insert((*n).to_string());
                    }
                }
                Some(Color::Black) => {}
            }
        }
    }

    // points depending on a cyclic point are themselves unevaluable
    loop {
        let mut grew = false;
        for (id, children) in deps {
            if !cyclic.contains(id) && children.iter().any(|c| cyclic.contains(c)) {
                cyclic.insert(id.clone());
                grew = true;
            }
        }
        if !grew {
            break;
        }
    }
    if !cyclic.is_empty() {
        warn!(count = cyclic.len(), "calculated points excluded by dependency cycle");
    }

    // stage = longest dependency chain below the point
    let mut depth: FxHashMap<&str, usize> = FxHashMap::default();
    let mut pending: Vec<&str> = deps
        .keys()
        .map(String::as_str)
        .filter(|id| !cyclic.contains(*id))
        .collect();
    pending.sort_unstable();
    while !pending.is_empty() {
        let before = pending.len();
        pending.retain(|&id| {
            let mut max_child = 0usize;
            for child in &deps[id] {
                if !deps.contains_key(child) || cyclic.contains(child) {
                    continue;
                }
                match depth.get(child.as_str()) {
                    Some(d) => max_child = max_child.max(d + 1),
                    None => return true, // child not resolved yet
                }
            }
            depth.insert(id, max_child);
            false
        });
        if pending.len() == before {
            // unreachable with cycles already removed, but never spin
            for &id in &pending {
                depth.insert(id, 0);
            }
            break;
        }
    }

    let max_depth = depth.values().copied().max().unwrap_or(0);
    let mut stages: Vec<Vec<String>> = vec![Vec::new(); if depth.is_empty() { 0 } else { max_depth + 1 }];
    let mut ordered: Vec<(&str, usize)> = depth.into_iter().collect();
    ordered.sort_unstable();
    for (id, d) in ordered {
        stages[d].push(id.to_string());
    }

    DependencyOrder { stages, cyclic }
}
