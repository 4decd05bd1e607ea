//! Stop-order computation over the stop-after graph.
//!
//! An edge `A → B` means "A stops after B". The order is a topological sort in
//! which, among components whose constraints are satisfied, the most recently
//! registered goes first. With no constraints this is exactly reverse
//! registration order.

use std::collections::HashMap;

use crate::lifecycle::error::GraphError;

/// A node as seen by the sorter: name plus must-stop-after names.
pub struct StopNode<'a> {
    pub name: &'a str,
    pub stop_after: &'a [String],
}

/// Returns registration indices in stop order.
pub fn stop_order(nodes: &[StopNode<'_>]) -> Result<Vec<usize>, GraphError> {
    let index: HashMap<&str, usize> = nodes.iter().enumerate().map(|(i, n)| (n.name, i)).collect();

    let mut deps: Vec<Vec<usize>> = Vec::with_capacity(nodes.len());
    for node in nodes {
        let mut resolved = Vec::with_capacity(node.stop_after.len());
        for dependency in node.stop_after {
            match index.get(dependency.as_str()) {
                Some(&i) => resolved.push(i),
                None => {
                    return Err(GraphError::UnknownDependency {
                        component: node.name.to_string(),
                        dependency: dependency.clone(),
                    })
                }
            }
        }
        deps.push(resolved);
    }

    let mut stopped = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());
    while order.len() < nodes.len() {
        let ready = (0..nodes.len())
            .rev()
            .find(|&i| !stopped[i] && deps[i].iter().all(|&d| stopped[d]));
        match ready {
            Some(i) => {
                stopped[i] = true;
                order.push(i);
            }
            None => {
                let remaining = (0..nodes.len())
                    .filter(|&i| !stopped[i])
                    .map(|i| nodes[i].name.to_string())
                    .collect();
                return Err(GraphError::Cycle(remaining));
            }
        }
    }
    Ok(order)
}
