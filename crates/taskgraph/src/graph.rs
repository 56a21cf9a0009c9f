//! Graph flattening and topological ordering
//!
//! [`Plan::build`] walks the dependencies of the requested roots and produces
//! a total order in which every task appears after all of its dependencies.
//! The order is used for display and validation; execution itself is driven
//! by [`Task::execute`](crate::Task::execute), which follows the same edges.

use crate::error::{Error, Result};
use crate::task::{Task, TaskId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Order `vertices` so that for every edge `(from, to)`, `from` comes first
///
/// Among vertices that are ready at the same time, the one listed first in
/// `vertices` wins, so the result is deterministic. Edges naming unknown
/// vertices are ignored.
///
/// On a cycle, returns the vertices that lie on a cycle or on a path between
/// cycles, in `vertices` order. Vertices that merely depend on a cycle are
/// not included.
pub fn toposort<T>(vertices: &[T], edges: &[(T, T)]) -> std::result::Result<Vec<T>, Vec<T>>
where
    T: Copy + Eq + Hash,
{
    let index: HashMap<T, usize> = vertices
        .iter()
        .enumerate()
        .map(|(i, &vertex)| (vertex, i))
        .collect();

    let count = vertices.len();
    let mut in_degree = vec![0usize; count];
    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); count];
    let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); count];

    for (from, to) in edges {
        let (Some(&from), Some(&to)) = (index.get(from), index.get(to)) else {
            continue;
        };
        adjacency[from].push(to);
        reverse[to].push(from);
        in_degree[to] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();

    let mut order = Vec::with_capacity(count);
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &next in &adjacency[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if order.len() == count {
        return Ok(order.into_iter().map(|i| vertices[i]).collect());
    }

    // Peel leftover vertices that cannot reach another leftover vertex.
    let mut remaining: HashSet<usize> = (0..count).filter(|&i| in_degree[i] > 0).collect();
    let mut out_degree: HashMap<usize, usize> = remaining
        .iter()
        .map(|&i| {
            let degree = adjacency[i].iter().filter(|j| remaining.contains(j)).count();
            (i, degree)
        })
        .collect();

    let mut sinks: Vec<usize> = out_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&i, _)| i)
        .collect();
    while let Some(sink) = sinks.pop() {
        remaining.remove(&sink);
        for &previous in &reverse[sink] {
            if let Some(degree) = out_degree.get_mut(&previous)
                && remaining.contains(&previous)
                && *degree > 0
            {
                *degree -= 1;
                if *degree == 0 {
                    sinks.push(previous);
                }
            }
        }
    }

    let mut cycle: Vec<usize> = remaining.into_iter().collect();
    cycle.sort_unstable();
    Err(cycle.into_iter().map(|i| vertices[i]).collect())
}

/// A validated, ordered view of everything reachable from a set of roots
pub struct Plan {
    roots: Vec<Task>,
    order: Vec<Task>,
    edges: Vec<(TaskId, TaskId)>,
}

impl Plan {
    /// Flatten and order the graph below `roots`
    ///
    /// Fails on a dependency cycle or when any reachable task recorded a
    /// configuration error. Lazy dependencies are materialized.
    pub fn build(roots: &[Task]) -> Result<Self> {
        let mut seen: HashMap<TaskId, usize> = HashMap::new();
        let mut vertices: Vec<Task> = Vec::new();
        let mut edges: Vec<(usize, usize)> = Vec::new();

        for root in roots {
            if !seen.contains_key(&root.id()) {
                seen.insert(root.id(), vertices.len());
                vertices.push(root.clone());
            }
        }

        let mut cursor = 0;
        while cursor < vertices.len() {
            let dependent = cursor;
            let dependencies = vertices[dependent].dependencies();
            cursor += 1;

            for dependency in dependencies {
                let index = *seen.entry(dependency.id()).or_insert_with(|| {
                    vertices.push(dependency.clone());
                    vertices.len() - 1
                });
                edges.push((index, dependent));
            }
        }

        if let Some(error) = vertices
            .iter()
            .find_map(|task| task.configuration_errors().into_iter().next())
        {
            return Err(error);
        }

        let indices: Vec<usize> = (0..vertices.len()).collect();
        let order = toposort(&indices, &edges).map_err(|cycle| {
            Error::Cycle(
                cycle
                    .into_iter()
                    .map(|i| vertices[i].name().to_string())
                    .collect(),
            )
        })?;

        log::debug!(
            "Planned {} tasks for {} roots",
            vertices.len(),
            roots.len()
        );

        Ok(Self {
            roots: roots.to_vec(),
            order: order.into_iter().map(|i| vertices[i].clone()).collect(),
            edges: edges
                .into_iter()
                .map(|(from, to)| (vertices[from].id(), vertices[to].id()))
                .collect(),
        })
    }

    pub fn roots(&self) -> &[Task] {
        &self.roots
    }

    /// Every reachable task, dependencies first
    pub fn order(&self) -> &[Task] {
        &self.order
    }

    /// `(dependency, dependent)` pairs
    pub fn edges(&self) -> &[(TaskId, TaskId)] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, task: &Task) -> bool {
        self.order.iter().any(|t| t == task)
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, task) in self.order.iter().enumerate() {
            writeln!(f, "{:>3}. {}", i + 1, task.describe())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("roots", &self.roots)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}
