//! The prerequisite graph used to reject cyclic launches.

use crate::error::CycleError;
use crate::task::TaskId;
use parking_lot::{const_mutex, Mutex};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

/// Edges of every launched, unsettled task which has prerequisites.
///
/// A single lock covers both the reachability check and the insertion, so two
/// concurrent launches can't each close one half of a cycle.
static GRAPH: Mutex<Graph> = const_mutex(Graph::new());

/// Record that `task` depends on `prerequisites`, unless that would make it
/// reachable from itself.
pub(crate) fn link(task: TaskId, prerequisites: &[TaskId]) -> Result<(), CycleError> {
    GRAPH.lock().link(task, prerequisites)
}

/// Forget the edges of a settled task.
pub(crate) fn forget(task: TaskId) {
    GRAPH.lock().forget(task);
}

/// Adjacency from a task to the tasks it depends on.
pub(crate) struct Graph {
    edges: BTreeMap<TaskId, Vec<TaskId>>,
    /// Number of recorded edges pointing at each task.
    incoming: BTreeMap<TaskId, usize>,
    #[cfg(test)]
    searches: usize,
}

impl Graph {
    pub(crate) const fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
            incoming: BTreeMap::new(),
            #[cfg(test)]
            searches: 0,
        }
    }

    pub(crate) fn link(&mut self, task: TaskId, prerequisites: &[TaskId]) -> Result<(), CycleError> {
        if prerequisites.contains(&task) {
            return Err(CycleError {
                task,
                path: vec![task],
            });
        }

        // Nothing depends on the task yet, which is always the case unless its
        // handle was handed out before it was launched. Then it can't be
        // reached from anywhere.
        if self.incoming.contains_key(&task) {
            if let Some(path) = self.path_to(task, prerequisites) {
                return Err(CycleError { task, path });
            }
        }

        for &prerequisite in prerequisites {
            *self.incoming.entry(prerequisite).or_default() += 1;
        }

        self.edges
            .entry(task)
            .or_default()
            .extend_from_slice(prerequisites);

        Ok(())
    }

    pub(crate) fn forget(&mut self, task: TaskId) {
        let prerequisites = match self.edges.remove(&task) {
            Some(prerequisites) => prerequisites,
            None => return,
        };

        for prerequisite in prerequisites {
            if let Entry::Occupied(mut e) = self.incoming.entry(prerequisite) {
                *e.get_mut() -= 1;

                if *e.get() == 0 {
                    e.remove();
                }
            }
        }
    }

    /// Depth-first search for `target` starting at `roots`, returning the path
    /// from the root it was reached through to `target` inclusive.
    fn path_to(&mut self, target: TaskId, roots: &[TaskId]) -> Option<Vec<TaskId>> {
        #[cfg(test)]
        {
            self.searches += 1;
        }

        let mut visited = BTreeSet::new();
        // The node each node was first discovered from. Parents are always
        // visited before their children, so following them terminates at a
        // root.
        let mut parents = BTreeMap::new();
        let mut stack = roots.iter().rev().copied().collect::<Vec<_>>();

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }

            if node == target {
                let mut path = vec![node];
                let mut current = node;

                while let Some(&parent) = parents.get(&current) {
                    path.push(parent);
                    current = parent;
                }

                path.reverse();
                return Some(path);
            }

            let next = match self.edges.get(&node) {
                Some(next) => next,
                None => continue,
            };

            for &n in next.iter().rev() {
                if !visited.contains(&n) {
                    parents.entry(n).or_insert(node);
                    stack.push(n);
                }
            }
        }

        None
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.edges.len()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.edges.is_empty() && self.incoming.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::Graph;
    use crate::task::TaskId;

    fn id(n: u64) -> TaskId {
        TaskId(n)
    }

    #[test]
    fn acyclic_links_are_recorded() {
        let mut g = Graph::new();
        assert!(g.link(id(2), &[id(1)]).is_ok());
        assert!(g.link(id(3), &[id(1), id(2)]).is_ok());
        assert_eq!(g.len(), 2);
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut g = Graph::new();
        let error = g.link(id(1), &[id(1)]).unwrap_err();
        assert_eq!(error.task(), id(1));
        assert_eq!(error.path(), &[id(1)]);
        assert_eq!(g.len(), 0);
    }

    #[test]
    fn transitive_cycle_is_rejected() {
        let mut g = Graph::new();
        // 2 -> 1 and 3 -> 2, where 1 is not launched yet.
        g.link(id(2), &[id(1)]).unwrap();
        g.link(id(3), &[id(2)]).unwrap();

        let error = g.link(id(1), &[id(4), id(3)]).unwrap_err();
        assert_eq!(error.path(), &[id(3), id(2), id(1)]);
        assert_eq!(
            error.to_string(),
            "task #1 would depend on itself through #3 -> #2 -> #1"
        );

        // Nothing was recorded for the rejected task.
        assert_eq!(g.len(), 2);
        assert!(g.link(id(1), &[id(4)]).is_ok());
    }

    #[test]
    fn forgotten_tasks_no_longer_close_cycles() {
        let mut g = Graph::new();
        g.link(id(2), &[id(1)]).unwrap();
        g.forget(id(2));
        assert!(g.link(id(1), &[id(2)]).is_ok());
    }

    #[test]
    fn diamonds_are_not_cycles() {
        let mut g = Graph::new();
        g.link(id(2), &[id(1)]).unwrap();
        g.link(id(3), &[id(1)]).unwrap();
        g.link(id(4), &[id(2), id(3)]).unwrap();
        assert!(g.link(id(5), &[id(4), id(2)]).is_ok());
    }

    #[test]
    fn fresh_tasks_are_linked_without_searching() {
        let mut g = Graph::new();

        for n in 2..10_000 {
            g.link(id(n), &[id(n - 1)]).unwrap();
        }

        assert_eq!(g.searches, 0);

        // A task which something already depends on has to be searched from.
        let error = g.link(id(1), &[id(9_999)]).unwrap_err();
        assert_eq!(error.path().len(), 9_999);
        assert_eq!(g.searches, 1);
    }

    #[test]
    fn forgetting_every_task_empties_the_graph() {
        let mut g = Graph::new();
        g.link(id(2), &[id(1)]).unwrap();
        g.link(id(3), &[id(1), id(2)]).unwrap();
        g.link(id(4), &[id(3), id(3)]).unwrap();

        g.forget(id(4));
        g.forget(id(2));
        g.forget(id(3));
        g.forget(id(1));
        assert!(g.is_empty());
    }
}
