//! Dependency collection over the fragment arena
//!
//! Produces the CTEs a fragment needs, dependencies before dependents, and
//! computes dependency depths for graph statistics.

use crate::fragment::{Fragment, FragmentId, FragmentKind};
use ctekit_core::CyclePolicy;
use std::collections::{HashMap, HashSet, VecDeque};

/// A dependency path that closes on itself; first and last ids are equal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyCycle {
    pub path: Vec<FragmentId>,
}

/// Walks fragment dependencies
pub struct DependencyCollector<'a> {
    fragments: &'a [Fragment],
    policy: CyclePolicy,
}

impl<'a> DependencyCollector<'a> {
    pub fn new(fragments: &'a [Fragment], policy: CyclePolicy) -> Self {
        Self { fragments, policy }
    }

    /// Every CTE transitively reachable from `root`, once, in post-order.
    ///
    /// The order depends only on dependency list order. The root and Main
    /// fragments are never part of the result.
    pub fn collect(&self, root: FragmentId) -> Result<Vec<FragmentId>, DependencyCycle> {
        let mut visited = HashSet::from([root]);
        let mut path = Vec::new();
        let mut result = Vec::new();

        self.visit(root, &mut visited, &mut path, &mut result)?;
        Ok(result)
    }

    fn visit(
        &self,
        id: FragmentId,
        visited: &mut HashSet<FragmentId>,
        path: &mut Vec<FragmentId>,
        result: &mut Vec<FragmentId>,
    ) -> Result<(), DependencyCycle> {
        let Some(fragment) = self.fragments.get(id.index()) else {
            return Ok(());
        };

        path.push(id);
        for &dep in &fragment.dependencies {
            if let Some(start) = path.iter().position(|&p| p == dep) {
                match self.policy {
                    CyclePolicy::Reject => {
                        let mut cycle = path[start..].to_vec();
                        cycle.push(dep);
                        return Err(DependencyCycle { path: cycle });
                    }
                    CyclePolicy::Skip => {
                        tracing::debug!(from = %id, to = %dep, "Skipping dependency back-edge");
                        continue;
                    }
                }
            }

            if !visited.insert(dep) {
                continue;
            }

            self.visit(dep, visited, path, result)?;

            if self.fragments.get(dep.index()).map(|f| f.kind) == Some(FragmentKind::Cte) {
                result.push(dep);
            }
        }
        path.pop();

        Ok(())
    }

    /// Dependency depth of every fragment, indexed like the arena.
    ///
    /// A fragment without known dependencies has depth 0, otherwise
    /// 1 + the deepest dependency. A fragment re-entered through a cycle
    /// counts as 0 at the point of re-entry.
    pub fn depths(&self) -> Vec<usize> {
        let mut memo = HashMap::new();
        let mut in_progress = HashSet::new();

        self.fragments
            .iter()
            .map(|fragment| self.depth(fragment.id, &mut memo, &mut in_progress))
            .collect()
    }

    pub fn max_depth(&self) -> usize {
        self.depths().into_iter().max().unwrap_or(0)
    }

    fn depth(
        &self,
        id: FragmentId,
        memo: &mut HashMap<FragmentId, usize>,
        in_progress: &mut HashSet<FragmentId>,
    ) -> usize {
        if let Some(&depth) = memo.get(&id) {
            return depth;
        }
        let Some(fragment) = self.fragments.get(id.index()) else {
            return 0;
        };
        if !in_progress.insert(id) {
            return 0;
        }

        let depth = fragment
            .dependencies
            .iter()
            .filter(|dep| dep.index() < self.fragments.len())
            .map(|&dep| self.depth(dep, memo, in_progress) + 1)
            .max()
            .unwrap_or(0);

        in_progress.remove(&id);
        memo.insert(id, depth);
        depth
    }

    /// Every fragment that transitively depends on `id`, nearest first
    pub fn dependents(&self, id: FragmentId) -> Vec<FragmentId> {
        let mut visited = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut result = Vec::new();

        while let Some(current) = queue.pop_front() {
            for fragment in self.fragments {
                if fragment.dependencies.contains(&current) && visited.insert(fragment.id) {
                    result.push(fragment.id);
                    queue.push_back(fragment.id);
                }
            }
        }

        result
    }

    /// First cycle found when walking from each fragment in arena order
    pub fn find_cycle(&self) -> Option<DependencyCycle> {
        let strict = DependencyCollector::new(self.fragments, CyclePolicy::Reject);
        self.fragments
            .iter()
            .find_map(|fragment| strict.collect(fragment.id).err())
    }
}
