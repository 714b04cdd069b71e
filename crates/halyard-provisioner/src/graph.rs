//! Dependency ordering of resource instances.
//!
//! Edges point from an instance to the instances it references
//! (`runbook -> account -> resource_group`). Ordering is deterministic: among
//! instances that are ready at the same time, declaration order wins.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use halyard_core::{Manifest, Presence, ResourceAddr};
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::error::GraphError;

#[derive(Debug, Clone)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceAddr, ()>,
    index: HashMap<ResourceAddr, NodeIndex>,
    presence: HashMap<ResourceAddr, Presence>,
    order: Vec<ResourceAddr>,
}

impl DependencyGraph {
    /// Build and validate the graph. Pure: no remote calls.
    pub fn build(manifest: &Manifest) -> Result<Self, GraphError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        let mut presence = HashMap::new();

        for instance in &manifest.instances {
            if index.contains_key(&instance.addr) {
                return Err(GraphError::DuplicateInstance(instance.addr.clone()));
            }
            let node = graph.add_node(instance.addr.clone());
            index.insert(instance.addr.clone(), node);
            presence.insert(instance.addr.clone(), instance.presence);
        }

        for reference in manifest.references() {
            let Some(&target) = index.get(&reference.target) else {
                return Err(GraphError::DanglingReference {
                    from: reference.source,
                    field: reference.field_path,
                    target: reference.target,
                });
            };
            let source = index[&reference.source];
            graph.update_edge(source, target, ());
        }

        let mut dag = Self {
            graph,
            index,
            presence,
            order: Vec::new(),
        };

        let dependencies: HashMap<ResourceAddr, Vec<ResourceAddr>> = manifest
            .instances
            .iter()
            .map(|i| (i.addr.clone(), dag.dependencies(&i.addr)))
            .collect();
        let order = ordered(&manifest.addrs(), &dependencies);
        if order.len() < manifest.len() {
            return Err(GraphError::CycleDetected {
                cycle: dag.find_cycle(),
            });
        }
        dag.order = order;

        for instance in manifest.instances.iter().filter(|i| !i.is_absent()) {
            for dep in dag.dependencies(&instance.addr) {
                if dag.presence.get(&dep) == Some(&Presence::Absent) {
                    return Err(GraphError::AbsentDependency {
                        from: instance.addr.clone(),
                        target: dep,
                    });
                }
            }
        }

        Ok(dag)
    }

    /// Every instance after everything it references.
    pub fn order(&self) -> &[ResourceAddr] {
        &self.order
    }

    /// Instances `addr` references directly.
    pub fn dependencies(&self, addr: &ResourceAddr) -> Vec<ResourceAddr> {
        self.neighbors(addr, Direction::Outgoing)
    }

    /// Longest reference chain below each instance. Instances of equal depth
    /// never depend on each other.
    pub fn depths(&self) -> HashMap<ResourceAddr, usize> {
        let mut depths: HashMap<ResourceAddr, usize> = HashMap::new();
        for addr in &self.order {
            let depth = self
                .dependencies(addr)
                .iter()
                .filter_map(|d| depths.get(d))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depths.insert(addr.clone(), depth);
        }
        depths
    }

    /// What must converge before each instance may execute.
    ///
    /// Present instances wait for what they reference. Absent instances are
    /// torn down dependents-first, so they wait for every absent instance that
    /// references them. A present instance never waits on an absent one
    /// (rejected at build time) and an absent instance never waits on a
    /// present one.
    pub fn predecessors(&self) -> HashMap<ResourceAddr, Vec<ResourceAddr>> {
        let mut preds: HashMap<ResourceAddr, Vec<ResourceAddr>> = self
            .order
            .iter()
            .map(|a| (a.clone(), Vec::new()))
            .collect();

        for addr in &self.order {
            let absent = self.presence.get(addr) == Some(&Presence::Absent);
            for dep in self.dependencies(addr) {
                let dep_absent = self.presence.get(&dep) == Some(&Presence::Absent);
                match (absent, dep_absent) {
                    (false, false) => preds.entry(addr.clone()).or_default().push(dep),
                    (true, true) => preds.entry(dep).or_default().push(addr.clone()),
                    _ => {}
                }
            }
        }
        preds
    }

    /// Linear order honouring [`predecessors`](Self::predecessors).
    pub fn execution_order(&self) -> Vec<ResourceAddr> {
        let declared: Vec<ResourceAddr> = self
            .graph
            .node_indices()
            .map(|n| self.graph[n].clone())
            .collect();
        ordered(&declared, &self.predecessors())
    }

    fn neighbors(&self, addr: &ResourceAddr, direction: Direction) -> Vec<ResourceAddr> {
        let Some(&node) = self.index.get(addr) else {
            return Vec::new();
        };
        let mut out: Vec<ResourceAddr> = self
            .graph
            .neighbors_directed(node, direction)
            .map(|n| self.graph[n].clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Full path of one reference cycle, first node repeated at the end.
    fn find_cycle(&self) -> Vec<ResourceAddr> {
        let component = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&n| self.graph.contains_edge(n, n))
            })
            .min_by_key(|scc| scc.iter().map(|n| n.index()).min());
        let Some(component) = component else {
            return Vec::new();
        };

        let members: HashSet<NodeIndex> = component.iter().copied().collect();
        let Some(&start) = component.iter().min_by_key(|n| n.index()) else {
            return Vec::new();
        };

        // BFS back to `start` inside the strongly connected component.
        let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen = HashSet::from([start]);
        let mut last = None;
        'search: while let Some(node) = queue.pop_front() {
            let mut next: Vec<NodeIndex> = self.graph.neighbors(node).collect();
            next.sort_by_key(|n| n.index());
            for succ in next {
                if succ == start {
                    last = Some(node);
                    break 'search;
                }
                if members.contains(&succ) && seen.insert(succ) {
                    parent.insert(succ, node);
                    queue.push_back(succ);
                }
            }
        }

        let mut path = vec![self.graph[start].clone()];
        let mut cursor = last;
        let mut reversed = Vec::new();
        while let Some(node) = cursor {
            if node == start {
                break;
            }
            reversed.push(self.graph[node].clone());
            cursor = parent.get(&node).copied();
        }
        path.extend(reversed.into_iter().rev());
        path.push(self.graph[start].clone());
        path
    }
}

/// Kahn's algorithm over `preds`, ties broken by position in `declared`.
/// Returns fewer items than `declared` when `preds` contains a cycle.
fn ordered(
    declared: &[ResourceAddr],
    preds: &HashMap<ResourceAddr, Vec<ResourceAddr>>,
) -> Vec<ResourceAddr> {
    let position: HashMap<&ResourceAddr, usize> =
        declared.iter().enumerate().map(|(i, a)| (a, i)).collect();

    let mut remaining: HashMap<&ResourceAddr, usize> = HashMap::new();
    let mut successors: HashMap<&ResourceAddr, Vec<&ResourceAddr>> = HashMap::new();
    for addr in declared {
        let deps = preds.get(addr).map(Vec::as_slice).unwrap_or_default();
        remaining.insert(addr, deps.len());
        for dep in deps {
            successors.entry(dep).or_default().push(addr);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = declared
        .iter()
        .enumerate()
        .filter(|(_, a)| remaining.get(a) == Some(&0))
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut out = Vec::with_capacity(declared.len());
    while let Some(Reverse(i)) = ready.pop() {
        let addr = &declared[i];
        out.push(addr.clone());
        for succ in successors.get(addr).into_iter().flatten() {
            if let Some(count) = remaining.get_mut(succ) {
                *count -= 1;
                if *count == 0 {
                    if let Some(&pos) = position.get(succ) {
                        ready.push(Reverse(pos));
                    }
                }
            }
        }
    }
    out
}
