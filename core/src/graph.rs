/// Dependency graph over string-keyed nodes.
///
/// Used to validate stage templates, to reject dependency edges that would
/// introduce a cycle at write time, and to order tasks for schedule analysis.
/// An edge `prerequisite -> dependent` means the dependent cannot be scheduled
/// until the prerequisite is done.
///
/// # Examples
///
/// ```rust
/// use atelier_core::graph::DependencyGraph;
///
/// let mut graph = DependencyGraph::new();
/// graph.add_node("design").unwrap();
/// graph.add_node("procurement").unwrap();
/// graph.add_dependency("procurement", "design").unwrap();
///
/// assert!(graph.validate().is_ok());
/// assert_eq!(graph.topological_sort().unwrap(), vec!["design", "procurement"]);
/// ```
use crate::errors::{GraphError, GraphResult};
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Node ids in insertion order, for deterministic traversal
    nodes: Vec<String>,
    known: HashSet<String>,
    /// node -> nodes that depend on it
    adjacency_out: HashMap<String, Vec<String>>,
    /// node -> nodes it depends on
    adjacency_in: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from `(id, prerequisites)` pairs.
    ///
    /// Prerequisites that name unknown nodes are returned separately instead
    /// of failing, so callers can decide whether dangling references matter.
    pub fn from_edges<'a, I>(items: I) -> GraphResult<(Self, Vec<(String, String)>)>
    where
        I: IntoIterator<Item = (&'a str, &'a [String])> + Clone,
    {
        let mut graph = DependencyGraph::new();
        for (id, _) in items.clone() {
            graph.add_node(id)?;
        }

        let mut dangling = Vec::new();
        for (id, prerequisites) in items {
            for prerequisite in prerequisites {
                match graph.add_dependency(id, prerequisite) {
                    Ok(()) => {}
                    Err(GraphError::NodeNotFound(_)) => {
                        dangling.push((id.to_string(), prerequisite.clone()));
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok((graph, dangling))
    }

    /// Add a node to the graph
    pub fn add_node(&mut self, id: &str) -> GraphResult<()> {
        if !self.known.insert(id.to_string()) {
            return Err(GraphError::DuplicateNode(id.to_string()));
        }

        self.nodes.push(id.to_string());
        self.adjacency_out.insert(id.to_string(), Vec::new());
        self.adjacency_in.insert(id.to_string(), Vec::new());
        Ok(())
    }

    /// Record that `node` depends on `prerequisite`. Repeated edges are ignored.
    pub fn add_dependency(&mut self, node: &str, prerequisite: &str) -> GraphResult<()> {
        if !self.known.contains(node) {
            return Err(GraphError::NodeNotFound(node.to_string()));
        }
        if !self.known.contains(prerequisite) {
            return Err(GraphError::NodeNotFound(prerequisite.to_string()));
        }
        if node == prerequisite {
            return Err(GraphError::SelfLoop(node.to_string()));
        }

        let incoming = self.adjacency_in.entry(node.to_string()).or_default();
        if incoming.iter().any(|p| p == prerequisite) {
            return Ok(());
        }
        incoming.push(prerequisite.to_string());

        self.adjacency_out
            .entry(prerequisite.to_string())
            .or_default()
            .push(node.to_string());

        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node ids in insertion order
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Nodes `id` depends on
    pub fn prerequisites(&self, id: &str) -> &[String] {
        self.adjacency_in.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes that depend on `id`
    pub fn dependents(&self, id: &str) -> &[String] {
        self.adjacency_out.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Nodes without prerequisites
    pub fn start_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|id| self.prerequisites(id).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Nodes nothing depends on
    pub fn end_nodes(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|id| self.dependents(id).is_empty())
            .map(String::as_str)
            .collect()
    }

    /// Whether `to` is reachable from `from` following dependent edges
    pub fn has_path(&self, from: &str, to: &str) -> bool {
        if !self.contains(from) || !self.contains(to) {
            return false;
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([from]);
        while let Some(current) = queue.pop_front() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            for next in self.dependents(current) {
                queue.push_back(next.as_str());
            }
        }
        false
    }

    /// Whether adding "`node` depends on `prerequisite`" would close a cycle
    pub fn would_create_cycle(&self, node: &str, prerequisite: &str) -> bool {
        node == prerequisite || self.has_path(node, prerequisite)
    }

    /// Validate the graph structure (check for cycles)
    pub fn validate(&self) -> GraphResult<()> {
        match self.find_cycle() {
            Some(cycle) => Err(GraphError::CycleDetected(cycle.join(" -> "))),
            None => Ok(()),
        }
    }

    /// Find one cycle, returned as the path that closes on its first node
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for id in &self.nodes {
            if !visited.contains(id.as_str()) {
                if let Some(cycle) = self.cycle_dfs(id, &mut visited, &mut rec_stack, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn cycle_dfs<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        rec_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        rec_stack.insert(id);
        path.push(id);

        for next in self.dependents(id) {
            let next = next.as_str();
            if !visited.contains(next) {
                if let Some(cycle) = self.cycle_dfs(next, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(next) {
                let start = path.iter().position(|n| *n == next).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(next.to_string());
                return Some(cycle);
            }
        }

        path.pop();
        rec_stack.remove(id);
        None
    }

    /// Kahn's algorithm; prerequisites come before dependents and ties keep
    /// insertion order.
    pub fn topological_sort(&self) -> GraphResult<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|id| (id.as_str(), self.prerequisites(id).len()))
            .collect();

        let mut queue: VecDeque<&str> = self.start_nodes().into_iter().collect();
        let mut result = Vec::with_capacity(self.nodes.len());

        while let Some(id) = queue.pop_front() {
            result.push(id.to_string());

            for next in self.dependents(id) {
                if let Some(degree) = in_degree.get_mut(next.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(next.as_str());
                    }
                }
            }
        }

        if result.len() != self.nodes.len() {
            self.validate()?;
            return Err(GraphError::CycleDetected(
                "graph contains a cycle".to_string(),
            ));
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(ids: &[&str]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for id in ids {
            graph.add_node(id).unwrap();
        }
        for pair in ids.windows(2) {
            graph.add_dependency(pair[1], pair[0]).unwrap();
        }
        graph
    }

    #[test]
    fn test_duplicate_node() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a").unwrap();
        assert!(matches!(graph.add_node("a"), Err(GraphError::DuplicateNode(_))));
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = DependencyGraph::new();
        graph.add_node("a").unwrap();
        assert!(matches!(
            graph.add_dependency("a", "a"),
            Err(GraphError::SelfLoop(_))
        ));
    }

    #[test]
    fn test_topological_sort() {
        let graph = chain(&["consult", "design", "build"]);
        assert_eq!(
            graph.topological_sort().unwrap(),
            vec!["consult", "design", "build"]
        );
        assert_eq!(graph.start_nodes(), vec!["consult"]);
        assert_eq!(graph.end_nodes(), vec!["build"]);
    }

    #[test]
    fn test_cycle_detection() {
        let mut graph = chain(&["a", "b", "c"]);
        graph.add_dependency("a", "c").unwrap();

        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(matches!(graph.validate(), Err(GraphError::CycleDetected(_))));
        assert!(graph.topological_sort().is_err());
    }

    #[test]
    fn test_would_create_cycle() {
        let graph = chain(&["a", "b", "c"]);
        assert!(graph.would_create_cycle("a", "c"));
        assert!(graph.would_create_cycle("b", "b"));
        assert!(!graph.would_create_cycle("c", "a"));
    }

    #[test]
    fn test_from_edges_reports_dangling() {
        let deps_b = vec!["a".to_string(), "ghost".to_string()];
        let none: Vec<String> = Vec::new();
        let items = vec![("a", none.as_slice()), ("b", deps_b.as_slice())];

        let (graph, dangling) = DependencyGraph::from_edges(items).unwrap();
        assert_eq!(graph.prerequisites("b"), ["a".to_string()]);
        assert_eq!(dangling, vec![("b".to_string(), "ghost".to_string())]);
    }

    #[test]
    fn test_repeated_edge_ignored() {
        let mut graph = chain(&["a", "b"]);
        graph.add_dependency("b", "a").unwrap();
        assert_eq!(graph.prerequisites("b").len(), 1);
        assert_eq!(graph.dependents("a").len(), 1);
    }
}
