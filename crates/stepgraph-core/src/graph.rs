//! Dependency graph of steps: validation, topological order and levels.

use crate::error::WorkflowError;
use crate::step::{Step, StepName};
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A set of steps and the dependencies between them.
///
/// Names are checked for uniqueness on [`add`](Self::add). Everything else
/// (missing dependencies, cycles) is checked by [`validate`](Self::validate),
/// which every ordering query runs first. Insertion order is kept and used
/// to break ties, so diagnostics and orderings are deterministic.
///
/// # Examples
///
/// ```
/// use stepgraph_core::{Graph, Step};
/// use serde_json::Value;
///
/// fn step(name: &str, deps: &[&str]) -> Step {
///     Step::builder(name)
///         .depends_on(deps.iter().copied())
///         .run(|_| async { Ok(Value::Null) })
///         .build()
///         .unwrap()
/// }
///
/// let mut graph = Graph::new();
/// graph
///     .add(step("a", &[]))?
///     .add(step("b", &["a"]))?
///     .add(step("c", &["a"]))?
///     .add(step("d", &["b", "c"]))?;
///
/// let levels = graph.levels()?;
/// let levels: Vec<Vec<&str>> = levels
///     .iter()
///     .map(|level| level.iter().map(|s| s.name().as_str()).collect())
///     .collect();
/// assert_eq!(levels, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
/// # Ok::<(), stepgraph_core::WorkflowError>(())
/// ```
#[derive(Clone, Default)]
pub struct Graph {
    steps: IndexMap<StepName, Arc<Step>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    White,
    Gray,
    Black,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a step.
    ///
    /// Fails with [`WorkflowError::DuplicateStep`] if the name is taken.
    pub fn add(&mut self, step: Step) -> Result<&mut Self, WorkflowError> {
        if self.steps.contains_key(step.name()) {
            return Err(WorkflowError::DuplicateStep(step.name().clone()));
        }
        self.steps.insert(step.name().clone(), Arc::new(step));
        Ok(self)
    }

    /// Returns the step named `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<Step>> {
        self.steps.get(name)
    }

    /// Returns `true` if a step named `name` exists.
    pub fn contains(&self, name: &str) -> bool {
        self.steps.contains_key(name)
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the graph has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the steps in insertion order.
    pub fn steps(&self) -> impl Iterator<Item = &Arc<Step>> {
        self.steps.values()
    }

    /// Returns the step names in insertion order.
    pub fn step_names(&self) -> impl Iterator<Item = &StepName> {
        self.steps.keys()
    }

    /// Returns the steps that directly depend on `name`, in insertion order.
    pub fn dependents_of<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Arc<Step>> + 'a {
        self.steps.values().filter(move |step| step.depends_on(name))
    }

    /// Checks that every dependency exists and that there are no cycles.
    ///
    /// The first missing dependency is reported in step insertion order, then
    /// in the order the step declares its dependencies.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        self.check_dependencies()?;
        self.check_cycles()
    }

    fn check_dependencies(&self) -> Result<(), WorkflowError> {
        for step in self.steps.values() {
            if let Some(missing) = step
                .dependencies()
                .iter()
                .find(|dep| !self.steps.contains_key(*dep))
            {
                return Err(WorkflowError::MissingDependency {
                    step_name: step.name().clone(),
                    dependency: missing.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_cycles(&self) -> Result<(), WorkflowError> {
        if let Some(step) = self.steps.values().find(|s| s.depends_on(s.name().as_str())) {
            return Err(WorkflowError::Cycle {
                path: vec![step.name().clone(), step.name().clone()],
            });
        }
        if self.kahn_order().len() == self.steps.len() {
            return Ok(());
        }
        Err(WorkflowError::Cycle {
            path: self.find_cycle(),
        })
    }

    /// Kahn's algorithm over step indices. Returns fewer indices than there
    /// are steps when the graph has a cycle.
    ///
    /// Assumes every dependency exists.
    fn kahn_order(&self) -> Vec<usize> {
        let count = self.steps.len();
        let mut in_degree = vec![0usize; count];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

        for (index, step) in self.steps.values().enumerate() {
            for dep in step.dependencies() {
                if let Some(dep_index) = self.steps.get_index_of(dep) {
                    in_degree[index] += 1;
                    dependents[dep_index].push(index);
                }
            }
        }

        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);

        while let Some(index) = queue.pop_front() {
            order.push(index);
            for &dependent in &dependents[index] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        order
    }

    /// Finds one cycle with a colored depth-first search along dependency
    /// edges. The returned path starts and ends with the same step.
    fn find_cycle(&self) -> Vec<StepName> {
        let mut marks = vec![Mark::White; self.steps.len()];
        let mut stack: Vec<usize> = Vec::new();

        for start in 0..self.steps.len() {
            if marks[start] == Mark::White {
                if let Some(cycle) = self.visit(start, &mut marks, &mut stack) {
                    return cycle;
                }
            }
        }
        Vec::new()
    }

    fn visit(&self, index: usize, marks: &mut [Mark], stack: &mut Vec<usize>) -> Option<Vec<StepName>> {
        marks[index] = Mark::Gray;
        stack.push(index);

        let (_, step) = self.steps.get_index(index)?;
        for dep in step.dependencies() {
            let Some(dep_index) = self.steps.get_index_of(dep) else {
                continue;
            };
            match marks[dep_index] {
                Mark::Gray => {
                    let from = stack.iter().position(|&i| i == dep_index)?;
                    let mut path: Vec<StepName> = stack[from..]
                        .iter()
                        .filter_map(|&i| self.steps.get_index(i).map(|(name, _)| name.clone()))
                        .collect();
                    path.push(dep.clone());
                    return Some(path);
                }
                Mark::White => {
                    if let Some(cycle) = self.visit(dep_index, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Black => {}
            }
        }

        stack.pop();
        marks[index] = Mark::Black;
        None
    }

    /// Validates, then returns every step in a topological order:
    /// each step comes after all of its dependencies.
    pub fn sorted_steps(&self) -> Result<Vec<Arc<Step>>, WorkflowError> {
        self.validate()?;
        Ok(self
            .kahn_order()
            .into_iter()
            .filter_map(|i| self.steps.get_index(i).map(|(_, step)| Arc::clone(step)))
            .collect())
    }

    /// Validates, then groups steps into levels.
    ///
    /// Level 0 holds the steps without dependencies; every other step sits one
    /// level above its deepest dependency. Steps in the same level never
    /// depend on each other. Within a level, steps keep insertion order.
    pub fn levels(&self) -> Result<Vec<Vec<Arc<Step>>>, WorkflowError> {
        self.validate()?;

        let mut depth = vec![0usize; self.steps.len()];
        for index in self.kahn_order() {
            let Some((_, step)) = self.steps.get_index(index) else {
                continue;
            };
            depth[index] = step
                .dependencies()
                .iter()
                .filter_map(|dep| self.steps.get_index_of(dep))
                .map(|dep_index| depth[dep_index] + 1)
                .max()
                .unwrap_or(0);
        }

        let level_count = depth.iter().max().map_or(0, |deepest| deepest + 1);
        let mut levels: Vec<Vec<Arc<Step>>> = vec![Vec::new(); level_count];
        for (index, step) in self.steps.values().enumerate() {
            levels[depth[index]].push(Arc::clone(step));
        }
        Ok(levels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn step(name: &str, deps: &[&str]) -> Step {
        Step::builder(name)
            .depends_on(deps.iter().copied())
            .run(|_| async { Ok(Value::Null) })
            .build()
            .unwrap()
    }

    fn graph(edges: &[(&str, &[&str])]) -> Graph {
        let mut graph = Graph::new();
        for (name, deps) in edges {
            graph.add(step(name, deps)).unwrap();
        }
        graph
    }

    fn names(steps: &[Arc<Step>]) -> Vec<&str> {
        steps.iter().map(|s| s.name().as_str()).collect()
    }

    fn assert_valid_cycle(graph: &Graph, path: &[StepName]) {
        assert!(path.len() >= 2, "cycle path too short: {path:?}");
        assert_eq!(path.first(), path.last());
        for pair in path.windows(2) {
            let from = graph.get(pair[0].as_str()).unwrap();
            assert!(
                from.depends_on(pair[1].as_str()),
                "{} does not depend on {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_duplicate_step_rejected() {
        let mut graph = graph(&[("a", &[])]);
        let result = graph.add(step("a", &[]));
        assert!(matches!(result, Err(WorkflowError::DuplicateStep(name)) if name.as_str() == "a"));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_missing_dependency_reports_first_pair() {
        let graph = graph(&[("a", &[]), ("b", &["a", "x", "y"]), ("c", &["z"])]);
        match graph.validate() {
            Err(WorkflowError::MissingDependency {
                step_name,
                dependency,
            }) => {
                assert_eq!(step_name.as_str(), "b");
                assert_eq!(dependency.as_str(), "x");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_missing_dependency_checked_before_cycles() {
        let graph = graph(&[("a", &["b"]), ("b", &["a", "ghost"])]);
        assert!(matches!(
            graph.validate(),
            Err(WorkflowError::MissingDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let graph = graph(&[("a", &[]), ("loop", &["a", "loop"])]);
        match graph.validate() {
            Err(WorkflowError::Cycle { path }) => {
                assert_eq!(path, vec![StepName::new("loop"), StepName::new("loop")]);
                assert_valid_cycle(&graph, &path);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cycle_path_is_valid() {
        let graph = graph(&[
            ("root", &[]),
            ("a", &["root", "c"]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("tail", &["c"]),
        ]);
        match graph.validate() {
            Err(WorkflowError::Cycle { path }) => assert_valid_cycle(&graph, &path),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_two_node_cycle() {
        let graph = graph(&[("a", &["b"]), ("b", &["a"])]);
        match graph.sorted_steps() {
            Err(WorkflowError::Cycle { path }) => {
                assert_eq!(path.len(), 3);
                assert_valid_cycle(&graph, &path);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_sorted_steps_respects_dependencies() {
        let graph = graph(&[
            ("load", &["transform", "audit"]),
            ("transform", &["fetch"]),
            ("audit", &[]),
            ("fetch", &[]),
        ]);
        let sorted = graph.sorted_steps().unwrap();
        let order = names(&sorted);
        assert_eq!(order.len(), 4);
        for step in &sorted {
            let position = order.iter().position(|n| *n == step.name().as_str()).unwrap();
            for dep in step.dependencies() {
                let dep_position = order.iter().position(|n| *n == dep.as_str()).unwrap();
                assert!(dep_position < position, "{dep} must come before {}", step.name());
            }
        }
    }

    #[test]
    fn test_diamond_levels() {
        let graph = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let levels = graph.levels().unwrap();
        assert_eq!(levels.len(), 3);
        assert_eq!(names(&levels[0]), ["a"]);
        let mut middle = names(&levels[1]);
        middle.sort_unstable();
        assert_eq!(middle, ["b", "c"]);
        assert_eq!(names(&levels[2]), ["d"]);
    }

    #[test]
    fn test_level_is_one_above_deepest_dependency() {
        let graph = graph(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("shortcut", &["a", "c"]),
            ("free", &[]),
        ]);
        let levels = graph.levels().unwrap();
        assert_eq!(names(&levels[0]), ["a", "free"]);
        assert_eq!(names(&levels[1]), ["b"]);
        assert_eq!(names(&levels[2]), ["c"]);
        assert_eq!(names(&levels[3]), ["shortcut"]);
    }

    #[test]
    fn test_empty_graph() {
        let graph = Graph::new();
        assert!(graph.validate().is_ok());
        assert!(graph.levels().unwrap().is_empty());
        assert!(graph.sorted_steps().unwrap().is_empty());
    }

    #[test]
    fn test_dependents_of() {
        let graph = graph(&[("a", &[]), ("b", &["a"]), ("c", &["a", "b"])]);
        let dependents: Vec<_> = graph.dependents_of("a").map(|s| s.name().as_str()).collect();
        assert_eq!(dependents, ["b", "c"]);
        assert!(graph.contains("c"));
        assert!(!graph.contains("z"));
    }
}
