// Job Dependency Graph
// Arena of jobs indexed by JobId with dependency -> dependent edges, built once at load

use crate::error::{LoadError, LoadResult};

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Index of a job in its workflow's arena (declaration order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub usize);

impl JobId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Directed acyclic graph of jobs.
#[derive(Debug, Clone)]
pub struct JobGraph {
    names: Vec<String>,
    /// needs of each job
    dependencies: Vec<Vec<JobId>>,
    /// jobs that need each job
    dependents: Vec<Vec<JobId>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

impl JobGraph {
    /// Build the graph from `(job name, needs)` pairs in declaration order.
    ///
    /// Job names must already be unique.
    pub fn build(jobs: &[(String, Vec<String>)]) -> LoadResult<Self> {
        let indices: HashMap<&str, JobId> = jobs
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.as_str(), JobId(i)))
            .collect();

        let mut dependencies = Vec::with_capacity(jobs.len());
        let mut dependents = vec![Vec::new(); jobs.len()];

        for (i, (name, needs)) in jobs.iter().enumerate() {
            let mut resolved: Vec<JobId> = Vec::with_capacity(needs.len());
            for needed in needs {
                if needed == name {
                    return Err(LoadError::SelfDependency(name.clone()));
                }
                let id = indices
                    .get(needed.as_str())
                    .copied()
                    .ok_or_else(|| LoadError::UnknownDependency {
                        job: name.clone(),
                        dependency: needed.clone(),
                    })?;
                if !resolved.contains(&id) {
                    resolved.push(id);
                    dependents[id.0].push(JobId(i));
                }
            }
            dependencies.push(resolved);
        }

        let graph = Self {
            names: jobs.iter().map(|(name, _)| name.clone()).collect(),
            dependencies,
            dependents,
        };
        graph.detect_cycles()?;
        Ok(graph)
    }

    fn detect_cycles(&self) -> LoadResult<()> {
        let mut marks = vec![Mark::Unvisited; self.names.len()];
        let mut stack = Vec::new();

        for start in 0..self.names.len() {
            if marks[start] == Mark::Unvisited {
                if let Some(path) = self.dfs_cycle(JobId(start), &mut marks, &mut stack) {
                    return Err(LoadError::CyclicDependency { path });
                }
            }
        }
        Ok(())
    }

    /// Depth-first walk along `needs` edges. Returns the cycle as job names,
    /// starting and ending with the first job seen twice.
    fn dfs_cycle(
        &self,
        job: JobId,
        marks: &mut [Mark],
        stack: &mut Vec<JobId>,
    ) -> Option<Vec<String>> {
        marks[job.0] = Mark::InProgress;
        stack.push(job);

        for &needed in &self.dependencies[job.0] {
            match marks[needed.0] {
                Mark::InProgress => {
                    let start = stack.iter().position(|&j| j == needed).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..]
                        .iter()
                        .map(|&j| self.names[j.0].clone())
                        .collect();
                    path.push(self.names[needed.0].clone());
                    return Some(path);
                }
                Mark::Unvisited => {
                    if let Some(path) = self.dfs_cycle(needed, marks, stack) {
                        return Some(path);
                    }
                }
                Mark::Done => {}
            }
        }

        stack.pop();
        marks[job.0] = Mark::Done;
        None
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = JobId> {
        (0..self.names.len()).map(JobId)
    }

    pub fn name(&self, id: JobId) -> &str {
        &self.names[id.0]
    }

    pub fn id_of(&self, name: &str) -> Option<JobId> {
        self.names.iter().position(|n| n == name).map(JobId)
    }

    /// Jobs that `id` needs.
    pub fn dependencies(&self, id: JobId) -> &[JobId] {
        &self.dependencies[id.0]
    }

    /// Jobs that need `id`.
    pub fn dependents(&self, id: JobId) -> &[JobId] {
        &self.dependents[id.0]
    }

    /// Jobs with no needs, in declaration order.
    pub fn roots(&self) -> Vec<JobId> {
        self.ids()
            .filter(|id| self.dependencies[id.0].is_empty())
            .collect()
    }

    /// Kahn ordering; ties broken by declaration order.
    pub fn topological_order(&self) -> Vec<JobId> {
        let mut in_degree: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut queue: VecDeque<JobId> = self.roots().into();
        let mut order = Vec::with_capacity(self.names.len());

        while let Some(job) = queue.pop_front() {
            order.push(job);
            for &dependent in &self.dependents[job.0] {
                in_degree[dependent.0] -= 1;
                if in_degree[dependent.0] == 0 {
                    queue.push_back(dependent);
                }
            }
        }

        order
    }

    /// Group jobs into waves that could run in parallel.
    pub fn levels(&self) -> Vec<Vec<JobId>> {
        let mut level = vec![0usize; self.names.len()];
        for job in self.topological_order() {
            level[job.0] = self.dependencies[job.0]
                .iter()
                .map(|dep| level[dep.0] + 1)
                .max()
                .unwrap_or(0);
        }

        let depth = level.iter().copied().max().map_or(0, |max| max + 1);
        let mut levels = vec![Vec::new(); depth];
        for job in self.ids() {
            levels[level[job.0]].push(job);
        }
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str, needs: &[&str]) -> (String, Vec<String>) {
        (
            name.to_string(),
            needs.iter().map(|n| n.to_string()).collect(),
        )
    }

    #[test]
    fn test_linear_graph() {
        let graph = JobGraph::build(&[job("hello", &[]), job("build", &["hello"])]).unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.dependencies(JobId(1)), &[JobId(0)]);
        assert_eq!(graph.dependents(JobId(0)), &[JobId(1)]);
        assert_eq!(graph.topological_order(), vec![JobId(0), JobId(1)]);
    }

    #[test]
    fn test_diamond_levels() {
        let graph = JobGraph::build(&[
            job("lint", &[]),
            job("test", &["lint"]),
            job("scan", &["lint"]),
            job("deploy", &["test", "scan"]),
        ])
        .unwrap();

        assert_eq!(graph.roots(), vec![JobId(0)]);
        assert_eq!(
            graph.levels(),
            vec![vec![JobId(0)], vec![JobId(1), JobId(2)], vec![JobId(3)]]
        );
    }

    #[test]
    fn test_two_job_cycle() {
        let err = JobGraph::build(&[job("A", &["B"]), job("B", &["A"])]).unwrap_err();
        match err {
            LoadError::CyclicDependency { path } => assert_eq!(path, vec!["A", "B", "A"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_transitive_cycle_path() {
        let err = JobGraph::build(&[
            job("setup", &[]),
            job("a", &["setup", "c"]),
            job("b", &["a"]),
            job("c", &["b"]),
        ])
        .unwrap_err();
        match err {
            LoadError::CyclicDependency { path } => assert_eq!(path, vec!["a", "c", "b", "a"]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_self_dependency() {
        let err = JobGraph::build(&[job("build", &["build"])]).unwrap_err();
        assert!(matches!(err, LoadError::SelfDependency(ref name) if name == "build"));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = JobGraph::build(&[job("build", &["setup"])]).unwrap_err();
        assert!(matches!(
            err,
            LoadError::UnknownDependency { ref job, ref dependency } if job == "build" && dependency == "setup"
        ));
    }

    #[test]
    fn test_duplicate_needs_collapsed() {
        let graph = JobGraph::build(&[job("a", &[]), job("b", &["a", "a"])]).unwrap();
        assert_eq!(graph.dependencies(JobId(1)), &[JobId(0)]);
        assert_eq!(graph.dependents(JobId(0)), &[JobId(1)]);
    }
}
