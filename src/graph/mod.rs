//! Dependency resolution: partitions tasks into batches where batch `i`
//! depends only on batches before it.

use std::collections::{HashMap, HashSet};

use crate::error::{OrchError, Result};

/// Anything schedulable: a stable id plus prerequisite ids.
pub trait Schedulable {
    fn id(&self) -> &str;
    fn dependencies(&self) -> &[String];
}

/// Repeated Kahn-style extraction of dependency-free tasks. Every task lands
/// in exactly one batch; within a batch tasks are sorted by id for
/// determinism. Unknown prerequisites and cycles are refused.
pub fn resolve_batches<T: Schedulable + Clone>(tasks: &[T]) -> Result<Vec<Vec<T>>> {
    let known: HashSet<&str> = tasks.iter().map(|t| t.id()).collect();

    for task in tasks {
        for dep in task.dependencies() {
            if !known.contains(dep.as_str()) {
                return Err(OrchError::InvalidDependency {
                    task: task.id().to_string(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    let mut remaining: HashMap<&str, &T> = tasks.iter().map(|t| (t.id(), t)).collect();
    let mut placed: HashSet<String> = HashSet::new();
    let mut batches: Vec<Vec<T>> = Vec::new();

    while !remaining.is_empty() {
        let mut ready: Vec<&T> = remaining
            .values()
            .filter(|t| t.dependencies().iter().all(|d| placed.contains(d)))
            .copied()
            .collect();

        if ready.is_empty() {
            let mut stuck: Vec<&str> = remaining.keys().copied().collect();
            stuck.sort_unstable();
            return Err(OrchError::CyclicDependency(stuck.join(", ")));
        }

        ready.sort_unstable_by(|a, b| a.id().cmp(b.id()));
        for task in &ready {
            placed.insert(task.id().to_string());
        }
        for task in &ready {
            remaining.remove(task.id());
        }
        batches.push(ready.into_iter().cloned().collect());
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Node {
        id: String,
        deps: Vec<String>,
    }

    impl Node {
        fn new(id: &str, deps: &[&str]) -> Self {
            Self {
                id: id.to_string(),
                deps: deps.iter().map(|d| d.to_string()).collect(),
            }
        }
    }

    impl Schedulable for Node {
        fn id(&self) -> &str {
            &self.id
        }
        fn dependencies(&self) -> &[String] {
            &self.deps
        }
    }

    fn ids(batch: &[Node]) -> Vec<&str> {
        batch.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn independent_tasks_form_one_batch() {
        let tasks = vec![
            Node::new("C", &[]),
            Node::new("A", &[]),
            Node::new("B", &[]),
        ];
        let batches = resolve_batches(&tasks).unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(ids(&batches[0]), vec!["A", "B", "C"]);
    }

    #[test]
    fn chain_produces_one_batch_per_task() {
        let tasks = vec![
            Node::new("A", &[]),
            Node::new("B", &["A"]),
            Node::new("C", &["B"]),
        ];
        let batches = resolve_batches(&tasks).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(ids(&batches[0]), vec!["A"]);
        assert_eq!(ids(&batches[1]), vec!["B"]);
        assert_eq!(ids(&batches[2]), vec!["C"]);
    }

    #[test]
    fn diamond_dependencies() {
        let tasks = vec![
            Node::new("A", &[]),
            Node::new("B", &["A"]),
            Node::new("C", &["A"]),
            Node::new("D", &["B", "C"]),
        ];
        let batches = resolve_batches(&tasks).unwrap();
        assert_eq!(batches.len(), 3);
        assert_eq!(ids(&batches[1]), vec!["B", "C"]);
        assert_eq!(ids(&batches[2]), vec!["D"]);
    }

    #[test]
    fn every_prerequisite_lands_in_an_earlier_batch() {
        let tasks = vec![
            Node::new("T1", &[]),
            Node::new("T2", &["T1"]),
            Node::new("T3", &["T1"]),
            Node::new("T4", &["T2", "T3"]),
            Node::new("T5", &[]),
        ];
        let batches = resolve_batches(&tasks).unwrap();

        let batch_of = |id: &str| {
            batches
                .iter()
                .position(|b| b.iter().any(|n| n.id == id))
                .unwrap()
        };
        for task in &tasks {
            for dep in &task.deps {
                assert!(batch_of(dep) < batch_of(&task.id));
            }
        }
        // Partition: every task appears exactly once.
        let total: usize = batches.iter().map(|b| b.len()).sum();
        assert_eq!(total, tasks.len());
    }

    #[test]
    fn two_node_cycle_is_refused() {
        let tasks = vec![Node::new("A", &["B"]), Node::new("B", &["A"])];
        let err = resolve_batches(&tasks).unwrap_err();
        match err {
            OrchError::CyclicDependency(names) => {
                assert!(names.contains('A'));
                assert!(names.contains('B'));
            }
            other => panic!("expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn self_cycle_is_refused() {
        let tasks = vec![Node::new("A", &["A"])];
        assert!(matches!(
            resolve_batches(&tasks),
            Err(OrchError::CyclicDependency(_))
        ));
    }

    #[test]
    fn unknown_prerequisite_is_refused() {
        let tasks = vec![Node::new("A", &["ghost"])];
        match resolve_batches(&tasks).unwrap_err() {
            OrchError::InvalidDependency { task, dependency } => {
                assert_eq!(task, "A");
                assert_eq!(dependency, "ghost");
            }
            other => panic!("expected InvalidDependency, got {:?}", other),
        }
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let batches = resolve_batches::<Node>(&[]).unwrap();
        assert!(batches.is_empty());
    }
}
