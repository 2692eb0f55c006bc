// src/task/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{Result, ShflowError};
use crate::task::{Task, TaskSnapshot};

/// All tasks created by one program thread, in creation order.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<Task>>,
    index: HashMap<String, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Arc<Task>) {
        let id = task.id().to_string();
        match self.index.get(&id) {
            Some(&i) => self.tasks[i] = task,
            None => {
                self.index.insert(id, self.tasks.len());
                self.tasks.push(task);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<Task>> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks that failed and are not allowed to.
    pub fn fatal_failures(&self) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .filter(|t| t.is_fatal_failure())
            .cloned()
            .collect()
    }

    pub fn unfinished(&self) -> Vec<Arc<Task>> {
        self.tasks
            .iter()
            .filter(|t| !t.is_done())
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> Vec<TaskSnapshot> {
        self.tasks.iter().map(|t| t.snapshot()).collect()
    }

    /// Rebuild the registry from snapshots taken by [`TaskRegistry::snapshot`].
    ///
    /// Dependencies always refer to earlier tasks.
    pub fn from_snapshots(snapshots: Vec<TaskSnapshot>) -> Result<Self> {
        let mut registry = Self::new();
        for snapshot in snapshots {
            let dependencies = snapshot
                .dependencies
                .iter()
                .map(|dep| {
                    registry.get(dep).cloned().ok_or_else(|| {
                        ShflowError::Checkpoint(format!(
                            "task '{}' depends on unknown task '{dep}'",
                            snapshot.id
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            registry.add(Arc::new(Task::from_snapshot(snapshot, dependencies)));
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;

    #[test]
    fn snapshots_restore_states_and_dependencies() {
        let mut registry = TaskRegistry::new();
        let a = Arc::new(Task::new("a", "echo a"));
        a.finish(TaskState::FinishedOk, Some(0), None);
        let b = Arc::new(
            Task::new("b", "echo b")
                .with_dependencies(vec![Arc::clone(&a)])
                .with_can_fail(true),
        );
        b.finish(TaskState::Failed, Some(3), Some("exit code 3".into()));
        registry.add(a);
        registry.add(b);

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        let restored = TaskRegistry::from_snapshots(serde_json::from_str(&json).unwrap()).unwrap();

        assert_eq!(restored.len(), 2);
        let b = restored.get("b").unwrap();
        assert_eq!(b.state(), TaskState::Failed);
        assert_eq!(b.exit_code(), Some(3));
        assert!(b.can_fail());
        assert_eq!(b.dependencies()[0].id(), "a");
        assert!(Arc::ptr_eq(&b.dependencies()[0], restored.get("a").unwrap()));
    }

    #[test]
    fn dangling_dependency_is_a_checkpoint_error() {
        let mut snapshot = Task::new("b", "echo b").snapshot();
        snapshot.dependencies.push("ghost".into());

        assert!(matches!(
            TaskRegistry::from_snapshots(vec![snapshot]),
            Err(ShflowError::Checkpoint(_))
        ));
    }

    #[test]
    fn fatal_failures_skip_tolerated_tasks() {
        let mut registry = TaskRegistry::new();
        let ok = Arc::new(Task::new("ok", "true"));
        ok.finish(TaskState::FinishedOk, Some(0), None);
        let tolerated = Arc::new(Task::new("tolerated", "false").with_can_fail(true));
        tolerated.finish(TaskState::Failed, Some(1), None);
        let fatal = Arc::new(Task::new("fatal", "false"));
        fatal.finish(TaskState::Failed, Some(1), None);
        let running = Arc::new(Task::new("running", "sleep 1"));
        for t in [ok, tolerated, fatal, running] {
            registry.add(t);
        }

        let failures: Vec<_> = registry.fatal_failures().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(failures, vec!["fatal"]);
        assert_eq!(registry.unfinished().len(), 1);
    }
}
