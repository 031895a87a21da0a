use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use metrics::gauge;
use uuid::Uuid;

use crate::languages::Language;
use crate::types::JobSnapshot;
use crate::workspace::remove_tree;

#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub language: Language,
    pub started_at: Instant,
    pub workspace: Option<PathBuf>,
}

/// Process-wide table of jobs currently being executed.
#[derive(Debug, Clone, Default)]
pub struct ActiveJobRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, ActiveJob>>>,
}

impl ActiveJobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, ActiveJob>> {
        // a panic while holding the lock cannot leave the map half-updated
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers a job; the entry disappears when the returned guard drops.
    pub fn register(&self, id: Uuid, language: Language) -> RegistryGuard {
        let count = {
            let mut jobs = self.lock();
            jobs.insert(
                id,
                ActiveJob {
                    language,
                    started_at: Instant::now(),
                    workspace: None,
                },
            );
            jobs.len()
        };
        gauge!("active_jobs").set(count as f64);

        RegistryGuard {
            registry: self.clone(),
            id,
        }
    }

    fn attach_workspace(&self, id: Uuid, path: PathBuf) {
        if let Some(job) = self.lock().get_mut(&id) {
            job.workspace = Some(path);
        }
    }

    fn remove(&self, id: Uuid) {
        let count = {
            let mut jobs = self.lock();
            jobs.remove(&id);
            jobs.len()
        };
        gauge!("active_jobs").set(count as f64);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self
            .lock()
            .iter()
            .map(|(id, job)| JobSnapshot {
                id: *id,
                language: job.language.to_string(),
                duration: job.started_at.elapsed().as_millis() as u64,
            })
            .collect();
        jobs.sort_by(|a, b| b.duration.cmp(&a.duration));
        jobs
    }

    /// Removes workspaces of jobs still registered, for use on shutdown.
    /// Returns how many jobs were swept.
    pub fn sweep(&self) -> usize {
        let drained: Vec<(Uuid, ActiveJob)> = self.lock().drain().collect();
        for (id, job) in &drained {
            tracing::warn!(job_id = %id, language = %job.language, "sweeping unfinished job");
            if let Some(path) = &job.workspace {
                remove_tree(path);
            }
        }
        gauge!("active_jobs").set(0.0);
        drained.len()
    }
}

/// Removes its job from the registry when dropped.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: ActiveJobRegistry,
    id: Uuid,
}

impl RegistryGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn attach_workspace(&self, path: PathBuf) {
        self.registry.attach_workspace(self.id, path);
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}
