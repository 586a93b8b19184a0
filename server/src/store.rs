//! Record store for clients, projects and tasks.
//!
//! The store keeps every record in memory behind a [`RwLock`] and, when
//! opened with a path, rewrites a JSON snapshot after each mutation so that
//! accumulated task time survives restarts.
//!
//! # Consistency
//!
//! Writers take the lock, apply the change to a copy of the data, persist
//! the copy and only then swap it in. A failed write leaves both the file
//! and the in-memory state untouched. Concurrent writes to the same record
//! are serialized by the lock; the last writer wins.
//!
//! # Example
//!
//! ```rust
//! use studio_server::store::{NewClient, Store};
//!
//! let store = Store::in_memory();
//! let client = store
//!     .create_client(NewClient { name: "Acme".into(), contact: None })
//!     .expect("in-memory store accepts writes");
//! assert_eq!(client.id, 1);
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::{Client, Project, Task};

/// Errors that can occur while reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced record does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of record (`client`, `project`, `task`).
        entity: &'static str,
        /// The missing id.
        id: u64,
    },

    /// Reading or writing the snapshot file failed.
    #[error("snapshot I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The snapshot could not be encoded or decoded.
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A writer panicked while holding the lock.
    #[error("record store lock poisoned")]
    Poisoned,
}

/// Storage interface used by the elapsed-time tracker.
///
/// The tracker only needs to read a task by id, write a task back, and
/// enumerate tasks for summaries. Implementations are expected to serialize
/// concurrent writes to the same record themselves.
pub trait TaskRepository: Send + Sync {
    /// Looks up a task by id.
    fn task(&self, id: u64) -> Result<Option<Task>, StoreError>;

    /// Replaces an existing task with `task`, returning the stored value.
    fn put_task(&self, task: Task) -> Result<Task, StoreError>;

    /// Returns all tasks ordered by id.
    fn tasks(&self) -> Result<Vec<Task>, StoreError>;
}

/// Fields accepted when creating a client.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub name: String,
    pub contact: Option<String>,
}

/// Fields accepted when creating a project.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub client_id: u64,
    pub name: String,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub notes: Option<String>,
    pub due: Option<DateTime<Utc>>,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub project_id: u64,
    pub title: String,
    pub status: Option<String>,
    pub owner: Option<String>,
    pub prompt: Option<String>,
    pub due: Option<DateTime<Utc>>,
}

/// A project together with its tasks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTree {
    #[serde(flatten)]
    pub project: Project,
    pub tasks: Vec<Task>,
}

/// A client together with its projects and their tasks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientTree {
    #[serde(flatten)]
    pub client: Client,
    pub projects: Vec<ProjectTree>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    clients: BTreeMap<u64, Client>,
    #[serde(default)]
    projects: BTreeMap<u64, Project>,
    #[serde(default)]
    tasks: BTreeMap<u64, Task>,
}

fn next_id<T>(map: &BTreeMap<u64, T>) -> u64 {
    map.keys().next_back().map_or(1, |last| last + 1)
}

/// Thread-safe record store with optional JSON snapshot persistence.
pub struct Store {
    data: RwLock<Snapshot>,
    path: Option<PathBuf>,
}

impl Store {
    /// Creates an empty store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(Snapshot::default()),
            path: None,
        }
    }

    /// Opens a store backed by the snapshot at `path`.
    ///
    /// A missing file yields an empty store; the file (and its parent
    /// directory) is created on the first write.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::Serialization`] if it is not a valid snapshot.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No snapshot found, starting empty");
                Snapshot::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        info!(
            path = %path.display(),
            clients = snapshot.clients.len(),
            projects = snapshot.projects.len(),
            tasks = snapshot.tasks.len(),
            "Record store opened"
        );

        Ok(Self {
            data: RwLock::new(snapshot),
            path: Some(path),
        })
    }

    /// Path of the backing snapshot, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Creates a client.
    pub fn create_client(&self, new: NewClient) -> Result<Client, StoreError> {
        self.mutate(|data| {
            let client = Client {
                id: next_id(&data.clients),
                name: new.name,
                contact: new.contact,
                created_at: Utc::now(),
            };
            data.clients.insert(client.id, client.clone());
            Ok(client)
        })
    }

    /// Creates a project under an existing client.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the client does not exist.
    pub fn create_project(&self, new: NewProject) -> Result<Project, StoreError> {
        self.mutate(|data| {
            if !data.clients.contains_key(&new.client_id) {
                return Err(StoreError::NotFound {
                    entity: "client",
                    id: new.client_id,
                });
            }
            let project = Project {
                id: next_id(&data.projects),
                client_id: new.client_id,
                name: new.name,
                status: new.status,
                owner: new.owner,
                notes: new.notes,
                due: new.due,
                created_at: Utc::now(),
            };
            data.projects.insert(project.id, project.clone());
            Ok(project)
        })
    }

    /// Creates an idle task under an existing project.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the project does not exist.
    pub fn create_task(&self, new: NewTask) -> Result<Task, StoreError> {
        self.mutate(|data| {
            if !data.projects.contains_key(&new.project_id) {
                return Err(StoreError::NotFound {
                    entity: "project",
                    id: new.project_id,
                });
            }
            let task = Task {
                id: next_id(&data.tasks),
                project_id: new.project_id,
                title: new.title,
                status: new.status,
                owner: new.owner,
                prompt: new.prompt,
                due: new.due,
                time_spent_ms: 0,
                running_start: None,
                created_at: Utc::now(),
            };
            data.tasks.insert(task.id, task.clone());
            Ok(task)
        })
    }

    /// Returns all clients ordered by id.
    pub fn clients(&self) -> Result<Vec<Client>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(data.clients.values().cloned().collect())
    }

    /// Returns all projects ordered by id.
    pub fn projects(&self) -> Result<Vec<Project>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(data.projects.values().cloned().collect())
    }

    /// Returns every client with its projects and tasks nested, all ordered
    /// by id.
    pub fn client_tree(&self) -> Result<Vec<ClientTree>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        let tree = data
            .clients
            .values()
            .map(|client| ClientTree {
                client: client.clone(),
                projects: data
                    .projects
                    .values()
                    .filter(|p| p.client_id == client.id)
                    .map(|project| ProjectTree {
                        project: project.clone(),
                        tasks: data
                            .tasks
                            .values()
                            .filter(|t| t.project_id == project.id)
                            .cloned()
                            .collect(),
                    })
                    .collect(),
            })
            .collect();
        Ok(tree)
    }

    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Snapshot) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut data = self.data.write().map_err(|_| StoreError::Poisoned)?;
        let mut next = data.clone();
        let result = apply(&mut next)?;
        if let Some(path) = &self.path {
            write_snapshot(path, &next)?;
        }
        *data = next;
        Ok(result)
    }
}

impl TaskRepository for Store {
    fn task(&self, id: u64) -> Result<Option<Task>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(data.tasks.get(&id).cloned())
    }

    fn put_task(&self, task: Task) -> Result<Task, StoreError> {
        self.mutate(|data| match data.tasks.get_mut(&task.id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(task)
            }
            None => Err(StoreError::NotFound {
                entity: "task",
                id: task.id,
            }),
        })
    }

    fn tasks(&self) -> Result<Vec<Task>, StoreError> {
        let data = self.data.read().map_err(|_| StoreError::Poisoned)?;
        Ok(data.tasks.values().cloned().collect())
    }
}

/// How full the snapshot file is relative to its configured limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityStatus {
    Ok,
    Warn,
    Full,
}

/// Percentage at which the snapshot is reported as nearly full.
const WARN_PERCENT: f64 = 80.0;

/// Size report for the snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotHealth {
    pub path: String,
    pub size_bytes: u64,
    pub threshold_bytes: u64,
    /// Size as a percentage of the threshold, rounded to one decimal.
    pub percent: f64,
    pub status: CapacityStatus,
    pub hint: String,
}

impl SnapshotHealth {
    /// Grades a snapshot of `size_bytes` against `threshold_bytes`.
    pub fn assess(path: &Path, size_bytes: u64, threshold_bytes: u64) -> Self {
        let threshold = threshold_bytes.max(1);
        let percent = (size_bytes as f64 / threshold as f64 * 1000.0).round() / 10.0;
        let (status, hint) = if percent >= 100.0 {
            (
                CapacityStatus::Full,
                "Database is at or above the limit; archive or clear old records.",
            )
        } else if percent >= WARN_PERCENT {
            (
                CapacityStatus::Warn,
                "Database is nearing the limit; consider archiving old records.",
            )
        } else {
            (CapacityStatus::Ok, "Database size is healthy.")
        };

        Self {
            path: path.display().to_string(),
            size_bytes,
            threshold_bytes: threshold,
            percent,
            status,
            hint: hint.to_string(),
        }
    }
}

impl Store {
    /// Measures the snapshot file against `threshold_bytes`.
    ///
    /// Returns `None` for in-memory stores and for snapshots that have not
    /// been written yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be inspected.
    pub fn health(&self, threshold_bytes: u64) -> Result<Option<SnapshotHealth>, StoreError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(None);
        };
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(SnapshotHealth::assess(path, meta.len(), threshold_bytes))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Writes the snapshot to a sibling temp file and renames it into place.
fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let bytes = serde_json::to_vec_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(io_err)?;
    if let Err(err) = fs::rename(&tmp, path) {
        if let Err(cleanup) = fs::remove_file(&tmp) {
            warn!(path = %tmp.display(), error = %cleanup, "Failed to remove temp snapshot");
        }
        return Err(io_err(err));
    }
    Ok(())
}
