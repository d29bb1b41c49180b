use std::{
    io::ErrorKind,
    marker::PhantomData,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use chrono::Utc;
use jx_common::{
    activity::PipelineActivity, environment::Environment, error::Error, state::KubeClient,
    workflow::Workflow,
};
use tokio::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::mapping::{Resource, parse_resource, stale_version, validate_name};

/// Stores resources as YAML files under `<root>/<namespace>/<kind>/<name>.yaml`.
/// ---
/// Every read goes to disk so resources written by other processes,
/// such as a build creating a new activity, are picked up.
/// Writes are serialized per kind with a `.lock` file in the kind's
/// directory, so `jx promote` and `jx controller workflow` running as
/// separate processes cannot overwrite each other's updates.
#[derive(Debug)]
pub struct FsStateDb {
    pub(crate) namespace: String,
    pub(crate) activities: FsTable<PipelineActivity>,
    pub(crate) environments: FsTable<Environment>,
    pub(crate) workflows: FsTable<Workflow>,
}

impl FsStateDb {
    pub async fn new(root: impl AsRef<Path>, namespace: &str) -> Result<Self, Error> {
        let base = root.as_ref().join(namespace);

        Ok(Self {
            namespace: namespace.to_string(),
            activities: FsTable::open(&base).await?,
            environments: FsTable::open(&base).await?,
            workflows: FsTable::open(&base).await?,
        })
    }
}

/// Implements the [KubeClient] for [FsStateDb]
impl KubeClient for FsStateDb {}

const LOCK_FILE: &str = ".lock";
const LOCK_POLL: Duration = Duration::from_millis(5);
const LOCK_WAIT: Duration = Duration::from_secs(10);
/// A lock older than this was left behind by a process that died holding it.
const LOCK_STALE_AFTER: Duration = Duration::from_secs(30);

/// Exclusive lock on a table directory, held while the lock file exists.
#[derive(Debug)]
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    async fn acquire(dir: &Path) -> Result<Self, Error> {
        let path = dir.join(LOCK_FILE);
        let started = Instant::now();

        loop {
            let created = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match created {
                Ok(_) => return Ok(Self { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path).await {
                        warn!("FsStateDb: removing stale lock {}", path.display());
                        let _ = tokio::fs::remove_file(&path).await;
                        continue;
                    }
                    if started.elapsed() >= LOCK_WAIT {
                        return Err(Error::TransientApi(format!(
                            "timed out waiting for lock {}",
                            path.display()
                        )));
                    }
                    tokio::time::sleep(LOCK_POLL).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("FsStateDb: failed to release lock {}: {}", self.path.display(), e);
        }
    }
}

async fn lock_is_stale(path: &Path) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => modified
            .elapsed()
            .is_ok_and(|age| age >= LOCK_STALE_AFTER),
        Err(_) => false,
    }
}

#[derive(Debug)]
pub(crate) struct FsTable<T> {
    dir: PathBuf,
    write_lock: Mutex<()>,
    _kind: PhantomData<T>,
}

impl<T: Resource> FsTable<T> {
    async fn open(base: &Path) -> Result<Self, Error> {
        let dir = base.join(T::PLURAL);
        tokio::fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
            _kind: PhantomData,
        })
    }

    /// Takes the in-process guard first so tasks of one process queue on
    /// the mutex instead of polling the lock file. The file lock is
    /// released before the guard.
    async fn lock(&self) -> Result<(DirLock, MutexGuard<'_, ()>), Error> {
        let guard = self.write_lock.lock().await;
        let file = DirLock::acquire(&self.dir).await?;
        Ok((file, guard))
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.yaml"))
    }

    async fn read(&self, path: &Path) -> Result<Option<T>, Error> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => parse_resource(path, &text).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::TransientApi(format!(
                "failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    async fn write(&self, resource: &T) -> Result<(), Error> {
        let path = self.path(&resource.meta().name);
        let tmp = path.with_extension("yaml.tmp");
        let text = serde_yaml::to_string(resource)?;

        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<T>, Error> {
        self.read(&self.path(name)).await
    }

    /// Unparseable files are skipped with a warning so one bad file
    /// does not hide every other resource.
    pub async fn list(&self) -> Result<Vec<T>, Error> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut paths = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut resources = Vec::with_capacity(paths.len());
        for path in paths {
            match self.read(&path).await {
                Ok(Some(resource)) => resources.push(resource),
                Ok(None) => {}
                Err(e) => warn!("FsStateDb [{}]: skipping {}: {}", T::KIND, path.display(), e),
            }
        }

        Ok(resources)
    }

    pub async fn create(&self, mut resource: T, namespace: &str) -> Result<T, Error> {
        validate_name(&resource)?;
        let _lock = self.lock().await?;
        let name = resource.meta().name.clone();

        if self.get(&name).await?.is_some() {
            return Err(Error::Conflict(format!("{} {} already exists", T::KIND, name)));
        }

        let meta = resource.meta_mut();
        meta.namespace = namespace.to_string();
        meta.resource_version = 1;
        meta.creation_timestamp.get_or_insert_with(Utc::now);

        self.write(&resource).await?;
        Ok(resource)
    }

    pub async fn update(&self, mut resource: T) -> Result<T, Error> {
        validate_name(&resource)?;
        let _lock = self.lock().await?;
        let name = resource.meta().name.clone();

        let stored = self
            .get(&name)
            .await?
            .ok_or_else(|| Error::not_found(T::KIND, &name))?;

        let stored_version = stored.meta().resource_version;
        if stored_version != resource.meta().resource_version {
            return Err(stale_version::<T>(
                stored_version,
                resource.meta().resource_version,
                &name,
            ));
        }

        let meta = resource.meta_mut();
        meta.resource_version = stored_version + 1;
        meta.namespace = stored.meta().namespace.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp;

        self.write(&resource).await?;
        Ok(resource)
    }

    pub async fn apply(&self, mut resource: T, namespace: &str) -> Result<T, Error> {
        validate_name(&resource)?;
        let _lock = self.lock().await?;
        let name = resource.meta().name.clone();

        let (version, created) = match self.get(&name).await? {
            Some(stored) => (
                stored.meta().resource_version + 1,
                stored.meta().creation_timestamp,
            ),
            None => (1, Some(Utc::now())),
        };

        let meta = resource.meta_mut();
        meta.namespace = namespace.to_string();
        meta.resource_version = version;
        meta.creation_timestamp = created;

        self.write(&resource).await?;
        Ok(resource)
    }

    pub async fn delete(&self, name: &str) -> Result<(), Error> {
        let _lock = self.lock().await?;
        match tokio::fs::remove_file(self.path(name)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found(T::KIND, name)),
            Err(e) => Err(e.into()),
        }
    }
}
