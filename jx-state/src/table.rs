use std::collections::BTreeMap;

use chrono::Utc;
use jx_common::error::Error;
use tokio::sync::RwLock;

use crate::mapping::{Resource, stale_version, validate_name};

/// In-memory rows of one resource kind, keyed by name.
#[derive(Debug)]
pub(crate) struct Table<T> {
    rows: RwLock<BTreeMap<String, T>>,
}

impl<T> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
        }
    }
}

impl<T: Resource> Table<T> {
    pub async fn get(&self, name: &str) -> Option<T> {
        self.rows.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<T> {
        self.rows.read().await.values().cloned().collect()
    }

    pub async fn create(&self, mut resource: T, namespace: &str) -> Result<T, Error> {
        validate_name(&resource)?;
        let mut rows = self.rows.write().await;
        let name = resource.meta().name.clone();

        if rows.contains_key(&name) {
            return Err(Error::Conflict(format!("{} {} already exists", T::KIND, name)));
        }

        let meta = resource.meta_mut();
        meta.namespace = namespace.to_string();
        meta.resource_version = 1;
        meta.creation_timestamp.get_or_insert_with(Utc::now);

        rows.insert(name, resource.clone());
        Ok(resource)
    }

    pub async fn update(&self, mut resource: T) -> Result<T, Error> {
        let mut rows = self.rows.write().await;
        let name = resource.meta().name.clone();

        let stored = rows
            .get(&name)
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

        rows.insert(name, resource.clone());
        Ok(resource)
    }

    /// Creates or replaces without a version check.
    pub async fn apply(&self, mut resource: T, namespace: &str) -> Result<T, Error> {
        validate_name(&resource)?;
        let mut rows = self.rows.write().await;
        let name = resource.meta().name.clone();

        let (version, created) = match rows.get(&name) {
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

        rows.insert(name, resource.clone());
        Ok(resource)
    }

    pub async fn delete(&self, name: &str) -> Result<(), Error> {
        self.rows
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(T::KIND, name))
    }
}
