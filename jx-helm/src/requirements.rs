use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use jx_common::error::Error;
use serde::{Deserialize, Serialize};

pub const REQUIREMENTS_FILE_NAME: &str = "requirements.yaml";
const ENV_DIR: &str = "env";

/// The `requirements.yaml` of an environment chart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirements {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Fields this tool does not manage, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Requirements {
    /// Pins `app` to `version`, adding the dependency if it is missing.
    /// ---
    /// Other dependencies are left untouched. Adding a dependency sorts
    /// the list by name; updating one keeps the existing order so pinning
    /// the current version leaves the file as it was.
    /// Returns `true` if the requirements changed.
    pub fn set_app_version(
        &mut self,
        app: &str,
        version: &str,
        repository: &str,
        alias: Option<&str>,
    ) -> bool {
        let before = self.clone();

        match self
            .dependencies
            .iter_mut()
            .find(|d| d.name == app && d.alias.as_deref() == alias)
        {
            Some(dep) => {
                dep.version = version.to_string();
                if !repository.is_empty() {
                    dep.repository = repository.to_string();
                }
            }
            None => {
                self.dependencies.push(Dependency {
                    name: app.to_string(),
                    version: version.to_string(),
                    repository: repository.to_string(),
                    alias: alias.map(str::to_string),
                    extra: BTreeMap::new(),
                });
                self.dependencies
                    .sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.alias.cmp(&b.alias)));
            }
        }

        *self != before
    }

    pub fn find(&self, app: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.name == app)
    }
}

/// Locates the requirements file of an environment checkout.
/// ---
/// Prefers `env/requirements.yaml`, then `requirements.yaml`.
/// When neither exists the path a new file should be written to is returned.
pub fn find_requirements_file(dir: &Path) -> PathBuf {
    let env_file = dir.join(ENV_DIR).join(REQUIREMENTS_FILE_NAME);
    let root_file = dir.join(REQUIREMENTS_FILE_NAME);

    if env_file.exists() {
        env_file
    } else if root_file.exists() || !dir.join(ENV_DIR).is_dir() {
        root_file
    } else {
        env_file
    }
}

/// Loads requirements, treating a missing file as empty.
pub async fn load_requirements(path: &Path) -> Result<Requirements, Error> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if text.trim().is_empty() => Ok(Requirements::default()),
        Ok(text) => Ok(serde_yaml::from_str(&text)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Requirements::default()),
        Err(e) => Err(e.into()),
    }
}

pub async fn save_requirements(path: &Path, requirements: &Requirements) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_yaml::to_string(requirements)?).await?;
    Ok(())
}
