use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use jx_common::error::Error;
use jx_controller::{ControllerConfig, parse_duration};
use serde::Deserialize;
use tracing::debug;

pub const DEFAULT_NAMESPACE: &str = "jx";
pub const DEFAULT_GIT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_CONFIG_PATH: &str = "~/.jx/jx.yaml";

/// Contents of `jx.yaml`.
/// ---
/// Every field is optional; values missing from the file fall back to the
/// defaults below, and `JX_NAMESPACE`, `JX_STATE_DIR`, `GITHUB_TOKEN` and
/// `JX_GIT_TOKEN` win over the file.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JxConfig {
    pub namespace: Option<String>,
    /// Root of the resource store, `~/.jx/state` when unset.
    pub state_dir: Option<PathBuf>,
    /// Where environment repositories are cloned, `~/.jx/environments` when unset.
    pub environments_dir: Option<PathBuf>,
    pub git: GitConfig,
    pub helm: HelmConfig,
    pub controller: ControllerSection,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GitConfig {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HelmConfig {
    pub binary: Option<String>,
    pub repository_url: Option<String>,
    pub local_repo_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerSection {
    pub pull_request_poll_time: Option<String>,
    pub resync_interval: Option<String>,
    pub promotion_timeout: Option<String>,
    pub release_branches: Option<Vec<String>>,
    pub no_merge_pull_request: Option<bool>,
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid config {path} at line {line}, column {column}: {message}")]
    InvalidYaml {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Invalid config {path}: {message}")]
    InvalidYamlNoLocation { path: String, message: String },
}

pub fn parse_config(yaml: &str, path: &str) -> Result<JxConfig, Error> {
    if yaml.trim().is_empty() {
        return Ok(JxConfig::default());
    }

    serde_yaml::from_str(yaml).map_err(|e| {
        let err = match e.location() {
            Some(location) => ParseError::InvalidYaml {
                path: path.to_string(),
                line: location.line(),
                column: location.column(),
                message: e.to_string(),
            },
            None => ParseError::InvalidYamlNoLocation {
                path: path.to_string(),
                message: e.to_string(),
            },
        };
        Error::Configuration(err.to_string())
    })
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
}

fn jx_home() -> PathBuf {
    home_dir().unwrap_or_default().join(".jx")
}

impl JxConfig {
    /// Reads the config file at `path`; a missing file is an empty config.
    pub async fn load(path: &Path) -> Result<Self, Error> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => parse_config(&text, &path.display().to_string()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Config: {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overrides file values with the process environment, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(namespace) = var("JX_NAMESPACE") {
            self.namespace = Some(namespace);
        }
        if let Some(dir) = var("JX_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(dir));
        }
        if let Some(token) = var("JX_GIT_TOKEN").or_else(|| var("GITHUB_TOKEN")) {
            self.git.token = Some(token);
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| jx_home().join("state"))
    }

    pub fn environments_dir(&self) -> PathBuf {
        self.environments_dir
            .clone()
            .unwrap_or_else(|| jx_home().join("environments"))
    }

    pub fn git_api_url(&self) -> &str {
        self.git.api_url.as_deref().unwrap_or(DEFAULT_GIT_API_URL)
    }

    /// Controller settings from the file, on top of the built-in defaults.
    pub fn controller_config(&self) -> Result<ControllerConfig, Error> {
        let mut config = ControllerConfig::default();
        let section = &self.controller;

        if let Some(d) = parse_optional_duration(&section.pull_request_poll_time)? {
            config.pull_request_poll_interval = d;
        }
        if let Some(d) = parse_optional_duration(&section.resync_interval)? {
            config.resync_interval = d;
        }
        if let Some(d) = parse_optional_duration(&section.promotion_timeout)? {
            config.promotion_timeout = d;
        }
        if let Some(branches) = &section.release_branches {
            config.release_branches = branches.clone();
        }
        if let Some(no_merge) = section.no_merge_pull_request {
            config.no_merge_pull_request = no_merge;
        }
        if let Some(url) = &self.helm.repository_url {
            config.helm_repository_url = url.clone();
        }
        if let Some(name) = &self.helm.local_repo_name {
            config.local_helm_repo_name = name.clone();
        }

        Ok(config)
    }
}

fn parse_optional_duration(text: &Option<String>) -> Result<Option<Duration>, Error> {
    text.as_deref().map(parse_duration).transpose()
}
