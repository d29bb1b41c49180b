use std::path::Path;

use jx_common::{
    activity::{PIPELINE_ACTIVITY_KIND, PipelineActivity},
    common::meta::ObjectMeta,
    environment::{ENVIRONMENT_KIND, Environment},
    error::Error,
    workflow::{WORKFLOW_KIND, Workflow},
};
use serde::{Serialize, de::DeserializeOwned};

/// A stored custom resource.
pub(crate) trait Resource:
    Clone + Send + Sync + Serialize + DeserializeOwned + std::fmt::Debug + 'static
{
    const KIND: &'static str;
    /// Directory name used by the file store.
    const PLURAL: &'static str;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

impl Resource for PipelineActivity {
    const KIND: &'static str = PIPELINE_ACTIVITY_KIND;
    const PLURAL: &'static str = "pipelineactivities";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Environment {
    const KIND: &'static str = ENVIRONMENT_KIND;
    const PLURAL: &'static str = "environments";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Workflow {
    const KIND: &'static str = WORKFLOW_KIND;
    const PLURAL: &'static str = "workflows";

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

pub(crate) fn validate_name<T: Resource>(resource: &T) -> Result<(), Error> {
    let name = &resource.meta().name;
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(Error::Configuration(format!(
            "invalid {} name {:?}",
            T::KIND,
            name
        )));
    }
    Ok(())
}

pub(crate) fn stale_version<T: Resource>(stored: u64, given: u64, name: &str) -> Error {
    Error::Conflict(format!(
        "{} {} has resource version {}, update was based on {}",
        T::KIND,
        name,
        stored,
        given
    ))
}

pub(crate) fn parse_resource<T: Resource>(path: &Path, yaml_str: &str) -> Result<T, Error> {
    serde_yaml::from_str(yaml_str).map_err(|e| {
        let err = if let Some(location) = e.location() {
            ParseError::InvalidYaml {
                path: path.display().to_string(),
                line: location.line(),
                column: location.column(),
                message: e.to_string(),
            }
        } else {
            ParseError::InvalidYamlNoLocation {
                path: path.display().to_string(),
                message: e.to_string(),
            }
        };
        Error::Internal(err.to_string())
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid YAML in {path} at line {line}, column {column}: {message}")]
    InvalidYaml {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Invalid YAML in {path}: {message}")]
    InvalidYamlNoLocation { path: String, message: String },
}
