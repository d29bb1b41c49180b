use jx_common::{
    activity::PipelineActivity, environment::Environment, state::KubeClient, workflow::Workflow,
};

use crate::table::Table;

/// Keeps every resource of one namespace in memory.
/// ---
/// Backs the controller and promotion tests.
/// Enforces the same resource version rules as a real cluster.
#[derive(Debug)]
pub struct MemoryStateDb {
    pub(crate) namespace: String,
    pub(crate) activities: Table<PipelineActivity>,
    pub(crate) environments: Table<Environment>,
    pub(crate) workflows: Table<Workflow>,
}

impl MemoryStateDb {
    pub fn new(namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            activities: Table::default(),
            environments: Table::default(),
            workflows: Table::default(),
        }
    }
}

impl Default for MemoryStateDb {
    fn default() -> Self {
        Self::new("jx")
    }
}

/// Implements the [KubeClient] for [MemoryStateDb]
impl KubeClient for MemoryStateDb {}
