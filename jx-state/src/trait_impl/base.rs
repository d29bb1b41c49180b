use async_trait::async_trait;
use jx_common::state::BaseStoreTrait;

use crate::{db::MemoryStateDb, fs::FsStateDb};

#[async_trait]
impl BaseStoreTrait for MemoryStateDb {
    fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl BaseStoreTrait for FsStateDb {
    fn namespace(&self) -> &str {
        &self.namespace
    }
}
