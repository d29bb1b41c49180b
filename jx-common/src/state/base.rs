use async_trait::async_trait;
use std::fmt::Debug;

#[async_trait]
pub trait BaseStoreTrait: Send + Sync + Debug + 'static {
    /// Team namespace every resource lives in.
    fn namespace(&self) -> &str;
}
