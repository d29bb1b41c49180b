mod db;
mod fs;
mod mapping;
mod table;
mod trait_impl;

pub use db::MemoryStateDb;
pub use fs::FsStateDb;
