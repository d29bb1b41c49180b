pub mod meta;
pub mod poll;
