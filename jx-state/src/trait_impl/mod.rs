mod activity;
mod base;
mod environment;
mod workflow;

#[cfg(test)]
mod tests;
