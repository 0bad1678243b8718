//! Execution model: worker event loops and the shutdown barrier

pub mod wait_group;
pub mod worker;

pub use wait_group::WaitGroup;
pub use worker::{Worker, WorkerError, WorkerPool};
