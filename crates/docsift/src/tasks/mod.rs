//! Task lifecycle tracking

mod store;

pub use store::{ProgressReporter, TaskCounts, TaskStore};
