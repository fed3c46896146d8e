//! Background processing with a bounded job queue

mod job_queue;

pub use job_queue::{JobHandler, JobQueue, QueueStats};
