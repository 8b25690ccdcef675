// Background jobs

pub mod scheduler;

pub use scheduler::{JobError, JobResult, JobScheduler};
