pub mod domain;
pub mod poll;
mod scheduler;

pub use domain::{
    EnqueueOutcome, JobFilter, JobStatus, JobSummary, ReprocessTarget, ReprocessingJob,
};
pub use poll::{wait_for_target, JobHealth, PollPolicy, DEFAULT_STALL_CEILING};
pub use scheduler::ReprocessingScheduler;
