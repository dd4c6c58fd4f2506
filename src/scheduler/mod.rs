//! Background jobs
//!
//! A [`RecurringTask`] drives a job on its own thread; a [`SingletonGuard`] keeps two
//! runs of the same job from overlapping. The only job today is the monthly
//! [`DeductionJob`].

pub mod deduction;
pub mod runner;

pub use deduction::{period_of, AppliedDeduction, DeductionJob, DeductionReport, SkippedDeduction};
pub use runner::{RecurringTask, RunPermit, SingletonGuard, TaskHandle};
