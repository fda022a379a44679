//! Background processing of submitted tasks.

pub mod job;

pub use job::{JobRunner, effective_mode};
