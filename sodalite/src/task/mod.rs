//! Task records and the in-memory registry driving their state machine.

pub mod model;
pub mod registry;

pub use model::{Task, TaskPhase, TaskRequest, TaskStatus};
pub use registry::{TaskCounts, TaskRegistry};
