//! Task orchestration engine: the poll loop, the bounded worker pool, and
//! the per-task pipelines that drive a coding agent against tracker items.

pub mod agent;
pub mod context;
pub mod implement;
pub mod poller;
pub mod pool;
pub mod prompt;
pub mod review;
pub mod subprocess;
pub mod tracker;
pub mod workspace;
