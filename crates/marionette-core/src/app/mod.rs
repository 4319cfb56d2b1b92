//! App - the task manager and its worker pool.
//!
//! # Components
//! - **TaskManager**: admission API, lifecycle, dispatch to the workers
//! - **WorkerGroup**: fixed set of workers executing task handlers

pub mod manager;
pub mod worker_loop;

pub use self::manager::TaskManager;
pub use self::worker_loop::WorkerGroup;
