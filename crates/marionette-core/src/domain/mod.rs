//! Domain model (task IDs, execution context, failure records).

pub mod context;
pub mod ids;
pub mod task_error;

pub use self::context::{Context, ContextError};
pub use self::ids::TaskId;
pub use self::task_error::TaskError;
