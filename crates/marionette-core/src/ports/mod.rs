//! Ports - narrow interfaces to the collaborators the task core consumes.
//!
//! The core only depends on these traits; concrete strategies live in
//! [`impls`](crate::impls).

pub mod backoff;
pub mod clock;
pub mod id_generator;

pub use self::backoff::Backoff;
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
