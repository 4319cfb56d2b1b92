//! Impls - concrete strategies behind the [`ports`](crate::ports).

pub mod backoff;

pub use self::backoff::{ConstantBackoff, ExponentialBackoff, ZeroBackoff};
