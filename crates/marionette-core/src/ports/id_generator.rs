//! IdGenerator port - identifier generation.
//!
//! # Implementations
//! - **UlidGenerator**: ULID based (production)

use crate::domain::TaskId;
use crate::ports::Clock;
use ulid::Ulid;

/// Generates globally unique, time sortable task identifiers.
///
/// # ULID properties
/// - sortable by time
/// - no coordination needed between generators
/// - 128-bit (UUID compatible)
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// ULID generator driven by a [`Clock`], so tests can pin the timestamp part
/// with a [`FixedClock`](crate::ports::FixedClock).
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::from(ulid)
    }
}
