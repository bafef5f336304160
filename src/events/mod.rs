//! Event system: envelope, taxonomy, and the per-review bus.

pub mod bus;
pub mod emit;
pub mod types;

pub use bus::{EventBus, EventStream};
pub use emit::EmitHandle;
pub use types::{Event, EventKind};
