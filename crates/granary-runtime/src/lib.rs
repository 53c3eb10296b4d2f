//! Granary Runtime
//!
//! Activation table, turn queues and dispatcher for Granary virtual actors.
//!
//! # Overview
//!
//! The runtime provides:
//! - On-demand activation, single-flight per identity
//! - One turn at a time per activation, FIFO
//! - Drain-then-deactivate on idle timeout, request or shutdown
//! - Cancellation of invocations that have not started
//!
//! # TigerStyle
//! - Single activation guarantee (one instance per identity)
//! - Explicit lifecycle states
//! - Bounded turn queues (no silent drops)

pub mod activation;
pub mod dispatcher;
pub mod handle;
pub mod mailbox;
pub mod runtime;
pub mod table;

pub use activation::{Activation, ActivationState, ActivationStats, DeactivationReason};
pub use dispatcher::{CancelHandle, Dispatcher, PendingInvocation};
pub use handle::{GrainRef, GrainRefBuilder};
pub use mailbox::{Envelope, TurnQueue, TurnQueueFullError};
pub use runtime::{Runtime, RuntimeBuilder};
pub use table::{ActivationTable, ClassRegistry};
