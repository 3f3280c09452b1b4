//! Core pipeline - work queue, dispatcher, worker pool and lifecycle

mod dispatcher;
mod engine;
mod queue;
mod stats;
mod worker;

pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use engine::Engine;
pub use queue::{BackpressurePolicy, InboundPayload, PushOutcome, Routing, WorkItem, WorkQueue};
pub use stats::{PipelineStats, StatsSnapshot};
pub use worker::{WorkerContext, WorkerPool};
