//! Services - violation detection and subscriber delivery
//!
//! - `curfew` - curfew window and violation evaluation
//! - `subscription` - one-shot and stream delivery handles
//! - `registry` - concurrent subscription registry
//! - `executor` - task executors (worker pool, inline)
//! - `dispatcher` - per-movement evaluation and fan-out
//! - `reset` - global cancellation of pending one-shots
//! - `monitor` - facade tying the above together
//! - `directory` - in-memory subject curfews and latest movements

pub mod curfew;
pub mod directory;
pub mod dispatcher;
pub mod executor;
pub mod monitor;
pub mod registry;
pub mod reset;
pub mod subscription;

pub use curfew::is_violation;
pub use directory::SubjectDirectory;
pub use executor::{InlineExecutor, TaskExecutor, WorkerPool};
pub use monitor::CurfewMonitor;
pub use subscription::{
    OneShotReceiver, PushOutcome, Resolution, StreamId, StreamReceiver, StreamSubscription,
};
