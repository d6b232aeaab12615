//! Observability events (§6): a small structured payload per significant
//! state transition, forwarded on an unbounded channel out of the Snapshot
//! Manager in addition to being logged via `tracing`.
//!
//! Grounded on the teacher's `AgentEvent` channel out of `AgentManager` —
//! same `mpsc::UnboundedSender` shape, generalized to the snapshot side of
//! this core.

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreEvent {
    SnapshotCreated { id: String, mode: String },
    SnapshotDeleted { id: String },
    StrategyInitialized { mode: String },
    StrategySwitched { previous: String, new: String },
}

pub type EventSender = mpsc::UnboundedSender<CoreEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<CoreEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
