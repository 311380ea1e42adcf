//! The polling engine: bindings, request planning, the register store, the
//! poll scheduler and endpoint dispatch.

pub mod binding;
pub mod dispatch;
pub mod identify;
pub mod plan;
pub mod scheduler;
pub mod store;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub use binding::{BindingKind, BindingTable, BindingTableBuilder, EndpointBinding, Target, TextSource};
pub use dispatch::{Dispatcher, Published};
pub use identify::{Feature, SystemInfo};
pub use plan::{PlanOptions, PollBatch, PollPlan};
pub use scheduler::{CycleReport, PollScheduler, SchedulerConfig, SharedState};
pub use store::RegisterStore;

/// Link state as seen by consumers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Idle,
    AwaitingResponse,
    Faulted,
}

impl ConnectionState {
    /// Connected and polling normally.
    pub fn is_healthy(&self) -> bool {
        matches!(self, ConnectionState::Idle | ConnectionState::AwaitingResponse)
    }
}
