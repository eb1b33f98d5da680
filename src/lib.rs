// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! The core library for the REMUX implementation.
//!
//! This crate contains the data plane of a relaying node: a policy-set
//! registry with hot swap, pluggable forwarding and scheduling policy
//! sets, per-link queue sets with token-bucket policing, and
//! credit-based congestion feedback on the receive side.

// Public module declarations
pub mod actors;
pub mod config;
pub mod credit;
pub mod error;
pub mod forwarding;
pub mod pdu;
pub mod policies;
pub mod queues;
pub mod registry;
pub mod relay;

// Re-export commonly used types
pub use actors::{ActorHandle, RelayActor, RelayHandle, RelayMessage, spawn_drain_pump};
pub use config::{CliArgs, RelayConfiguration};
pub use credit::{CongestionPhase, CreditController, FlowControlState, WindowSnapshot};
pub use error::{
    CreditError, EgressError, ForwardingError, RegistryError, RemuxError, SchedulingError,
    SerializationError,
};
pub use forwarding::{
    AddressId, ForwardingEntry, ForwardingRequest, ForwardingTable, LinkId, QosId, WILDCARD_QOS,
};
pub use pdu::{FLOW_KEYSPACE, FlowKey, Pdu, PduType};
pub use policies::{
    BalancerStrategy, CasCongestion, CherishUrgencyScheduling, CongestionPolicy, DctcpCongestion,
    DefaultForwarding, DefaultScheduling, EcnThresholdScheduling, EnqueueOutcome,
    FlowBalancerForwarding, ForwardingPolicy, LfaForwarding, MultipathForwarding, PolicyCatalog,
    PortState, QtaMuxScheduling, RedCongestion, SchedulingPolicy, builtin_catalog,
};
pub use queues::{DropOrMark, QosProfile, QueueSetSnapshot, QueueStats, TokenBucket};
pub use registry::{ActivePolicy, Capability, PolicyInstance, PolicyRegistry, PolicySet};
pub use relay::{
    ChannelSink, DRAIN_BUDGET, DrainOutcome, EgressSink, LinkReport, LinkState, LinkStats, Relay,
    RelayReport, SubmitReport,
};
