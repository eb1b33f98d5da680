// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Receiver-side credit window
//!
//! `CreditController` owns the flow-control state of one inbound flow and
//! feeds every received PDU through the active congestion policy. The
//! window is republished in the same critical section as the policy
//! update, so no caller can observe a stale credit next to a fresh edge,
//! and the right window edge never moves backwards.

use crate::error::{CreditError, RegistryError};
use crate::pdu::Pdu;
use crate::policies::congestion::{CongestionPolicy, REQUIRED_CONGESTION_CAPABILITIES};
use crate::registry::{ActivePolicy, PolicyInstance, PolicyRegistry};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::info;

/// Phase of the congestion state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CongestionPhase {
    SlowStart,
    CongestionAvoidance,
}

/// Flow-control state shared between the controller and its policy
#[derive(Debug)]
pub struct FlowControlState {
    pub left_window_edge: u64,
    pub credit: u32,
    pub right_window_edge: u64,
    pub rtt_estimate: Duration,
    pub phase: CongestionPhase,
}

impl FlowControlState {
    /// Blank state; the policy's `install` sets the initial window.
    pub fn new(rtt_estimate: Duration) -> Self {
        Self {
            left_window_edge: 0,
            credit: 0,
            right_window_edge: 0,
            rtt_estimate,
            phase: CongestionPhase::SlowStart,
        }
    }
}

/// One coherent view of the credit window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSnapshot {
    pub credit: u32,
    pub left_window_edge: u64,
    pub right_window_edge: u64,
    pub phase: CongestionPhase,
}

/// Credit window of one inbound flow under a hot-swappable policy.
pub struct CreditController {
    flow: Mutex<FlowControlState>,
    policy: ActivePolicy<dyn CongestionPolicy>,
}

impl CreditController {
    /// Creates the controller and installs the initial policy.
    pub fn new(
        initial: PolicyInstance<dyn CongestionPolicy>,
        rtt_estimate: Duration,
    ) -> Result<Self, RegistryError> {
        let policy = ActivePolicy::new(REQUIRED_CONGESTION_CAPABILITIES, initial)?;
        let controller = Self {
            flow: Mutex::new(FlowControlState::new(rtt_estimate)),
            policy,
        };
        {
            let mut flow = controller.flow.lock();
            controller.policy.load().policy().install(&mut flow);
            publish_window(&mut flow);
        }
        Ok(controller)
    }

    /// Runs one received PDU through the active policy and returns the
    /// window published in the same critical section.
    pub fn on_pdu(&self, pdu: &Pdu) -> WindowSnapshot {
        let mut flow = self.flow.lock();
        if pdu.sequence_num > flow.left_window_edge {
            flow.left_window_edge = pdu.sequence_num;
        }
        let cell = self.policy.load();
        cell.policy()
            .on_pdu(&mut flow, pdu.is_congestion_marked(), Instant::now());
        publish_window(&mut flow);
        snapshot(&flow)
    }

    /// Swaps in the policy published under `name`. The window restarts
    /// under the incoming policy's initial conditions; the old window
    /// stays observable until the swap completes.
    pub fn select(
        &self,
        registry: &PolicyRegistry<dyn CongestionPolicy>,
        name: &str,
    ) -> Result<(), RegistryError> {
        let mut flow = self.flow.lock();
        self.policy.select_with(registry, name, |policy| {
            policy.install(&mut flow);
            Ok(())
        })?;
        publish_window(&mut flow);
        info!(policy = %name, credit = flow.credit, "flow control reinstalled");
        Ok(())
    }

    pub fn window(&self) -> WindowSnapshot {
        snapshot(&self.flow.lock())
    }

    pub fn active_name(&self) -> String {
        self.policy.active_name()
    }

    pub fn generation(&self) -> u64 {
        self.policy.generation()
    }

    /// Updates the RTT estimate the cycle-based policies read.
    pub fn set_rtt_estimate(&self, rtt_estimate: Duration) {
        self.flow.lock().rtt_estimate = rtt_estimate;
    }

    /// Hands a parameter to the active policy
    pub fn apply_parameter(&self, name: &str, value: &str) -> Result<(), CreditError> {
        self.policy.load().policy().apply_parameter(name, value)
    }
}

fn snapshot(flow: &FlowControlState) -> WindowSnapshot {
    WindowSnapshot {
        credit: flow.credit,
        left_window_edge: flow.left_window_edge,
        right_window_edge: flow.right_window_edge,
        phase: flow.phase,
    }
}

// TCP rule: the advertised right window edge never shrinks.
fn publish_window(flow: &mut FlowControlState) {
    let candidate = flow.left_window_edge + flow.credit as u64;
    if candidate > flow.right_window_edge {
        flow.right_window_edge = candidate;
    }
}
