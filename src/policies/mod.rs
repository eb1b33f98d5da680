// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Pluggable Policies
//!
//! This module provides the pluggable policy sets of the relay:
//! - Forwarding table variants (default, LFA, multipath, flow-balancer)
//! - Scheduling/queueing disciplines (default, cherish-urgency,
//!   QTA-mux, ECN threshold)
//! - Congestion feedback (RED-like, DCTCP-like, binary avoidance)

pub mod cherish_urgency;
pub mod congestion;
pub mod ecn_threshold;
pub mod flow_balancer;
pub mod forwarding;
pub mod lfa;
pub mod multipath;
pub mod qta_mux;
pub mod scheduling;

pub use cherish_urgency::CherishUrgencyScheduling;
pub use congestion::{
    CasCongestion, CongestionPolicy, DctcpCongestion, REQUIRED_CONGESTION_CAPABILITIES,
    RedCongestion,
};
pub use ecn_threshold::EcnThresholdScheduling;
pub use flow_balancer::{BalancerStrategy, FlowBalancerForwarding};
pub use forwarding::{
    DefaultForwarding, ForwardingPolicy, PortState, REQUIRED_FORWARDING_CAPABILITIES,
};
pub use lfa::LfaForwarding;
pub use multipath::MultipathForwarding;
pub use qta_mux::QtaMuxScheduling;
pub use scheduling::{
    DefaultScheduling, EnqueueOutcome, REQUIRED_SCHEDULING_CAPABILITIES, SchedulingPolicy,
};

use std::time::Duration;

use crate::config::RelayConfiguration;
use crate::error::{RegistryError, RemuxError};
use crate::registry::PolicyRegistry;

/// One registry per policy family.
pub struct PolicyCatalog {
    pub forwarding: PolicyRegistry<dyn ForwardingPolicy>,
    pub scheduling: PolicyRegistry<dyn SchedulingPolicy>,
    pub congestion: PolicyRegistry<dyn CongestionPolicy>,
}

/// Publishes every built-in policy set, parameterized from the
/// configuration. Factories capture their settings, so each selection
/// builds a fresh instance with the configured values.
pub fn builtin_catalog(config: &RelayConfiguration) -> Result<PolicyCatalog, RemuxError> {
    let catalog = PolicyCatalog {
        forwarding: PolicyRegistry::new(),
        scheduling: PolicyRegistry::new(),
        congestion: PolicyRegistry::new(),
    };

    catalog.forwarding.publish("default", || {
        Ok(Box::new(DefaultForwarding::new()) as Box<dyn ForwardingPolicy>)
    })?;
    let revert_on_up = config.revert_on_up;
    catalog.forwarding.publish("lfa", move || {
        Ok(Box::new(LfaForwarding::new(revert_on_up)) as Box<dyn ForwardingPolicy>)
    })?;
    catalog.forwarding.publish("multipath", || {
        Ok(Box::new(MultipathForwarding::new()) as Box<dyn ForwardingPolicy>)
    })?;
    let strategy_name = config.balancer_strategy.clone();
    let flow_timeout = Duration::from_millis(config.flow_timeout_ms);
    catalog.forwarding.publish("flow-balancer", move || {
        let strategy = strategy_name.parse::<BalancerStrategy>().map_err(|reason| {
            RegistryError::InstantiationFailed {
                policy: "flow-balancer".to_string(),
                reason,
            }
        })?;
        Ok(Box::new(FlowBalancerForwarding::new(strategy, flow_timeout))
            as Box<dyn ForwardingPolicy>)
    })?;

    let q_max = config.q_max;
    catalog.scheduling.publish("default", move || {
        Ok(Box::new(DefaultScheduling::new(q_max)) as Box<dyn SchedulingPolicy>)
    })?;
    let profiles = config.profiles.clone();
    catalog.scheduling.publish("cherish-urgency", move || {
        Ok(Box::new(CherishUrgencyScheduling::new(profiles.clone()))
            as Box<dyn SchedulingPolicy>)
    })?;
    let profiles = config.profiles.clone();
    catalog.scheduling.publish("qta-mux", move || {
        Ok(Box::new(QtaMuxScheduling::new(profiles.clone())) as Box<dyn SchedulingPolicy>)
    })?;
    let ecn_threshold = config.ecn_threshold;
    let ecn_q_max = config.q_max;
    catalog.scheduling.publish("ecn-threshold", move || {
        Ok(Box::new(EcnThresholdScheduling::new(ecn_threshold, ecn_q_max))
            as Box<dyn SchedulingPolicy>)
    })?;

    catalog.congestion.publish("red", || {
        Ok(Box::new(RedCongestion::new()) as Box<dyn CongestionPolicy>)
    })?;
    let shift_g = config.shift_g;
    catalog.congestion.publish("dctcp", move || {
        Ok(Box::new(DctcpCongestion::new(shift_g)) as Box<dyn CongestionPolicy>)
    })?;
    let initial_credit = config.initial_credit;
    let w_inc = config.w_inc;
    catalog.congestion.publish("cas", move || {
        Ok(Box::new(CasCongestion::new(initial_credit, w_inc)) as Box<dyn CongestionPolicy>)
    })?;

    Ok(catalog)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_publishes_all_sets() {
        let config = RelayConfiguration::default();
        let catalog = builtin_catalog(&config).unwrap();

        let mut forwarding = catalog.forwarding.names();
        forwarding.sort();
        assert_eq!(forwarding, vec!["default", "flow-balancer", "lfa", "multipath"]);

        let mut scheduling = catalog.scheduling.names();
        scheduling.sort();
        assert_eq!(
            scheduling,
            vec!["cherish-urgency", "default", "ecn-threshold", "qta-mux"]
        );

        let mut congestion = catalog.congestion.names();
        congestion.sort();
        assert_eq!(congestion, vec!["cas", "dctcp", "red"]);

        for name in catalog.forwarding.names() {
            catalog.forwarding.instantiate(&name).unwrap();
        }
        for name in catalog.scheduling.names() {
            catalog.scheduling.instantiate(&name).unwrap();
        }
        for name in catalog.congestion.names() {
            catalog.congestion.instantiate(&name).unwrap();
        }
    }

    #[test]
    fn test_unknown_strategy_fails_at_instantiation() {
        let config = RelayConfiguration {
            balancer_strategy: "round-robin".to_string(),
            ..RelayConfiguration::default()
        };
        let catalog = builtin_catalog(&config).unwrap();
        assert!(matches!(
            catalog.forwarding.instantiate("flow-balancer"),
            Err(RegistryError::InstantiationFailed { .. })
        ));
    }
}
