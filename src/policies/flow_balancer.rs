// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Sticky flow-balancing forwarding
//!
//! First PDU of a flow picks a link; later PDUs of the same flow reuse it
//! until the mapping sits idle past the flow timeout. Expired mappings are
//! swept opportunistically during lookups, there is no background task.

use crate::error::ForwardingError;
use crate::forwarding::{ForwardingEntry, ForwardingRequest, ForwardingTable, LinkId};
use crate::pdu::{FlowKey, Pdu};
use crate::registry::{Capability, PolicySet};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use super::forwarding::ForwardingPolicy;

/// How the balancer picks a link for a new flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerStrategy {
    /// Uniform pick, no load accounting.
    Random,
    /// Pick the link with the least accumulated weight.
    LeastLoaded,
}

impl FromStr for BalancerStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(BalancerStrategy::Random),
            "least-loaded" => Ok(BalancerStrategy::LeastLoaded),
            other => Err(format!(
                "Invalid strategy: {}. Use 'random' or 'least-loaded'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FlowAssignment {
    link: LinkId,
    last_used: Instant,
    weight: u64,
}

#[derive(Debug)]
struct BalancerState {
    table: ForwardingTable<Vec<LinkId>>,
    flows: HashMap<u16, FlowAssignment>,
    load: HashMap<LinkId, u64>,
    strategy: BalancerStrategy,
    flow_timeout: Duration,
}

impl BalancerState {
    fn release(load: &mut HashMap<LinkId, u64>, assignment: &FlowAssignment) {
        if assignment.weight > 0 {
            if let Some(total) = load.get_mut(&assignment.link) {
                *total = total.saturating_sub(assignment.weight);
            }
        }
    }
}

/// Forwarding that pins flows to links with an idle timeout.
#[derive(Debug)]
pub struct FlowBalancerForwarding {
    state: Mutex<BalancerState>,
}

impl FlowBalancerForwarding {
    pub fn new(strategy: BalancerStrategy, flow_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(BalancerState {
                table: ForwardingTable::new(),
                flows: HashMap::new(),
                load: HashMap::new(),
                strategy,
                flow_timeout,
            }),
        }
    }

    fn insert_request(
        table: &mut ForwardingTable<Vec<LinkId>>,
        request: &ForwardingRequest,
    ) -> Result<(), ForwardingError> {
        request.validate()?;
        let links = table.get_or_insert_with(request.destination, request.qos_class, Vec::new);
        for link in request.first_links() {
            if !links.contains(&link) {
                links.push(link);
            }
        }
        Ok(())
    }
}

impl PolicySet for FlowBalancerForwarding {
    fn name(&self) -> &'static str {
        "flow-balancer"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[
            Capability::Add,
            Capability::Remove,
            Capability::Flush,
            Capability::IsEmpty,
            Capability::NextHop,
            Capability::Dump,
            Capability::Modify,
        ]
    }
}

impl ForwardingPolicy for FlowBalancerForwarding {
    fn add(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
        let mut state = self.state.lock();
        Self::insert_request(&mut state.table, request)
    }

    fn remove(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
        request.validate()?;
        let mut state = self.state.lock();
        let BalancerState {
            table, flows, load, ..
        } = &mut *state;
        let links =
            table
                .get_mut(request.destination, request.qos_class)
                .ok_or(ForwardingError::EntryNotFound {
                    destination: request.destination,
                    qos: request.qos_class,
                })?;
        let removed: Vec<LinkId> = request.first_links().collect();
        links.retain(|link| !removed.contains(link));
        if links.is_empty() {
            table.remove(request.destination, request.qos_class);
        }
        // Flows pinned to a removed link must re-pick on their next PDU.
        flows.retain(|_, assignment| {
            if removed.contains(&assignment.link) {
                BalancerState::release(load, assignment);
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn flush(&self) {
        let mut state = self.state.lock();
        state.table.clear();
        state.flows.clear();
        state.load.clear();
    }

    fn is_empty(&self) -> bool {
        self.state.lock().table.is_empty()
    }

    fn next_hop(&self, pdu: &Pdu) -> Result<Vec<LinkId>, ForwardingError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let BalancerState {
            table,
            flows,
            load,
            strategy,
            flow_timeout,
        } = &mut *state;

        let timeout = *flow_timeout;
        flows.retain(|_, assignment| {
            if now.saturating_duration_since(assignment.last_used) >= timeout {
                BalancerState::release(load, assignment);
                false
            } else {
                true
            }
        });

        let key = FlowKey::from_pdu(pdu).hash16();
        if let Some(assignment) = flows.get_mut(&key) {
            assignment.last_used = now;
            return Ok(vec![assignment.link]);
        }

        // Exact QoS match in this variant, no wildcard fallback.
        let links = table
            .get(pdu.destination(), pdu.qos_class())
            .filter(|links| !links.is_empty())
            .ok_or(ForwardingError::NoRoute {
                destination: pdu.destination(),
                qos: pdu.qos_class(),
            })?;

        let (link, weight) = match strategy {
            BalancerStrategy::Random => {
                let index = rand::thread_rng().gen_range(0..links.len());
                (links[index], 0)
            }
            BalancerStrategy::LeastLoaded => {
                let link = links
                    .iter()
                    .copied()
                    .min_by_key(|link| load.get(link).copied().unwrap_or(0))
                    .unwrap_or(links[0]);
                (link, 1)
            }
        };
        if weight > 0 {
            *load.entry(link).or_insert(0) += weight;
        }
        flows.insert(
            key,
            FlowAssignment {
                link,
                last_used: now,
                weight,
            },
        );
        Ok(vec![link])
    }

    fn dump(&self) -> Vec<ForwardingEntry> {
        let state = self.state.lock();
        let mut entries: Vec<ForwardingEntry> = state
            .table
            .iter()
            .map(|(&(destination, qos_class), links)| ForwardingEntry {
                destination,
                qos_class,
                links: links.clone(),
            })
            .collect();
        entries.sort_by_key(|entry| (entry.destination, entry.qos_class));
        entries
    }

    fn modify(&self, requests: &[ForwardingRequest]) -> Result<(), ForwardingError> {
        let mut staged = ForwardingTable::new();
        for request in requests {
            Self::insert_request(&mut staged, request)?;
        }
        let mut state = self.state.lock();
        state.table = staged;
        state.flows.clear();
        state.load.clear();
        Ok(())
    }

    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), ForwardingError> {
        match name {
            "strategy" => {
                let parsed: BalancerStrategy =
                    value
                        .parse()
                        .map_err(|_| ForwardingError::InvalidParameter {
                            name: name.to_string(),
                            value: value.to_string(),
                        })?;
                self.state.lock().strategy = parsed;
                Ok(())
            }
            "timeout-ms" => {
                let parsed: u64 = value
                    .parse()
                    .map_err(|_| ForwardingError::InvalidParameter {
                        name: name.to_string(),
                        value: value.to_string(),
                    })?;
                self.state.lock().flow_timeout = Duration::from_millis(parsed);
                Ok(())
            }
            _ => Err(ForwardingError::UnknownParameter(name.to_string())),
        }
    }
}
