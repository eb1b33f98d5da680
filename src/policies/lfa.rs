// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Loop-free alternates forwarding
//!
//! Each entry pins a primary link and an ordered backup chain. A link
//! failure moves every entry riding the failed link onto its first backup
//! that is not itself down; recovery optionally reverts entries to their
//! primary. Lookups in this variant are exact, no wildcard fallback.

use crate::error::ForwardingError;
use crate::forwarding::{ForwardingEntry, ForwardingRequest, ForwardingTable, LinkId};
use crate::pdu::Pdu;
use crate::registry::{Capability, PolicySet};
use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::{info, warn};

use super::forwarding::{ForwardingPolicy, PortState};

#[derive(Debug, Clone)]
struct LfaEntry {
    primary: LinkId,
    active: LinkId,
    backups: Vec<LinkId>,
}

impl LfaEntry {
    fn from_request(request: &ForwardingRequest) -> Self {
        let set = &request.alternatives[0];
        let primary = set[0];
        let mut backups = Vec::new();
        for &link in &set[1..] {
            if link != primary && !backups.contains(&link) {
                backups.push(link);
            }
        }
        Self {
            primary,
            active: primary,
            backups,
        }
    }
}

#[derive(Debug)]
struct LfaState {
    table: ForwardingTable<LfaEntry>,
    down: HashSet<LinkId>,
    revert_on_up: bool,
}

/// Forwarding with precomputed failover.
#[derive(Debug)]
pub struct LfaForwarding {
    state: RwLock<LfaState>,
}

impl LfaForwarding {
    pub fn new(revert_on_up: bool) -> Self {
        Self {
            state: RwLock::new(LfaState {
                table: ForwardingTable::new(),
                down: HashSet::new(),
                revert_on_up,
            }),
        }
    }

    fn stage(
        table: &mut ForwardingTable<LfaEntry>,
        request: &ForwardingRequest,
    ) -> Result<(), ForwardingError> {
        request.validate()?;
        if table.get(request.destination, request.qos_class).is_some() {
            return Err(ForwardingError::DuplicateEntry {
                destination: request.destination,
                qos: request.qos_class,
            });
        }
        table.insert(
            request.destination,
            request.qos_class,
            LfaEntry::from_request(request),
        );
        Ok(())
    }
}

impl PolicySet for LfaForwarding {
    fn name(&self) -> &'static str {
        "lfa"
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
            Capability::PortStateChange,
        ]
    }
}

impl ForwardingPolicy for LfaForwarding {
    fn add(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
        let mut state = self.state.write();
        Self::stage(&mut state.table, request)
    }

    fn remove(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
        request.validate()?;
        let mut state = self.state.write();
        let entry = state
            .table
            .get(request.destination, request.qos_class)
            .ok_or(ForwardingError::EntryNotFound {
                destination: request.destination,
                qos: request.qos_class,
            })?;
        // Only the primary identifies an entry for removal; the whole
        // entry goes with it.
        let offered = request.alternatives[0][0];
        if entry.primary != offered {
            return Err(ForwardingError::PrimaryMismatch {
                destination: request.destination,
                link: offered,
            });
        }
        state.table.remove(request.destination, request.qos_class);
        Ok(())
    }

    fn flush(&self) {
        self.state.write().table.clear();
    }

    fn is_empty(&self) -> bool {
        self.state.read().table.is_empty()
    }

    fn next_hop(&self, pdu: &Pdu) -> Result<Vec<LinkId>, ForwardingError> {
        let state = self.state.read();
        let entry = state
            .table
            .get(pdu.destination(), pdu.qos_class())
            .ok_or(ForwardingError::NoRoute {
                destination: pdu.destination(),
                qos: pdu.qos_class(),
            })?;
        Ok(vec![entry.active])
    }

    fn dump(&self) -> Vec<ForwardingEntry> {
        let state = self.state.read();
        let mut entries: Vec<ForwardingEntry> = state
            .table
            .iter()
            .map(|(&(destination, qos_class), entry)| {
                let mut links = vec![entry.primary];
                links.extend_from_slice(&entry.backups);
                ForwardingEntry {
                    destination,
                    qos_class,
                    links,
                }
            })
            .collect();
        entries.sort_by_key(|entry| (entry.destination, entry.qos_class));
        entries
    }

    fn modify(&self, requests: &[ForwardingRequest]) -> Result<(), ForwardingError> {
        let mut staged = ForwardingTable::new();
        for request in requests {
            Self::stage(&mut staged, request)?;
        }
        self.state.write().table = staged;
        Ok(())
    }

    fn port_state_change(&self, link: LinkId, state: PortState) -> Result<(), ForwardingError> {
        let mut guard = self.state.write();
        match state {
            PortState::Down => {
                guard.down.insert(link);
                let LfaState { table, down, .. } = &mut *guard;
                for (&(destination, _), entry) in table.iter_mut() {
                    if entry.active != link {
                        continue;
                    }
                    match entry.backups.iter().find(|backup| !down.contains(backup)) {
                        Some(&backup) => {
                            info!(destination, from = link, to = backup, "failing over");
                            entry.active = backup;
                        }
                        None => {
                            warn!(destination, link, "no live backup, entry stays on failed link");
                        }
                    }
                }
            }
            PortState::Up => {
                guard.down.remove(&link);
                if guard.revert_on_up {
                    for (&(destination, _), entry) in guard.table.iter_mut() {
                        if entry.primary == link && entry.active != link {
                            info!(destination, link, "reverting to primary");
                            entry.active = link;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), ForwardingError> {
        match name {
            "revert-on-up" => {
                let parsed: bool =
                    value
                        .parse()
                        .map_err(|_| ForwardingError::InvalidParameter {
                            name: name.to_string(),
                            value: value.to_string(),
                        })?;
                self.state.write().revert_on_up = parsed;
                Ok(())
            }
            _ => Err(ForwardingError::UnknownParameter(name.to_string())),
        }
    }
}
