// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Forwarding policy sets
//!
//! A forwarding policy resolves the outgoing links for a PDU and owns the
//! table that resolution reads. All variants build on the generic table in
//! [`crate::forwarding`]; they differ in what an entry holds and in how
//! `next_hop` picks among the stored alternatives.

use crate::error::ForwardingError;
use crate::forwarding::{ForwardingEntry, ForwardingRequest, ForwardingTable, LinkId};
use crate::pdu::Pdu;
use crate::registry::{Capability, PolicySet};
use parking_lot::RwLock;

/// Link liveness report fed to policies that track failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Up,
    Down,
}

/// Operations every forwarding policy must advertise to be selectable
pub const REQUIRED_FORWARDING_CAPABILITIES: &[Capability] = &[
    Capability::Add,
    Capability::Remove,
    Capability::Flush,
    Capability::IsEmpty,
    Capability::NextHop,
    Capability::Dump,
];

/// Table-driven next-hop resolution.
///
/// `add` consumes the first link of each alternative set in the request;
/// what a variant does with the rest of a set is its own affair. All
/// methods take `&self`: each variant guards its table with its own lock
/// so resolution on the data path never blocks table maintenance for
/// longer than one critical section.
pub trait ForwardingPolicy: PolicySet {
    /// Adds the request's links under its `(destination, qos)` key.
    fn add(&self, request: &ForwardingRequest) -> Result<(), ForwardingError>;

    /// Removes the request's links; the entry is destroyed once empty.
    fn remove(&self, request: &ForwardingRequest) -> Result<(), ForwardingError>;

    /// Drops every entry.
    fn flush(&self);

    fn is_empty(&self) -> bool;

    /// Resolves the outgoing links for a PDU.
    fn next_hop(&self, pdu: &Pdu) -> Result<Vec<LinkId>, ForwardingError>;

    /// Flattened snapshot of the table for inspection.
    fn dump(&self) -> Vec<ForwardingEntry>;

    /// Atomically replaces the whole table from a batch of requests.
    ///
    /// The batch is validated up front and staged into a fresh table;
    /// lookups observe either the old table or the complete new one.
    fn modify(&self, requests: &[ForwardingRequest]) -> Result<(), ForwardingError>;

    /// Reacts to a link liveness change. Variants without failover state
    /// ignore it.
    fn port_state_change(&self, link: LinkId, state: PortState) -> Result<(), ForwardingError> {
        let _ = (link, state);
        Ok(())
    }

    /// Applies one named configuration parameter.
    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), ForwardingError> {
        let _ = value;
        Err(ForwardingError::UnknownParameter(name.to_string()))
    }
}

/// Default forwarding: an entry is an ordered link list and `next_hop`
/// returns the first alternative. Lookups fall back to the QoS 0 wildcard
/// entry when no exact entry exists.
#[derive(Debug, Default)]
pub struct DefaultForwarding {
    table: RwLock<ForwardingTable<Vec<LinkId>>>,
}

impl DefaultForwarding {
    pub fn new() -> Self {
        Self::default()
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

impl PolicySet for DefaultForwarding {
    fn name(&self) -> &'static str {
        "default"
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

impl ForwardingPolicy for DefaultForwarding {
    fn add(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
        let mut table = self.table.write();
        Self::insert_request(&mut table, request)
    }

    fn remove(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
        request.validate()?;
        let mut table = self.table.write();
        let links = table
            .get_mut(request.destination, request.qos_class)
            .ok_or(ForwardingError::EntryNotFound {
                destination: request.destination,
                qos: request.qos_class,
            })?;
        for link in request.first_links() {
            links.retain(|&known| known != link);
        }
        if links.is_empty() {
            table.remove(request.destination, request.qos_class);
        }
        Ok(())
    }

    fn flush(&self) {
        self.table.write().clear();
    }

    fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    fn next_hop(&self, pdu: &Pdu) -> Result<Vec<LinkId>, ForwardingError> {
        let table = self.table.read();
        let links = table
            .lookup(pdu.destination(), pdu.qos_class())
            .filter(|links| !links.is_empty())
            .ok_or(ForwardingError::NoRoute {
                destination: pdu.destination(),
                qos: pdu.qos_class(),
            })?;
        Ok(vec![links[0]])
    }

    fn dump(&self) -> Vec<ForwardingEntry> {
        let table = self.table.read();
        let mut entries: Vec<ForwardingEntry> = table
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
        *self.table.write() = staged;
        Ok(())
    }
}
