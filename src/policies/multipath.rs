// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Hash-threshold multipath forwarding
//!
//! Entries keep every first link of the alternative sets and spread flows
//! across them by hashing the flow key into equal regions of the 16-bit
//! keyspace. A given flow always hashes to the same region, so its PDUs
//! stay on one link as long as the entry is stable.

use crate::error::ForwardingError;
use crate::forwarding::{ForwardingEntry, ForwardingRequest, ForwardingTable, LinkId};
use crate::pdu::{FlowKey, Pdu, FLOW_KEYSPACE};
use crate::registry::{Capability, PolicySet};
use parking_lot::RwLock;

use super::forwarding::ForwardingPolicy;

/// Forwarding that load-shares flows over equal-cost links.
#[derive(Debug, Default)]
pub struct MultipathForwarding {
    table: RwLock<ForwardingTable<Vec<LinkId>>>,
}

impl MultipathForwarding {
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

    fn region_for(links: &[LinkId], pdu: &Pdu) -> LinkId {
        let hash = FlowKey::from_pdu(pdu).hash16() as u32;
        let region_size = FLOW_KEYSPACE / links.len() as u32;
        // Keyspace remainders spill into the last region.
        let index = ((hash / region_size) as usize).min(links.len() - 1);
        links[index]
    }
}

impl PolicySet for MultipathForwarding {
    fn name(&self) -> &'static str {
        "multipath"
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

impl ForwardingPolicy for MultipathForwarding {
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
        let removed: Vec<LinkId> = request.first_links().collect();
        links.retain(|link| !removed.contains(link));
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
        Ok(vec![Self::region_for(links, pdu)])
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
