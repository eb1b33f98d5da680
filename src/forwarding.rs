// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Forwarding table primitives
//!
//! The table maps a (destination, QoS class) pair to a per-policy entry
//! payload. QoS class 0 is the wildcard: a lookup tries the exact pair
//! first and falls back to the wildcard entry for the destination. The
//! forwarding policies in [`crate::policies`] each keep their own entry
//! payload inside this table.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ForwardingError;

/// Node address in the relaying layer
pub type AddressId = u64;
/// QoS class identifier; 0 is the wildcard class
pub type QosId = u32;
/// Identifier of an attached outbound link
pub type LinkId = u64;

/// QoS class that matches any lookup for the same destination
pub const WILDCARD_QOS: QosId = 0;

/// A request to mutate the forwarding table.
///
/// `alternatives` is a list of alternative sets. Most policies consume
/// the first link of each set; the loop-free alternates policy reads the
/// first set as its primary plus backup chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRequest {
    pub destination: AddressId,
    pub qos_class: QosId,
    pub alternatives: Vec<Vec<LinkId>>,
}

impl ForwardingRequest {
    pub fn new(destination: AddressId, qos_class: QosId, alternatives: Vec<Vec<LinkId>>) -> Self {
        Self {
            destination,
            qos_class,
            alternatives,
        }
    }

    /// Checks identifiers and shape before any table state changes.
    pub fn validate(&self) -> Result<(), ForwardingError> {
        if self.destination == 0 {
            return Err(ForwardingError::InvalidDestination(self.destination));
        }
        if self.alternatives.is_empty() || self.alternatives.iter().any(|set| set.is_empty()) {
            return Err(ForwardingError::EmptyAlternatives(self.destination));
        }
        for set in &self.alternatives {
            for &link in set {
                if link == 0 {
                    return Err(ForwardingError::InvalidLink(link));
                }
            }
        }
        Ok(())
    }

    /// First link of each alternative set, in request order
    pub fn first_links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.alternatives.iter().filter_map(|set| set.first().copied())
    }
}

/// One dumped forwarding entry, policy detail flattened to a link list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingEntry {
    pub destination: AddressId,
    pub qos_class: QosId,
    pub links: Vec<LinkId>,
}

/// Map from (destination, QoS class) to a policy-specific entry payload.
#[derive(Debug, Default)]
pub struct ForwardingTable<E> {
    entries: HashMap<(AddressId, QosId), E>,
}

impl<E> ForwardingTable<E> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn insert(&mut self, destination: AddressId, qos_class: QosId, entry: E) -> Option<E> {
        self.entries.insert((destination, qos_class), entry)
    }

    pub fn remove(&mut self, destination: AddressId, qos_class: QosId) -> Option<E> {
        self.entries.remove(&(destination, qos_class))
    }

    /// Exact-match lookup, no wildcard fallback
    pub fn get(&self, destination: AddressId, qos_class: QosId) -> Option<&E> {
        self.entries.get(&(destination, qos_class))
    }

    pub fn get_mut(&mut self, destination: AddressId, qos_class: QosId) -> Option<&mut E> {
        self.entries.get_mut(&(destination, qos_class))
    }

    pub fn get_or_insert_with(
        &mut self,
        destination: AddressId,
        qos_class: QosId,
        default: impl FnOnce() -> E,
    ) -> &mut E {
        self.entries
            .entry((destination, qos_class))
            .or_insert_with(default)
    }

    /// Lookup with wildcard fallback: the exact (destination, qos) entry
    /// wins; absent that, the wildcard entry for the destination is used.
    pub fn lookup(&self, destination: AddressId, qos_class: QosId) -> Option<&E> {
        self.entries
            .get(&(destination, qos_class))
            .or_else(|| self.entries.get(&(destination, WILDCARD_QOS)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(AddressId, QosId), &E)> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&(AddressId, QosId), &mut E)> {
        self.entries.iter_mut()
    }

    pub fn retain(&mut self, f: impl FnMut(&(AddressId, QosId), &mut E) -> bool) {
        self.entries.retain(f);
    }
}
