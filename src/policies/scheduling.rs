// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Scheduling Policies
//!
//! Pluggable per-link queueing disciplines for PDU transmission. A policy
//! owns one queue set per registered link; the relay asks it to enqueue
//! submitted PDUs and drains them back out when the link can transmit.

use crate::error::SchedulingError;
use crate::forwarding::LinkId;
use crate::pdu::Pdu;
use crate::queues::{FifoQueue, LinkMap, QueueSetSnapshot};
use crate::registry::{Capability, PolicySet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Capabilities every scheduling policy set must advertise
pub const REQUIRED_SCHEDULING_CAPABILITIES: &[Capability] = &[
    Capability::CreateQueueSet,
    Capability::DestroyQueueSet,
    Capability::Enqueue,
    Capability::Dequeue,
];

/// What the policy did with a submitted PDU
#[derive(Debug)]
pub enum EnqueueOutcome {
    /// The queue was idle; the caller transmits the returned PDU directly
    Sent(Pdu),
    /// The PDU was queued for a later dequeue
    Scheduled,
    /// The discipline discarded the PDU
    Dropped,
}

/// Trait for scheduling policies.
///
/// Methods take `&self`; each link's queue set sits behind its own lock so
/// a shared policy instance serves all links concurrently.
pub trait SchedulingPolicy: PolicySet {
    /// Allocates the queue set for a newly registered link
    fn create_queue_set(&self, link: LinkId) -> Result<(), SchedulingError>;

    /// Releases a link's queue set, discarding anything still queued
    fn destroy_queue_set(&self, link: LinkId) -> Result<(), SchedulingError>;

    /// Hands a PDU to the discipline; `must_enqueue` forbids the
    /// direct-send shortcut
    fn enqueue(
        &self,
        link: LinkId,
        pdu: Pdu,
        must_enqueue: bool,
    ) -> Result<EnqueueOutcome, SchedulingError>;

    /// Takes the next PDU to transmit on the link
    fn dequeue(&self, link: LinkId) -> Result<Option<Pdu>, SchedulingError>;

    /// Puts a PDU back at the head of its queue
    fn requeue(&self, _link: LinkId, _pdu: Pdu) -> Result<EnqueueOutcome, SchedulingError> {
        Err(SchedulingError::Unsupported("requeue"))
    }

    /// Queue counters for one link
    fn queue_stats(&self, link: LinkId) -> Result<QueueSetSnapshot, SchedulingError>;

    /// Adjusts a runtime parameter
    fn apply_parameter(&self, name: &str, _value: &str) -> Result<(), SchedulingError> {
        Err(SchedulingError::UnknownParameter(name.to_string()))
    }
}

#[derive(Debug, Default)]
struct DefaultQueueSet {
    management: FifoQueue,
    data: FifoQueue,
}

/// Tail-drop FIFO scheduling.
///
/// One bounded data queue plus an unbounded management queue per link.
/// Management PDUs are never dropped and are always served first.
#[derive(Debug)]
pub struct DefaultScheduling {
    sets: LinkMap<DefaultQueueSet>,
    q_max: AtomicUsize,
}

impl DefaultScheduling {
    pub fn new(q_max: usize) -> Self {
        Self {
            sets: LinkMap::new(),
            q_max: AtomicUsize::new(q_max),
        }
    }
}

impl Default for DefaultScheduling {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl PolicySet for DefaultScheduling {
    fn name(&self) -> &'static str {
        "default"
    }

    fn capabilities(&self) -> &'static [Capability] {
        REQUIRED_SCHEDULING_CAPABILITIES
    }
}

impl SchedulingPolicy for DefaultScheduling {
    fn create_queue_set(&self, link: LinkId) -> Result<(), SchedulingError> {
        self.sets.insert(link, DefaultQueueSet::default())
    }

    fn destroy_queue_set(&self, link: LinkId) -> Result<(), SchedulingError> {
        self.sets.remove(link)
    }

    fn enqueue(
        &self,
        link: LinkId,
        pdu: Pdu,
        must_enqueue: bool,
    ) -> Result<EnqueueOutcome, SchedulingError> {
        let set = self.sets.get(link)?;
        let mut set = set.lock();
        if pdu.is_management() {
            if !must_enqueue && set.management.is_empty() {
                return Ok(EnqueueOutcome::Sent(pdu));
            }
            set.management.push(pdu);
            return Ok(EnqueueOutcome::Scheduled);
        }
        if !must_enqueue && set.data.is_empty() {
            return Ok(EnqueueOutcome::Sent(pdu));
        }
        if set.data.len() >= self.q_max.load(Ordering::Relaxed) {
            set.data.record_drop(&pdu);
            return Ok(EnqueueOutcome::Dropped);
        }
        set.data.push(pdu);
        Ok(EnqueueOutcome::Scheduled)
    }

    fn dequeue(&self, link: LinkId) -> Result<Option<Pdu>, SchedulingError> {
        let set = self.sets.get(link)?;
        let mut set = set.lock();
        if let Some(pdu) = set.management.pop() {
            return Ok(Some(pdu));
        }
        Ok(set.data.pop())
    }

    fn queue_stats(&self, link: LinkId) -> Result<QueueSetSnapshot, SchedulingError> {
        let set = self.sets.get(link)?;
        let set = set.lock();
        let mut snapshot = QueueSetSnapshot::new(link);
        snapshot.management = set.management.stats();
        snapshot.data = Some(set.data.stats());
        Ok(snapshot)
    }

    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), SchedulingError> {
        match name {
            "q_max" => {
                let parsed: usize = value
                    .parse()
                    .map_err(|_| SchedulingError::InvalidParameter {
                        name: name.to_string(),
                        value: value.to_string(),
                    })?;
                if parsed == 0 {
                    return Err(SchedulingError::InvalidParameter {
                        name: name.to_string(),
                        value: value.to_string(),
                    });
                }
                self.q_max.store(parsed, Ordering::Relaxed);
                Ok(())
            }
            _ => Err(SchedulingError::UnknownParameter(name.to_string())),
        }
    }
}
