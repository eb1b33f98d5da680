// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Cherish/urgency scheduling
//!
//! Classes map onto ordered urgency levels; each level is a FIFO bounded
//! by two cherish thresholds. Above the soft threshold arrivals are
//! dropped with the class drop probability, at the absolute threshold
//! they are always dropped. Dequeue scans levels most urgent first, with
//! a per-level skip draw that occasionally yields to less urgent traffic.

use crate::error::SchedulingError;
use crate::forwarding::{LinkId, QosId};
use crate::pdu::Pdu;
use crate::queues::{
    apply_profile_parameter, build_urgency_queues, scan_urgency_queues, FifoQueue, LinkMap,
    QosProfile, QueueSetSnapshot, UrgencyQueue, PROB_CEILING,
};
use crate::registry::{Capability, PolicySet};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

use super::scheduling::{EnqueueOutcome, SchedulingPolicy};

#[derive(Debug)]
struct CherishQueueSet {
    management: FifoQueue,
    queues: BTreeMap<u32, UrgencyQueue>,
    classes: HashMap<QosId, u32>,
}

/// Multi-level scheduling with bounded loss per class.
#[derive(Debug)]
pub struct CherishUrgencyScheduling {
    profiles: Mutex<BTreeMap<QosId, QosProfile>>,
    sets: LinkMap<CherishQueueSet>,
}

impl CherishUrgencyScheduling {
    pub fn new(profiles: Vec<QosProfile>) -> Self {
        let profiles = profiles
            .into_iter()
            .map(|profile| (profile.qos_class, profile))
            .collect();
        Self {
            profiles: Mutex::new(profiles),
            sets: LinkMap::new(),
        }
    }

    /// Admission decision shared by enqueue and requeue.
    fn admit(queue: &mut UrgencyQueue, pdu: &Pdu) -> bool {
        let occupancy = queue.len();
        if occupancy >= queue.abs_threshold {
            queue.record_drop(pdu);
            return false;
        }
        if occupancy >= queue.threshold
            && rand::thread_rng().gen_range(0..PROB_CEILING) < queue.drop_probability
        {
            queue.record_drop(pdu);
            return false;
        }
        true
    }
}

impl PolicySet for CherishUrgencyScheduling {
    fn name(&self) -> &'static str {
        "cherish-urgency"
    }

    fn capabilities(&self) -> &'static [Capability] {
        &[
            Capability::CreateQueueSet,
            Capability::DestroyQueueSet,
            Capability::Enqueue,
            Capability::Dequeue,
            Capability::Requeue,
        ]
    }
}

impl SchedulingPolicy for CherishUrgencyScheduling {
    fn create_queue_set(&self, link: LinkId) -> Result<(), SchedulingError> {
        let (queues, classes) = build_urgency_queues(&self.profiles.lock());
        self.sets.insert(
            link,
            CherishQueueSet {
                management: FifoQueue::new(),
                queues,
                classes,
            },
        )
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

        let qos = pdu.qos_class();
        let level = *set
            .classes
            .get(&qos)
            .ok_or(SchedulingError::UnknownQosClass(qos))?;
        let queue = set
            .queues
            .get_mut(&level)
            .ok_or(SchedulingError::UnknownQosClass(qos))?;

        if !Self::admit(queue, &pdu) {
            return Ok(EnqueueOutcome::Dropped);
        }
        if !must_enqueue && queue.is_empty() {
            return Ok(EnqueueOutcome::Sent(pdu));
        }
        queue.push(pdu);
        Ok(EnqueueOutcome::Scheduled)
    }

    fn dequeue(&self, link: LinkId) -> Result<Option<Pdu>, SchedulingError> {
        let set = self.sets.get(link)?;
        let mut set = set.lock();
        if let Some(pdu) = set.management.pop() {
            return Ok(Some(pdu));
        }
        Ok(scan_urgency_queues(&mut set.queues))
    }

    fn requeue(&self, link: LinkId, pdu: Pdu) -> Result<EnqueueOutcome, SchedulingError> {
        let set = self.sets.get(link)?;
        let mut set = set.lock();
        if pdu.is_management() {
            set.management.requeue(pdu);
            return Ok(EnqueueOutcome::Scheduled);
        }

        let qos = pdu.qos_class();
        let level = *set
            .classes
            .get(&qos)
            .ok_or(SchedulingError::UnknownQosClass(qos))?;
        let queue = set
            .queues
            .get_mut(&level)
            .ok_or(SchedulingError::UnknownQosClass(qos))?;

        if !Self::admit(queue, &pdu) {
            return Ok(EnqueueOutcome::Dropped);
        }
        queue.requeue(pdu);
        Ok(EnqueueOutcome::Scheduled)
    }

    fn queue_stats(&self, link: LinkId) -> Result<QueueSetSnapshot, SchedulingError> {
        let set = self.sets.get(link)?;
        let set = set.lock();
        let mut snapshot = QueueSetSnapshot::new(link);
        snapshot.management = set.management.stats();
        snapshot.urgency = set.queues.values().map(UrgencyQueue::snapshot).collect();
        Ok(snapshot)
    }

    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), SchedulingError> {
        apply_profile_parameter(&mut self.profiles.lock(), name, value)
    }
}
