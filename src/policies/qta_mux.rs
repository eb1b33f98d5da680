// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! QTA-style scheduling
//!
//! Two-stage discipline: each QoS class first passes a token-bucket
//! policer sized from its profile (burst, rate), then files into the
//! cherish/urgency structure. Thresholds here are strict, and a class can
//! be configured to mark instead of drop when its soft threshold trips.

use crate::error::SchedulingError;
use crate::forwarding::{LinkId, QosId};
use crate::pdu::Pdu;
use crate::queues::{
    apply_profile_parameter, build_urgency_queues, scan_urgency_queues, BucketSnapshot,
    DropOrMark, FifoQueue, LinkMap, QosProfile, QueueSetSnapshot, TokenBucket, UrgencyQueue,
    PROB_CEILING,
};
use crate::registry::{Capability, PolicySet};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use super::scheduling::{EnqueueOutcome, SchedulingPolicy, REQUIRED_SCHEDULING_CAPABILITIES};

#[derive(Debug)]
struct QtaQueueSet {
    management: FifoQueue,
    buckets: HashMap<QosId, TokenBucket>,
    queues: BTreeMap<u32, UrgencyQueue>,
    classes: HashMap<QosId, u32>,
}

/// Policed multi-level scheduling with optional congestion marking.
#[derive(Debug)]
pub struct QtaMuxScheduling {
    profiles: Mutex<BTreeMap<QosId, QosProfile>>,
    sets: LinkMap<QtaQueueSet>,
}

impl QtaMuxScheduling {
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
}

impl PolicySet for QtaMuxScheduling {
    fn name(&self) -> &'static str {
        "qta-mux"
    }

    fn capabilities(&self) -> &'static [Capability] {
        REQUIRED_SCHEDULING_CAPABILITIES
    }
}

impl SchedulingPolicy for QtaMuxScheduling {
    fn create_queue_set(&self, link: LinkId) -> Result<(), SchedulingError> {
        let profiles = self.profiles.lock();
        let (queues, classes) = build_urgency_queues(&profiles);
        let now = Instant::now();
        let buckets = profiles
            .iter()
            .map(|(qos, profile)| (*qos, TokenBucket::new(profile.burst, profile.rate, now)))
            .collect();
        drop(profiles);
        self.sets.insert(
            link,
            QtaQueueSet {
                management: FifoQueue::new(),
                buckets,
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
        mut pdu: Pdu,
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
        let bucket = set
            .buckets
            .get_mut(&qos)
            .ok_or(SchedulingError::UnknownQosClass(qos))?;
        if !bucket.try_consume(pdu.size(), Instant::now()) {
            return Ok(EnqueueOutcome::Dropped);
        }

        let queue = set
            .queues
            .get_mut(&level)
            .ok_or(SchedulingError::UnknownQosClass(qos))?;
        if !must_enqueue && queue.is_empty() {
            return Ok(EnqueueOutcome::Sent(pdu));
        }
        let occupancy = queue.len();
        if occupancy > queue.abs_threshold {
            queue.record_drop(&pdu);
            return Ok(EnqueueOutcome::Dropped);
        }
        if occupancy > queue.threshold
            && rand::thread_rng().gen_range(0..PROB_CEILING) < queue.drop_probability
        {
            match queue.drop_or_mark {
                DropOrMark::Drop => {
                    queue.record_drop(&pdu);
                    return Ok(EnqueueOutcome::Dropped);
                }
                DropOrMark::Mark => pdu.mark_congestion(),
            }
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

    fn queue_stats(&self, link: LinkId) -> Result<QueueSetSnapshot, SchedulingError> {
        let set = self.sets.get(link)?;
        let set = set.lock();
        let mut snapshot = QueueSetSnapshot::new(link);
        snapshot.management = set.management.stats();
        snapshot.urgency = set.queues.values().map(UrgencyQueue::snapshot).collect();
        let mut buckets: Vec<BucketSnapshot> = set
            .buckets
            .iter()
            .map(|(qos, bucket)| bucket.snapshot(*qos))
            .collect();
        buckets.sort_by_key(|bucket| bucket.qos_class);
        snapshot.buckets = buckets;
        Ok(snapshot)
    }

    fn apply_parameter(&self, name: &str, value: &str) -> Result<(), SchedulingError> {
        apply_profile_parameter(&mut self.profiles.lock(), name, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // rate 0 keeps the buckets from refilling mid-test
    fn profile(qos: QosId, burst: u64) -> QosProfile {
        let mut profile = QosProfile::new(qos);
        profile.burst = burst;
        profile.rate = 0;
        profile
    }

    fn pdu_with_qos(qos: QosId, seq: u64) -> Pdu {
        Pdu::new_data_with_qos(1, 2, 10, 20, seq, qos, vec![seq as u8])
    }

    #[test]
    fn test_qta_sends_when_queue_empty() {
        let sched = QtaMuxScheduling::new(vec![profile(1, 65536)]);
        sched.create_queue_set(1).unwrap();

        let outcome = sched.enqueue(1, pdu_with_qos(1, 1), false).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Sent(_)));
    }

    #[test]
    fn test_qta_bucket_exhaustion_drops() {
        // Two 39-byte PDUs fit in the burst, the third does not.
        let sched = QtaMuxScheduling::new(vec![profile(1, 100)]);
        sched.create_queue_set(1).unwrap();

        for seq in 1..=2 {
            let outcome = sched.enqueue(1, pdu_with_qos(1, seq), true).unwrap();
            assert!(matches!(outcome, EnqueueOutcome::Scheduled));
        }
        let outcome = sched.enqueue(1, pdu_with_qos(1, 3), true).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Dropped));

        let stats = sched.queue_stats(1).unwrap();
        assert_eq!(stats.buckets[0].exhausted, 1);
        // A policer rejection never reaches the urgency queue.
        assert_eq!(stats.urgency[0].stats.dropped, 0);
        assert_eq!(stats.urgency[0].stats.occupancy, 2);
    }

    #[test]
    fn test_qta_thresholds_are_strict() {
        let mut tight = profile(1, 65536);
        tight.abs_threshold = 1;
        let sched = QtaMuxScheduling::new(vec![tight]);
        sched.create_queue_set(1).unwrap();

        // Occupancy must exceed the threshold before drops start.
        for seq in 1..=2 {
            let outcome = sched.enqueue(1, pdu_with_qos(1, seq), true).unwrap();
            assert!(matches!(outcome, EnqueueOutcome::Scheduled));
        }
        let outcome = sched.enqueue(1, pdu_with_qos(1, 3), true).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Dropped));
    }

    #[test]
    fn test_qta_marks_instead_of_dropping() {
        let mut marking = profile(1, 65536);
        marking.threshold = 0;
        marking.drop_probability = PROB_CEILING;
        marking.drop_or_mark = DropOrMark::Mark;
        let sched = QtaMuxScheduling::new(vec![marking]);
        sched.create_queue_set(1).unwrap();

        sched.enqueue(1, pdu_with_qos(1, 1), true).unwrap();
        sched.enqueue(1, pdu_with_qos(1, 2), true).unwrap();

        let first = sched.dequeue(1).unwrap().unwrap();
        let second = sched.dequeue(1).unwrap().unwrap();
        assert!(!first.is_congestion_marked());
        assert!(second.is_congestion_marked());
    }

    #[test]
    fn test_qta_management_bypasses_policer() {
        let sched = QtaMuxScheduling::new(vec![profile(1, 0)]);
        sched.create_queue_set(1).unwrap();

        let outcome = sched
            .enqueue(1, Pdu::new_management(1, 2, vec![]), false)
            .unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Sent(_)));
    }

    #[test]
    fn test_qta_unknown_class_rejected() {
        let sched = QtaMuxScheduling::new(vec![profile(1, 65536)]);
        sched.create_queue_set(1).unwrap();

        assert!(matches!(
            sched.enqueue(1, pdu_with_qos(9, 1), true),
            Err(SchedulingError::UnknownQosClass(9))
        ));
    }

    #[test]
    fn test_qta_requeue_unsupported() {
        let sched = QtaMuxScheduling::new(vec![profile(1, 65536)]);
        sched.create_queue_set(1).unwrap();

        assert!(matches!(
            sched.requeue(1, pdu_with_qos(1, 1)),
            Err(SchedulingError::Unsupported("requeue"))
        ));
    }
}
