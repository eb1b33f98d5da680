// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! ECN threshold scheduling
//!
//! Single bounded data FIFO per link. Arrivals at or above the mark
//! threshold get the explicit-congestion flag, arrivals at the cap are
//! dropped. Pairs with the DCTCP congestion policy on the receiving side,
//! which reads the mark density back out of the flow.

use crate::error::SchedulingError;
use crate::forwarding::LinkId;
use crate::pdu::Pdu;
use crate::queues::{FifoQueue, LinkMap, QueueSetSnapshot};
use crate::registry::{Capability, PolicySet};
use std::sync::atomic::{AtomicUsize, Ordering};

use super::scheduling::{EnqueueOutcome, SchedulingPolicy, REQUIRED_SCHEDULING_CAPABILITIES};

#[derive(Debug, Default)]
struct EcnQueueSet {
    management: FifoQueue,
    data: FifoQueue,
}

/// Tail-drop FIFO that marks before it drops.
#[derive(Debug)]
pub struct EcnThresholdScheduling {
    sets: LinkMap<EcnQueueSet>,
    threshold: AtomicUsize,
    q_max: AtomicUsize,
}

impl EcnThresholdScheduling {
    pub fn new(threshold: usize, q_max: usize) -> Self {
        Self {
            sets: LinkMap::new(),
            threshold: AtomicUsize::new(threshold),
            q_max: AtomicUsize::new(q_max),
        }
    }
}

impl Default for EcnThresholdScheduling {
    fn default() -> Self {
        Self::new(20, 200)
    }
}

impl PolicySet for EcnThresholdScheduling {
    fn name(&self) -> &'static str {
        "ecn-threshold"
    }

    fn capabilities(&self) -> &'static [Capability] {
        REQUIRED_SCHEDULING_CAPABILITIES
    }
}

impl SchedulingPolicy for EcnThresholdScheduling {
    fn create_queue_set(&self, link: LinkId) -> Result<(), SchedulingError> {
        self.sets.insert(link, EcnQueueSet::default())
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

        let occupancy = set.data.len();
        if occupancy >= self.q_max.load(Ordering::Relaxed) {
            set.data.record_drop(&pdu);
            return Ok(EnqueueOutcome::Dropped);
        }
        if occupancy >= self.threshold.load(Ordering::Relaxed) {
            pdu.mark_congestion();
        }
        if !must_enqueue && occupancy == 0 {
            return Ok(EnqueueOutcome::Sent(pdu));
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
        let parsed: usize = value
            .parse()
            .map_err(|_| SchedulingError::InvalidParameter {
                name: name.to_string(),
                value: value.to_string(),
            })?;
        match name {
            "q_threshold" => {
                self.threshold.store(parsed, Ordering::Relaxed);
                Ok(())
            }
            "q_max" => {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn data_pdu(seq: u64) -> Pdu {
        Pdu::new_data(1, 2, 10, 20, seq, vec![seq as u8])
    }

    #[test]
    fn test_ecn_marks_at_threshold() {
        let sched = EcnThresholdScheduling::new(2, 10);
        sched.create_queue_set(1).unwrap();

        for seq in 1..=3 {
            sched.enqueue(1, data_pdu(seq), true).unwrap();
        }

        assert!(!sched.dequeue(1).unwrap().unwrap().is_congestion_marked());
        assert!(!sched.dequeue(1).unwrap().unwrap().is_congestion_marked());
        assert!(sched.dequeue(1).unwrap().unwrap().is_congestion_marked());
    }

    #[test]
    fn test_ecn_drops_at_cap() {
        let sched = EcnThresholdScheduling::new(100, 2);
        sched.create_queue_set(1).unwrap();

        for seq in 1..=2 {
            let outcome = sched.enqueue(1, data_pdu(seq), true).unwrap();
            assert!(matches!(outcome, EnqueueOutcome::Scheduled));
        }
        let outcome = sched.enqueue(1, data_pdu(3), true).unwrap();
        assert!(matches!(outcome, EnqueueOutcome::Dropped));

        let stats = sched.queue_stats(1).unwrap();
        assert_eq!(stats.data.unwrap().dropped, 1);
    }

    #[test]
    fn test_ecn_sent_shortcut_carries_mark() {
        let sched = EcnThresholdScheduling::new(0, 10);
        sched.create_queue_set(1).unwrap();

        match sched.enqueue(1, data_pdu(1), false).unwrap() {
            EnqueueOutcome::Sent(pdu) => assert!(pdu.is_congestion_marked()),
            other => panic!("expected Sent, got {:?}", other),
        }
    }

    #[test]
    fn test_ecn_management_never_dropped() {
        let sched = EcnThresholdScheduling::new(1, 1);
        sched.create_queue_set(1).unwrap();

        for _ in 0..4 {
            let outcome = sched
                .enqueue(1, Pdu::new_management(1, 2, vec![]), true)
                .unwrap();
            assert!(matches!(outcome, EnqueueOutcome::Scheduled));
        }

        let stats = sched.queue_stats(1).unwrap();
        assert_eq!(stats.management.occupancy, 4);
        assert_eq!(stats.management.dropped, 0);
    }

    #[test]
    fn test_ecn_parameters() {
        let sched = EcnThresholdScheduling::default();
        sched.create_queue_set(1).unwrap();
        sched.apply_parameter("q_threshold", "0").unwrap();
        sched.apply_parameter("q_max", "5").unwrap();

        match sched.enqueue(1, data_pdu(1), false).unwrap() {
            EnqueueOutcome::Sent(pdu) => assert!(pdu.is_congestion_marked()),
            other => panic!("expected Sent, got {:?}", other),
        }

        assert!(matches!(
            sched.apply_parameter("q_max", "0"),
            Err(SchedulingError::InvalidParameter { .. })
        ));
        assert!(matches!(
            sched.apply_parameter("mark_depth", "3"),
            Err(SchedulingError::UnknownParameter(_))
        ));
    }
}
