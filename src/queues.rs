// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Queueing primitives shared by the scheduling policy sets
//!
//! Provides the token bucket used for per-class shaping, the urgency
//! queue the multi-level schedulers file into, the QoS profile that
//! parametrizes both, and the per-link map that keeps every link's
//! queue set behind its own lock.

use crate::error::SchedulingError;
use crate::forwarding::{LinkId, QosId};
use crate::pdu::Pdu;
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

/// Probability draws are uniform in `0..PROB_CEILING`; configured
/// probabilities are percentages in `0..=PROB_CEILING`.
pub const PROB_CEILING: u8 = 100;

/// Token bucket shaping one QoS class of one link.
///
/// Buckets start full, so a class may burst up to `capacity` bytes right
/// away, and accumulate `rate` bytes of credit per second afterwards. The
/// caller passes the current instant explicitly, which keeps admission
/// decisions deterministic under test.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u64,
    rate: u64,
    tokens: f64,
    last_refill: Instant,
    exhausted: u64,
}

impl TokenBucket {
    pub fn new(capacity: u64, rate: u64, now: Instant) -> Self {
        Self {
            capacity,
            rate,
            tokens: capacity as f64,
            last_refill: now,
            exhausted: 0,
        }
    }

    /// Credits tokens for the time elapsed since the last refill.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens =
            (self.tokens + elapsed.as_secs_f64() * self.rate as f64).min(self.capacity as f64);
        self.last_refill = now;
    }

    /// Admits `size` bytes if enough tokens have accumulated, debiting them.
    pub fn try_consume(&mut self, size: usize, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= size as f64 {
            self.tokens -= size as f64;
            true
        } else {
            self.exhausted += 1;
            false
        }
    }

    /// Whole tokens currently available
    pub fn tokens(&self) -> u64 {
        self.tokens as u64
    }

    pub fn snapshot(&self, qos_class: QosId) -> BucketSnapshot {
        BucketSnapshot {
            qos_class,
            tokens: self.tokens as u64,
            capacity: self.capacity,
            rate: self.rate,
            exhausted: self.exhausted,
        }
    }
}

/// Counters kept per queue, exported read-only in stats reports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// PDUs offered to the queue, including ones later refused
    pub handled: u64,
    pub dropped: u64,
    pub transmitted: u64,
    pub dropped_bytes: u64,
    pub transmitted_bytes: u64,
    pub occupancy: usize,
    pub peak_occupancy: usize,
}

/// FIFO of whole PDUs with drop and transmit accounting
#[derive(Debug, Default)]
pub struct FifoQueue {
    items: VecDeque<Pdu>,
    stats: QueueStats,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Appends a PDU at the tail, counting it as handled.
    pub fn push(&mut self, pdu: Pdu) {
        self.stats.handled += 1;
        self.items.push_back(pdu);
        if self.items.len() > self.stats.peak_occupancy {
            self.stats.peak_occupancy = self.items.len();
        }
    }

    /// Puts a PDU back at the head, counting it as handled again.
    pub fn requeue(&mut self, pdu: Pdu) {
        self.stats.handled += 1;
        self.items.push_front(pdu);
        if self.items.len() > self.stats.peak_occupancy {
            self.stats.peak_occupancy = self.items.len();
        }
    }

    /// Removes the head PDU, counting it as transmitted.
    pub fn pop(&mut self) -> Option<Pdu> {
        let pdu = self.items.pop_front()?;
        self.stats.transmitted += 1;
        self.stats.transmitted_bytes += pdu.size() as u64;
        Some(pdu)
    }

    /// Records a PDU refused admission to this queue.
    pub fn record_drop(&mut self, pdu: &Pdu) {
        self.stats.handled += 1;
        self.stats.dropped += 1;
        self.stats.dropped_bytes += pdu.size() as u64;
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.stats.clone();
        stats.occupancy = self.items.len();
        stats
    }
}

/// What a scheduler does with a PDU that trips its class thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropOrMark {
    Drop,
    Mark,
}

impl std::str::FromStr for DropOrMark {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drop" => Ok(DropOrMark::Drop),
            "mark" => Ok(DropOrMark::Mark),
            _ => Err(format!("Invalid action: {}. Use 'drop' or 'mark'", s)),
        }
    }
}

/// One urgency level within a queue set.
///
/// Lower levels are more urgent and are offered service first. The skip
/// probability is the per-dequeue chance that this level defers to a less
/// urgent one; the cherish thresholds bound its occupancy.
#[derive(Debug)]
pub struct UrgencyQueue {
    pub level: u32,
    pub skip_probability: u8,
    pub abs_threshold: usize,
    pub threshold: usize,
    pub drop_probability: u8,
    pub drop_or_mark: DropOrMark,
    queue: FifoQueue,
}

impl UrgencyQueue {
    pub fn new(level: u32, skip_probability: u8) -> Self {
        Self {
            level,
            skip_probability,
            abs_threshold: usize::MAX,
            threshold: usize::MAX,
            drop_probability: 0,
            drop_or_mark: DropOrMark::Drop,
            queue: FifoQueue::new(),
        }
    }

    /// Builds the level queue from the first profile mapped onto it.
    pub fn from_profile(profile: &QosProfile) -> Self {
        Self {
            level: profile.urgency,
            skip_probability: profile.skip_probability,
            abs_threshold: profile.abs_threshold,
            threshold: profile.threshold,
            drop_probability: profile.drop_probability,
            drop_or_mark: profile.drop_or_mark,
            queue: FifoQueue::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn push(&mut self, pdu: Pdu) {
        self.queue.push(pdu);
    }

    pub fn requeue(&mut self, pdu: Pdu) {
        self.queue.requeue(pdu);
    }

    pub fn pop(&mut self) -> Option<Pdu> {
        self.queue.pop()
    }

    pub fn record_drop(&mut self, pdu: &Pdu) {
        self.queue.record_drop(pdu);
    }

    pub fn snapshot(&self) -> UrgencySnapshot {
        UrgencySnapshot {
            level: self.level,
            skip_probability: self.skip_probability,
            stats: self.queue.stats(),
        }
    }
}

/// Per-QoS-class scheduling profile.
///
/// Carried by the scheduler configuration and applied when a queue set is
/// created; levels shared by several classes take the structure of the
/// first class mapped onto them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QosProfile {
    pub qos_class: QosId,
    #[serde(default)]
    pub urgency: u32,
    #[serde(default)]
    pub skip_probability: u8,
    #[serde(default)]
    pub drop_probability: u8,
    #[serde(default = "default_abs_threshold")]
    pub abs_threshold: usize,
    #[serde(default = "default_threshold")]
    pub threshold: usize,
    #[serde(default = "default_burst")]
    pub burst: u64,
    #[serde(default = "default_rate")]
    pub rate: u64,
    #[serde(default = "default_drop_or_mark")]
    pub drop_or_mark: DropOrMark,
}

fn default_abs_threshold() -> usize {
    usize::MAX
}

fn default_threshold() -> usize {
    usize::MAX
}

fn default_burst() -> u64 {
    65536
}

fn default_rate() -> u64 {
    1_048_576
}

fn default_drop_or_mark() -> DropOrMark {
    DropOrMark::Drop
}

impl QosProfile {
    /// Permissive profile for a class configured key by key
    pub fn new(qos_class: QosId) -> Self {
        Self {
            qos_class,
            urgency: 0,
            skip_probability: 0,
            drop_probability: 0,
            abs_threshold: default_abs_threshold(),
            threshold: default_threshold(),
            burst: default_burst(),
            rate: default_rate(),
            drop_or_mark: default_drop_or_mark(),
        }
    }
}

/// Builds the urgency queues and the class-to-level map for one link from
/// the stored profiles. Profiles are visited in ascending QoS-class order,
/// so the lowest class sharing a level defines that level's structure.
pub fn build_urgency_queues(
    profiles: &BTreeMap<QosId, QosProfile>,
) -> (BTreeMap<u32, UrgencyQueue>, HashMap<QosId, u32>) {
    let mut queues = BTreeMap::new();
    let mut classes = HashMap::new();
    for (qos, profile) in profiles {
        classes.insert(*qos, profile.urgency);
        queues
            .entry(profile.urgency)
            .or_insert_with(|| UrgencyQueue::from_profile(profile));
    }
    (queues, classes)
}

/// Urgency-ordered probabilistic service.
///
/// Scans levels most urgent first; a non-empty level is served unless its
/// skip draw defers it. If every candidate defers, the most urgent
/// non-empty level seen is served anyway, so a dequeue on a non-empty set
/// always yields a PDU.
pub fn scan_urgency_queues(queues: &mut BTreeMap<u32, UrgencyQueue>) -> Option<Pdu> {
    let mut rng = rand::thread_rng();
    let mut fallback = None;
    let mut chosen = None;
    for (level, queue) in queues.iter() {
        if queue.is_empty() {
            continue;
        }
        if rng.gen_range(0..PROB_CEILING) >= queue.skip_probability {
            chosen = Some(*level);
            break;
        }
        if fallback.is_none() {
            fallback = Some(*level);
        }
    }
    let level = chosen.or(fallback)?;
    queues.get_mut(&level)?.pop()
}

/// Applies one dotted scheduler parameter (`"<qos>.<field>"`) to the stored
/// profiles. The value is parsed before any profile is touched, so a
/// malformed key or value has no partial effect.
pub fn apply_profile_parameter(
    profiles: &mut BTreeMap<QosId, QosProfile>,
    name: &str,
    value: &str,
) -> Result<(), SchedulingError> {
    let (qos, field) = split_dotted(name)?;
    match field {
        "urgency-class" => {
            let parsed: u32 = parse_value(name, value)?;
            profile_mut(profiles, qos).urgency = parsed;
        }
        "skip-prob" => {
            let parsed = parse_probability(name, value)?;
            profile_mut(profiles, qos).skip_probability = parsed;
        }
        "drop-prob" => {
            let parsed = parse_probability(name, value)?;
            profile_mut(profiles, qos).drop_probability = parsed;
        }
        "abs-th" => {
            let parsed: usize = parse_value(name, value)?;
            profile_mut(profiles, qos).abs_threshold = parsed;
        }
        "th" => {
            let parsed: usize = parse_value(name, value)?;
            profile_mut(profiles, qos).threshold = parsed;
        }
        "burst" => {
            let parsed: u64 = parse_value(name, value)?;
            profile_mut(profiles, qos).burst = parsed;
        }
        "rate" => {
            let parsed: u64 = parse_value(name, value)?;
            profile_mut(profiles, qos).rate = parsed;
        }
        "profile" => {
            // Composite form: "<urgency>:<abs_th>:<th>:<burst>:<rate>"
            let parts: Vec<&str> = value.split(':').collect();
            if parts.len() != 5 {
                return Err(SchedulingError::InvalidParameter {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
            let urgency: u32 = parse_value(name, parts[0])?;
            let abs_threshold: usize = parse_value(name, parts[1])?;
            let threshold: usize = parse_value(name, parts[2])?;
            let burst: u64 = parse_value(name, parts[3])?;
            let rate: u64 = parse_value(name, parts[4])?;
            let profile = profile_mut(profiles, qos);
            profile.urgency = urgency;
            profile.abs_threshold = abs_threshold;
            profile.threshold = threshold;
            profile.burst = burst;
            profile.rate = rate;
        }
        _ => return Err(SchedulingError::UnknownParameter(name.to_string())),
    }
    Ok(())
}

fn split_dotted(name: &str) -> Result<(QosId, &str), SchedulingError> {
    let (qos, field) = name
        .split_once('.')
        .ok_or_else(|| SchedulingError::UnknownParameter(name.to_string()))?;
    let qos = qos
        .parse()
        .map_err(|_| SchedulingError::UnknownParameter(name.to_string()))?;
    Ok((qos, field))
}

fn profile_mut(profiles: &mut BTreeMap<QosId, QosProfile>, qos: QosId) -> &mut QosProfile {
    profiles.entry(qos).or_insert_with(|| QosProfile::new(qos))
}

fn parse_value<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, SchedulingError> {
    value.parse().map_err(|_| SchedulingError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
    })
}

fn parse_probability(name: &str, value: &str) -> Result<u8, SchedulingError> {
    let parsed: u8 = parse_value(name, value)?;
    if parsed > PROB_CEILING {
        return Err(SchedulingError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        });
    }
    Ok(parsed)
}

/// Read-only view of one urgency level
#[derive(Debug, Clone, Serialize)]
pub struct UrgencySnapshot {
    pub level: u32,
    pub skip_probability: u8,
    pub stats: QueueStats,
}

/// Read-only view of one shaping bucket
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub qos_class: QosId,
    pub tokens: u64,
    pub capacity: u64,
    pub rate: u64,
    pub exhausted: u64,
}

/// Read-only view of one link's queue set
#[derive(Debug, Clone, Serialize)]
pub struct QueueSetSnapshot {
    pub link: LinkId,
    pub management: QueueStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<QueueStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urgency: Vec<UrgencySnapshot>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub buckets: Vec<BucketSnapshot>,
}

impl QueueSetSnapshot {
    pub fn new(link: LinkId) -> Self {
        Self {
            link,
            management: QueueStats::default(),
            data: None,
            urgency: Vec::new(),
            buckets: Vec::new(),
        }
    }
}

/// Per-link queue-set map shared by the scheduling policies.
///
/// Each link's queue set sits behind its own mutex, so enqueues and
/// dequeues on different links never contend; the outer lock is taken
/// only when links come and go.
#[derive(Debug)]
pub struct LinkMap<S> {
    inner: RwLock<HashMap<LinkId, Arc<Mutex<S>>>>,
}

impl<S> LinkMap<S> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a queue set for a link.
    pub fn insert(&self, link: LinkId, set: S) -> Result<(), SchedulingError> {
        let mut map = self.inner.write();
        if map.contains_key(&link) {
            return Err(SchedulingError::QueueSetExists(link));
        }
        map.insert(link, Arc::new(Mutex::new(set)));
        Ok(())
    }

    /// Removes a link's queue set, dropping anything still queued.
    pub fn remove(&self, link: LinkId) -> Result<(), SchedulingError> {
        self.inner
            .write()
            .remove(&link)
            .map(|_| ())
            .ok_or(SchedulingError::UnknownQueueSet(link))
    }

    /// Clones out the handle guarding one link's queue set.
    pub fn get(&self, link: LinkId) -> Result<Arc<Mutex<S>>, SchedulingError> {
        self.inner
            .read()
            .get(&link)
            .cloned()
            .ok_or(SchedulingError::UnknownQueueSet(link))
    }

    pub fn links(&self) -> Vec<LinkId> {
        self.inner.read().keys().copied().collect()
    }
}

impl<S> Default for LinkMap<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn data_pdu(seq: u64) -> Pdu {
        Pdu::new_data(1, 2, 10, 20, seq, vec![0u8; 62])
    }

    #[test]
    fn test_token_bucket_starts_full_and_rejects_oversize() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1000, 1000, t0);
        assert!(!bucket.try_consume(1200, t0));
        assert_eq!(bucket.snapshot(1).exhausted, 1);

        assert!(bucket.try_consume(600, t0));
        assert_eq!(bucket.tokens(), 400);
    }

    #[test]
    fn test_token_bucket_refill_and_cap() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1000, 1000, t0);
        assert!(bucket.try_consume(1000, t0));
        assert_eq!(bucket.tokens(), 0);

        bucket.refill(t0 + Duration::from_millis(500));
        assert_eq!(bucket.tokens(), 500);

        // Long idle period saturates at capacity
        bucket.refill(t0 + Duration::from_secs(30));
        assert_eq!(bucket.tokens(), 1000);
    }

    #[test]
    fn test_token_bucket_admits_and_debits() {
        let t0 = Instant::now();
        let mut bucket = TokenBucket::new(1000, 1000, t0);
        assert!(bucket.try_consume(1000, t0));

        let t1 = t0 + Duration::from_millis(500);
        assert!(!bucket.try_consume(900, t1));

        let t2 = t0 + Duration::from_millis(1000);
        assert!(bucket.try_consume(900, t2));
        assert_eq!(bucket.tokens(), 100);
    }

    #[test]
    fn test_fifo_queue_accounting() {
        let mut queue = FifoQueue::new();
        queue.push(data_pdu(1));
        queue.push(data_pdu(2));
        queue.record_drop(&data_pdu(3));

        let stats = queue.stats();
        assert_eq!(stats.handled, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.occupancy, 2);
        assert_eq!(stats.peak_occupancy, 2);

        let pdu = queue.pop().unwrap();
        assert_eq!(pdu.sequence_num, 1);
        let stats = queue.stats();
        assert_eq!(stats.transmitted, 1);
        assert_eq!(stats.transmitted_bytes, pdu.size() as u64);
        assert_eq!(stats.occupancy, 1);
    }

    #[test]
    fn test_fifo_requeue_goes_to_head() {
        let mut queue = FifoQueue::new();
        queue.push(data_pdu(1));
        queue.requeue(data_pdu(9));
        assert_eq!(queue.pop().unwrap().sequence_num, 9);
        assert_eq!(queue.pop().unwrap().sequence_num, 1);
    }

    #[test]
    fn test_urgency_scan_serves_most_urgent_first() {
        let mut queues = BTreeMap::new();
        queues.insert(0, UrgencyQueue::new(0, 0));
        queues.insert(1, UrgencyQueue::new(1, 0));
        queues.get_mut(&1).unwrap().push(data_pdu(1));
        queues.get_mut(&0).unwrap().push(data_pdu(2));

        // Both skip probabilities are zero, so level 0 must win.
        assert_eq!(scan_urgency_queues(&mut queues).unwrap().sequence_num, 2);
        assert_eq!(scan_urgency_queues(&mut queues).unwrap().sequence_num, 1);
        assert!(scan_urgency_queues(&mut queues).is_none());
    }

    #[test]
    fn test_urgency_scan_falls_back_when_every_level_skips() {
        let mut queues = BTreeMap::new();
        queues.insert(0, UrgencyQueue::new(0, PROB_CEILING));
        queues.insert(1, UrgencyQueue::new(1, PROB_CEILING));
        queues.get_mut(&0).unwrap().push(data_pdu(7));
        queues.get_mut(&1).unwrap().push(data_pdu(8));

        // Every draw defers, so the first non-empty level is served anyway.
        assert_eq!(scan_urgency_queues(&mut queues).unwrap().sequence_num, 7);
    }

    #[test]
    fn test_build_urgency_queues_first_class_wins() {
        let mut profiles = BTreeMap::new();
        let mut low = QosProfile::new(1);
        low.urgency = 0;
        low.abs_threshold = 5;
        let mut high = QosProfile::new(2);
        high.urgency = 0;
        high.abs_threshold = 50;
        profiles.insert(1, low);
        profiles.insert(2, high);

        let (queues, classes) = build_urgency_queues(&profiles);
        assert_eq!(queues.len(), 1);
        assert_eq!(queues.get(&0).unwrap().abs_threshold, 5);
        assert_eq!(classes.get(&2), Some(&0));
    }

    #[test]
    fn test_apply_profile_parameter_dotted_keys() {
        let mut profiles = BTreeMap::new();
        apply_profile_parameter(&mut profiles, "3.urgency-class", "2").unwrap();
        apply_profile_parameter(&mut profiles, "3.abs-th", "12").unwrap();
        apply_profile_parameter(&mut profiles, "3.skip-prob", "40").unwrap();

        let profile = profiles.get(&3).unwrap();
        assert_eq!(profile.urgency, 2);
        assert_eq!(profile.abs_threshold, 12);
        assert_eq!(profile.skip_probability, 40);
    }

    #[test]
    fn test_apply_profile_parameter_composite() {
        let mut profiles = BTreeMap::new();
        apply_profile_parameter(&mut profiles, "5.profile", "1:20:10:4096:8192").unwrap();

        let profile = profiles.get(&5).unwrap();
        assert_eq!(profile.urgency, 1);
        assert_eq!(profile.abs_threshold, 20);
        assert_eq!(profile.threshold, 10);
        assert_eq!(profile.burst, 4096);
        assert_eq!(profile.rate, 8192);
    }

    #[test]
    fn test_apply_profile_parameter_rejects_bad_input() {
        let mut profiles = BTreeMap::new();
        assert!(matches!(
            apply_profile_parameter(&mut profiles, "q_depth", "7"),
            Err(SchedulingError::UnknownParameter(_))
        ));
        assert!(matches!(
            apply_profile_parameter(&mut profiles, "3.skip-prob", "140"),
            Err(SchedulingError::InvalidParameter { .. })
        ));
        assert!(matches!(
            apply_profile_parameter(&mut profiles, "3.profile", "1:2:3"),
            Err(SchedulingError::InvalidParameter { .. })
        ));
        // Failed applications leave no partial profile behind.
        assert!(profiles.is_empty());
    }

    #[test]
    fn test_link_map_insert_get_remove() {
        let map: LinkMap<u32> = LinkMap::new();
        map.insert(7, 42).unwrap();
        assert!(matches!(
            map.insert(7, 0),
            Err(SchedulingError::QueueSetExists(7))
        ));

        assert_eq!(*map.get(7).unwrap().lock(), 42);
        map.remove(7).unwrap();
        assert!(matches!(
            map.get(7),
            Err(SchedulingError::UnknownQueueSet(7))
        ));
    }
}
