// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Relay driver
//!
//! Owns the relaying pipeline: a forwarding lookup resolves each
//! submitted PDU to one or more links, the active scheduling policy
//! decides between immediate transmission and queueing, and a
//! caller-pumped drain loop empties the per-link queues through an
//! injected egress sink. Per-link state tracks the enable/disable
//! lifecycle and the traffic counters.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::error::{EgressError, RegistryError, RemuxError, SchedulingError};
use crate::forwarding::{ForwardingEntry, ForwardingRequest, LinkId};
use crate::pdu::Pdu;
use crate::policies::forwarding::{
    ForwardingPolicy, PortState, REQUIRED_FORWARDING_CAPABILITIES,
};
use crate::policies::scheduling::{
    EnqueueOutcome, REQUIRED_SCHEDULING_CAPABILITIES, SchedulingPolicy,
};
use crate::queues::QueueSetSnapshot;
use crate::registry::{ActivePolicy, PolicyInstance, PolicyRegistry};

/// PDUs emitted per link in one drain cycle
pub const DRAIN_BUDGET: usize = 10;

/// Lifecycle state of a registered link.
///
/// A second enable arms the link against one racing disable: enabling
/// an `Enabled` link moves it to `DoNotDisable`, and the next disable
/// only brings it back to `Enabled`. A `Deallocated` link rejects
/// every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkState {
    Enabled,
    Disabled,
    DoNotDisable,
    Deallocated,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkState::Enabled => "enabled",
            LinkState::Disabled => "disabled",
            LinkState::DoNotDisable => "do-not-disable",
            LinkState::Deallocated => "deallocated",
        };
        write!(f, "{}", s)
    }
}

/// Per-link traffic counters
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LinkStats {
    /// PDUs currently held by the link's queue set
    pub queued: usize,
    pub tx_pdus: u64,
    pub tx_bytes: u64,
    pub rx_pdus: u64,
    pub rx_bytes: u64,
    pub dropped: u64,
    pub errored: u64,
}

#[derive(Debug)]
struct LinkEntry {
    state: LinkState,
    // A transmit is in flight with the entry unlocked
    writer_busy: bool,
    stats: LinkStats,
}

impl LinkEntry {
    fn new() -> Self {
        Self {
            state: LinkState::Enabled,
            writer_busy: false,
            stats: LinkStats::default(),
        }
    }
}

/// Where transmitted PDUs go; the transport below the relay.
pub trait EgressSink: Send + Sync {
    fn transmit(&self, link: LinkId, pdu: Pdu) -> Result<(), EgressError>;
}

/// Egress sink backed by an unbounded channel.
///
/// The receiving half stands in for the transport and consumes
/// `(link, PDU)` pairs in transmission order.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<(LinkId, Pdu)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(LinkId, Pdu)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EgressSink for ChannelSink {
    fn transmit(&self, link: LinkId, pdu: Pdu) -> Result<(), EgressError> {
        self.sender
            .send((link, pdu))
            .map_err(|_| EgressError::LinkClosed(link))
    }
}

/// What happened to one submitted PDU across its resolved links
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    /// Links the forwarding lookup resolved
    pub links: usize,
    pub sent: usize,
    pub scheduled: usize,
    pub dropped: usize,
    pub errored: usize,
}

/// Result of one drain cycle on a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    /// PDUs handed to the egress sink
    pub sent: usize,
    /// Whether the link still holds queued PDUs worth another cycle
    pub pending: bool,
}

/// Snapshot of one link for the stats report
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub link: LinkId,
    pub state: LinkState,
    #[serde(flatten)]
    pub stats: LinkStats,
}

/// Relay-wide stats report, serializable for export
#[derive(Debug, Clone, Serialize)]
pub struct RelayReport {
    pub forwarding_policy: String,
    pub scheduling_policy: String,
    pub submitted: u64,
    pub undeliverable: u64,
    pub links: Vec<LinkReport>,
}

/// The relaying engine.
///
/// Holds the active forwarding and scheduling policies in hot-swappable
/// slots and the per-link lifecycle state. `submit` is the ingress
/// entry point; `drain` is pumped by the caller to empty queues.
pub struct Relay {
    forwarding: ActivePolicy<dyn ForwardingPolicy>,
    scheduling: ActivePolicy<dyn SchedulingPolicy>,
    links: RwLock<HashMap<LinkId, Arc<Mutex<LinkEntry>>>>,
    sink: Arc<dyn EgressSink>,
    submitted: AtomicU64,
    undeliverable: AtomicU64,
}

impl Relay {
    /// Creates a relay with the given initial policies and egress sink.
    pub fn new(
        forwarding: PolicyInstance<dyn ForwardingPolicy>,
        scheduling: PolicyInstance<dyn SchedulingPolicy>,
        sink: Arc<dyn EgressSink>,
    ) -> Result<Self, RemuxError> {
        Ok(Self {
            forwarding: ActivePolicy::new(REQUIRED_FORWARDING_CAPABILITIES, forwarding)?,
            scheduling: ActivePolicy::new(REQUIRED_SCHEDULING_CAPABILITIES, scheduling)?,
            links: RwLock::new(HashMap::new()),
            sink,
            submitted: AtomicU64::new(0),
            undeliverable: AtomicU64::new(0),
        })
    }

    fn link_entry(&self, link: LinkId) -> Option<Arc<Mutex<LinkEntry>>> {
        self.links.read().get(&link).cloned()
    }

    /// Registers a link and creates its queue set.
    pub fn register_link(&self, link: LinkId) -> Result<(), RemuxError> {
        let mut links = self.links.write();
        if links.contains_key(&link) {
            return Err(SchedulingError::LinkExists(link).into());
        }
        self.scheduling.load().policy().create_queue_set(link)?;
        links.insert(link, Arc::new(Mutex::new(LinkEntry::new())));
        info!(link, "link registered");
        Ok(())
    }

    /// Deallocates a link and destroys its queue set.
    ///
    /// The entry stays behind as a tombstone so later operations on the
    /// link are rejected rather than unknown.
    pub fn unregister_link(&self, link: LinkId) -> Result<(), RemuxError> {
        let entry = self
            .link_entry(link)
            .ok_or(SchedulingError::UnknownLink(link))?;
        {
            let mut entry = entry.lock();
            if entry.state == LinkState::Deallocated {
                return Err(SchedulingError::LinkDeallocated(link).into());
            }
            if entry.stats.queued > 0 {
                warn!(
                    link,
                    queued = entry.stats.queued,
                    "unregistering link with queued PDUs"
                );
            }
            entry.state = LinkState::Deallocated;
            entry.stats.queued = 0;
        }
        self.scheduling.load().policy().destroy_queue_set(link)?;
        info!(link, "link unregistered");
        Ok(())
    }

    /// Enables a link, notifying the forwarding policy on a real
    /// transition out of `Disabled`.
    pub fn enable_link(&self, link: LinkId) -> Result<(), RemuxError> {
        let entry = self
            .link_entry(link)
            .ok_or(SchedulingError::UnknownLink(link))?;
        let notify = {
            let mut entry = entry.lock();
            match entry.state {
                LinkState::Deallocated => {
                    return Err(SchedulingError::LinkDeallocated(link).into());
                }
                LinkState::Enabled => {
                    entry.state = LinkState::DoNotDisable;
                    false
                }
                LinkState::DoNotDisable => {
                    entry.state = LinkState::Enabled;
                    false
                }
                LinkState::Disabled => {
                    entry.state = LinkState::Enabled;
                    true
                }
            }
        };
        if notify {
            info!(link, "link enabled");
            self.notify_port_state(link, PortState::Up);
        }
        Ok(())
    }

    /// Disables a link, notifying the forwarding policy on a real
    /// transition out of `Enabled`. One disable is absorbed by a
    /// preceding double enable.
    pub fn disable_link(&self, link: LinkId) -> Result<(), RemuxError> {
        let entry = self
            .link_entry(link)
            .ok_or(SchedulingError::UnknownLink(link))?;
        let notify = {
            let mut entry = entry.lock();
            match entry.state {
                LinkState::Deallocated => {
                    return Err(SchedulingError::LinkDeallocated(link).into());
                }
                LinkState::Disabled => false,
                LinkState::DoNotDisable => {
                    entry.state = LinkState::Enabled;
                    false
                }
                LinkState::Enabled => {
                    entry.state = LinkState::Disabled;
                    true
                }
            }
        };
        if notify {
            info!(link, "link disabled");
            self.notify_port_state(link, PortState::Down);
        }
        Ok(())
    }

    fn notify_port_state(&self, link: LinkId, state: PortState) {
        let forwarding = self.forwarding.load();
        if let Err(e) = forwarding.policy().port_state_change(link, state) {
            warn!(link, error = %e, "forwarding policy rejected port state change");
        }
    }

    /// Submits a PDU to the relay.
    ///
    /// The forwarding lookup decides the links; the PDU is duplicated
    /// for every resolved link but the last. An empty link list is a
    /// warn-and-drop, a failed lookup is an error.
    pub fn submit(&self, pdu: Pdu) -> Result<SubmitReport, RemuxError> {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        let forwarding = self.forwarding.load();
        let links = forwarding.policy().next_hop(&pdu)?;
        if links.is_empty() {
            warn!(
                destination = pdu.destination(),
                "forwarding resolved no links, dropping PDU"
            );
            self.undeliverable.fetch_add(1, Ordering::Relaxed);
            return Ok(SubmitReport::default());
        }

        let mut report = SubmitReport {
            links: links.len(),
            ..SubmitReport::default()
        };
        let scheduling = self.scheduling.load();
        let last = links.len() - 1;
        for &link in &links[..last] {
            self.dispatch(scheduling.policy(), link, pdu.clone(), &mut report);
        }
        self.dispatch(scheduling.policy(), links[last], pdu, &mut report);
        Ok(report)
    }

    fn dispatch(
        &self,
        scheduling: &dyn SchedulingPolicy,
        link: LinkId,
        pdu: Pdu,
        report: &mut SubmitReport,
    ) {
        let Some(entry_arc) = self.link_entry(link) else {
            warn!(link, "PDU resolved to an unregistered link");
            report.errored += 1;
            return;
        };
        let mut entry = entry_arc.lock();
        if entry.state == LinkState::Deallocated {
            warn!(link, "PDU resolved to a deallocated link");
            entry.stats.errored += 1;
            report.errored += 1;
            return;
        }

        let must_enqueue = entry.stats.queued > 0
            || entry.writer_busy
            || entry.state == LinkState::Disabled;
        let size = pdu.size() as u64;

        match scheduling.enqueue(link, pdu, must_enqueue) {
            Ok(EnqueueOutcome::Scheduled) => {
                entry.stats.queued += 1;
                report.scheduled += 1;
            }
            Ok(EnqueueOutcome::Dropped) => {
                entry.stats.dropped += 1;
                report.dropped += 1;
            }
            Ok(EnqueueOutcome::Sent(pdu)) => {
                if must_enqueue {
                    error!(link, "policy returned send while enqueue was required, dropping PDU");
                    entry.stats.errored += 1;
                    report.errored += 1;
                    return;
                }
                entry.writer_busy = true;
                drop(entry);
                let outcome = self.sink.transmit(link, pdu);
                let mut entry = entry_arc.lock();
                entry.writer_busy = false;
                match outcome {
                    Ok(()) => {
                        entry.stats.tx_pdus += 1;
                        entry.stats.tx_bytes += size;
                        report.sent += 1;
                    }
                    Err(e) => {
                        warn!(link, error = %e, "transmit failed");
                        entry.stats.errored += 1;
                        report.errored += 1;
                    }
                }
            }
            Err(e) => {
                warn!(link, error = %e, "enqueue failed");
                entry.stats.errored += 1;
                report.errored += 1;
            }
        }
    }

    /// Drains up to `budget` queued PDUs from a link while it stays
    /// enabled. Returns how many were emitted and whether queued work
    /// remains.
    pub fn drain(&self, link: LinkId, budget: usize) -> Result<DrainOutcome, RemuxError> {
        let entry_arc = self
            .link_entry(link)
            .ok_or(SchedulingError::UnknownLink(link))?;
        let mut entry = entry_arc.lock();
        match entry.state {
            LinkState::Deallocated => {
                return Err(SchedulingError::LinkDeallocated(link).into());
            }
            LinkState::Disabled => {
                return Ok(DrainOutcome {
                    sent: 0,
                    pending: false,
                });
            }
            _ => {}
        }
        if entry.writer_busy {
            return Ok(DrainOutcome {
                sent: 0,
                pending: true,
            });
        }

        entry.writer_busy = true;
        let mut sent = 0;
        while sent < budget
            && entry.stats.queued > 0
            && matches!(entry.state, LinkState::Enabled | LinkState::DoNotDisable)
        {
            let popped = {
                let scheduling = self.scheduling.load();
                match scheduling.policy().dequeue(link) {
                    Ok(popped) => popped,
                    Err(e) => {
                        entry.writer_busy = false;
                        return Err(e.into());
                    }
                }
            };
            let Some(pdu) = popped else {
                warn!(
                    link,
                    queued = entry.stats.queued,
                    "queue set drained early, resetting counter"
                );
                entry.stats.queued = 0;
                break;
            };
            entry.stats.queued -= 1;
            let size = pdu.size() as u64;

            drop(entry);
            let outcome = self.sink.transmit(link, pdu);
            entry = entry_arc.lock();

            match outcome {
                Ok(()) => {
                    entry.stats.tx_pdus += 1;
                    entry.stats.tx_bytes += size;
                    sent += 1;
                }
                Err(e) => {
                    warn!(link, error = %e, "transmit failed during drain");
                    entry.stats.errored += 1;
                }
            }
        }
        entry.writer_busy = false;
        let pending = entry.stats.queued > 0
            && matches!(entry.state, LinkState::Enabled | LinkState::DoNotDisable);
        Ok(DrainOutcome { sent, pending })
    }

    /// Records a PDU received on a link, for the rx counters.
    pub fn record_receive(&self, link: LinkId, pdu: &Pdu) -> Result<(), RemuxError> {
        let entry = self
            .link_entry(link)
            .ok_or(SchedulingError::UnknownLink(link))?;
        let mut entry = entry.lock();
        entry.stats.rx_pdus += 1;
        entry.stats.rx_bytes += pdu.size() as u64;
        Ok(())
    }

    /// Registered links that are not deallocated, sorted
    pub fn links(&self) -> Vec<LinkId> {
        let links = self.links.read();
        let mut out: Vec<LinkId> = links
            .iter()
            .filter(|(_, entry)| entry.lock().state != LinkState::Deallocated)
            .map(|(&link, _)| link)
            .collect();
        out.sort_unstable();
        out
    }

    /// Adds a forwarding entry through the active policy.
    pub fn add_route(&self, request: &ForwardingRequest) -> Result<(), RemuxError> {
        Ok(self.forwarding.load().policy().add(request)?)
    }

    /// Removes a forwarding entry through the active policy.
    pub fn remove_route(&self, request: &ForwardingRequest) -> Result<(), RemuxError> {
        Ok(self.forwarding.load().policy().remove(request)?)
    }

    /// Replaces the whole forwarding table through the active policy.
    pub fn modify_routes(&self, requests: &[ForwardingRequest]) -> Result<(), RemuxError> {
        Ok(self.forwarding.load().policy().modify(requests)?)
    }

    /// Clears the forwarding table.
    pub fn flush_routes(&self) {
        self.forwarding.load().policy().flush();
    }

    /// Dumps the forwarding table of the active policy.
    pub fn dump_routes(&self) -> Vec<ForwardingEntry> {
        self.forwarding.load().policy().dump()
    }

    /// Whether the active forwarding policy holds no entries
    pub fn routes_empty(&self) -> bool {
        self.forwarding.load().policy().is_empty()
    }

    /// Selects a different forwarding policy set.
    pub fn select_forwarding(
        &self,
        registry: &PolicyRegistry<dyn ForwardingPolicy>,
        name: &str,
    ) -> Result<(), RemuxError> {
        self.forwarding.select(registry, name)?;
        Ok(())
    }

    /// Selects a different scheduling policy set.
    ///
    /// Queue sets for every live link are created on the candidate
    /// before it is published; a failure leaves the active policy in
    /// place. PDUs queued under the old policy are discarded with it.
    pub fn select_scheduling(
        &self,
        registry: &PolicyRegistry<dyn SchedulingPolicy>,
        name: &str,
    ) -> Result<(), RemuxError> {
        let links = self.links.read();
        let live: Vec<LinkId> = links
            .iter()
            .filter(|(_, entry)| entry.lock().state != LinkState::Deallocated)
            .map(|(&link, _)| link)
            .collect();
        self.scheduling.select_with(registry, name, |candidate| {
            for &link in &live {
                candidate
                    .create_queue_set(link)
                    .map_err(|e| RegistryError::InstantiationFailed {
                        policy: name.to_string(),
                        reason: e.to_string(),
                    })?;
            }
            Ok(())
        })?;
        for (&link, entry) in links.iter() {
            let mut entry = entry.lock();
            if entry.stats.queued > 0 {
                warn!(
                    link,
                    discarded = entry.stats.queued,
                    "scheduling swap discarded queued PDUs"
                );
                entry.stats.queued = 0;
            }
        }
        Ok(())
    }

    /// Applies a runtime parameter to the active forwarding policy.
    pub fn apply_forwarding_parameter(&self, name: &str, value: &str) -> Result<(), RemuxError> {
        Ok(self.forwarding.load().policy().apply_parameter(name, value)?)
    }

    /// Applies a runtime parameter to the active scheduling policy.
    pub fn apply_scheduling_parameter(&self, name: &str, value: &str) -> Result<(), RemuxError> {
        Ok(self.scheduling.load().policy().apply_parameter(name, value)?)
    }

    /// Name of the active forwarding policy set
    pub fn forwarding_policy(&self) -> String {
        self.forwarding.active_name()
    }

    /// Name of the active scheduling policy set
    pub fn scheduling_policy(&self) -> String {
        self.scheduling.active_name()
    }

    /// Queue-set snapshot for one link from the active scheduler
    pub fn queue_report(&self, link: LinkId) -> Result<QueueSetSnapshot, RemuxError> {
        Ok(self.scheduling.load().policy().queue_stats(link)?)
    }

    /// Relay-wide stats report with links sorted by id
    pub fn report(&self) -> RelayReport {
        let links = self.links.read();
        let mut link_reports: Vec<LinkReport> = links
            .iter()
            .map(|(&link, entry)| {
                let entry = entry.lock();
                LinkReport {
                    link,
                    state: entry.state,
                    stats: entry.stats,
                }
            })
            .collect();
        link_reports.sort_by_key(|r| r.link);
        RelayReport {
            forwarding_policy: self.forwarding.active_name(),
            scheduling_policy: self.scheduling.active_name(),
            submitted: self.submitted.load(Ordering::Relaxed),
            undeliverable: self.undeliverable.load(Ordering::Relaxed),
            links: link_reports,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForwardingError;
    use crate::forwarding::{AddressId, QosId};
    use crate::policies::forwarding::DefaultForwarding;
    use crate::policies::scheduling::DefaultScheduling;
    use crate::registry::{Capability, PolicySet};

    /// Returns every stored link from `next_hop`, so submit has to
    /// duplicate the PDU. The built-in variants resolve to one link.
    #[derive(Debug, Default)]
    struct FanoutForwarding {
        table: RwLock<HashMap<(AddressId, QosId), Vec<LinkId>>>,
    }

    impl PolicySet for FanoutForwarding {
        fn name(&self) -> &'static str {
            "fanout"
        }

        fn capabilities(&self) -> &'static [Capability] {
            REQUIRED_FORWARDING_CAPABILITIES
        }
    }

    impl ForwardingPolicy for FanoutForwarding {
        fn add(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
            request.validate()?;
            let links = request.alternatives.first().cloned().unwrap_or_default();
            self.table
                .write()
                .insert((request.destination, request.qos_class), links);
            Ok(())
        }

        fn remove(&self, request: &ForwardingRequest) -> Result<(), ForwardingError> {
            self.table
                .write()
                .remove(&(request.destination, request.qos_class));
            Ok(())
        }

        fn flush(&self) {
            self.table.write().clear();
        }

        fn is_empty(&self) -> bool {
            self.table.read().is_empty()
        }

        fn next_hop(&self, pdu: &Pdu) -> Result<Vec<LinkId>, ForwardingError> {
            self.table
                .read()
                .get(&(pdu.destination(), pdu.qos_class()))
                .cloned()
                .ok_or(ForwardingError::NoRoute {
                    destination: pdu.destination(),
                    qos: pdu.qos_class(),
                })
        }

        fn dump(&self) -> Vec<ForwardingEntry> {
            Vec::new()
        }

        fn modify(&self, _requests: &[ForwardingRequest]) -> Result<(), ForwardingError> {
            Ok(())
        }
    }

    fn registries() -> (
        PolicyRegistry<dyn ForwardingPolicy>,
        PolicyRegistry<dyn SchedulingPolicy>,
    ) {
        let forwarding: PolicyRegistry<dyn ForwardingPolicy> = PolicyRegistry::new();
        forwarding
            .publish("default", || {
                Ok(Box::new(DefaultForwarding::new()) as Box<dyn ForwardingPolicy>)
            })
            .unwrap();
        let scheduling: PolicyRegistry<dyn SchedulingPolicy> = PolicyRegistry::new();
        scheduling
            .publish("default", || {
                Ok(Box::new(DefaultScheduling::default()) as Box<dyn SchedulingPolicy>)
            })
            .unwrap();
        scheduling
            .publish("fresh", || {
                Ok(Box::new(DefaultScheduling::default()) as Box<dyn SchedulingPolicy>)
            })
            .unwrap();
        (forwarding, scheduling)
    }

    fn relay_with_sink() -> (
        Relay,
        mpsc::UnboundedReceiver<(LinkId, Pdu)>,
        PolicyRegistry<dyn ForwardingPolicy>,
        PolicyRegistry<dyn SchedulingPolicy>,
    ) {
        let (forwarding, scheduling) = registries();
        let (sink, receiver) = ChannelSink::new();
        let relay = Relay::new(
            forwarding.instantiate("default").unwrap(),
            scheduling.instantiate("default").unwrap(),
            Arc::new(sink),
        )
        .unwrap();
        (relay, receiver, forwarding, scheduling)
    }

    fn data_pdu(destination: u64, seq: u64) -> Pdu {
        Pdu::new_data(1, destination, 10, 20, seq, vec![0; 8])
    }

    fn route(destination: u64, links: Vec<LinkId>) -> ForwardingRequest {
        ForwardingRequest::new(destination, 0, vec![links])
    }

    #[test]
    fn test_submit_sends_on_idle_link() {
        let (relay, mut receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();
        relay.add_route(&route(5, vec![10])).unwrap();

        let report = relay.submit(data_pdu(5, 0)).unwrap();
        assert_eq!(report.links, 1);
        assert_eq!(report.sent, 1);
        assert_eq!(report.scheduled, 0);

        let (link, pdu) = receiver.try_recv().unwrap();
        assert_eq!(link, 10);
        assert_eq!(pdu.destination(), 5);
    }

    #[test]
    fn test_submit_queues_on_disabled_link() {
        let (relay, mut receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();
        relay.add_route(&route(5, vec![10])).unwrap();
        relay.disable_link(10).unwrap();

        let report = relay.submit(data_pdu(5, 0)).unwrap();
        assert_eq!(report.scheduled, 1);
        assert_eq!(report.sent, 0);
        assert!(receiver.try_recv().is_err());

        // A disabled link does not drain and reports no pending work.
        let outcome = relay.drain(10, DRAIN_BUDGET).unwrap();
        assert_eq!(outcome, DrainOutcome { sent: 0, pending: false });

        relay.enable_link(10).unwrap();
        let outcome = relay.drain(10, DRAIN_BUDGET).unwrap();
        assert_eq!(outcome, DrainOutcome { sent: 1, pending: false });
        assert_eq!(receiver.try_recv().unwrap().0, 10);
    }

    #[test]
    fn test_submit_no_route_is_error() {
        let (relay, _receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();
        let err = relay.submit(data_pdu(99, 0)).unwrap_err();
        assert!(matches!(
            err,
            RemuxError::Forwarding(crate::error::ForwardingError::NoRoute { .. })
        ));
    }

    #[test]
    fn test_submit_duplicates_to_every_link() {
        let (forwarding, scheduling) = registries();
        forwarding
            .publish("fanout", || {
                Ok(Box::new(FanoutForwarding::default()) as Box<dyn ForwardingPolicy>)
            })
            .unwrap();
        let (sink, mut receiver) = ChannelSink::new();
        let relay = Relay::new(
            forwarding.instantiate("fanout").unwrap(),
            scheduling.instantiate("default").unwrap(),
            Arc::new(sink),
        )
        .unwrap();
        relay.register_link(10).unwrap();
        relay.register_link(20).unwrap();
        relay.add_route(&route(5, vec![10, 20])).unwrap();

        let report = relay.submit(data_pdu(5, 0)).unwrap();
        assert_eq!(report.links, 2);
        assert_eq!(report.sent, 2);

        let mut seen: Vec<LinkId> = vec![
            receiver.try_recv().unwrap().0,
            receiver.try_recv().unwrap().0,
        ];
        seen.sort_unstable();
        assert_eq!(seen, vec![10, 20]);
    }

    #[test]
    fn test_drain_respects_budget() {
        let (relay, mut receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();
        relay.add_route(&route(5, vec![10])).unwrap();
        relay.disable_link(10).unwrap();

        for seq in 0..15 {
            relay.submit(data_pdu(5, seq)).unwrap();
        }
        relay.enable_link(10).unwrap();

        let outcome = relay.drain(10, DRAIN_BUDGET).unwrap();
        assert_eq!(outcome, DrainOutcome { sent: 10, pending: true });
        let outcome = relay.drain(10, DRAIN_BUDGET).unwrap();
        assert_eq!(outcome, DrainOutcome { sent: 5, pending: false });

        let mut sequences = Vec::new();
        while let Ok((_, pdu)) = receiver.try_recv() {
            sequences.push(pdu.sequence_num);
        }
        assert_eq!(sequences, (0..15).collect::<Vec<u64>>());
    }

    #[test]
    fn test_enable_disable_edges() {
        let (relay, _receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();

        let state = |relay: &Relay| relay.report().links[0].state;
        assert_eq!(state(&relay), LinkState::Enabled);

        // Double enable arms the link against one disable.
        relay.enable_link(10).unwrap();
        assert_eq!(state(&relay), LinkState::DoNotDisable);
        relay.disable_link(10).unwrap();
        assert_eq!(state(&relay), LinkState::Enabled);
        relay.disable_link(10).unwrap();
        assert_eq!(state(&relay), LinkState::Disabled);
        relay.disable_link(10).unwrap();
        assert_eq!(state(&relay), LinkState::Disabled);
        relay.enable_link(10).unwrap();
        assert_eq!(state(&relay), LinkState::Enabled);
    }

    #[test]
    fn test_deallocated_link_rejects_operations() {
        let (relay, _receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();
        relay.add_route(&route(5, vec![10])).unwrap();
        relay.unregister_link(10).unwrap();

        assert!(relay.enable_link(10).is_err());
        assert!(relay.disable_link(10).is_err());
        assert!(relay.unregister_link(10).is_err());
        assert!(matches!(
            relay.drain(10, DRAIN_BUDGET).unwrap_err(),
            RemuxError::Scheduling(SchedulingError::LinkDeallocated(10))
        ));

        // Submissions routed to the tombstone count as errors.
        let report = relay.submit(data_pdu(5, 0)).unwrap();
        assert_eq!(report.errored, 1);
        assert!(relay.links().is_empty());
    }

    #[test]
    fn test_register_duplicate_rejected() {
        let (relay, _receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();
        assert!(matches!(
            relay.register_link(10).unwrap_err(),
            RemuxError::Scheduling(SchedulingError::LinkExists(10))
        ));
    }

    #[test]
    fn test_scheduling_swap_discards_queued_pdus() {
        let (relay, mut receiver, _f, scheduling) = relay_with_sink();
        relay.register_link(10).unwrap();
        relay.add_route(&route(5, vec![10])).unwrap();
        relay.disable_link(10).unwrap();

        for seq in 0..3 {
            relay.submit(data_pdu(5, seq)).unwrap();
        }
        relay.select_scheduling(&scheduling, "fresh").unwrap();
        assert_eq!(relay.scheduling_policy(), "fresh");

        relay.enable_link(10).unwrap();
        let outcome = relay.drain(10, DRAIN_BUDGET).unwrap();
        assert_eq!(outcome, DrainOutcome { sent: 0, pending: false });
        assert!(receiver.try_recv().is_err());
        assert_eq!(relay.report().links[0].stats.queued, 0);
    }

    #[test]
    fn test_receive_and_tx_stats() {
        let (relay, _receiver, _f, _s) = relay_with_sink();
        relay.register_link(10).unwrap();
        relay.add_route(&route(5, vec![10])).unwrap();

        let pdu = data_pdu(5, 0);
        let size = pdu.size() as u64;
        relay.submit(pdu.clone()).unwrap();
        relay.record_receive(10, &pdu).unwrap();

        let report = relay.report();
        assert_eq!(report.submitted, 1);
        let link = &report.links[0];
        assert_eq!(link.stats.tx_pdus, 1);
        assert_eq!(link.stats.tx_bytes, size);
        assert_eq!(link.stats.rx_pdus, 1);
        assert_eq!(link.stats.rx_bytes, size);
    }

    #[test]
    fn test_report_sorts_links() {
        let (relay, _receiver, _f, _s) = relay_with_sink();
        relay.register_link(30).unwrap();
        relay.register_link(10).unwrap();
        relay.register_link(20).unwrap();

        let ids: Vec<LinkId> = relay.report().links.iter().map(|l| l.link).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(relay.links(), vec![10, 20, 30]);
    }
}
