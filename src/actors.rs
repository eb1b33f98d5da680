// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Actor-based façade using Tokio
//!
//! Wraps the synchronous relay in an async actor, so traffic and admin
//! commands arrive over one channel, plus a drain pump task that
//! periodically empties the link queues.

use crate::forwarding::{ForwardingEntry, ForwardingRequest, LinkId};
use crate::pdu::Pdu;
use crate::policies::PolicyCatalog;
use crate::relay::{DRAIN_BUDGET, DrainOutcome, Relay, RelayReport, SubmitReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Messages for the relay actor
#[derive(Debug)]
pub enum RelayMessage {
    Submit {
        pdu: Pdu,
        response: mpsc::Sender<Result<SubmitReport, String>>,
    },
    RegisterLink {
        link: LinkId,
        response: mpsc::Sender<Result<(), String>>,
    },
    UnregisterLink {
        link: LinkId,
        response: mpsc::Sender<Result<(), String>>,
    },
    EnableLink {
        link: LinkId,
        response: mpsc::Sender<Result<(), String>>,
    },
    DisableLink {
        link: LinkId,
        response: mpsc::Sender<Result<(), String>>,
    },
    Drain {
        link: LinkId,
        response: mpsc::Sender<Result<DrainOutcome, String>>,
    },
    AddRoute {
        request: ForwardingRequest,
        response: mpsc::Sender<Result<(), String>>,
    },
    RemoveRoute {
        request: ForwardingRequest,
        response: mpsc::Sender<Result<(), String>>,
    },
    DumpRoutes {
        response: mpsc::Sender<Vec<ForwardingEntry>>,
    },
    SelectForwarding {
        name: String,
        response: mpsc::Sender<Result<(), String>>,
    },
    SelectScheduling {
        name: String,
        response: mpsc::Sender<Result<(), String>>,
    },
    ApplyForwardingParameter {
        name: String,
        value: String,
        response: mpsc::Sender<Result<(), String>>,
    },
    ApplySchedulingParameter {
        name: String,
        value: String,
        response: mpsc::Sender<Result<(), String>>,
    },
    Report {
        response: mpsc::Sender<RelayReport>,
    },
}

/// Relay Actor - serializes admin commands and traffic onto the relay
pub struct RelayActor {
    relay: Arc<Relay>,
    catalog: Arc<PolicyCatalog>,
    receiver: mpsc::Receiver<RelayMessage>,
}

impl RelayActor {
    pub fn new(
        relay: Arc<Relay>,
        catalog: Arc<PolicyCatalog>,
        receiver: mpsc::Receiver<RelayMessage>,
    ) -> Self {
        Self {
            relay,
            catalog,
            receiver,
        }
    }

    pub async fn run(mut self) {
        while let Some(msg) = self.receiver.recv().await {
            match msg {
                RelayMessage::Submit { pdu, response } => {
                    let result = self.relay.submit(pdu).map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::RegisterLink { link, response } => {
                    let result = self.relay.register_link(link).map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::UnregisterLink { link, response } => {
                    let result = self.relay.unregister_link(link).map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::EnableLink { link, response } => {
                    let result = self.relay.enable_link(link).map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::DisableLink { link, response } => {
                    let result = self.relay.disable_link(link).map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::Drain { link, response } => {
                    let result = self
                        .relay
                        .drain(link, DRAIN_BUDGET)
                        .map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::AddRoute { request, response } => {
                    let result = self.relay.add_route(&request).map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::RemoveRoute { request, response } => {
                    let result = self.relay.remove_route(&request).map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::DumpRoutes { response } => {
                    let _ = response.send(self.relay.dump_routes()).await;
                }
                RelayMessage::SelectForwarding { name, response } => {
                    let result = self
                        .relay
                        .select_forwarding(&self.catalog.forwarding, &name)
                        .map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::SelectScheduling { name, response } => {
                    let result = self
                        .relay
                        .select_scheduling(&self.catalog.scheduling, &name)
                        .map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::ApplyForwardingParameter {
                    name,
                    value,
                    response,
                } => {
                    let result = self
                        .relay
                        .apply_forwarding_parameter(&name, &value)
                        .map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::ApplySchedulingParameter {
                    name,
                    value,
                    response,
                } => {
                    let result = self
                        .relay
                        .apply_scheduling_parameter(&name, &value)
                        .map_err(|e| e.to_string());
                    let _ = response.send(result).await;
                }
                RelayMessage::Report { response } => {
                    let _ = response.send(self.relay.report()).await;
                }
            }
        }
    }
}

/// Actor handle for sending messages to an actor
pub struct ActorHandle<T> {
    sender: mpsc::Sender<T>,
}

impl<T> Clone for ActorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T> ActorHandle<T> {
    pub fn new(sender: mpsc::Sender<T>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, msg: T) -> Result<(), String> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| "Failed to send message".to_string())
    }
}

pub type RelayHandle = ActorHandle<RelayMessage>;

/// Spawns the drain pump: a task that sweeps every link on a fixed
/// period and keeps draining a link while it reports pending work and
/// makes progress.
pub fn spawn_drain_pump(
    relay: Arc<Relay>,
    period: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    for link in relay.links() {
                        loop {
                            match relay.drain(link, DRAIN_BUDGET) {
                                Ok(outcome) if outcome.pending && outcome.sent > 0 => continue,
                                Ok(_) => break,
                                Err(e) => {
                                    warn!(link, error = %e, "drain failed");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}
