// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

use clap::Parser;
use remux::{
    ChannelSink, CliArgs, CreditController, ForwardingRequest, Pdu, Relay, RelayActor,
    RelayConfiguration, RelayHandle, RelayMessage, builtin_catalog, spawn_drain_pump,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = CliArgs::parse();
    let config = match RelayConfiguration::from_cli(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    println!("=== REMUX (Relaying and Multiplexing Engine) ===\n");
    config.print_summary();

    // Publish the built-in policy sets, parameterized by the configuration
    let catalog = Arc::new(builtin_catalog(&config).expect("Failed to publish built-in policies"));
    let mut forwarding_names = catalog.forwarding.names();
    forwarding_names.sort();
    let mut scheduling_names = catalog.scheduling.names();
    scheduling_names.sort();
    let mut congestion_names = catalog.congestion.names();
    congestion_names.sort();
    println!("✓ Forwarding policy sets: {:?}", forwarding_names);
    println!("✓ Scheduling policy sets: {:?}", scheduling_names);
    println!("✓ Congestion policy sets: {:?}", congestion_names);

    // Build the relay on the configured policies with a channel egress sink
    let (sink, mut egress) = ChannelSink::new();
    let relay = Arc::new(
        Relay::new(
            catalog
                .forwarding
                .instantiate(&config.forwarding_policy)
                .expect("Failed to instantiate forwarding policy"),
            catalog
                .scheduling
                .instantiate(&config.scheduling_policy)
                .expect("Failed to instantiate scheduling policy"),
            Arc::new(sink),
        )
        .expect("Failed to build relay"),
    );
    println!("✓ Relay built on '{}' / '{}'\n", config.forwarding_policy, config.scheduling_policy);

    // Relay actor
    let (relay_tx, relay_rx) = mpsc::channel(32);
    let relay_handle = RelayHandle::new(relay_tx);
    {
        let actor = RelayActor::new(relay.clone(), catalog.clone(), relay_rx);
        tokio::spawn(async move {
            actor.run().await;
        });
    }
    println!("  → Relay Actor spawned");

    // Drain pump
    let shutdown = CancellationToken::new();
    let pump = spawn_drain_pump(relay.clone(), Duration::from_millis(5), shutdown.clone());
    println!("  → Drain pump spawned\n");

    // === Link registry ===
    println!("=== 1. Link Registry ===");
    for link in [10u64, 20, 30] {
        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        relay_handle
            .send(RelayMessage::RegisterLink {
                link,
                response: resp_tx,
            })
            .await
            .unwrap();
        resp_rx
            .recv()
            .await
            .unwrap()
            .expect("Failed to register link");
    }
    println!("  Registered links: {:?} (via actor)\n", relay.links());

    // === Forwarding table ===
    println!("=== 2. Forwarding Table ===");
    let routes = [
        ForwardingRequest::new(100, 0, vec![vec![10]]),
        ForwardingRequest::new(200, 0, vec![vec![20]]),
        ForwardingRequest::new(300, 0, vec![vec![20], vec![30]]),
    ];
    for request in routes {
        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        relay_handle
            .send(RelayMessage::AddRoute {
                request,
                response: resp_tx,
            })
            .await
            .unwrap();
        resp_rx.recv().await.unwrap().expect("Failed to add route");
    }

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::DumpRoutes { response: resp_tx })
        .await
        .unwrap();
    let entries = resp_rx.recv().await.unwrap();
    println!("  Installed {} forwarding entries (via actor)", entries.len());
    for entry in &entries {
        println!(
            "    destination {} qos {} -> links {:?}",
            entry.destination, entry.qos_class, entry.links
        );
    }
    println!();

    // === Relaying ===
    println!("=== 3. Relaying ===");
    for seq in 0..3u64 {
        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        relay_handle
            .send(RelayMessage::Submit {
                pdu: Pdu::new_data(1, 100, 7, 8, seq, vec![0xAB; 64]),
                response: resp_tx,
            })
            .await
            .unwrap();
        resp_rx.recv().await.unwrap().expect("Failed to submit");
    }
    println!("  Submitted 3 PDUs for destination 100");

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::Submit {
            pdu: Pdu::new_data(1, 300, 7, 8, 3, vec![0xCD; 64]),
            response: resp_tx,
        })
        .await
        .unwrap();
    let report = resp_rx.recv().await.unwrap().unwrap();
    println!(
        "  Destination 300 holds two alternatives, first wins ({} sent)",
        report.sent
    );

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::Submit {
            pdu: Pdu::new_data(1, 999, 7, 8, 4, vec![]),
            response: resp_tx,
        })
        .await
        .unwrap();
    match resp_rx.recv().await.unwrap() {
        Ok(_) => println!("  Unexpected route for destination 999"),
        Err(e) => println!("  Destination 999 rejected: {}", e),
    }

    let mut forwarded = 0;
    while egress.try_recv().is_ok() {
        forwarded += 1;
    }
    println!("  Egress sink received {} PDUs\n", forwarded);

    // === Scheduling and drain ===
    println!("=== 4. Scheduling and Drain ===");
    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::DisableLink {
            link: 10,
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to disable");
    println!("  Disabled link 10");

    for seq in 10..15u64 {
        let (resp_tx, mut resp_rx) = mpsc::channel(1);
        relay_handle
            .send(RelayMessage::Submit {
                pdu: Pdu::new_data(1, 100, 7, 8, seq, vec![0xEF; 32]),
                response: resp_tx,
            })
            .await
            .unwrap();
        resp_rx.recv().await.unwrap().expect("Failed to submit");
    }
    let snapshot = relay.queue_report(10).expect("Failed to read queue stats");
    if let Some(data) = &snapshot.data {
        println!(
            "  5 PDUs queued while disabled (occupancy {}, peak {})",
            data.occupancy, data.peak_occupancy
        );
    }

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::EnableLink {
            link: 10,
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to enable");

    // Give the drain pump a couple of periods to empty the queue
    tokio::time::sleep(Duration::from_millis(25)).await;
    let mut drained = 0;
    while egress.try_recv().is_ok() {
        drained += 1;
    }
    println!("  Re-enabled link 10, drain pump flushed {} PDUs\n", drained);

    // === Policy hot swap ===
    println!("=== 5. Policy Hot Swap ===");
    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::SelectForwarding {
            name: "lfa".to_string(),
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to swap");
    println!("  Forwarding policy now: {}", relay.forwarding_policy());

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::AddRoute {
            request: ForwardingRequest::new(400, 0, vec![vec![10, 20]]),
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to add route");
    println!("  Route to 400: primary link 10, backup link 20");

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::DisableLink {
            link: 10,
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to disable");

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::Submit {
            pdu: Pdu::new_data(1, 400, 7, 8, 20, vec![0x42; 16]),
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to submit");
    if let Ok((link, _)) = egress.try_recv() {
        println!("  Link 10 down: PDU for 400 egressed on link {}", link);
    }

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::SelectScheduling {
            name: "cherish-urgency".to_string(),
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to swap");
    println!("  Scheduling policy now: {}", relay.scheduling_policy());

    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::ApplySchedulingParameter {
            name: "1.abs-th".to_string(),
            value: "64".to_string(),
            response: resp_tx,
        })
        .await
        .unwrap();
    resp_rx.recv().await.unwrap().expect("Failed to set parameter");
    println!("  Applied scheduler parameter 1.abs-th = 64\n");

    // === Credit-based congestion feedback ===
    println!("=== 6. Credit Window Feedback ===");
    let controller = CreditController::new(
        catalog
            .congestion
            .instantiate(&config.congestion_policy)
            .expect("Failed to instantiate congestion policy"),
        Duration::from_millis(config.rtt_ms),
    )
    .expect("Failed to build credit controller");
    let window = controller.window();
    println!(
        "  Policy '{}' installed: credit {} ({:?})",
        controller.active_name(),
        window.credit,
        window.phase
    );

    for seq in 1..=8u64 {
        let pdu = Pdu::new_data(100, 1, 8, 7, seq, vec![]);
        controller.on_pdu(&pdu);
    }
    let window = controller.window();
    println!(
        "  After 8 clean PDUs: credit {}, right edge {}",
        window.credit, window.right_window_edge
    );

    let mut marked = Pdu::new_data(100, 1, 8, 7, 9, vec![]);
    marked.mark_congestion();
    let window = controller.on_pdu(&marked);
    println!(
        "  After a marked PDU: credit {} ({:?})",
        window.credit, window.phase
    );

    controller
        .select(&catalog.congestion, "dctcp")
        .expect("Failed to swap congestion policy");
    let window = controller.window();
    println!(
        "  Swapped to '{}': credit {} (generation {})\n",
        controller.active_name(),
        window.credit,
        controller.generation()
    );

    // === Relay report ===
    println!("=== 7. Relay Report ===");
    let (resp_tx, mut resp_rx) = mpsc::channel(1);
    relay_handle
        .send(RelayMessage::Report { response: resp_tx })
        .await
        .unwrap();
    let report = resp_rx.recv().await.unwrap();
    match serde_json::to_string_pretty(&report) {
        Ok(rendered) => println!("{}", rendered),
        Err(e) => println!("  Failed to render report: {}", e),
    }

    println!("\n=== Summary ===");
    println!("✓ Policy registry: publish, instantiate, hot swap");
    println!("✓ Forwarding: exact/wildcard lookups, alternative sets, LFA failover");
    println!("✓ Scheduling: per-link queue sets drained by the pump");
    println!("✓ Credit window: growth, marking response, policy swap");

    shutdown.cancel();
    let _ = pump.await;
}
