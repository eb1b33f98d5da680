// SPDX-License-Identifier: EUPL-1.2-or-later
// Copyright © 2026-present REMUX Contributors

//! Configuration management for the relay
//!
//! Supports both command-line arguments and TOML configuration files.
//! Policy selection, scheduler profiles, and credit parameters all
//! carry defaults, so a bare `remux` starts with the default policy on
//! every component.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use crate::policies::flow_balancer::BalancerStrategy;
use crate::queues::{DropOrMark, QosProfile};

/// Command-line arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "remux")]
#[command(author = "REMUX Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Policy-driven PDU relaying engine", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file (overrides other arguments)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address of this node
    #[arg(long, value_name = "ADDRESS", default_value = "1")]
    pub address: u64,

    /// Forwarding policy set active at startup
    #[arg(long, value_name = "POLICY")]
    pub forwarding: Option<String>,

    /// Scheduling policy set active at startup
    #[arg(long, value_name = "POLICY")]
    pub scheduling: Option<String>,

    /// Congestion feedback policy set active at startup
    #[arg(long, value_name = "POLICY")]
    pub congestion: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub policies: PoliciesConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub lfa: LfaConfig,
    #[serde(default)]
    pub balancer: BalancerConfig,
    #[serde(default)]
    pub credit: CreditConfig,
}

/// Node section of config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_node_name")]
    pub name: String,
    #[serde(default = "default_address")]
    pub address: u64,
}

/// Active policy sets per component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoliciesConfig {
    #[serde(default = "default_policy_name")]
    pub forwarding: String,
    #[serde(default = "default_policy_name")]
    pub scheduling: String,
    #[serde(default = "default_congestion_name")]
    pub congestion: String,
}

/// Scheduler section of config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Queue cap for the default and ECN schedulers
    #[serde(default = "default_q_max")]
    pub q_max: usize,
    /// Occupancy at which the ECN scheduler starts marking
    #[serde(default = "default_ecn_threshold")]
    pub ecn_threshold: usize,
    /// Per-QoS-class profiles for the cherish/urgency schedulers
    #[serde(default = "default_profiles")]
    pub profiles: Vec<QosProfile>,
}

/// Link failover section of config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LfaConfig {
    /// Move entries back to their primary when it comes up again
    #[serde(default = "default_revert_on_up")]
    pub revert_on_up: bool,
}

/// Flow balancer section of config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// "random" or "least-loaded"
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Idle time after which a sticky flow assignment expires
    #[serde(default = "default_flow_timeout_ms")]
    pub flow_timeout_ms: u64,
}

/// Credit-based flow control section of config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Starting window for the binary-feedback policy
    #[serde(default = "default_initial_credit")]
    pub initial_credit: u32,
    /// Round-trip estimate handed to the controller
    #[serde(default = "default_rtt_ms")]
    pub rtt_ms: u64,
    /// DCTCP EWMA gain exponent
    #[serde(default = "default_shift_g")]
    pub shift_g: u32,
    /// Additive window increment for the binary-feedback policy
    #[serde(default = "default_w_inc")]
    pub w_inc: u32,
}

fn default_node_name() -> String {
    "remux-node".to_string()
}

fn default_address() -> u64 {
    1
}

fn default_policy_name() -> String {
    "default".to_string()
}

fn default_congestion_name() -> String {
    "red".to_string()
}

fn default_q_max() -> usize {
    1000
}

fn default_ecn_threshold() -> usize {
    20
}

fn default_revert_on_up() -> bool {
    true
}

fn default_strategy() -> String {
    "random".to_string()
}

fn default_flow_timeout_ms() -> u64 {
    60_000
}

fn default_initial_credit() -> u32 {
    3
}

fn default_rtt_ms() -> u64 {
    100
}

fn default_shift_g() -> u32 {
    4
}

fn default_w_inc() -> u32 {
    1
}

/// Three classes covering the usual spread: a cherished low-urgency
/// class that marks instead of dropping, a middle class, and a lossy
/// best-effort class.
pub fn default_profiles() -> Vec<QosProfile> {
    vec![
        QosProfile {
            abs_threshold: 200,
            burst: 131_072,
            rate: 4_194_304,
            drop_or_mark: DropOrMark::Mark,
            ..QosProfile::new(1)
        },
        QosProfile {
            urgency: 1,
            skip_probability: 10,
            drop_probability: 25,
            abs_threshold: 100,
            threshold: 80,
            ..QosProfile::new(2)
        },
        QosProfile {
            urgency: 2,
            skip_probability: 20,
            drop_probability: 50,
            abs_threshold: 50,
            threshold: 30,
            burst: 32_768,
            rate: 262_144,
            ..QosProfile::new(0)
        },
    ]
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: default_node_name(),
            address: default_address(),
        }
    }
}

impl Default for PoliciesConfig {
    fn default() -> Self {
        Self {
            forwarding: default_policy_name(),
            scheduling: default_policy_name(),
            congestion: default_congestion_name(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            q_max: default_q_max(),
            ecn_threshold: default_ecn_threshold(),
            profiles: default_profiles(),
        }
    }
}

impl Default for LfaConfig {
    fn default() -> Self {
        Self {
            revert_on_up: default_revert_on_up(),
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            flow_timeout_ms: default_flow_timeout_ms(),
        }
    }
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            initial_credit: default_initial_credit(),
            rtt_ms: default_rtt_ms(),
            shift_g: default_shift_g(),
            w_inc: default_w_inc(),
        }
    }
}

/// Unified configuration after parsing CLI or file
#[derive(Debug, Clone)]
pub struct RelayConfiguration {
    pub node_name: String,
    pub address: u64,
    pub forwarding_policy: String,
    pub scheduling_policy: String,
    pub congestion_policy: String,
    pub q_max: usize,
    pub ecn_threshold: usize,
    pub profiles: Vec<QosProfile>,
    pub revert_on_up: bool,
    pub balancer_strategy: String,
    pub flow_timeout_ms: u64,
    pub initial_credit: u32,
    pub rtt_ms: u64,
    pub shift_g: u32,
    pub w_inc: u32,
}

impl Default for RelayConfiguration {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            address: default_address(),
            forwarding_policy: default_policy_name(),
            scheduling_policy: default_policy_name(),
            congestion_policy: default_congestion_name(),
            q_max: default_q_max(),
            ecn_threshold: default_ecn_threshold(),
            profiles: default_profiles(),
            revert_on_up: default_revert_on_up(),
            balancer_strategy: default_strategy(),
            flow_timeout_ms: default_flow_timeout_ms(),
            initial_credit: default_initial_credit(),
            rtt_ms: default_rtt_ms(),
            shift_g: default_shift_g(),
            w_inc: default_w_inc(),
        }
    }
}

impl RelayConfiguration {
    /// Creates configuration from command-line arguments
    pub fn from_cli(args: CliArgs) -> Result<Self, String> {
        // If config file is specified, load from file
        if let Some(config_path) = args.config {
            return Self::from_file(&config_path);
        }

        let mut config = Self {
            address: args.address,
            ..Self::default()
        };
        if let Some(forwarding) = args.forwarding {
            config.forwarding_policy = forwarding;
        }
        if let Some(scheduling) = args.scheduling {
            config.scheduling_policy = scheduling;
        }
        if let Some(congestion) = args.congestion {
            config.congestion_policy = congestion;
        }
        Ok(config)
    }

    /// Loads configuration from a TOML file
    pub fn from_file(path: &PathBuf) -> Result<Self, String> {
        let contents =
            fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

        let config: TomlConfig =
            toml::from_str(&contents).map_err(|e| format!("Failed to parse TOML config: {}", e))?;

        Ok(Self {
            node_name: config.node.name,
            address: config.node.address,
            forwarding_policy: config.policies.forwarding,
            scheduling_policy: config.policies.scheduling,
            congestion_policy: config.policies.congestion,
            q_max: config.scheduler.q_max,
            ecn_threshold: config.scheduler.ecn_threshold,
            profiles: config.scheduler.profiles,
            revert_on_up: config.lfa.revert_on_up,
            balancer_strategy: config.balancer.strategy,
            flow_timeout_ms: config.balancer.flow_timeout_ms,
            initial_credit: config.credit.initial_credit,
            rtt_ms: config.credit.rtt_ms,
            shift_g: config.credit.shift_g,
            w_inc: config.credit.w_inc,
        })
    }

    /// Validates ranges the policy constructors rely on
    pub fn validate(&self) -> Result<(), String> {
        if self.q_max == 0 {
            return Err("scheduler q_max must be at least 1".to_string());
        }
        if self.initial_credit == 0 {
            return Err("credit initial_credit must be at least 1".to_string());
        }
        if self.shift_g > 10 {
            return Err(format!(
                "credit shift_g must be at most 10, got {}",
                self.shift_g
            ));
        }
        self.balancer_strategy.parse::<BalancerStrategy>()?;

        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if !seen.insert(profile.qos_class) {
                return Err(format!(
                    "duplicate QoS profile for class {}",
                    profile.qos_class
                ));
            }
            if profile.skip_probability > 100 || profile.drop_probability > 100 {
                return Err(format!(
                    "probabilities for QoS class {} must be 0-100",
                    profile.qos_class
                ));
            }
        }
        Ok(())
    }

    /// Prints configuration summary
    pub fn print_summary(&self) {
        println!("=== Relay Configuration ===");
        println!("Node: {} (address {})", self.node_name, self.address);
        println!("Forwarding policy: {}", self.forwarding_policy);
        println!(
            "Scheduling policy: {} (q_max {})",
            self.scheduling_policy, self.q_max
        );
        println!("Congestion policy: {}", self.congestion_policy);
        println!("QoS profiles: {}", self.profiles.len());
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_sections_take_defaults() {
        let toml_str = r#"
[node]
name = "router-7"
address = 7

[policies]
scheduling = "cherish-urgency"

[[scheduler.profiles]]
qos_class = 1
abs_threshold = 10
"#;
        let parsed: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(parsed.node.name, "router-7");
        assert_eq!(parsed.node.address, 7);
        assert_eq!(parsed.policies.scheduling, "cherish-urgency");
        assert_eq!(parsed.policies.forwarding, "default");
        assert_eq!(parsed.scheduler.q_max, 1000);
        assert_eq!(parsed.scheduler.profiles.len(), 1);
        assert_eq!(parsed.scheduler.profiles[0].abs_threshold, 10);
        assert_eq!(parsed.scheduler.profiles[0].burst, 65536);
        assert!(parsed.lfa.revert_on_up);
        assert_eq!(parsed.credit.shift_g, 4);
    }

    #[test]
    fn test_empty_toml_is_fully_defaulted() {
        let parsed: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(parsed.node.name, "remux-node");
        assert_eq!(parsed.policies.congestion, "red");
        assert_eq!(parsed.balancer.strategy, "random");
        assert_eq!(parsed.scheduler.profiles.len(), 3);
    }

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs {
            config: None,
            address: 9,
            forwarding: Some("lfa".to_string()),
            scheduling: None,
            congestion: Some("dctcp".to_string()),
        };
        let config = RelayConfiguration::from_cli(args).unwrap();
        assert_eq!(config.address, 9);
        assert_eq!(config.forwarding_policy, "lfa");
        assert_eq!(config.scheduling_policy, "default");
        assert_eq!(config.congestion_policy, "dctcp");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(RelayConfiguration::default().validate().is_ok());

        let mut config = RelayConfiguration::default();
        config.q_max = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfiguration::default();
        config.shift_g = 11;
        assert!(config.validate().is_err());

        let mut config = RelayConfiguration::default();
        config.balancer_strategy = "round-robin".to_string();
        assert!(config.validate().is_err());

        let mut config = RelayConfiguration::default();
        config.profiles.push(config.profiles[0].clone());
        assert!(config.validate().is_err());

        let mut config = RelayConfiguration::default();
        config.profiles[0].drop_probability = 101;
        assert!(config.validate().is_err());
    }
}
