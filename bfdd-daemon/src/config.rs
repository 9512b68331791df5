//
// Copyright (c) The bfdd Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::IpAddr;

use bfdd_core::{SessionConfig, UnsolicitedPolicy};
use serde::Deserialize;

// Static declarative configuration loaded from a TOML file at startup,
// grounded in `holo_daemon::config::Config`'s "deserialize with
// `toml`/`serde`, fall back to `Default` on a missing or unreadable file"
// shape. Unlike the teacher this carries no northbound/gRPC surface: the
// session list here *is* the declarative set spec.md Section 4.7's
// `Reconcile` converges against, since a YANG/gRPC control plane is
// explicitly out of scope.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: Logging,
    pub event_bus_capacity: usize,
    pub drain_timeout_ms: u64,
    pub unsolicited: Option<Unsolicited>,
    pub sessions: Vec<SessionConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub enabled: bool,
    pub level: String,
    pub style: LoggingStyle,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingStyle {
    #[default]
    Full,
    Compact,
    Json,
    Pretty,
}

// RFC 9468 unsolicited ("passive-created") session policy, generalized from
// `UnsolicitedPolicy` into a deserializable shape.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Unsolicited {
    pub allowed_peers: Vec<IpAddr>,
    pub max_sessions: usize,
    pub desired_min_tx_us: u32,
    pub required_min_rx_us: u32,
    pub detect_mult: u8,
    pub cleanup_delay_ms: u64,
}

impl Unsolicited {
    pub fn into_policy(self) -> UnsolicitedPolicy {
        UnsolicitedPolicy {
            allowed_peers: self.allowed_peers,
            max_sessions: self.max_sessions,
            desired_min_tx_us: self.desired_min_tx_us,
            required_min_rx_us: self.required_min_rx_us,
            detect_mult: self.detect_mult,
            cleanup_delay_ms: self.cleanup_delay_ms,
        }
    }
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/bfddd.toml";

    pub fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => {
                toml::from_str(&config_str).expect("failed to parse configuration file")
            }
            Err(error) => {
                eprintln!("failed to load configuration file {config_file}: {error}");
                eprintln!("falling back to default configuration...");
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            logging: Logging::default(),
            event_bus_capacity: 256,
            drain_timeout_ms: 2_000,
            unsolicited: None,
            sessions: Vec::new(),
        }
    }
}

impl Default for Logging {
    fn default() -> Logging {
        Logging {
            enabled: true,
            level: "bfdd=debug,bfdd_core=debug,bfdd_transport=debug".to_owned(),
            style: LoggingStyle::Full,
        }
    }
}
