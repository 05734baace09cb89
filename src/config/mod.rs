// =============================================================================
// Conclave Federated Messaging Server - Configuration Module
// =============================================================================
//
// Project: Conclave - Membership Management Core for Federated Messaging
// Author: arkSong (arksong2018@gmail.com) - Founder of Matrixon Innovation Project
// Contributors: Conclave Development Team
// License: Apache 2.0 / MIT
//
// Description:
//   Server and rate-limiting configuration. Rate limits are a table of named
//   policies (per_second, burst_count) read once at startup; the limiter
//   registry materializes one token bucket per (policy, key) from them.
//
// =============================================================================

use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Policy name for the per-room join limiter
pub const RC_JOINS_PER_ROOM: &str = "rc_joins_per_room";
/// Policy name for per-requester joins into locally hosted rooms
pub const RC_JOINS_LOCAL: &str = "rc_joins_local";
/// Policy name for per-requester joins over federation
pub const RC_JOINS_REMOTE: &str = "rc_joins_remote";
/// Policy name for per-room invites
pub const RC_INVITES_PER_ROOM: &str = "rc_invites_per_room";
/// Policy name for per-sender invites
pub const RC_INVITES_PER_ISSUER: &str = "rc_invites_per_issuer";

/// A single named rate limit: refill rate and burst capacity.
///
/// `per_second = 0` means the bucket never refills; once `burst_count`
/// tokens are consumed the key stays limited until an explicit reset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Token refill rate per second
    pub per_second: f64,
    /// Burst capacity (immediate requests allowed)
    pub burst_count: u32,
}

impl RateLimitPolicy {
    pub fn new(per_second: f64, burst_count: u32) -> Self {
        Self {
            per_second,
            burst_count,
        }
    }

    /// Validates rate and capacity bounds
    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.per_second.is_finite() || self.per_second < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "{name}: per_second must be a non-negative number"
            )));
        }
        if self.burst_count < 1 {
            return Err(Error::InvalidConfig(format!(
                "{name}: burst_count must be >= 1"
            )));
        }
        Ok(())
    }
}

/// Rate limiting exemptions for admins and services
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExemptionConfig {
    /// User IDs exempt from rate limiting
    pub exempt_users: Vec<String>,
}

/// Rate limiting configuration, Synapse-style `rc_*` names
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Joins into one room, keyed by room id; shared by local and remote joins
    pub rc_joins_per_room: RateLimitPolicy,
    /// Joins into locally hosted rooms, keyed by requester
    pub rc_joins_local: RateLimitPolicy,
    /// Joins over federation, keyed by requester
    pub rc_joins_remote: RateLimitPolicy,
    /// Invites into one room, keyed by room id
    pub rc_invites_per_room: RateLimitPolicy,
    /// Invites sent by one user, keyed by sender
    pub rc_invites_per_issuer: RateLimitPolicy,
    /// Rate limiting exemptions
    pub exemptions: ExemptionConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            rc_joins_per_room: RateLimitPolicy::new(1.0, 10),
            rc_joins_local: RateLimitPolicy::new(0.1, 10),
            rc_joins_remote: RateLimitPolicy::new(0.01, 10),
            rc_invites_per_room: RateLimitPolicy::new(0.3, 10),
            rc_invites_per_issuer: RateLimitPolicy::new(0.5, 5),
            exemptions: ExemptionConfig::default(),
        }
    }
}

impl RateLimitingConfig {
    /// The named policy table consumed by the limiter registry
    pub fn policies(&self) -> HashMap<String, RateLimitPolicy> {
        HashMap::from([
            (RC_JOINS_PER_ROOM.to_owned(), self.rc_joins_per_room),
            (RC_JOINS_LOCAL.to_owned(), self.rc_joins_local),
            (RC_JOINS_REMOTE.to_owned(), self.rc_joins_remote),
            (RC_INVITES_PER_ROOM.to_owned(), self.rc_invites_per_room),
            (RC_INVITES_PER_ISSUER.to_owned(), self.rc_invites_per_issuer),
        ])
    }

    pub fn validate(&self) -> Result<()> {
        for (name, policy) in self.policies() {
            policy.validate(&name)?;
        }
        Ok(())
    }
}

/// Top-level Conclave configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// The server name of this homeserver; user and room ids referencing it
    /// are local
    pub server_name: String,
    /// Rate limiting policy table
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: "conclave.local".to_owned(),
            rate_limiting: RateLimitingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, overridden by `CONCLAVE_*`
    /// environment variables
    pub fn load(path: &str) -> Result<Self> {
        let config: Config = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("CONCLAVE_").split("__"))
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_name.is_empty() {
            return Err(Error::InvalidConfig(
                "server_name cannot be empty".to_owned(),
            ));
        }
        self.rate_limiting.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server_name, "conclave.local");
        assert_eq!(config.rate_limiting.rc_joins_per_room.burst_count, 10);
    }

    #[test]
    fn test_policy_table_contains_all_names() {
        let policies = RateLimitingConfig::default().policies();
        for name in [
            RC_JOINS_PER_ROOM,
            RC_JOINS_LOCAL,
            RC_JOINS_REMOTE,
            RC_INVITES_PER_ROOM,
            RC_INVITES_PER_ISSUER,
        ] {
            assert!(policies.contains_key(name), "missing policy {name}");
        }
    }

    #[test]
    fn test_rejects_negative_rate() {
        let mut config = Config::default();
        config.rate_limiting.rc_joins_per_room.per_second = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_burst() {
        let mut config = Config::default();
        config.rate_limiting.rc_joins_local.burst_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_server_name() {
        let mut config = Config::default();
        config.server_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_per_second_is_valid() {
        // A never-refilling policy is a legal configuration, used by tests
        // and by admins locking down mass-join abuse.
        let policy = RateLimitPolicy::new(0.0, 2);
        assert!(policy.validate("rc_joins_per_room").is_ok());
    }

    #[test]
    fn test_load_from_toml() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "conclave.toml",
                r#"
                    server_name = "example.test"

                    [rate_limiting.rc_joins_per_room]
                    per_second = 0
                    burst_count = 2
                "#,
            )?;
            let config = Config::load("conclave.toml").expect("config loads");
            assert_eq!(config.server_name, "example.test");
            assert_eq!(config.rate_limiting.rc_joins_per_room.per_second, 0.0);
            assert_eq!(config.rate_limiting.rc_joins_per_room.burst_count, 2);
            // Unspecified policies keep their defaults.
            assert_eq!(config.rate_limiting.rc_invites_per_issuer.burst_count, 5);
            Ok(())
        });
    }
}
