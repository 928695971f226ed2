//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::ops::RangeInclusive;

use clap::Parser;
use thiserror::Error;

/// Upper bound on the simulated lookup delay.
pub const MAX_DELAY_MS: u64 = 1500;

#[derive(Debug, Clone, Parser)]
#[command(name = "user-query-demo", about = "RPC + query cache hydration demo server")]
pub struct Args {
    /// Address the HTTP server listens on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    /// Shortest simulated lookup delay, in milliseconds.
    #[arg(long, env = "USER_DELAY_MIN_MS", default_value_t = 1000)]
    pub delay_min_ms: u64,

    /// Longest simulated lookup delay, in milliseconds.
    #[arg(long, env = "USER_DELAY_MAX_MS", default_value_t = 1500)]
    pub delay_max_ms: u64,

    /// Emit logs as JSON lines.
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("delay minimum {min}ms exceeds maximum {max}ms")]
    InvertedDelay { min: u64, max: u64 },
    #[error("delay maximum {0}ms exceeds the {limit}ms limit", limit = MAX_DELAY_MS)]
    DelayTooLong(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: SocketAddr,
    pub delay_ms: RangeInclusive<u64>,
    pub log_json: bool,
}

impl Config {
    pub fn from_args(args: Args) -> Result<Self, ConfigError> {
        if args.delay_min_ms > args.delay_max_ms {
            return Err(ConfigError::InvertedDelay {
                min: args.delay_min_ms,
                max: args.delay_max_ms,
            });
        }
        if args.delay_max_ms > MAX_DELAY_MS {
            return Err(ConfigError::DelayTooLong(args.delay_max_ms));
        }
        Ok(Self {
            bind: args.bind,
            delay_ms: args.delay_min_ms..=args.delay_max_ms,
            log_json: args.log_json,
        })
    }
}
