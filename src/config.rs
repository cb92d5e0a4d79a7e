//! config.rs
//!
//! Process configuration, read once from the environment at startup.

use std::str::FromStr;
use std::time::Duration;

/// Default apcupsd NIS port.
pub const DEFAULT_APCUPSD_PORT: u16 = 3551;

/// Port the hub listens on for pushes.
pub const DEFAULT_HUB_PORT: u16 = 39501;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub apcupsd_host: String,
    pub apcupsd_port: u16,
    pub hub_host: String,
    pub hub_port: u16,
    pub listen_port: u16,
    /// Connect, read and write timeout for the NIS exchange.
    pub timeout: Duration,
    /// Overall timeout for one hub push.
    pub push_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apcupsd_host: "localhost".to_string(),
            apcupsd_port: DEFAULT_APCUPSD_PORT,
            hub_host: "192.168.7.250".to_string(),
            hub_port: DEFAULT_HUB_PORT,
            listen_port: 8080,
            timeout: Duration::from_secs(5),
            push_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Missing or unparseable
    /// values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            apcupsd_host: lookup("APCUPSD_HOST").unwrap_or(defaults.apcupsd_host),
            apcupsd_port: parse_or(&lookup, "APCUPSD_PORT", defaults.apcupsd_port),
            hub_host: lookup("HUB_HOST").unwrap_or(defaults.hub_host),
            hub_port: parse_or(&lookup, "HUB_PORT", defaults.hub_port),
            listen_port: parse_or(&lookup, "LISTEN_PORT", defaults.listen_port),
            timeout: secs_or(&lookup, "TIMEOUT", defaults.timeout),
            push_timeout: secs_or(&lookup, "PUSH_TIMEOUT", defaults.push_timeout),
        }
    }

    pub fn hub_url(&self) -> String {
        format!("http://{}:{}/notify", self.hub_host, self.hub_port)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid value {:?} for {}", raw, key);
            default
        }),
        None => default,
    }
}

/// A whole number of seconds. Zero is refused: a zero connect timeout makes
/// every NIS query fail.
fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default.as_secs()) {
        0 => {
            log::warn!("Ignoring zero value for {}", key);
            default
        }
        secs => Duration::from_secs(secs),
    }
}
