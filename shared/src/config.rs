use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// Settings for the local cache layer, resolved from the environment.
#[derive(Clone, Debug)]
pub struct CacheSettings {
    pub data_dir: String,
    pub default_ttl: Duration,
    pub ttl_overrides: HashMap<String, Duration>,
    pub mailbox_capacity: usize,
    pub event_capacity: usize,
}

impl CacheSettings {
    const DEFAULT_DATA_DIR: &'static str = "./data";
    const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;
    const DEFAULT_MAILBOX_CAPACITY: usize = 256;
    const DEFAULT_EVENT_CAPACITY: usize = 1000;

    /// Load settings from the process environment, reading a `.env` file first if present
    pub fn from_env() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => info!("Loaded environment variables from {}", path.display()),
            Err(_) => info!("No .env file found, using system environment variables"),
        }

        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Resolve settings through an arbitrary variable lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default_ttl = lookup("REEL_DEFAULT_TTL_SECS")
            .and_then(|raw| parse_or_warn::<u64>("REEL_DEFAULT_TTL_SECS", &raw))
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(Self::DEFAULT_TTL_SECS));

        let ttl_overrides = lookup("REEL_TTL_OVERRIDES")
            .map(|raw| parse_overrides(&raw))
            .unwrap_or_default();

        Self {
            data_dir: lookup("REEL_DATA_DIR").unwrap_or_else(|| Self::DEFAULT_DATA_DIR.to_string()),
            default_ttl,
            ttl_overrides,
            mailbox_capacity: lookup("REEL_MAILBOX_CAPACITY")
                .and_then(|raw| parse_or_warn::<usize>("REEL_MAILBOX_CAPACITY", &raw))
                .filter(|capacity| *capacity > 0)
                .unwrap_or(Self::DEFAULT_MAILBOX_CAPACITY),
            event_capacity: lookup("REEL_EVENT_CAPACITY")
                .and_then(|raw| parse_or_warn::<usize>("REEL_EVENT_CAPACITY", &raw))
                .filter(|capacity| *capacity > 0)
                .unwrap_or(Self::DEFAULT_EVENT_CAPACITY),
        }
    }

    /// TTL for the named entity, list or collection
    pub fn ttl_for(&self, name: &str) -> Duration {
        self.ttl_overrides
            .get(name)
            .copied()
            .unwrap_or(self.default_ttl)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_vars(|_| None)
    }
}

fn parse_or_warn<T: std::str::FromStr>(name: &str, raw: &str) -> Option<T> {
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{} has invalid value '{}', using default", name, raw);
            None
        }
    }
}

// "movie=3600, person=600"
fn parse_overrides(raw: &str) -> HashMap<String, Duration> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let Some((name, secs)) = pair.split_once('=') else {
                warn!("Ignoring malformed TTL override '{}'", pair);
                return None;
            };
            let secs = parse_or_warn::<u64>("REEL_TTL_OVERRIDES", secs)?;
            Some((name.trim().to_string(), Duration::from_secs(secs)))
        })
        .collect()
}
