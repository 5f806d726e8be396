//! Queue configuration.
//!
//! Loaded from code, from serde (any format), or from the environment.
//! Validated once when the queue is built.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{QueueError, Result, StateName};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6379;
pub const DEFAULT_CONCURRENCY: usize = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Namespace of every key this queue touches.
    pub queue_name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Deliveries allowed in flight before a completion is reported.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// State whose queue the consumer pops from.
    #[serde(default)]
    pub consume_state: Option<StateName>,

    /// Upper bound on one blocking pop; the pop is re-issued after it.
    /// Unset blocks until an item arrives.
    #[serde(default)]
    pub pop_timeout_ms: Option<u64>,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl QueueConfig {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            host: default_host(),
            port: default_port(),
            concurrency: default_concurrency(),
            consume_state: None,
            pop_timeout_ms: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_consume_state(mut self, state: impl Into<StateName>) -> Self {
        self.consume_state = Some(state.into());
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Load from environment variables.
    ///
    /// | var | field |
    /// |---|---|
    /// | `STATEQUEUE_NAME` (required) | `queue_name` |
    /// | `REDIS_HOST` | `host` |
    /// | `REDIS_PORT` | `port` |
    /// | `STATEQUEUE_CONCURRENCY` | `concurrency` |
    /// | `STATEQUEUE_CONSUME_STATE` | `consume_state` |
    /// | `STATEQUEUE_POP_TIMEOUT_MS` | `pop_timeout_ms` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env` with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let queue_name = lookup("STATEQUEUE_NAME").ok_or_else(|| {
            QueueError::Config("required environment variable STATEQUEUE_NAME is not set".into())
        })?;
        let mut config = Self::new(queue_name);

        if let Some(host) = lookup("REDIS_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("REDIS_PORT") {
            config.port = parse_var("REDIS_PORT", &port)?;
        }
        if let Some(concurrency) = lookup("STATEQUEUE_CONCURRENCY") {
            config.concurrency = parse_var("STATEQUEUE_CONCURRENCY", &concurrency)?;
        }
        config.consume_state = lookup("STATEQUEUE_CONSUME_STATE").map(StateName::new);
        if let Some(timeout) = lookup("STATEQUEUE_POP_TIMEOUT_MS") {
            config.pop_timeout_ms = Some(parse_var("STATEQUEUE_POP_TIMEOUT_MS", &timeout)?);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_name.is_empty() {
            return Err(QueueError::Config("queue_name must not be empty".into()));
        }
        if self.concurrency < 1 {
            return Err(QueueError::Config(format!(
                "concurrency must be at least 1, got {}",
                self.concurrency
            )));
        }
        if let Some(state) = &self.consume_state
            && (state.is_empty() || state.is_reserved())
        {
            return Err(QueueError::Config(format!(
                "consume_state '{state}' is reserved or empty"
            )));
        }
        Ok(())
    }

    pub fn pop_timeout(&self) -> Option<Duration> {
        self.pop_timeout_ms.map(Duration::from_millis)
    }

    pub fn redis_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| QueueError::Config(format!("{name} has an invalid value: {raw:?}")))
}
