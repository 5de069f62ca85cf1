//! Coordinator configuration.
//!
//! Names, domains and retry policies are passed explicitly when a coordinator
//! is constructed.
//!
//! ```
//! use sagaflow_runtime::config::CommandSagaConfig;
//! use sagaflow_runtime::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let config = CommandSagaConfig::new("leagues", "create-league")
//!     .with_execute_retry(RetryPolicy::new().with_max_attempts(5))
//!     .with_dispatch_timeout(Duration::from_secs(2));
//! assert_eq!(config.execute_retry.max_attempts(), 5);
//! ```

use crate::retry::RetryPolicy;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration of a command saga.
#[derive(Debug, Clone)]
pub struct CommandSagaConfig {
    /// Domain of the command logs.
    pub domain_name: String,
    /// Command type name; also the operation type of its logs.
    pub command_name: String,
    /// Policy for the validate step.
    pub validate_retry: RetryPolicy,
    /// Policy for the execute step.
    pub execute_retry: RetryPolicy,
    /// Policy for each notification dispatch.
    pub notify_retry: RetryPolicy,
    /// Bound on one dispatch attempt.
    pub dispatch_timeout: Duration,
}

impl CommandSagaConfig {
    /// Configuration with default policies.
    #[must_use]
    pub fn new(domain_name: impl Into<String>, command_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            command_name: command_name.into(),
            validate_retry: RetryPolicy::default(),
            execute_retry: RetryPolicy::default(),
            notify_retry: RetryPolicy::default(),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Configuration with overrides read from `{prefix}_MAX_ATTEMPTS`,
    /// `{prefix}_INITIAL_DELAY_MS` and `{prefix}_DISPATCH_TIMEOUT_MS`.
    ///
    /// Retry overrides apply to every step policy. Unparseable values are
    /// ignored with a warning.
    #[must_use]
    pub fn from_env(
        prefix: &str,
        domain_name: impl Into<String>,
        command_name: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(domain_name, command_name);
        let overrides = EnvOverrides::read(prefix);
        config.validate_retry = overrides.apply(config.validate_retry);
        config.execute_retry = overrides.apply(config.execute_retry);
        config.notify_retry = overrides.apply(config.notify_retry);
        if let Some(timeout) = overrides.dispatch_timeout {
            config.dispatch_timeout = timeout;
        }
        config
    }

    /// Set the validate policy
    #[must_use]
    pub fn with_validate_retry(mut self, policy: RetryPolicy) -> Self {
        self.validate_retry = policy;
        self
    }

    /// Set the execute policy
    #[must_use]
    pub fn with_execute_retry(mut self, policy: RetryPolicy) -> Self {
        self.execute_retry = policy;
        self
    }

    /// Set the notification policy
    #[must_use]
    pub fn with_notify_retry(mut self, policy: RetryPolicy) -> Self {
        self.notify_retry = policy;
        self
    }

    /// Set the dispatch timeout
    #[must_use]
    pub const fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }
}

/// Configuration of a query saga.
#[derive(Debug, Clone)]
pub struct QuerySagaConfig {
    /// Domain of the query logs.
    pub domain_name: String,
    /// Query type name; also the operation type of its logs.
    pub query_name: String,
    /// Policy for the validate step.
    pub validate_retry: RetryPolicy,
    /// Policy for each projection run.
    pub projection_retry: RetryPolicy,
    /// Policy for each output dispatch.
    pub output_retry: RetryPolicy,
    /// Bound on one dispatch attempt.
    pub dispatch_timeout: Duration,
}

impl QuerySagaConfig {
    /// Configuration with default policies.
    #[must_use]
    pub fn new(domain_name: impl Into<String>, query_name: impl Into<String>) -> Self {
        Self {
            domain_name: domain_name.into(),
            query_name: query_name.into(),
            validate_retry: RetryPolicy::default(),
            projection_retry: RetryPolicy::default(),
            output_retry: RetryPolicy::default(),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }

    /// Configuration with environment overrides, as
    /// [`CommandSagaConfig::from_env`].
    #[must_use]
    pub fn from_env(
        prefix: &str,
        domain_name: impl Into<String>,
        query_name: impl Into<String>,
    ) -> Self {
        let mut config = Self::new(domain_name, query_name);
        let overrides = EnvOverrides::read(prefix);
        config.validate_retry = overrides.apply(config.validate_retry);
        config.projection_retry = overrides.apply(config.projection_retry);
        config.output_retry = overrides.apply(config.output_retry);
        if let Some(timeout) = overrides.dispatch_timeout {
            config.dispatch_timeout = timeout;
        }
        config
    }

    /// Set the validate policy
    #[must_use]
    pub fn with_validate_retry(mut self, policy: RetryPolicy) -> Self {
        self.validate_retry = policy;
        self
    }

    /// Set the projection policy
    #[must_use]
    pub fn with_projection_retry(mut self, policy: RetryPolicy) -> Self {
        self.projection_retry = policy;
        self
    }

    /// Set the output policy
    #[must_use]
    pub fn with_output_retry(mut self, policy: RetryPolicy) -> Self {
        self.output_retry = policy;
        self
    }

    /// Set the dispatch timeout
    #[must_use]
    pub const fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }
}

/// Client-side wait settings for [`crate::wait::spawn_and_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// How long the caller waits before getting a handle back.
    pub timeout: Duration,
    /// How often the query log is polled.
    pub poll_interval: Duration,
}

impl WaitOptions {
    /// Set the timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Default)]
struct EnvOverrides {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    dispatch_timeout: Option<Duration>,
}

impl EnvOverrides {
    fn read(prefix: &str) -> Self {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    fn from_lookup(prefix: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parse = |suffix: &str| -> Option<u64> {
            let key = format!("{prefix}_{suffix}");
            let raw = lookup(&key)?;
            parse_or_warn(&key, &raw)
        };

        Self {
            max_attempts: parse("MAX_ATTEMPTS").and_then(|n| u32::try_from(n).ok()),
            initial_delay: parse("INITIAL_DELAY_MS").map(Duration::from_millis),
            dispatch_timeout: parse("DISPATCH_TIMEOUT_MS").map(Duration::from_millis),
        }
    }

    fn apply(&self, mut policy: RetryPolicy) -> RetryPolicy {
        if let Some(attempts) = self.max_attempts {
            policy = policy.with_max_attempts(attempts);
        }
        if let Some(delay) = self.initial_delay {
            policy = policy.with_initial_delay(delay);
        }
        policy
    }
}

fn parse_or_warn<T: FromStr>(key: &str, raw: &str) -> Option<T> {
    raw.trim().parse().map_or_else(
        |_| {
            tracing::warn!(key, value = raw, "Ignoring unparseable configuration value");
            None
        },
        Some,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn overrides_apply_to_policies() {
        let overrides = EnvOverrides::from_lookup(
            "LEAGUE",
            lookup(&[("LEAGUE_MAX_ATTEMPTS", "7"), ("LEAGUE_INITIAL_DELAY_MS", "25")]),
        );
        let policy = overrides.apply(RetryPolicy::default());
        assert_eq!(policy.max_attempts(), 7);
        assert_eq!(policy.initial_delay(), Duration::from_millis(25));
        assert!(overrides.dispatch_timeout.is_none());
    }

    #[test]
    fn unparseable_values_are_ignored() {
        let overrides = EnvOverrides::from_lookup(
            "LEAGUE",
            lookup(&[("LEAGUE_MAX_ATTEMPTS", "lots"), ("LEAGUE_DISPATCH_TIMEOUT_MS", "1500")]),
        );
        assert!(overrides.max_attempts.is_none());
        assert_eq!(overrides.dispatch_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn builders_set_fields() {
        let config = QuerySagaConfig::new("leagues", "get-league-summary")
            .with_output_retry(RetryPolicy::none())
            .with_dispatch_timeout(Duration::from_millis(50));
        assert_eq!(config.output_retry.max_attempts(), 1);
        assert_eq!(config.dispatch_timeout, Duration::from_millis(50));

        let wait = WaitOptions::default().with_timeout(Duration::from_secs(1));
        assert_eq!(wait.timeout, Duration::from_secs(1));
    }
}
