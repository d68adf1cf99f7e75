use anyhow::{Context, Result, anyhow};
use std::env;
use std::time::Duration;

use crate::discovery::cache::{DEFAULT_CACHE_TTL, DEFAULT_HERD_WINDOW};
use crate::discovery::etcd::{DEFAULT_DIAL_TIMEOUT, DEFAULT_FETCH_TIMEOUT};
use crate::discovery::{DecodePolicy, EtcdDirectoryConfig};
use crate::web::ForwardConfig;
use crate::web::forward::DEFAULT_UPSTREAM_TIMEOUT;

/// Router configuration
///
/// Loaded from the environment (a `.env` file is honoured) and adjustable
/// with builder-style setters.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Listen host
    pub host: String,

    /// Listen port
    pub port: u16,

    /// etcd endpoints
    pub etcd_hosts: Vec<String>,

    /// Bound on one forwarded request
    pub upstream_timeout: Duration,

    /// Lifetime of a cached partition set
    pub cache_ttl: Duration,

    /// Minimum interval between two directory fetches of one queue
    pub herd_window: Duration,

    /// Bound on one directory fetch
    pub directory_timeout: Duration,

    /// Bound on the startup probe of the metadata store
    pub dial_timeout: Duration,

    /// Handling of undecodable partition records
    pub decode_policy: DecodePolicy,

    /// Drop hop-by-hop headers when forwarding
    pub strip_hop_by_hop_headers: bool,

    /// Forward to partitions over cleartext HTTP/2
    pub upstream_http2: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9090,
            etcd_hosts: Vec::new(),
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            herd_window: DEFAULT_HERD_WINDOW,
            directory_timeout: DEFAULT_FETCH_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            decode_policy: DecodePolicy::FailClosed,
            strip_hop_by_hop_headers: false,
            upstream_http2: false,
        }
    }
}

impl RouterConfig {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = var("HTTP_HOST").unwrap_or(defaults.host);

        let port = match var("HTTP_PORT") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .context("HTTP_PORT must be a valid u16")?,
            None => defaults.port,
        };

        let etcd_hosts = var("ETCD_HOSTS")
            .map(|raw| split_hosts(&raw))
            .unwrap_or_default();

        let millis = |key: &str, default: Duration| -> Result<Duration> {
            match var(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .with_context(|| format!("{key} must be a number of milliseconds")),
                None => Ok(default),
            }
        };

        let upstream_timeout = millis("SQ_UPSTREAM_TIMEOUT_MS", defaults.upstream_timeout)?;
        let cache_ttl = millis("SQ_CACHE_TTL_MS", defaults.cache_ttl)?;
        let herd_window = millis("SQ_HERD_WINDOW_MS", defaults.herd_window)?;
        let directory_timeout = millis("SQ_DIRECTORY_TIMEOUT_MS", defaults.directory_timeout)?;
        let dial_timeout = millis("SQ_DIAL_TIMEOUT_MS", defaults.dial_timeout)?;

        let decode_policy = match var("SQ_DECODE_POLICY") {
            Some(raw) => raw.parse::<DecodePolicy>()?,
            None => defaults.decode_policy,
        };

        let strip_hop_by_hop_headers = match var("SQ_STRIP_HOP_BY_HOP_HEADERS") {
            Some(raw) => parse_bool(&raw)
                .ok_or_else(|| anyhow!("SQ_STRIP_HOP_BY_HOP_HEADERS must be true or false"))?,
            None => defaults.strip_hop_by_hop_headers,
        };

        let upstream_http2 = match var("SQ_UPSTREAM_HTTP2") {
            Some(raw) => {
                parse_bool(&raw).ok_or_else(|| anyhow!("SQ_UPSTREAM_HTTP2 must be true or false"))?
            }
            None => defaults.upstream_http2,
        };

        Ok(Self {
            host,
            port,
            etcd_hosts,
            upstream_timeout,
            cache_ttl,
            herd_window,
            directory_timeout,
            dial_timeout,
            decode_policy,
            strip_hop_by_hop_headers,
            upstream_http2,
        })
    }

    /// Set the listen host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the etcd endpoints from a comma separated list
    pub fn etcd_hosts(mut self, hosts: &str) -> Self {
        self.etcd_hosts = split_hosts(hosts);
        self
    }

    /// Set the decode policy
    pub fn decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.decode_policy = policy;
        self
    }

    /// Checks the values nothing downstream can work with.
    pub fn validate(&self) -> Result<()> {
        if self.etcd_hosts.is_empty() {
            return Err(anyhow!(
                "no etcd hosts configured, set ETCD_HOSTS or pass --etcd-hosts"
            ));
        }
        for (name, value) in [
            ("upstream timeout", self.upstream_timeout),
            ("cache ttl", self.cache_ttl),
            ("herd window", self.herd_window),
            ("directory timeout", self.directory_timeout),
            ("dial timeout", self.dial_timeout),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn etcd_config(&self) -> EtcdDirectoryConfig {
        EtcdDirectoryConfig::new(self.etcd_hosts.clone())
            .fetch_timeout(self.directory_timeout)
            .dial_timeout(self.dial_timeout)
            .decode_policy(self.decode_policy)
    }

    pub fn forward_config(&self) -> ForwardConfig {
        ForwardConfig {
            timeout: self.upstream_timeout,
            strip_hop_by_hop: self.strip_hop_by_hop_headers,
            http2_prior_knowledge: self.upstream_http2,
        }
    }
}

fn split_hosts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = RouterConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.port, 9090);
        assert_eq!(config.cache_ttl, Duration::from_secs(10));
        assert_eq!(config.herd_window, Duration::from_secs(10));
        assert_eq!(config.directory_timeout, Duration::from_secs(2));
        assert_eq!(config.upstream_timeout, Duration::from_secs(10));
        assert_eq!(config.decode_policy, DecodePolicy::FailClosed);
        assert!(!config.strip_hop_by_hop_headers);
        assert!(!config.upstream_http2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn reads_overrides() {
        let config = RouterConfig::from_lookup(lookup(&[
            ("HTTP_PORT", "8443"),
            ("ETCD_HOSTS", "http://etcd-1:2379, etcd-2:2379,,"),
            ("SQ_CACHE_TTL_MS", "2500"),
            ("SQ_DECODE_POLICY", "skip-malformed"),
            ("SQ_STRIP_HOP_BY_HOP_HEADERS", "true"),
            ("SQ_UPSTREAM_HTTP2", "on"),
        ]))
        .unwrap();

        assert_eq!(config.address(), "0.0.0.0:8443");
        assert_eq!(config.etcd_hosts, vec!["http://etcd-1:2379", "etcd-2:2379"]);
        assert_eq!(config.cache_ttl, Duration::from_millis(2500));
        assert_eq!(config.etcd_config().decode_policy, DecodePolicy::SkipMalformed);
        assert!(config.forward_config().strip_hop_by_hop);
        assert!(config.forward_config().http2_prior_knowledge);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(RouterConfig::from_lookup(lookup(&[("HTTP_PORT", "http")])).is_err());
        assert!(RouterConfig::from_lookup(lookup(&[("SQ_CACHE_TTL_MS", "-1")])).is_err());
        assert!(RouterConfig::from_lookup(lookup(&[("SQ_DECODE_POLICY", "maybe")])).is_err());
        assert!(
            RouterConfig::from_lookup(lookup(&[("SQ_STRIP_HOP_BY_HOP_HEADERS", "sure")])).is_err()
        );
        assert!(RouterConfig::from_lookup(lookup(&[("SQ_UPSTREAM_HTTP2", "h2")])).is_err());
    }

    #[test]
    fn zero_timeouts_fail_validation() {
        let mut config = RouterConfig::default().etcd_hosts("etcd:2379");
        assert!(config.validate().is_ok());

        config.directory_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_herd_window_fails_validation() {
        let config = RouterConfig::from_lookup(lookup(&[
            ("ETCD_HOSTS", "etcd:2379"),
            ("SQ_HERD_WINDOW_MS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.herd_window, Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("herd window"));
    }
}
