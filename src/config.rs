use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration shared by every session.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Deadline applied to every SQL operation, including connecting.
    #[serde(with = "seconds")]
    pub sql_timeout: Duration,

    /// DNS domain of the Kubernetes cluster, used to build service endpoints.
    pub cluster_domain: String,
}

/// Configuration of the replication watcher.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WatcherConfig {
    /// Database holding the probe table. Created when missing.
    pub probe_database: String,

    /// Table written on the master and read back on the replicas.
    pub probe_table: String,

    /// Delay between two probes of the same service.
    #[serde(with = "seconds")]
    pub interval: Duration,

    /// Address of the health and metrics server.
    pub listen_addr: SocketAddr,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sql_timeout: defaults::sql_timeout(),
            cluster_domain: defaults::cluster_domain(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            probe_database: defaults::probe_database(),
            probe_table: defaults::probe_table(),
            interval: defaults::interval(),
            listen_addr: defaults::listen_addr(),
        }
    }
}

impl SessionConfig {
    /// Read the configuration from `KUBERLOGIC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            sql_timeout: parse(&lookup, "KUBERLOGIC_SQL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.sql_timeout),
            cluster_domain: lookup("KUBERLOGIC_CLUSTER_DOMAIN").unwrap_or(defaults.cluster_domain),
        })
    }
}

impl WatcherConfig {
    /// Read the configuration from `KUBERLOGIC_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            probe_database: lookup("KUBERLOGIC_PROBE_DATABASE").unwrap_or(defaults.probe_database),
            probe_table: lookup("KUBERLOGIC_PROBE_TABLE").unwrap_or(defaults.probe_table),
            interval: parse(&lookup, "KUBERLOGIC_PROBE_INTERVAL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            listen_addr: parse(&lookup, "KUBERLOGIC_LISTEN_ADDR")?.unwrap_or(defaults.listen_addr),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e: T::Err| Error::IllegalConfig(key.to_string(), e.to_string()))
        })
        .transpose()
}

mod defaults {
    use std::{net::SocketAddr, time::Duration};

    pub fn sql_timeout() -> Duration {
        Duration::from_secs(30)
    }
    pub fn cluster_domain() -> String {
        "cluster.local".into()
    }
    pub fn probe_database() -> String {
        "kuberlogic".into()
    }
    pub fn probe_table() -> String {
        "kuberlogic_probe".into()
    }
    pub fn interval() -> Duration {
        Duration::from_secs(60)
    }
    pub fn listen_addr() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 8080))
    }
}

mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = SessionConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, SessionConfig::default());
        assert_eq!(config.sql_timeout, Duration::from_secs(30));
        assert_eq!(config.cluster_domain, "cluster.local");

        let watcher = WatcherConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(watcher.probe_database, "kuberlogic");
        assert_eq!(watcher.listen_addr.port(), 8080);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = SessionConfig::from_lookup(lookup(&[
            ("KUBERLOGIC_SQL_TIMEOUT_SECS", "5"),
            ("KUBERLOGIC_CLUSTER_DOMAIN", "k8s.internal"),
        ]))
        .unwrap();
        assert_eq!(config.sql_timeout, Duration::from_secs(5));
        assert_eq!(config.cluster_domain, "k8s.internal");

        let watcher = WatcherConfig::from_lookup(lookup(&[
            ("KUBERLOGIC_PROBE_INTERVAL_SECS", " 10 "),
            ("KUBERLOGIC_LISTEN_ADDR", "127.0.0.1:9000"),
        ]))
        .unwrap();
        assert_eq!(watcher.interval, Duration::from_secs(10));
        assert_eq!(watcher.listen_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn malformed_values_are_rejected() {
        let err = SessionConfig::from_lookup(lookup(&[("KUBERLOGIC_SQL_TIMEOUT_SECS", "soon")]))
            .unwrap_err();
        assert!(matches!(err, Error::IllegalConfig(key, _) if key == "KUBERLOGIC_SQL_TIMEOUT_SECS"));
    }

    #[test]
    fn deserializes_from_yaml() {
        let config: SessionConfig = serde_yaml::from_str("sqlTimeout: 3").unwrap();
        assert_eq!(config.sql_timeout, Duration::from_secs(3));
        assert_eq!(config.cluster_domain, "cluster.local");
    }
}
