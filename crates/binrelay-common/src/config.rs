//! Shared configuration types.
//!
//! These structs are deserialised from two places with the same shape: the
//! startup YAML file and the admin API request bodies. Keys are camelCase on
//! the wire (`circuitBreaker`, `successiveFailures`, `pauseTime`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Probe protocol for a backend readiness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    Tcp,
    Http,
}

/// Readiness probe settings for a backend.
///
/// The probe target shares the backend's host but uses its own port (and,
/// for HTTP, an optional path, defaulting to `/`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessConf {
    pub protocol: ProbeProtocol,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Circuit breaker settings for a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerConf {
    /// Consecutive failures before the circuit opens.
    pub successive_failures: u32,
    /// How long sends short-circuit once the circuit is open.
    #[serde(with = "duration_str")]
    pub pause_time: Duration,
}

/// One backend of a proxy: an address plus optional readiness and circuit
/// breaker settings. The host part of `addr` may be an IP literal or a DNS
/// name; DNS names are expanded by the resolver, and the expanded literal
/// addresses inherit the readiness and breaker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendInfo {
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness: Option<ReadinessConf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<BreakerConf>,
}

impl BackendInfo {
    /// A backend with no readiness probe and no circuit breaker.
    pub fn plain(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            readiness: None,
            circuit_breaker: None,
        }
    }
}

/// Serde adapter for duration strings such as `500ms` or `30s`.
pub mod duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.collect_str(&humantime::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(de)?;
        humantime::parse_duration(&s).map_err(de::Error::custom)
    }
}

/// Serde adapter for optional duration strings.
pub mod opt_duration_str {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => ser.collect_str(&humantime::format_duration(*d)),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let s = Option::<String>::deserialize(de)?;
        match s {
            Some(s) => humantime::parse_duration(&s)
                .map(Some)
                .map_err(de::Error::custom),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_info_from_yaml() {
        let yaml = r#"
addr: 10.0.0.1:9000
readiness:
  protocol: http
  port: 8080
  path: /healthz
circuitBreaker:
  successiveFailures: 3
  pauseTime: 5s
"#;
        let info: BackendInfo = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(info.addr, "10.0.0.1:9000");

        let readiness = info.readiness.unwrap();
        assert_eq!(readiness.protocol, ProbeProtocol::Http);
        assert_eq!(readiness.port, 8080);
        assert_eq!(readiness.path.as_deref(), Some("/healthz"));

        let breaker = info.circuit_breaker.unwrap();
        assert_eq!(breaker.successive_failures, 3);
        assert_eq!(breaker.pause_time, Duration::from_secs(5));
    }

    #[test]
    fn test_backend_info_minimal() {
        let info: BackendInfo = serde_yaml::from_str("addr: search.internal:9000").unwrap();
        assert_eq!(info.addr, "search.internal:9000");
        assert!(info.readiness.is_none());
        assert!(info.circuit_breaker.is_none());
    }

    #[test]
    fn test_tcp_probe_from_yaml() {
        let yaml = "addr: 10.0.0.1:9000\nreadiness: { protocol: tcp, port: 9000 }";
        let info: BackendInfo = serde_yaml::from_str(yaml).unwrap();
        let readiness = info.readiness.unwrap();
        assert_eq!(readiness.protocol, ProbeProtocol::Tcp);
        assert!(readiness.path.is_none());
    }

    #[test]
    fn test_millisecond_durations() {
        let breaker: BreakerConf =
            serde_yaml::from_str("successiveFailures: 1\npauseTime: 500ms").unwrap();
        assert_eq!(breaker.pause_time, Duration::from_millis(500));
    }

    #[test]
    fn test_backend_info_round_trip() {
        let info = BackendInfo {
            addr: "10.0.0.1:9000".to_string(),
            readiness: Some(ReadinessConf {
                protocol: ProbeProtocol::Tcp,
                port: 9001,
                path: None,
            }),
            circuit_breaker: Some(BreakerConf {
                successive_failures: 5,
                pause_time: Duration::from_secs(30),
            }),
        };
        let yaml = serde_yaml::to_string(&info).unwrap();
        let parsed: BackendInfo = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, info);
    }
}
