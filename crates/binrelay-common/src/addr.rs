//! Address helpers shared by the resolver, readiness probes and balancer.

use std::net::IpAddr;

use crate::error::{RelayError, Result};

/// Splits `host:port` at the last colon, preserving IPv6 brackets in the
/// host part (`[::1]:9000` splits to `[::1]` and `9000`).
pub fn split_addr(addr: &str) -> Result<(&str, &str)> {
    match addr.rfind(':') {
        Some(pos) => Ok((&addr[..pos], &addr[pos + 1..])),
        None => Err(RelayError::InvalidAddress(addr.to_string())),
    }
}

/// Whether `host` is an IP literal (IPv4, or IPv6 with or without brackets)
/// rather than a DNS name.
pub fn is_ip_literal(host: &str) -> bool {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    bare.parse::<IpAddr>().is_ok()
}

/// Brackets a bare IPv6 literal so it can be joined with a port or used in
/// a URL. Hostnames, IPv4 literals and already-bracketed hosts pass through.
pub fn bracket_host(host: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_addr() {
        let (host, port) = split_addr("10.0.0.1:9000").unwrap();
        assert_eq!(host, "10.0.0.1");
        assert_eq!(port, "9000");

        let (host, port) = split_addr("search.internal:9000").unwrap();
        assert_eq!(host, "search.internal");
        assert_eq!(port, "9000");

        let (host, port) = split_addr("[::1]:9000").unwrap();
        assert_eq!(host, "[::1]");
        assert_eq!(port, "9000");
    }

    #[test]
    fn test_split_addr_invalid() {
        assert!(split_addr("nocolon").is_err());
    }

    #[test]
    fn test_is_ip_literal() {
        assert!(is_ip_literal("127.0.0.1"));
        assert!(is_ip_literal("::1"));
        assert!(is_ip_literal("[::1]"));
        assert!(!is_ip_literal("localhost"));
        assert!(!is_ip_literal("search.internal"));
    }

    #[test]
    fn test_bracket_host() {
        assert_eq!(bracket_host("::1"), "[::1]");
        assert_eq!(bracket_host("[::1]"), "[::1]");
        assert_eq!(bracket_host("10.0.0.1"), "10.0.0.1");
        assert_eq!(bracket_host("example.com"), "example.com");
    }
}
