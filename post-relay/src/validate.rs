//! Request material validation: base64 fields, ack tokens, and the
//! domain/IP checks applied to federation targets and origins.

use std::net::IpAddr;
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use post_types::params::{ACK_TOKEN_LEN, MAX_HOST_LEN};

use crate::config::{ConfigError, FederationConfig};
use crate::error::{RelayError, Result};

/// Decode a required base64 field.
pub fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>> {
    if value.trim().is_empty() {
        return Err(RelayError::Validation(format!("{field}: empty")));
    }
    BASE64
        .decode(value)
        .map_err(|_| RelayError::Validation(format!("{field}: invalid base64")))
}

/// Decode a base64 field that must be exactly `expected` decoded bytes.
pub fn decode_b64_exact(field: &str, value: &str, expected: usize) -> Result<Vec<u8>> {
    let bytes = decode_b64(field, value)?;
    if bytes.len() != expected {
        return Err(RelayError::Validation(format!(
            "{field}: expected {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Decode a base64 field of at most `max` decoded bytes.
pub fn decode_b64_max(field: &str, value: &str, max: usize) -> Result<Vec<u8>> {
    let bytes = decode_b64(field, value)?;
    if bytes.len() > max {
        return Err(RelayError::Validation(format!(
            "{field}: {} bytes exceeds the {max} byte limit",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Parse the comma-separated hex `acks` query parameter into ack tokens.
pub fn parse_acks(raw: &str) -> Result<Vec<[u8; ACK_TOKEN_LEN]>> {
    let mut acks = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let bytes = hex::decode(part)
            .map_err(|_| RelayError::Validation("acks: invalid hex".to_string()))?;
        let token: [u8; ACK_TOKEN_LEN] = bytes.try_into().map_err(|_| {
            RelayError::Validation(format!("acks: each token must be {ACK_TOKEN_LEN} bytes"))
        })?;
        acks.push(token);
    }
    Ok(acks)
}

/// An IPv4 or IPv6 network in CIDR notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpNetwork {
    addr: IpAddr,
    prefix: u8,
}

impl IpNetwork {
    /// Whether `ip` falls inside this network. Mismatched address families
    /// never match.
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self.addr, ip) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u32::MAX << (32 - u32::from(self.prefix))
                };
                (u32::from(*ip) & mask) == (u32::from(net) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix == 0 {
                    0
                } else {
                    u128::MAX << (128 - u32::from(self.prefix))
                };
                (u128::from(*ip) & mask) == (u128::from(net) & mask)
            }
            _ => false,
        }
    }
}

impl FromStr for IpNetwork {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let bad = || ConfigError::Invalid(format!("invalid CIDR network {s:?}"));
        let (addr_part, prefix_part) = s.trim().split_once('/').ok_or_else(bad)?;
        let addr: IpAddr = addr_part.parse().map_err(|_| bad())?;
        let prefix: u8 = prefix_part.parse().map_err(|_| bad())?;
        let max = match addr {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if prefix > max {
            return Err(bad());
        }
        Ok(Self { addr, prefix })
    }
}

/// Policy checks for federation hosts.
///
/// Shape failures (bad labels, bad ports, multi-colon hosts) surface as
/// validation errors; policy failures (blacklists, the server's own domain)
/// surface as trust errors.
#[derive(Debug, Clone)]
pub struct DomainValidator {
    own_domain: String,
    blacklisted_domains: Vec<String>,
    blacklisted_networks: Vec<IpNetwork>,
}

impl DomainValidator {
    /// Build from the server's own domain and the federation config.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured blacklist network is not valid CIDR.
    pub fn from_config(
        own_domain: &str,
        federation: &FederationConfig,
    ) -> std::result::Result<Self, ConfigError> {
        let blacklisted_networks = federation
            .blacklisted_networks
            .iter()
            .map(|raw| raw.parse())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self {
            own_domain: own_domain.trim().to_ascii_lowercase(),
            blacklisted_domains: federation
                .blacklisted_domains
                .iter()
                .map(|d| d.trim().to_ascii_lowercase())
                .collect(),
            blacklisted_networks,
        })
    }

    /// Check a federation target or origin host (`domain[:port]` or
    /// `ipv4[:port]`).
    pub fn check_remote_host(&self, raw: &str) -> Result<()> {
        let host = raw.trim().to_ascii_lowercase();
        if host.is_empty() || host.len() > MAX_HOST_LEN {
            return Err(RelayError::Validation(format!(
                "host {raw:?}: empty or longer than {MAX_HOST_LEN} bytes"
            )));
        }

        let bare = match host.split_once(':') {
            None => host.clone(),
            Some((bare, port)) => {
                if port.contains(':') {
                    return Err(RelayError::Validation(format!(
                        "host {raw:?}: multiple ':' separators"
                    )));
                }
                if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(RelayError::Validation(format!(
                        "host {raw:?}: port is not numeric"
                    )));
                }
                let number: u32 = port
                    .parse()
                    .map_err(|_| RelayError::Validation(format!("host {raw:?}: invalid port")))?;
                if number == 0 || number > 65535 {
                    return Err(RelayError::Validation(format!(
                        "host {raw:?}: port out of range"
                    )));
                }
                bare.to_string()
            }
        };

        if bare == self.own_domain || host == self.own_domain {
            return Err(RelayError::Trust(
                "refusing to relay through this server to itself".to_string(),
            ));
        }

        if let Ok(ip) = bare.parse::<IpAddr>() {
            if self.blacklisted_networks.iter().any(|net| net.contains(&ip)) {
                return Err(RelayError::Trust(format!("address {bare} is blacklisted")));
            }
            return Ok(());
        }

        if self.blacklisted_domains.iter().any(|d| d == &bare) {
            return Err(RelayError::Trust(format!("domain {bare} is blacklisted")));
        }

        let labels: Vec<&str> = bare.split('.').collect();
        if labels.len() < 2 {
            return Err(RelayError::Validation(format!(
                "host {raw:?}: need at least two labels"
            )));
        }
        for label in &labels {
            if label.is_empty() || label.len() > 63 {
                return Err(RelayError::Validation(format!(
                    "host {raw:?}: label length out of range"
                )));
            }
            if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
                return Err(RelayError::Validation(format!(
                    "host {raw:?}: label has invalid characters"
                )));
            }
            if label.starts_with('-') || label.ends_with('-') {
                return Err(RelayError::Validation(format!(
                    "host {raw:?}: label starts or ends with '-'"
                )));
            }
        }
        let tld = labels[labels.len() - 1];
        if tld.len() < 2 || !tld.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(RelayError::Validation(format!(
                "host {raw:?}: top-level label must be alphabetic"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> DomainValidator {
        let federation = FederationConfig {
            enabled: true,
            request_timeout_secs: 15,
            blacklisted_domains: vec!["evil.example".to_string()],
            blacklisted_networks: crate::config::Config::default()
                .federation
                .blacklisted_networks,
        };
        DomainValidator::from_config("relay.example.org", &federation).unwrap()
    }

    #[test]
    fn decode_helpers_enforce_lengths() {
        let ok = BASE64.encode([1u8; 64]);
        assert_eq!(decode_b64_exact("nonce", &ok, 64).unwrap(), vec![1u8; 64]);
        assert!(decode_b64_exact("nonce", &ok, 32).is_err());
        assert!(decode_b64("nonce", "").is_err());
        assert!(decode_b64("nonce", "###").is_err());
        assert!(decode_b64_max("q", &ok, 63).is_err());
        assert!(decode_b64_max("q", &ok, 64).is_ok());
    }

    #[test]
    fn acks_parse_and_reject() {
        let token = [0xabu8; ACK_TOKEN_LEN];
        let raw = format!("{},{}", hex::encode(token), hex::encode([1u8; ACK_TOKEN_LEN]));
        let acks = parse_acks(&raw).unwrap();
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[0], token);

        assert!(parse_acks("").unwrap().is_empty());
        assert!(parse_acks("zz").is_err());
        assert!(parse_acks(&hex::encode([1u8; 16])).is_err());
    }

    #[test]
    fn cidr_membership() {
        let net: IpNetwork = "10.0.0.0/8".parse().unwrap();
        assert!(net.contains(&"10.1.2.3".parse().unwrap()));
        assert!(!net.contains(&"11.0.0.1".parse().unwrap()));

        let all: IpNetwork = "0.0.0.0/0".parse().unwrap();
        assert!(all.contains(&"93.184.216.34".parse().unwrap()));

        let v6: IpNetwork = "fc00::/7".parse().unwrap();
        assert!(v6.contains(&"fd12::1".parse().unwrap()));
        assert!(!v6.contains(&"10.0.0.1".parse().unwrap()));

        assert!("10.0.0.0".parse::<IpNetwork>().is_err());
        assert!("10.0.0.0/33".parse::<IpNetwork>().is_err());
        assert!("banana/8".parse::<IpNetwork>().is_err());
    }

    #[test]
    fn accepts_well_formed_hosts() {
        let v = validator();
        assert!(v.check_remote_host("example.org").is_ok());
        assert!(v.check_remote_host("peer.example.org:8443").is_ok());
        assert!(v.check_remote_host("Example.ORG").is_ok());
        assert!(v.check_remote_host("93.184.216.34").is_ok());
        assert!(v.check_remote_host("93.184.216.34:443").is_ok());
        assert!(v.check_remote_host("xn--bcher-kva.example").is_ok());
    }

    #[test]
    fn rejects_malformed_hosts() {
        let v = validator();
        assert!(v.check_remote_host("").is_err());
        assert!(v.check_remote_host(&"x".repeat(254)).is_err());
        assert!(v.check_remote_host("localhost").is_err());
        assert!(v.check_remote_host("a..com").is_err());
        assert!(v.check_remote_host(&format!("{}.com", "a".repeat(64))).is_err());
        assert!(v.check_remote_host("-bad.example.org").is_err());
        assert!(v.check_remote_host("bad-.example.org").is_err());
        assert!(v.check_remote_host("exämple.org").is_err());
        assert!(v.check_remote_host("example.123").is_err());
        assert!(v.check_remote_host("example.o").is_err());
    }

    #[test]
    fn rejects_bad_ports_and_multi_colon() {
        let v = validator();
        assert!(v.check_remote_host("example.org:0").is_err());
        assert!(v.check_remote_host("example.org:99999").is_err());
        assert!(v.check_remote_host("example.org:abc").is_err());
        assert!(v.check_remote_host("example.org:+80").is_err());
        assert!(v.check_remote_host("example.org:").is_err());
        assert!(v.check_remote_host("example.org:1:2").is_err());
        // Bare IPv6 literals have multiple colons and are not accepted.
        assert!(v.check_remote_host("::1").is_err());
        assert!(v.check_remote_host("fc00::2").is_err());
    }

    #[test]
    fn rejects_blacklisted_and_own() {
        let v = validator();
        assert!(matches!(
            v.check_remote_host("relay.example.org"),
            Err(RelayError::Trust(_))
        ));
        assert!(matches!(
            v.check_remote_host("relay.example.org:8443"),
            Err(RelayError::Trust(_))
        ));
        assert!(matches!(
            v.check_remote_host("evil.example"),
            Err(RelayError::Trust(_))
        ));
        assert!(matches!(
            v.check_remote_host("127.0.0.1"),
            Err(RelayError::Trust(_))
        ));
        assert!(matches!(
            v.check_remote_host("10.1.2.3"),
            Err(RelayError::Trust(_))
        ));
        assert!(matches!(
            v.check_remote_host("192.168.1.5:8080"),
            Err(RelayError::Trust(_))
        ));
        // Public addresses outside the blacklists pass.
        assert!(v.check_remote_host("8.8.8.8").is_ok());
    }
}
