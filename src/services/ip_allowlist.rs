//! IP allow-list matching and validation
//!
//! Whitelist entries come in three forms: exact addresses, CIDR ranges, and IPv4
//! wildcard patterns (`192.168.1.*`). An empty whitelist allows everything; an
//! unidentifiable client never matches a non-empty one.

use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// Outcome of validating a whole whitelist
#[derive(Debug, Clone)]
pub struct WhitelistValidation {
    pub is_valid: bool,
    /// One message per invalid entry, each containing the offending entry verbatim
    pub errors: Vec<String>,
}

/// Stateless matcher for client IPs against key whitelists
#[derive(Debug, Clone, Copy, Default)]
pub struct IpAllowlistMatcher;

impl IpAllowlistMatcher {
    /// Decide whether `client_ip` satisfies the whitelist
    ///
    /// Entries are trimmed and blank ones skipped. Per entry the interpretations are
    /// tried as exact match, then CIDR containment, then wildcard pattern; the first
    /// matching entry wins.
    pub fn is_allowed(client_ip: &str, whitelist: &[String]) -> bool {
        if whitelist.is_empty() {
            return true;
        }

        let client_ip = client_ip.trim();
        if client_ip.is_empty() {
            return false;
        }

        for entry in whitelist {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            if entry == client_ip {
                return true;
            }
            if Self::cidr_contains(entry, client_ip) {
                return true;
            }
            if Self::wildcard_matches(entry, client_ip) {
                return true;
            }
        }

        false
    }

    /// Whether `s` parses as an IPv4 or IPv6 address
    pub fn is_valid_ip_address(s: &str) -> bool {
        let s = s.trim();
        !s.is_empty() && IpAddr::from_str(s).is_ok()
    }

    /// Whether `s` is `address/prefix` with an in-range prefix for the family
    pub fn is_valid_cidr_range(s: &str) -> bool {
        let s = s.trim();
        s.contains('/') && IpNet::from_str(s).is_ok()
    }

    /// Whether `s` is a four-octet IPv4 pattern where octets are numeric or `*`
    pub fn is_valid_wildcard_pattern(s: &str) -> bool {
        let s = s.trim();
        if !s.contains('*') {
            return false;
        }
        let octets: Vec<&str> = s.split('.').collect();
        octets.len() == 4 && octets.iter().all(|o| *o == "*" || o.parse::<u8>().is_ok())
    }

    /// Validate every entry of a whitelist, reporting each invalid one
    ///
    /// An empty list is valid. Blank entries are invalid and reported; every other
    /// entry must be a valid exact IP, CIDR range, or wildcard pattern.
    pub fn validate_whitelist(whitelist: &[String]) -> WhitelistValidation {
        let mut errors = Vec::new();

        for entry in whitelist {
            let trimmed = entry.trim();
            if trimmed.is_empty() {
                errors.push(format!(
                    "Whitelist entry '{}' is blank or whitespace-only",
                    entry
                ));
                continue;
            }
            if Self::is_valid_ip_address(trimmed)
                || Self::is_valid_cidr_range(trimmed)
                || Self::is_valid_wildcard_pattern(trimmed)
            {
                continue;
            }
            errors.push(format!(
                "Invalid whitelist entry '{}': not a valid IP address, CIDR range, or wildcard pattern",
                trimmed
            ));
        }

        WhitelistValidation {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    fn cidr_contains(entry: &str, client_ip: &str) -> bool {
        if !entry.contains('/') {
            return false;
        }
        match (IpNet::from_str(entry), IpAddr::from_str(client_ip)) {
            // Mismatched address families never contain each other.
            (Ok(net), Ok(ip)) => net.contains(&ip),
            _ => false,
        }
    }

    fn wildcard_matches(pattern: &str, client_ip: &str) -> bool {
        if !pattern.contains('*') {
            return false;
        }
        let pattern_octets: Vec<&str> = pattern.split('.').collect();
        let ip_octets: Vec<&str> = client_ip.split('.').collect();
        if pattern_octets.len() != 4 || ip_octets.len() != 4 {
            return false;
        }

        pattern_octets
            .iter()
            .zip(ip_octets.iter())
            .all(|(pattern_octet, ip_octet)| {
                let Ok(value) = ip_octet.parse::<u8>() else {
                    return false;
                };
                if *pattern_octet == "*" {
                    return true;
                }
                pattern_octet.parse::<u8>() == Ok(value)
            })
    }
}
