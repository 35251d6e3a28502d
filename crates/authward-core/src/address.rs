use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use thiserror::Error;

/// Address kind code for IPv4, as used in blacklist records and the
/// `SSHG_ADDRKIND` environment variable.
pub const ADDRKIND_IPV4: u32 = 4;
/// Address kind code for IPv6.
pub const ADDRKIND_IPV6: u32 = 6;

/// Longest textual form an address can take (IPv6, INET6_ADDRSTRLEN).
/// Blacklist records reserve this many bytes for the address slot.
pub const ADDR_TEXT_LEN: usize = 46;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrError {
    #[error("'{0}' is not a valid IPv4 or IPv6 address")]
    Invalid(String),
    #[error("unknown address kind code {0}")]
    UnknownKind(u32),
}

/// A remote network address in canonical form.
///
/// Equality is by (kind, canonical form): parsing normalizes the textual
/// representation, so `2001:DB8::1` and `2001:db8:0:0:0:0:0:1` compare equal.
/// `Display` yields the dotted quad or the RFC 5952 compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Addr {
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl Addr {
    /// Numeric kind code (4 or 6).
    pub fn kind(&self) -> u32 {
        match self {
            Addr::V4(_) => ADDRKIND_IPV4,
            Addr::V6(_) => ADDRKIND_IPV6,
        }
    }

    pub fn is_v4(&self) -> bool {
        matches!(self, Addr::V4(_))
    }

    /// Parse a textual address whose kind code is already known, as read
    /// back from a blacklist record.
    pub fn from_kind_str(kind: u32, s: &str) -> Result<Self, AddrError> {
        match kind {
            ADDRKIND_IPV4 => s
                .parse::<Ipv4Addr>()
                .map(Addr::V4)
                .map_err(|_| AddrError::Invalid(s.to_string())),
            ADDRKIND_IPV6 => s
                .parse::<Ipv6Addr>()
                .map(Addr::V6)
                .map_err(|_| AddrError::Invalid(s.to_string())),
            other => Err(AddrError::UnknownKind(other)),
        }
    }
}

impl From<IpAddr> for Addr {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Addr::V4(v4),
            IpAddr::V6(v6) => Addr::V6(v6),
        }
    }
}

impl FromStr for Addr {
    type Err = AddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>()
            .map(Addr::from)
            .map_err(|_| AddrError::Invalid(s.to_string()))
    }
}

impl fmt::Display for Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Addr::V4(v4) => v4.fmt(f),
            Addr::V6(v6) => v6.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v4() {
        let a: Addr = "203.0.113.5".parse().unwrap();
        assert_eq!(a, Addr::V4(Ipv4Addr::new(203, 0, 113, 5)));
        assert_eq!(a.kind(), ADDRKIND_IPV4);
        assert_eq!(a.to_string(), "203.0.113.5");
    }

    #[test]
    fn test_parse_v6_is_canonical() {
        let a: Addr = "2001:DB8:0:0:0:0:0:1".parse().unwrap();
        let b: Addr = "2001:db8::1".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "2001:db8::1");
        assert_eq!(a.kind(), ADDRKIND_IPV6);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!("not-an-address".parse::<Addr>().is_err());
        assert!("300.1.2.3".parse::<Addr>().is_err());
        assert!("".parse::<Addr>().is_err());
    }

    #[test]
    fn test_from_kind_str_enforces_kind() {
        assert!(Addr::from_kind_str(ADDRKIND_IPV4, "192.0.2.1").is_ok());
        assert!(Addr::from_kind_str(ADDRKIND_IPV4, "2001:db8::1").is_err());
        assert!(Addr::from_kind_str(ADDRKIND_IPV6, "2001:db8::1").is_ok());
        assert_eq!(
            Addr::from_kind_str(9, "192.0.2.1"),
            Err(AddrError::UnknownKind(9))
        );
    }

    #[test]
    fn test_longest_v6_fits_record_slot() {
        // Worst case textual form: 45 chars plus the NUL the C layout kept.
        let worst = "ffff:ffff:ffff:ffff:ffff:ffff:255.255.255.255";
        assert!(worst.len() < ADDR_TEXT_LEN);
        assert!(worst.parse::<Addr>().is_ok());
    }
}
