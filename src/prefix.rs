//! IPv4 network prefixes
//!
//! A [`Prefix`] is an address plus mask length with the host bits already
//! cleared, so `"10.0.0.1"`, `"10.0.0.1/32"` and `" 10.0.0.1/32 "` are the
//! same key for the tree.

use crate::error::IpfoldError;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Maximum prefix length (tree depth) for IPv4
pub const IPV4_BITS: u8 = 32;

/// Special-purpose IPv4 networks left empty unless reserved networks are
/// explicitly included
pub const RESERVED_IPV4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 0, 0), 29),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 88, 99, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 18, 0, 0), 15),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(255, 255, 255, 255), 32),
];

/// Normalized IPv4 network prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Prefix {
    bits: u32,
    len: u8,
}

impl Prefix {
    /// Build a prefix, masking off host bits
    pub fn new(addr: Ipv4Addr, len: u8) -> Result<Self, IpfoldError> {
        if len > IPV4_BITS {
            return Err(IpfoldError::InvalidPrefix(format!(
                "IPv4 prefix length {} exceeds {}",
                len, IPV4_BITS
            )));
        }
        Ok(Self::from_bits(u32::from(addr), len))
    }

    /// Build from raw address bits; `len` must be at most 32
    pub(crate) fn from_bits(bits: u32, len: u8) -> Self {
        Self {
            bits: bits & mask(len),
            len,
        }
    }

    /// Parse `a.b.c.d` (a /32 host) or `a.b.c.d/nn`
    pub fn parse(text: &str) -> Result<Self, IpfoldError> {
        let text = text.trim();
        let invalid = |why: &str| IpfoldError::InvalidPrefix(format!("'{}': {}", text, why));

        let (addr_str, len) = match text.split_once('/') {
            Some((addr, len_str)) => {
                let len = len_str
                    .parse::<u8>()
                    .map_err(|_| invalid("mask length is not a number between 0 and 32"))?;
                (addr, len)
            }
            None => (text, IPV4_BITS),
        };

        let addr = match addr_str.parse::<std::net::IpAddr>() {
            Ok(std::net::IpAddr::V4(v4)) => v4,
            Ok(std::net::IpAddr::V6(_)) => return Err(invalid("IPv6 is not supported")),
            Err(_) => return Err(invalid("not an IPv4 address")),
        };

        if len > IPV4_BITS {
            return Err(invalid("mask length exceeds 32"));
        }

        Ok(Self::from_bits(u32::from(addr), len))
    }

    /// Network address
    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.bits)
    }

    /// Network address as a 32-bit integer
    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// Mask length
    pub fn len(&self) -> u8 {
        self.len
    }

    /// True for the zero-length prefix (0.0.0.0/0)
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bit of the address at `depth` (0 = most significant)
    pub fn bit(&self, depth: u8) -> usize {
        ((self.bits >> (31 - depth as u32)) & 1) as usize
    }

    /// True if `other` lies entirely inside this prefix
    pub fn contains(&self, other: &Prefix) -> bool {
        self.len <= other.len && (other.bits & mask(self.len)) == self.bits
    }

    /// True if `addr` lies inside this prefix
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        (u32::from(addr) & mask(self.len)) == self.bits
    }

    /// The child prefix one bit longer, taking branch `bit`
    pub(crate) fn child(&self, bit: usize) -> Prefix {
        let len = self.len + 1;
        let bits = self.bits | ((bit as u32) << (32 - len as u32));
        Prefix { bits, len }
    }
}

impl FromStr for Prefix {
    type Err = IpfoldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Prefix::parse(s)
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr(), self.len)
    }
}

/// Network mask for a prefix length
fn mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        !0u32 << (32 - len as u32)
    }
}

/// Reserved networks as prefixes
pub fn reserved_prefixes() -> impl Iterator<Item = Prefix> {
    RESERVED_IPV4
        .iter()
        .map(|(addr, len)| Prefix::from_bits(u32::from(*addr), *len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_address_is_host_route() {
        let bare: Prefix = "10.0.0.1".parse().unwrap();
        let cidr: Prefix = "10.0.0.1/32".parse().unwrap();
        assert_eq!(bare, cidr);
        assert_eq!(bare.len(), 32);
    }

    #[test]
    fn test_host_bits_are_masked() {
        let p = Prefix::parse("192.168.1.77/24").unwrap();
        assert_eq!(p.to_string(), "192.168.1.0/24");
        assert_eq!(p, Prefix::parse("192.168.1.0/24").unwrap());
    }

    #[test]
    fn test_zero_length_prefix() {
        let p = Prefix::parse("8.8.8.8/0").unwrap();
        assert!(p.is_empty());
        assert_eq!(p.to_string(), "0.0.0.0/0");
        assert!(p.contains_addr(Ipv4Addr::new(255, 1, 2, 3)));
    }

    #[test]
    fn test_invalid_prefixes() {
        for text in [
            "999.1.1.1/99",
            "999.1.1.1",
            "1.2.3.4/33",
            "1.2.3.4/-1",
            "1.2.3.4/",
            "",
            "not-an-ip",
            "2001:db8::/32",
        ] {
            assert!(
                matches!(Prefix::parse(text), Err(IpfoldError::InvalidPrefix(_))),
                "{} should be rejected",
                text
            );
        }
    }

    #[test]
    fn test_contains() {
        let wide = Prefix::parse("10.0.0.0/8").unwrap();
        let narrow = Prefix::parse("10.1.2.0/24").unwrap();
        assert!(wide.contains(&narrow));
        assert!(!narrow.contains(&wide));
        assert!(wide.contains(&wide));
    }

    #[test]
    fn test_bits_and_children() {
        let p = Prefix::parse("128.0.0.0/1").unwrap();
        assert_eq!(p.bit(0), 1);
        assert_eq!(p.child(1).to_string(), "192.0.0.0/2");
        assert_eq!(p.child(0).to_string(), "128.0.0.0/2");
    }

    #[test]
    fn test_reserved_list_is_normalized() {
        for p in reserved_prefixes() {
            assert_eq!(Prefix::new(p.addr(), p.len()).unwrap(), p);
        }
    }
}
