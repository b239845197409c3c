//! External IP allocation from a CIDR
//!
//! The pool enumerates the CIDR in increasing address order, from the network
//! address through the broadcast address inclusive, and hands each address out
//! at most once. Running dry is a configuration error, never a retry.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use ipnet::IpNet;
use parking_lot::Mutex;
use tracing::debug;

use crate::{Error, Result};

/// Ordered, finite, non-reusing pool of external IPs
#[derive(Debug)]
pub struct ExternalIpPool {
    cidr: IpNet,
    cursor: Mutex<Cursor>,
}

/// Next address to hand out and the last address of the range, as integers
#[derive(Debug)]
struct Cursor {
    next: Option<u128>,
    last: u128,
}

impl ExternalIpPool {
    /// Parse a CIDR and build the pool.
    ///
    /// Host bits in the input are masked off, so `10.0.0.5/30` enumerates
    /// `10.0.0.4` through `10.0.0.7`.
    pub fn from_cidr(cidr: &str) -> Result<Self> {
        Ok(Self::new(parse_cidr(cidr)?))
    }

    /// Build a pool over an already parsed CIDR (host bits are masked off)
    pub fn new(cidr: IpNet) -> Self {
        let cidr = cidr.trunc();
        let (first, last) = match cidr {
            IpNet::V4(net) => (
                u32::from(net.network()) as u128,
                u32::from(net.broadcast()) as u128,
            ),
            IpNet::V6(net) => (u128::from(net.network()), u128::from(net.broadcast())),
        };

        Self {
            cidr,
            cursor: Mutex::new(Cursor {
                next: Some(first),
                last,
            }),
        }
    }

    /// The (masked) CIDR this pool was built from
    pub fn cidr(&self) -> &IpNet {
        &self.cidr
    }

    /// Hand out the next unused address.
    ///
    /// Fails with [`Error::PoolExhausted`] once every address has been
    /// allocated; the pool stays exhausted afterwards.
    pub fn allocate(&self) -> Result<IpAddr> {
        let mut cursor = self.cursor.lock();
        let current = cursor
            .next
            .ok_or_else(|| Error::pool_exhausted(self.cidr.to_string()))?;

        cursor.next = if current < cursor.last {
            Some(current + 1)
        } else {
            None
        };

        let ip = self.to_addr(current);
        debug!(ip = %ip, cidr = %self.cidr, "allocated external IP");
        Ok(ip)
    }

    /// Number of addresses not yet handed out (saturates at `u128::MAX`)
    pub fn remaining(&self) -> u128 {
        let cursor = self.cursor.lock();
        match cursor.next {
            Some(next) => (cursor.last - next).saturating_add(1),
            None => 0,
        }
    }

    fn to_addr(&self, value: u128) -> IpAddr {
        match self.cidr {
            IpNet::V4(_) => IpAddr::V4(Ipv4Addr::from(value as u32)),
            IpNet::V6(_) => IpAddr::V6(Ipv6Addr::from(value)),
        }
    }
}

/// Parse an external CIDR; failure is a configuration error
pub fn parse_cidr(cidr: &str) -> Result<IpNet> {
    IpNet::from_str(cidr.trim())
        .map_err(|e| Error::config(format!("invalid external CIDR '{}': {}", cidr, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_30_yields_all_four_addresses_then_exhausts() {
        let pool = ExternalIpPool::from_cidr("10.0.0.0/30").unwrap();

        let ips: Vec<String> = (0..4)
            .map(|_| pool.allocate().unwrap().to_string())
            .collect();
        assert_eq!(ips, vec!["10.0.0.0", "10.0.0.1", "10.0.0.2", "10.0.0.3"]);

        let err = pool.allocate().unwrap_err();
        assert!(matches!(err, Error::PoolExhausted { .. }));
        assert!(err.to_string().contains("no more external IPs available"));

        // stays exhausted
        assert!(pool.allocate().is_err());
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn test_allocations_are_distinct_increasing_and_inside_the_cidr() {
        for (cidr, capacity) in [("192.168.10.0/29", 8u32), ("172.16.0.0/28", 16), ("10.1.2.3/32", 1)] {
            let pool = ExternalIpPool::from_cidr(cidr).unwrap();
            let net = *pool.cidr();
            assert_eq!(pool.remaining(), capacity as u128);

            let mut previous: Option<IpAddr> = None;
            for _ in 0..capacity {
                let ip = pool.allocate().unwrap();
                assert!(net.contains(&ip), "{} not in {}", ip, net);
                if let Some(prev) = previous {
                    assert!(ip > prev);
                }
                previous = Some(ip);
            }
            assert!(matches!(
                pool.allocate(),
                Err(Error::PoolExhausted { .. })
            ));
        }
    }

    #[test]
    fn test_host_bits_are_masked() {
        let pool = ExternalIpPool::from_cidr("10.0.0.5/30").unwrap();
        assert_eq!(pool.allocate().unwrap().to_string(), "10.0.0.4");
    }

    #[test]
    fn test_ipv6_cidr() {
        let pool = ExternalIpPool::from_cidr("fd00::/126").unwrap();
        assert_eq!(pool.allocate().unwrap().to_string(), "fd00::");
        assert_eq!(pool.remaining(), 3);
    }

    #[test]
    fn test_last_address_of_the_space_does_not_overflow() {
        let pool = ExternalIpPool::from_cidr("255.255.255.254/31").unwrap();
        assert_eq!(pool.allocate().unwrap().to_string(), "255.255.255.254");
        assert_eq!(pool.allocate().unwrap().to_string(), "255.255.255.255");
        assert!(pool.allocate().is_err());
    }

    #[test]
    fn test_invalid_cidr_is_a_config_error() {
        for bad in ["", "10.0.0.0", "10.0.0.0/33", "not-a-cidr"] {
            let err = ExternalIpPool::from_cidr(bad).unwrap_err();
            assert!(err.is_config(), "{:?} should be a config error", bad);
        }
    }

    #[test]
    fn test_concurrent_allocation_never_hands_out_duplicates() {
        use std::collections::HashSet;
        use std::sync::Arc;

        let pool = Arc::new(ExternalIpPool::from_cidr("10.0.0.0/24").unwrap());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    (0..32).map(|_| pool.allocate().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for ip in handle.join().unwrap() {
                assert!(seen.insert(ip), "duplicate {}", ip);
            }
        }
        assert_eq!(seen.len(), 256);
        assert!(pool.allocate().is_err());
    }
}
