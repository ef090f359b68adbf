//! Peer address allocation inside an interface subnet.
//!
//! Allocation is a pure function of the subnet and the set of addresses
//! already taken: the lowest free host address wins. Network and broadcast
//! addresses are never handed out.

use std::collections::HashSet;
use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::error::{Result, WgkeepError};
use crate::types::InterfaceRecord;

/// IPv4 host-address allocator for one subnet.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    /// Subnet addresses are drawn from.
    subnet: Ipv4Net,
    /// Addresses already assigned, as integers.
    used: HashSet<u32>,
}

impl AddressAllocator {
    /// Creates an allocator for `subnet` with `used` addresses already taken.
    pub fn new(subnet: Ipv4Net, used: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        Self {
            subnet,
            used: used.into_iter().map(u32::from).collect(),
        }
    }

    /// Creates an allocator seeded from an interface record: its subnet,
    /// its own address, and every peer's primary address.
    #[must_use]
    pub fn for_record(record: &InterfaceRecord) -> Self {
        Self::new(record.interface.address, record.used_addresses())
    }

    /// First and last usable host addresses, or `None` if the subnet has none.
    #[must_use]
    pub fn host_range(&self) -> Option<(u32, u32)> {
        let value = u32::from(self.subnet.addr());
        let host_bits = 32 - u32::from(self.subnet.prefix_len());
        let mask = u32::MAX.checked_shl(host_bits).unwrap_or(0);
        let network = value & mask;
        let broadcast = network | !mask;
        let first = network.checked_add(1)?;
        let last = broadcast.checked_sub(1)?;
        (first <= last).then_some((first, last))
    }

    /// Number of usable host addresses in the subnet.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.host_range()
            .map_or(0, |(first, last)| u64::from(last - first) + 1)
    }

    /// Returns the lowest unused host address as a `/32`.
    ///
    /// Does not reserve the address; callers store it in the record.
    ///
    /// # Errors
    ///
    /// Returns `NoAvailableAddress` when every host address is taken.
    pub fn next_free(&self) -> Result<Ipv4Net> {
        let exhausted = || WgkeepError::NoAvailableAddress(self.subnet.trunc().to_string());
        let (first, last) = self.host_range().ok_or_else(exhausted)?;
        (first..=last)
            .find(|candidate| !self.used.contains(candidate))
            .map(|free| Ipv4Net::from(Ipv4Addr::from(free)))
            .ok_or_else(exhausted)
    }

    /// Marks an address as taken.
    pub fn reserve(&mut self, addr: Ipv4Addr) {
        self.used.insert(u32::from(addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> Ipv4Net {
        s.parse().expect("valid cidr")
    }

    fn ip(s: &str) -> Ipv4Addr {
        s.parse().expect("valid ip")
    }

    #[test]
    fn skips_interface_address() {
        let alloc = AddressAllocator::new(net("10.0.0.1/24"), [ip("10.0.0.1")]);
        assert_eq!(alloc.next_free().expect("free").to_string(), "10.0.0.2/32");
    }

    #[test]
    fn sequential_allocation() {
        let mut alloc = AddressAllocator::new(net("10.0.0.1/24"), [ip("10.0.0.1")]);
        let a = alloc.next_free().expect("first");
        alloc.reserve(a.addr());
        let b = alloc.next_free().expect("second");
        assert_eq!(a.to_string(), "10.0.0.2/32");
        assert_eq!(b.to_string(), "10.0.0.3/32");
    }

    #[test]
    fn fills_gaps_first() {
        let alloc = AddressAllocator::new(
            net("10.0.0.1/24"),
            [ip("10.0.0.1"), ip("10.0.0.2"), ip("10.0.0.4")],
        );
        assert_eq!(alloc.next_free().expect("free").to_string(), "10.0.0.3/32");
    }

    #[test]
    fn host_address_in_cidr_does_not_shift_network() {
        let alloc = AddressAllocator::new(net("192.168.7.77/28"), [ip("192.168.7.77")]);
        assert_eq!(alloc.host_range(), Some((u32::from(ip("192.168.7.65")), u32::from(ip("192.168.7.78")))));
        assert_eq!(alloc.next_free().expect("free").to_string(), "192.168.7.65/32");
    }

    #[test]
    fn never_returns_network_or_broadcast() {
        let alloc = AddressAllocator::new(net("10.0.0.1/30"), [ip("10.0.0.1")]);
        assert_eq!(alloc.capacity(), 2);
        assert_eq!(alloc.next_free().expect("free").to_string(), "10.0.0.2/32");

        let full = AddressAllocator::new(net("10.0.0.1/30"), [ip("10.0.0.1"), ip("10.0.0.2")]);
        assert!(matches!(
            full.next_free(),
            Err(WgkeepError::NoAvailableAddress(subnet)) if subnet == "10.0.0.0/30"
        ));
    }

    #[test]
    fn tiny_subnets_have_no_hosts() {
        for cidr in ["10.0.0.1/31", "10.0.0.1/32"] {
            let alloc = AddressAllocator::new(net(cidr), []);
            assert_eq!(alloc.capacity(), 0);
            assert!(alloc.next_free().is_err());
        }
    }

    #[test]
    fn whole_address_space() {
        let alloc = AddressAllocator::new(net("0.0.0.0/0"), []);
        assert_eq!(alloc.capacity(), u64::from(u32::MAX) - 1);
        assert_eq!(alloc.next_free().expect("free").to_string(), "0.0.0.1/32");
    }

    #[test]
    fn ignores_addresses_outside_subnet() {
        let alloc = AddressAllocator::new(net("10.0.0.1/24"), [ip("10.0.1.2"), ip("10.0.0.1")]);
        assert_eq!(alloc.next_free().expect("free").to_string(), "10.0.0.2/32");
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn smallest_unused_or_exhausted(
                prefix in 24u8..=30,
                used_offsets in prop::collection::hash_set(1u32..255, 0..64),
            ) {
                let subnet = Ipv4Net::new(Ipv4Addr::new(10, 20, 30, 0), prefix)
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                let base = u32::from(subnet.network());
                let used: Vec<Ipv4Addr> = used_offsets
                    .iter()
                    .map(|o| Ipv4Addr::from(base + o))
                    .collect();
                let alloc = AddressAllocator::new(subnet, used.clone());
                let (first, last) = alloc.host_range().ok_or_else(|| TestCaseError::fail("no range"))?;
                let expected = (first..=last).find(|c| !used.contains(&Ipv4Addr::from(*c)));

                match (alloc.next_free(), expected) {
                    (Ok(got), Some(want)) => {
                        prop_assert_eq!(u32::from(got.addr()), want);
                        prop_assert_eq!(got.prefix_len(), 32);
                    }
                    (Err(WgkeepError::NoAvailableAddress(_)), None) => {}
                    (got, want) => prop_assert!(false, "got {:?}, want {:?}", got, want),
                }
            }

            #[test]
            fn allocation_is_deterministic(offsets in prop::collection::vec(1u32..254, 0..32)) {
                let subnet: Ipv4Net = "172.16.5.1/24".parse().map_err(|_| TestCaseError::fail("cidr"))?;
                let used: Vec<Ipv4Addr> = offsets.iter().map(|o| Ipv4Addr::new(172, 16, 5, *o as u8)).collect();
                let a = AddressAllocator::new(subnet, used.clone()).next_free().ok();
                let b = AddressAllocator::new(subnet, used.into_iter().rev()).next_free().ok();
                prop_assert_eq!(a, b);
            }
        }
    }
}
