//! IPv4 address pool
//!
//! Addresses inside a subnet are tracked by *offset*, the integer distance
//! from the block's base address. The two lowest and two highest offsets of
//! the block are reserved, so automatic allocation draws from
//! `[MIN_OFFSET, 2^hostbits - 2)`.
//!
//! A slot is in one of three states:
//! - `Free`: never touched (no entry in the pool)
//! - `Allocated(ip)`: in use
//! - `Tombstoned`: was allocated, since released
//!
//! Automatic allocation only takes `Free` slots; tombstoned slots come back
//! into use only through an explicit request for that address.

use crate::error::{ProviderError, Result};
use ipnet::{IpNet, Ipv4Net};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use tracing::warn;

/// Lowest offset handed out or accepted
pub const MIN_OFFSET: u32 = 2;

/// Offsets reserved at the top of the block
const RESERVED_TOP: u64 = 2;

/// Parsed IPv4 CIDR block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Block {
    net: Ipv4Net,
}

impl Ipv4Block {
    /// Parse a CIDR string. The host bits of the address are ignored, so
    /// `192.168.1.7/24` names the same block as `192.168.1.0/24`.
    pub fn parse(cidr: &str) -> Result<Self> {
        let net: IpNet = cidr
            .trim()
            .parse()
            .map_err(|e| ProviderError::Validation(format!("invalid CIDR {cidr}: {e}")))?;
        match net {
            IpNet::V4(net) => Ok(Self { net: net.trunc() }),
            IpNet::V6(_) => Err(ProviderError::Validation(format!(
                "invalid CIDR {cidr}: only IPv4 subnets are supported"
            ))),
        }
    }

    /// Network (base) address
    #[must_use]
    pub fn base(&self) -> Ipv4Addr {
        self.net.network()
    }

    /// True when `ip` lies inside the block
    #[must_use]
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.net.contains(&ip)
    }

    /// One past the highest offset automatic allocation may use
    #[must_use]
    pub fn max_offset(&self) -> u64 {
        let host_bits = 32 - u32::from(self.net.prefix_len());
        (1u64 << host_bits).saturating_sub(RESERVED_TOP)
    }

    /// Offset of `ip` from the base; `None` when outside the block
    #[must_use]
    pub fn offset_of(&self, ip: Ipv4Addr) -> Option<u32> {
        self.contains(ip)
            .then(|| u32::from(ip) - u32::from(self.base()))
    }

    /// Address at `offset`; `None` on overflow past 255.255.255.255
    #[must_use]
    pub fn addr_at(&self, offset: u64) -> Option<Ipv4Addr> {
        let addr = u64::from(u32::from(self.base())) + offset;
        u32::try_from(addr).ok().map(Ipv4Addr::from)
    }
}

impl std::fmt::Display for Ipv4Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.net)
    }
}

/// State of one pool slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Allocated(Ipv4Addr),
    Tombstoned,
}

/// Per-subnet address pool, keyed by offset
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpPool {
    // Never holds `SlotState::Free`
    slots: BTreeMap<u32, SlotState>,
}

impl IpPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the persisted `offset -> ip | null` map.
    ///
    /// An entry whose offset does not parse is dropped. An entry whose
    /// address does not parse becomes a tombstone, so automatic allocation
    /// never hands out a slot that may still be in use.
    #[must_use]
    pub fn from_record(record: &BTreeMap<String, Option<String>>) -> Self {
        let mut slots = BTreeMap::new();
        for (offset, ip) in record {
            let Ok(offset) = offset.parse::<u32>() else {
                warn!("Dropping pool entry with malformed offset {:?}", offset);
                continue;
            };
            let state = match ip {
                None => SlotState::Tombstoned,
                Some(ip) => match ip.parse::<Ipv4Addr>() {
                    Ok(ip) => SlotState::Allocated(ip),
                    Err(_) => {
                        warn!(
                            "Pool entry {} has malformed address {:?}, keeping the slot out of use",
                            offset, ip
                        );
                        SlotState::Tombstoned
                    }
                },
            };
            slots.insert(offset, state);
        }
        Self { slots }
    }

    /// Persisted form: offset (decimal string) to address, `null` for tombstones
    #[must_use]
    pub fn to_record(&self) -> BTreeMap<String, Option<String>> {
        self.slots
            .iter()
            .filter_map(|(offset, state)| {
                let value = match state {
                    SlotState::Free => return None,
                    SlotState::Allocated(ip) => Some(ip.to_string()),
                    SlotState::Tombstoned => None,
                };
                Some((offset.to_string(), value))
            })
            .collect()
    }

    /// State of the slot at `offset`
    #[must_use]
    pub fn slot(&self, offset: u32) -> SlotState {
        self.slots.get(&offset).copied().unwrap_or(SlotState::Free)
    }

    /// Allocated slots, ascending by offset
    pub fn allocated(&self) -> impl Iterator<Item = (u32, Ipv4Addr)> + '_ {
        self.slots.iter().filter_map(|(offset, state)| match state {
            SlotState::Allocated(ip) => Some((*offset, *ip)),
            _ => None,
        })
    }

    /// Number of allocated slots
    #[must_use]
    pub fn allocated_count(&self) -> usize {
        self.allocated().count()
    }

    /// Allocate an address.
    ///
    /// With `specific`, the address must parse, lie inside `block`, sit at or
    /// above `MIN_OFFSET`, and not match any recorded in-use address. The
    /// in-use check compares addresses, not offsets.
    ///
    /// Without it, the lowest `Free` offset in `[MIN_OFFSET, max_offset)` is taken.
    pub fn allocate(&mut self, block: &Ipv4Block, specific: Option<&str>) -> Result<Ipv4Addr> {
        match specific {
            Some(requested) => self.allocate_specific(block, requested),
            None => self.allocate_next(block),
        }
    }

    fn allocate_specific(&mut self, block: &Ipv4Block, requested: &str) -> Result<Ipv4Addr> {
        let ip: Ipv4Addr = requested
            .parse()
            .map_err(|_| ProviderError::Validation(format!("invalid ip {requested}")))?;
        let offset = block.offset_of(ip).ok_or_else(|| {
            ProviderError::Validation(format!("ip {ip} is not in cidr {block}"))
        })?;
        if offset < MIN_OFFSET {
            return Err(ProviderError::Validation(format!(
                "ip {ip} offset {offset} is below the minimum offset {MIN_OFFSET}"
            )));
        }
        if self.allocated().any(|(_, used)| used == ip) {
            return Err(ProviderError::Validation(format!("ip {ip} already in use")));
        }

        self.slots.insert(offset, SlotState::Allocated(ip));
        Ok(ip)
    }

    fn allocate_next(&mut self, block: &Ipv4Block) -> Result<Ipv4Addr> {
        for offset in u64::from(MIN_OFFSET)..block.max_offset() {
            let Ok(key) = u32::try_from(offset) else {
                break;
            };
            if self.slot(key) != SlotState::Free {
                continue;
            }
            let Some(ip) = block.addr_at(offset) else {
                break;
            };
            if !block.contains(ip) {
                continue;
            }
            self.slots.insert(key, SlotState::Allocated(ip));
            return Ok(ip);
        }

        Err(ProviderError::ResourceExhausted(format!(
            "no free address in cidr {block}"
        )))
    }

    /// Release an allocated address, leaving a tombstone. Returns the offset
    /// and the slot's previous state so the caller can undo it.
    pub fn release(&mut self, block: &Ipv4Block, ip: &str) -> Result<(u32, SlotState)> {
        let addr: Ipv4Addr = ip
            .parse()
            .map_err(|_| ProviderError::Validation(format!("invalid ip {ip}")))?;
        let offset = block.offset_of(addr).ok_or_else(|| {
            ProviderError::Validation(format!("ip {addr} is not in cidr {block}"))
        })?;

        let previous = self.slot(offset);
        if !matches!(previous, SlotState::Allocated(_)) {
            return Err(ProviderError::Validation(format!(
                "ip {addr} is not allocated in cidr {block}"
            )));
        }

        self.slots.insert(offset, SlotState::Tombstoned);
        Ok((offset, previous))
    }

    /// Put a slot back to `state`, undoing a `release`
    pub fn restore(&mut self, offset: u32, state: SlotState) {
        match state {
            SlotState::Free => {
                self.slots.remove(&offset);
            }
            other => {
                self.slots.insert(offset, other);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(cidr: &str) -> Ipv4Block {
        Ipv4Block::parse(cidr).unwrap()
    }

    #[test]
    fn test_parse_masks_host_bits() {
        let b = block("192.168.1.77/24");
        assert_eq!(b.base(), Ipv4Addr::new(192, 168, 1, 0));
        assert_eq!(b.max_offset(), 254);
    }

    #[test]
    fn test_parse_rejects_garbage_and_ipv6() {
        assert!(matches!(Ipv4Block::parse("not-a-cidr"), Err(ProviderError::Validation(_))));
        assert!(matches!(Ipv4Block::parse("192.168.1.0"), Err(ProviderError::Validation(_))));
        assert!(matches!(Ipv4Block::parse("fd00::/64"), Err(ProviderError::Validation(_))));
    }

    #[test]
    fn test_auto_allocation_starts_at_offset_two() {
        let b = block("192.168.1.0/24");
        let mut pool = IpPool::new();
        assert_eq!(pool.allocate(&b, None).unwrap(), Ipv4Addr::new(192, 168, 1, 2));
        assert_eq!(pool.allocate(&b, None).unwrap(), Ipv4Addr::new(192, 168, 1, 3));
    }

    #[test]
    fn test_auto_allocation_exhausts_before_top_reserved_offsets() {
        // /29: offsets 0..8, allocatable 2..6
        let b = block("10.0.0.0/29");
        let mut pool = IpPool::new();
        let got: Vec<Ipv4Addr> = (0..4).map(|_| pool.allocate(&b, None).unwrap()).collect();
        assert_eq!(
            got,
            vec![
                Ipv4Addr::new(10, 0, 0, 2),
                Ipv4Addr::new(10, 0, 0, 3),
                Ipv4Addr::new(10, 0, 0, 4),
                Ipv4Addr::new(10, 0, 0, 5),
            ]
        );
        assert!(matches!(
            pool.allocate(&b, None),
            Err(ProviderError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_tiny_blocks_have_nothing_to_allocate() {
        for cidr in ["10.0.0.0/31", "10.0.0.0/32", "10.0.0.0/30"] {
            let mut pool = IpPool::new();
            assert!(
                matches!(pool.allocate(&block(cidr), None), Err(ProviderError::ResourceExhausted(_))),
                "{cidr} should have no allocatable offsets"
            );
        }
    }

    #[test]
    fn test_auto_allocation_skips_tombstones() {
        let b = block("192.168.1.0/24");
        let mut pool = IpPool::new();
        let first = pool.allocate(&b, None).unwrap();
        pool.release(&b, &first.to_string()).unwrap();

        assert_eq!(pool.slot(2), SlotState::Tombstoned);
        assert_eq!(pool.allocate(&b, None).unwrap(), Ipv4Addr::new(192, 168, 1, 3));
    }

    #[test]
    fn test_specific_allocation_rules() {
        let b = block("192.168.1.0/24");
        let mut pool = IpPool::new();

        assert_eq!(
            pool.allocate(&b, Some("192.168.1.5")).unwrap(),
            Ipv4Addr::new(192, 168, 1, 5)
        );
        let dup = pool.allocate(&b, Some("192.168.1.5")).unwrap_err();
        assert!(dup.to_string().contains("already in use"), "Unexpected error: {dup}");

        let outside = pool.allocate(&b, Some("10.0.0.5")).unwrap_err();
        assert!(matches!(outside, ProviderError::Validation(_)));

        let reserved = pool.allocate(&b, Some("192.168.1.1")).unwrap_err();
        assert!(reserved.to_string().contains("below the minimum offset"));

        assert!(matches!(
            pool.allocate(&b, Some("192.168.1.300")),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_specific_allocation_reuses_tombstoned_slot() {
        let b = block("192.168.1.0/24");
        let mut pool = IpPool::new();
        let ip = pool.allocate(&b, None).unwrap();
        pool.release(&b, &ip.to_string()).unwrap();

        assert_eq!(pool.allocate(&b, Some(&ip.to_string())).unwrap(), ip);
        assert_eq!(pool.slot(2), SlotState::Allocated(ip));
    }

    #[test]
    fn test_release_requires_allocated_slot() {
        let b = block("192.168.1.0/24");
        let mut pool = IpPool::new();
        assert!(pool.release(&b, "192.168.1.9").is_err());
        assert!(pool.release(&b, "10.1.1.1").is_err());

        pool.allocate(&b, Some("192.168.1.9")).unwrap();
        let (offset, previous) = pool.release(&b, "192.168.1.9").unwrap();
        assert_eq!(offset, 9);
        assert_eq!(previous, SlotState::Allocated(Ipv4Addr::new(192, 168, 1, 9)));

        // Releasing twice is rejected: the slot is now a tombstone
        assert!(pool.release(&b, "192.168.1.9").is_err());

        pool.restore(offset, previous);
        assert_eq!(pool.slot(9), previous);
    }

    #[test]
    fn test_record_round_trip_keeps_tombstones() {
        let b = block("192.168.1.0/24");
        let mut pool = IpPool::new();
        pool.allocate(&b, None).unwrap();
        pool.allocate(&b, None).unwrap();
        pool.release(&b, "192.168.1.2").unwrap();

        let record = pool.to_record();
        assert_eq!(record.get("2"), Some(&None));
        assert_eq!(record.get("3"), Some(&Some("192.168.1.3".to_string())));
        assert_eq!(IpPool::from_record(&record), pool);
    }

    #[test]
    fn test_malformed_record_entries_do_not_free_slots() {
        let b = block("10.0.0.0/24");
        let record: BTreeMap<String, Option<String>> = [
            ("2", Some("garbage")),
            ("3", Some("10.0.0.3")),
            ("x", Some("10.0.0.9")),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
        .collect();

        let mut pool = IpPool::from_record(&record);
        assert_eq!(pool.slot(2), SlotState::Tombstoned);
        assert_eq!(pool.slot(3), SlotState::Allocated(Ipv4Addr::new(10, 0, 0, 3)));
        assert_eq!(pool.allocated_count(), 1);
        assert_eq!(pool.allocate(&b, None).unwrap(), Ipv4Addr::new(10, 0, 0, 4));
    }

    #[test]
    fn test_address_check_and_offset_index_can_diverge() {
        // A pool whose recorded address does not match its offset key. The
        // specific-IP check looks at addresses, automatic allocation looks at
        // offsets, so each lets through what the other would have refused.
        let b = block("192.168.1.0/24");
        let mut record = BTreeMap::new();
        record.insert("3".to_string(), Some("192.168.1.9".to_string()));
        let mut pool = IpPool::from_record(&record);

        // Address .9 is recorded, so an explicit request for it is refused...
        assert!(pool.allocate(&b, Some("192.168.1.9")).is_err());
        // ...but .3 is not recorded as an address, so it is granted even though slot 3 is taken
        assert_eq!(
            pool.allocate(&b, Some("192.168.1.3")).unwrap(),
            Ipv4Addr::new(192, 168, 1, 3)
        );

        let mut record = BTreeMap::new();
        record.insert("3".to_string(), Some("192.168.1.2".to_string()));
        let mut pool = IpPool::from_record(&record);
        // Slot 2 is untouched by offset, so automatic allocation hands out .2 again
        assert_eq!(pool.allocate(&b, None).unwrap(), Ipv4Addr::new(192, 168, 1, 2));
    }
}
