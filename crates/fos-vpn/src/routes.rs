//! Tunnel Route Table
//!
//! Computes which IPv4 addresses go through the tunnel: the whole address
//! space minus a fixed table of excluded ranges, expressed as maximal
//! contiguous runs.
//!
//! # Excluded Ranges
//!
//! | Range | Reason |
//! |-------|--------|
//! | 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16 | RFC1918 private networks |
//! | 66.94.2.0/24, 66.94.6.0/23, 66.94.8.0/22, 208.54.0.0/16 | T-Mobile Wi-Fi calling |
//! | 100.64.0.0/10 | Shared address space (CGNAT) |
//! | 127.0.0.0/8 | Loopback |
//! | 141.207.0.0/16 | Verizon Wi-Fi calling |
//! | 169.254.0.0/16 | Link-local |
//! | 224.0.0.0/4 | Multicast |
//! | 240.0.0.0/4 | Reserved (class E) and broadcast |
//!
//! Addresses are plain `u32`s so ordering is numeric.

use once_cell::sync::Lazy;
use std::net::Ipv4Addr;

/// Highest IPv4 address (255.255.255.255)
pub const MAX_ADDRESS: u32 = u32::MAX;

const fn ipv4(a: u8, b: u8, c: u8, d: u8) -> u32 {
    u32::from_be_bytes([a, b, c, d])
}

const BUILTIN_EXCLUSIONS: &[ExcludedRange] = &[
    ExcludedRange::new("rfc1918-10", ipv4(10, 0, 0, 0), ipv4(10, 255, 255, 255)),
    ExcludedRange::new("tmobile-wifi-calling", ipv4(66, 94, 2, 0), ipv4(66, 94, 2, 255)),
    ExcludedRange::new("tmobile-wifi-calling", ipv4(66, 94, 6, 0), ipv4(66, 94, 7, 255)),
    ExcludedRange::new("tmobile-wifi-calling", ipv4(66, 94, 8, 0), ipv4(66, 94, 11, 255)),
    ExcludedRange::new("cgnat", ipv4(100, 64, 0, 0), ipv4(100, 127, 255, 255)),
    ExcludedRange::new("loopback", ipv4(127, 0, 0, 0), ipv4(127, 255, 255, 255)),
    ExcludedRange::new("verizon-wifi-calling", ipv4(141, 207, 0, 0), ipv4(141, 207, 255, 255)),
    ExcludedRange::new("link-local", ipv4(169, 254, 0, 0), ipv4(169, 254, 255, 255)),
    ExcludedRange::new("rfc1918-172", ipv4(172, 16, 0, 0), ipv4(172, 31, 255, 255)),
    ExcludedRange::new("rfc1918-192", ipv4(192, 168, 0, 0), ipv4(192, 168, 255, 255)),
    ExcludedRange::new("tmobile-wifi-calling", ipv4(208, 54, 0, 0), ipv4(208, 54, 255, 255)),
    ExcludedRange::new("multicast", ipv4(224, 0, 0, 0), ipv4(239, 255, 255, 255)),
    ExcludedRange::new("class-e", ipv4(240, 0, 0, 0), MAX_ADDRESS),
];

/// Route computation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("No address after 255.255.255.255")]
    AddressOverflow,

    #[error("Excluded range {name} is inverted ({low} > {high})")]
    InvertedRange {
        name: &'static str,
        low: Ipv4Addr,
        high: Ipv4Addr,
    },

    #[error("Excluded ranges {first} and {second} overlap")]
    OverlappingRanges {
        first: &'static str,
        second: &'static str,
    },
}

/// Address immediately after `addr`.
///
/// There is nothing after 255.255.255.255; asking for it is a logic error.
pub fn next_address(addr: u32) -> Result<u32, RouteError> {
    addr.checked_add(1).ok_or(RouteError::AddressOverflow)
}

/// Inclusive range of IPv4 addresses sent through the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub low: u32,
    pub high: u32,
}

impl Route {
    pub fn new(low: u32, high: u32) -> Self {
        debug_assert!(low <= high);
        Self { low, high }
    }

    pub fn low_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.low)
    }

    pub fn high_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.high)
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.low <= addr && addr <= self.high
    }

    /// Number of addresses covered
    pub fn len(&self) -> u64 {
        u64::from(self.high) - u64::from(self.low) + 1
    }

    /// Smallest list of aligned CIDR blocks covering exactly this range
    pub fn to_cidrs(&self) -> Vec<Cidr> {
        let mut cidrs = Vec::new();
        let mut start = u64::from(self.low);
        let end = u64::from(self.high);

        while start <= end {
            let align = if start == 0 { 32 } else { start.trailing_zeros().min(32) };
            let remaining = end - start + 1;
            let fits = 63 - remaining.leading_zeros();
            let bits = align.min(fits);

            cidrs.push(Cidr {
                address: Ipv4Addr::from(start as u32),
                prefix: (32 - bits) as u8,
            });
            start += 1u64 << bits;
        }

        cidrs
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.low_addr(), self.high_addr())
    }
}

/// Address/prefix route, as most OS tunnel builders take them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cidr {
    pub address: Ipv4Addr,
    pub prefix: u8,
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix)
    }
}

/// Address range that must never go through the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExcludedRange {
    pub name: &'static str,
    pub low: u32,
    pub high: u32,
}

impl ExcludedRange {
    pub const fn new(name: &'static str, low: u32, high: u32) -> Self {
        Self { name, low, high }
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.low <= addr && addr <= self.high
    }
}

/// Validated, sorted, non-overlapping set of excluded ranges
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionTable {
    ranges: Vec<ExcludedRange>,
}

impl ExclusionTable {
    /// Sort and validate a table. Inverted or overlapping entries are
    /// rejected; adjacent entries are fine.
    pub fn new(mut ranges: Vec<ExcludedRange>) -> Result<Self, RouteError> {
        if let Some(bad) = ranges.iter().find(|r| r.low > r.high) {
            return Err(RouteError::InvertedRange {
                name: bad.name,
                low: Ipv4Addr::from(bad.low),
                high: Ipv4Addr::from(bad.high),
            });
        }

        ranges.sort_by_key(|r| r.low);

        if let Some(pair) = ranges.windows(2).find(|w| w[0].high >= w[1].low) {
            return Err(RouteError::OverlappingRanges {
                first: pair[0].name,
                second: pair[1].name,
            });
        }

        Ok(Self { ranges })
    }

    /// The hard-coded production table
    pub fn builtin() -> Self {
        let mut ranges = BUILTIN_EXCLUSIONS.to_vec();
        ranges.sort_by_key(|r| r.low);
        Self { ranges }
    }

    pub fn ranges(&self) -> &[ExcludedRange] {
        &self.ranges
    }

    pub fn contains(&self, addr: u32) -> bool {
        let idx = self.ranges.partition_point(|r| r.high < addr);
        self.ranges.get(idx).is_some_and(|r| r.contains(addr))
    }
}

/// Immutable, sorted list of tunnel routes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn contains(&self, addr: u32) -> bool {
        let idx = self.routes.partition_point(|r| r.high < addr);
        self.routes.get(idx).is_some_and(|r| r.contains(addr))
    }

    /// Routes that share at least one address with `[low, high]`, in order
    pub fn overlapping(&self, low: u32, high: u32) -> &[Route] {
        let start = self.routes.partition_point(|r| r.high < low);
        let end = self.routes.partition_point(|r| r.low <= high);
        &self.routes[start..end.max(start)]
    }

    /// Total number of routed addresses
    pub fn address_count(&self) -> u64 {
        self.routes.iter().map(Route::len).sum()
    }

    pub fn to_cidrs(&self) -> Vec<Cidr> {
        self.routes.iter().flat_map(Route::to_cidrs).collect()
    }
}

/// Computes the route table for an exclusion table
#[derive(Debug, Clone)]
pub struct RouteCalculator {
    exclusions: ExclusionTable,
}

impl RouteCalculator {
    pub fn new(exclusions: ExclusionTable) -> Self {
        Self { exclusions }
    }

    /// Complement of the exclusion table over 0.0.0.0 - 255.255.255.255
    pub fn compute_routes(&self) -> RouteTable {
        let mut routes = Vec::with_capacity(self.exclusions.ranges().len() + 1);
        // None once the cursor has run past the last address
        let mut cursor = Some(0u32);

        for excluded in self.exclusions.ranges() {
            let Some(low) = cursor else { break };

            if low < excluded.low {
                routes.push(Route::new(low, excluded.low - 1));
            }
            cursor = next_address(excluded.high).ok();
        }

        if let Some(low) = cursor {
            routes.push(Route::new(low, MAX_ADDRESS));
        }

        RouteTable { routes }
    }
}

impl Default for RouteCalculator {
    fn default() -> Self {
        Self::new(ExclusionTable::builtin())
    }
}

static ROUTES: Lazy<RouteTable> = Lazy::new(|| RouteCalculator::default().compute_routes());

/// Route table for the built-in exclusions, computed once
pub fn routes() -> &'static RouteTable {
    &ROUTES
}
