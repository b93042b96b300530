//! Network membership scanner
//!
//! Decides whether a free-text policy document references a virtual network,
//! either by naming it, by naming one of its endpoints in a source-endpoint
//! condition, or by granting a source IP range that overlaps one of its
//! subnets. Pure: the endpoint and subnet lookups are supplied by the caller.

use crate::cache::{cache_key, CacheExt, MemoryCache};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::IpAddr;
use std::sync::OnceLock;

/// What a document says about a network
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Evidence {
    /// The network id appears verbatim
    DirectReference,
    /// Endpoint ids of the network named in a source-endpoint condition
    EndpointReference(Vec<String>),
    /// `(candidate ip or cidr, overlapping subnet cidr)` pairs
    SourceIpReference(Vec<(String, String)>),
    NoEvidence,
}

impl Evidence {
    pub fn is_match(&self) -> bool {
        !matches!(self, Evidence::NoEvidence)
    }

    /// Short description used as an edge label
    pub fn label(&self) -> &'static str {
        match self {
            Evidence::DirectReference => "direct reference",
            Evidence::EndpointReference(_) => "endpoint reference",
            Evidence::SourceIpReference(_) => "source ip reference",
            Evidence::NoEvidence => "no reference",
        }
    }
}

/// Lookups describing the network under test
///
/// Endpoint and subnet lookups are only consulted when the document carries
/// the matching condition marker.
pub trait NetworkContext {
    fn network_id(&self) -> &str;
    fn endpoint_ids(&self) -> Vec<String>;
    fn subnet_cidrs(&self) -> Vec<String>;
}

/// Network context with pre-resolved lookups
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticNetwork {
    pub id: String,
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub subnets: Vec<String>,
}

impl NetworkContext for StaticNetwork {
    fn network_id(&self) -> &str {
        &self.id
    }

    fn endpoint_ids(&self) -> Vec<String> {
        self.endpoints.clone()
    }

    fn subnet_cidrs(&self) -> Vec<String> {
        self.subnets.clone()
    }
}

/// Resolve a network's endpoints and subnets, memoized per run
///
/// The lookup futures are only awaited on a cache miss.
pub async fn resolve_network<FE, FS>(
    cache: &MemoryCache,
    network_id: &str,
    endpoints: FE,
    subnets: FS,
) -> Result<StaticNetwork>
where
    FE: Future<Output = Result<Vec<String>>>,
    FS: Future<Output = Result<Vec<String>>>,
{
    let endpoints_key = cache_key("endpoints", &[network_id]);
    let endpoints = match cache.get_as::<Vec<String>>(&endpoints_key) {
        Some(hit) => hit,
        None => {
            let fetched = endpoints.await?;
            cache.set_as(&endpoints_key, &fetched, cache.default_ttl());
            fetched
        }
    };

    let subnets_key = cache_key("subnets", &[network_id]);
    let subnets = match cache.get_as::<Vec<String>>(&subnets_key) {
        Some(hit) => hit,
        None => {
            let fetched = subnets.await?;
            cache.set_as(&subnets_key, &fetched, cache.default_ttl());
            fetched
        }
    };

    Ok(StaticNetwork {
        id: network_id.to_string(),
        endpoints,
        subnets,
    })
}

/// Condition markers and extraction patterns
#[derive(Debug, Clone)]
pub struct ScanMarkers {
    /// Marker of a source-endpoint condition (matched case-insensitively)
    pub endpoint_condition: String,
    /// Marker of a source-IP condition (matched case-insensitively)
    pub ip_condition: String,
    pub endpoint_pattern: String,
    pub ip_pattern: String,
}

impl Default for ScanMarkers {
    fn default() -> Self {
        Self {
            endpoint_condition: "aws:sourcevpce".to_string(),
            ip_condition: "aws:sourceip".to_string(),
            endpoint_pattern: r"(?i)\bvpce-[0-9a-z]+\b".to_string(),
            // IPv4, or a loose IPv6 candidate that `Cidr::parse` validates
            ip_pattern: concat!(
                r"\b\d{1,3}(?:\.\d{1,3}){3}(?:/\d{1,3})?",
                r"|[0-9A-Fa-f]{0,4}:[0-9A-Fa-f:]*:[0-9A-Fa-f]{0,4}(?:/\d{1,3})?",
            )
            .to_string(),
        }
    }
}

/// Compiled scanner
#[derive(Debug, Clone)]
pub struct MembershipScanner {
    endpoint_condition: String,
    ip_condition: String,
    endpoint_re: Regex,
    ip_re: Regex,
}

impl MembershipScanner {
    pub fn new(markers: &ScanMarkers) -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            endpoint_condition: markers.endpoint_condition.to_lowercase(),
            ip_condition: markers.ip_condition.to_lowercase(),
            endpoint_re: Regex::new(&markers.endpoint_pattern)?,
            ip_re: Regex::new(&markers.ip_pattern)?,
        })
    }

    /// Classify how `document` references the network
    pub fn scan(&self, document: &str, network: &dyn NetworkContext) -> Evidence {
        let document = document.replace('\\', "");
        let lowered = document.to_lowercase();

        let network_id = network.network_id().to_lowercase();
        if !network_id.is_empty() && lowered.contains(&network_id) {
            return Evidence::DirectReference;
        }

        if lowered.contains(&self.endpoint_condition) {
            let endpoints = self.matching_endpoints(&document, network);
            if !endpoints.is_empty() {
                return Evidence::EndpointReference(endpoints);
            }
        }

        if lowered.contains(&self.ip_condition) {
            let pairs = self.overlapping_sources(&document, network);
            if !pairs.is_empty() {
                return Evidence::SourceIpReference(pairs);
            }
        }

        Evidence::NoEvidence
    }

    fn matching_endpoints(&self, document: &str, network: &dyn NetworkContext) -> Vec<String> {
        let live: Vec<String> = network
            .endpoint_ids()
            .into_iter()
            .map(|id| id.to_lowercase())
            .collect();

        let mut found: Vec<String> = Vec::new();
        for candidate in self.endpoint_re.find_iter(document) {
            let candidate = candidate.as_str().to_lowercase();
            if live.contains(&candidate) && !found.contains(&candidate) {
                found.push(candidate);
            }
        }
        found
    }

    fn overlapping_sources(
        &self,
        document: &str,
        network: &dyn NetworkContext,
    ) -> Vec<(String, String)> {
        let subnets: Vec<(String, Cidr)> = network
            .subnet_cidrs()
            .into_iter()
            .filter_map(|raw| match Cidr::parse(&raw) {
                Some(cidr) => Some((raw, cidr)),
                None => {
                    tracing::debug!("Skipping malformed subnet cidr {}", raw);
                    None
                }
            })
            .collect();

        let mut pairs: Vec<(String, String)> = Vec::new();
        for candidate in self.ip_re.find_iter(document) {
            let candidate = candidate.as_str();
            let Some(source) = Cidr::parse(candidate) else {
                tracing::debug!("Skipping malformed source ip {}", candidate);
                continue;
            };

            for (raw, subnet) in &subnets {
                let pair = (candidate.to_string(), raw.clone());
                if source.overlaps(subnet) && !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
        pairs
    }
}

fn default_scanner() -> &'static MembershipScanner {
    static SCANNER: OnceLock<MembershipScanner> = OnceLock::new();
    SCANNER.get_or_init(|| {
        MembershipScanner::new(&ScanMarkers::default())
            .unwrap_or_else(|e| panic!("Invalid built-in scan pattern: {}", e))
    })
}

/// Classify `document` against `network` with the default markers
pub fn references_network(document: &str, network: &dyn NetworkContext) -> Evidence {
    default_scanner().scan(document, network)
}

/// An IPv4 or IPv6 range; a bare address is a full-length prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cidr {
    bits: u128,
    prefix: u8,
    width: u8,
}

impl Cidr {
    fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (addr, prefix) = match raw.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix.parse::<u8>().ok()?)),
            None => (raw, None),
        };

        let (bits, width) = match addr.parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => (u128::from(u32::from(v4)), 32),
            IpAddr::V6(v6) => (u128::from(v6), 128),
        };

        let prefix = prefix.unwrap_or(width);
        if prefix > width {
            return None;
        }

        Some(Self {
            bits,
            prefix,
            width,
        })
    }

    fn mask(&self, prefix: u8) -> u128 {
        if prefix == 0 {
            return 0;
        }
        let full = if self.width == 128 {
            u128::MAX
        } else {
            (1u128 << self.width) - 1
        };
        (u128::MAX << (128 - u32::from(prefix)) >> (128 - u32::from(self.width))) & full
    }

    /// Two ranges overlap iff they agree on the shorter prefix
    fn overlaps(&self, other: &Cidr) -> bool {
        if self.width != other.width {
            return false;
        }
        let mask = self.mask(self.prefix.min(other.prefix));
        self.bits & mask == other.bits & mask
    }
}

/// Range-overlap test between two CIDR (or bare address) literals
///
/// Returns `None` if either literal is malformed.
pub fn cidrs_overlap(a: &str, b: &str) -> Option<bool> {
    Some(Cidr::parse(a)?.overlaps(&Cidr::parse(b)?))
}
