//! Static catalog of the retail sources PriceHound knows how to query.
//!
//! The catalog is used both to validate incoming requests and to rank
//! sources when two offers share the same price.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

/// How much a source's listings can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReliabilityTier {
    High,
    Medium,
    Low,
}

impl ReliabilityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReliabilityTier::High => "high",
            ReliabilityTier::Medium => "medium",
            ReliabilityTier::Low => "low",
        }
    }
}

impl fmt::Display for ReliabilityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ReliabilityTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "high" => Ok(ReliabilityTier::High),
            "medium" => Ok(ReliabilityTier::Medium),
            "low" => Ok(ReliabilityTier::Low),
            _ => Err(format!("Unknown reliability tier: {s}")),
        }
    }
}

/// Externally visible description of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub reliability: ReliabilityTier,
}

pub const AMAZON: &str = "amazon";
pub const EPRICE: &str = "eprice";
pub const UNIEURO: &str = "unieuro";
pub const MEDIAWORLD: &str = "mediaworld";
pub const TROVAPREZZI: &str = "trovaprezzi";

const DEFAULT_SOURCES: &[SourceInfo] = &[
    SourceInfo {
        id: AMAZON,
        display_name: "Amazon.it",
        description: "Main marketplace",
        reliability: ReliabilityTier::High,
    },
    SourceInfo {
        id: EPRICE,
        display_name: "ePRICE",
        description: "Electronics and tech",
        reliability: ReliabilityTier::High,
    },
    SourceInfo {
        id: UNIEURO,
        display_name: "Unieuro",
        description: "Consumer electronics",
        reliability: ReliabilityTier::Medium,
    },
    SourceInfo {
        id: MEDIAWORLD,
        display_name: "MediaWorld",
        description: "Electronics and home appliances",
        reliability: ReliabilityTier::Medium,
    },
    SourceInfo {
        id: TROVAPREZZI,
        display_name: "TrovaPrezzi",
        description: "Multi-shop price aggregator",
        reliability: ReliabilityTier::High,
    },
];

/// Ordered, immutable list of known sources.
#[derive(Debug, Clone)]
pub struct SourceCatalog {
    sources: Vec<SourceInfo>,
}

impl SourceCatalog {
    pub fn new(sources: Vec<SourceInfo>) -> Self {
        Self { sources }
    }

    pub fn get(&self, id: &str) -> Option<&SourceInfo> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceInfo> {
        self.sources.iter()
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.sources.iter().map(|s| s.id).collect()
    }

    /// Source ids ordered from most to least reliable.
    ///
    /// Sorting is stable, so sources in the same tier keep catalog order.
    pub fn ranking(&self) -> Vec<String> {
        let mut ranked: Vec<&SourceInfo> = self.sources.iter().collect();
        ranked.sort_by_key(|s| s.reliability);
        ranked.into_iter().map(|s| s.id.to_string()).collect()
    }
}

impl Default for SourceCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_SOURCES.to_vec())
    }
}
