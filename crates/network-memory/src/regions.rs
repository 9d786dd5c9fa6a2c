//! Region link model.
//!
//! Seven regions with a fitted latency matrix and per-region upload and
//! download bandwidth. A link's bandwidth is the sender's upload capped by
//! the receiver's download.

use blocksim_core::{ConfigError, LinkModel};
use blocksim_types::Region;
use std::time::Duration;

/// Region names, in table order.
pub const REGION_NAMES: [&str; 7] = [
    "north_america",
    "europe",
    "south_america",
    "asia_south",
    "asia_pacific",
    "japan",
    "australia",
];

/// One-way latency in milliseconds, fitted to 2022 compact-relay measurements.
const LATENCY_2022_MS: [[u64; 7]; 7] = [
    [24, 70, 79, 115, 140, 79, 122],
    [70, 12, 161, 129, 97, 152, 140],
    [79, 128, 30, 195, 207, 176, 201],
    [122, 129, 195, 24, 54, 24, 129],
    [122, 97, 207, 54, 36, 42, 85],
    [103, 152, 176, 48, 42, 18, 183],
    [134, 158, 201, 128, 85, 192, 30],
];

/// Download bandwidth in bytes per second (2022).
const DOWNLOAD_2022_BYTES_PER_SEC: [u64; 7] = [
    15_000_000, 10_500_000, 6_000_000, 10_500_000, 30_000_000, 15_000_000, 5_400_000,
];

/// Upload bandwidth in bytes per second, fitted to 2022 compact-relay
/// measurements.
const UPLOAD_2022_BYTES_PER_SEC: [u64; 7] = [
    6_875_000, 4_812_500, 2_750_000, 4_812_500, 13_750_000, 6_875_000, 2_475_000,
];

/// Share of reachable Bitcoin nodes per region (2022).
pub const BITCOIN_2022_REGION_DISTRIBUTION: [f64; 7] =
    [0.414, 0.457, 0.009, 0.072, 0.011, 0.02, 0.018];

/// Cumulative distribution of outbound links per node, Bitcoin 2015.
pub const BITCOIN_2015_DEGREE_CDF: [f64; 20] = [
    0.025, 0.050, 0.075, 0.10, 0.20, 0.30, 0.40, 0.50, 0.60, 0.70, 0.80, 0.85, 0.90, 0.95, 0.97,
    0.97, 0.98, 0.99, 0.995, 1.0,
];

/// Latency and bandwidth lookup between regions.
#[derive(Debug, Clone)]
pub struct RegionTable {
    latency_ms: Vec<Vec<u64>>,
    upload_bytes_per_sec: Vec<u64>,
    download_bytes_per_sec: Vec<u64>,
}

impl RegionTable {
    /// Build a table from custom measurements.
    ///
    /// Fails if the tables disagree on the number of regions, or if any
    /// region pair would end up with less than one byte per millisecond.
    pub fn new(
        latency_ms: Vec<Vec<u64>>,
        upload_bytes_per_sec: Vec<u64>,
        download_bytes_per_sec: Vec<u64>,
    ) -> Result<Self, ConfigError> {
        let regions = latency_ms.len();
        if regions == 0 {
            return Err(ConfigError::EmptyDistribution("latency table"));
        }
        for row in &latency_ms {
            if row.len() != regions {
                return Err(ConfigError::RegionOutOfRange {
                    index: row.len(),
                    regions,
                });
            }
        }
        for table in [&upload_bytes_per_sec, &download_bytes_per_sec] {
            if table.len() < regions {
                return Err(ConfigError::RegionOutOfRange {
                    index: table.len(),
                    regions,
                });
            }
        }

        let table = Self {
            latency_ms,
            upload_bytes_per_sec,
            download_bytes_per_sec,
        };
        for from in 0..regions {
            for to in 0..regions {
                if table.bytes_per_ms(from, to) == 0 {
                    return Err(ConfigError::ZeroBandwidth { from, to });
                }
            }
        }
        Ok(table)
    }

    /// The 2022 fitted tables.
    pub fn fitted_2022() -> Self {
        Self {
            latency_ms: LATENCY_2022_MS.iter().map(|row| row.to_vec()).collect(),
            upload_bytes_per_sec: UPLOAD_2022_BYTES_PER_SEC.to_vec(),
            download_bytes_per_sec: DOWNLOAD_2022_BYTES_PER_SEC.to_vec(),
        }
    }

    /// Every region pair shares one latency and bandwidth. Handy in tests.
    pub fn uniform(regions: usize, latency: Duration, bytes_per_ms: u64) -> Result<Self, ConfigError> {
        let latency_ms = latency.as_millis() as u64;
        let bytes_per_sec = bytes_per_ms.saturating_mul(1_000);
        Self::new(
            vec![vec![latency_ms; regions]; regions],
            vec![bytes_per_sec; regions],
            vec![bytes_per_sec; regions],
        )
    }

    pub fn region_count(&self) -> usize {
        self.latency_ms.len()
    }

    /// Resolve a region by name (as in [`REGION_NAMES`]).
    pub fn region_by_name(&self, name: &str) -> Result<Region, ConfigError> {
        REGION_NAMES
            .iter()
            .take(self.region_count())
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
            .map(|index| Region(index as u16))
            .ok_or_else(|| ConfigError::UnknownRegion(name.to_string()))
    }

    /// Check that a region indexes into the tables.
    pub fn check_region(&self, region: Region) -> Result<(), ConfigError> {
        if region.index() < self.region_count() {
            Ok(())
        } else {
            Err(ConfigError::RegionOutOfRange {
                index: region.index(),
                regions: self.region_count(),
            })
        }
    }

    fn bytes_per_ms(&self, from: usize, to: usize) -> u64 {
        self.upload_bytes_per_sec[from].min(self.download_bytes_per_sec[to]) / 1_000
    }
}

impl Default for RegionTable {
    fn default() -> Self {
        Self::fitted_2022()
    }
}

impl LinkModel for RegionTable {
    fn bandwidth(&self, from: Region, to: Region) -> u64 {
        self.bytes_per_ms(from.index(), to.index())
    }

    fn latency(&self, from: Region, to: Region) -> Duration {
        Duration::from_millis(self.latency_ms[from.index()][to.index()])
    }
}
