//! End-of-run summary derived from node state and the observation ledger.

use blocksim_core::ObservationLedger;
use blocksim_node::Node;
use blocksim_types::{BlockArena, BlockId};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Bucket width while a block is young.
const FINE_BUCKET: Duration = Duration::from_millis(10);
/// Bucket width from [`COARSE_AFTER`] on.
const COARSE_BUCKET: Duration = Duration::from_millis(100);
const COARSE_AFTER: Duration = Duration::from_secs(1);

/// Distribution of first-observation delays for main-chain blocks.
///
/// A delay is the time between a block's minting and one node first
/// observing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropagationSummary {
    pub samples: usize,
    pub mean: Duration,
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
    pub max: Duration,
}

impl PropagationSummary {
    /// Summarize `delays`. Returns `None` when there are none.
    pub fn from_delays(mut delays: Vec<Duration>) -> Option<Self> {
        if delays.is_empty() {
            return None;
        }
        delays.sort_unstable();
        let total: Duration = delays.iter().sum();
        Some(Self {
            samples: delays.len(),
            mean: total / delays.len() as u32,
            p50: percentile(&delays, 50.0),
            p90: percentile(&delays, 90.0),
            p99: percentile(&delays, 99.0),
            max: delays[delays.len() - 1],
        })
    }
}

/// Nearest-rank percentile of a sorted, non-empty slice.
fn percentile(sorted: &[Duration], p: f64) -> Duration {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Arrivals of one block that landed close together.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationBucket {
    /// Delay of the first arrival in the bucket.
    pub delay: Duration,
    /// Nodes that first observed the block in this bucket.
    pub nodes: usize,
    /// Their combined mining power.
    pub mining_power: u64,
    /// Nodes holding the block once this bucket is in, minter included.
    pub reached_nodes: usize,
    /// Share of all mining power holding the block once this bucket is in,
    /// minter included.
    pub reached_power_share: f64,
}

/// How one block spread through the network and its hash power.
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationCurve {
    pub block: BlockId,
    /// Whether the block ended up on the main chain.
    pub main_chain: bool,
    /// Share of all mining power held by the minter.
    pub minter_power_share: f64,
    /// Arrival buckets, earliest first.
    pub buckets: Vec<PropagationBucket>,
}

impl PropagationCurve {
    /// Delay until at least `share` of all mining power held the block,
    /// at bucket resolution. `None` if it never got there.
    pub fn time_to_power_share(&self, share: f64) -> Option<Duration> {
        if self.minter_power_share >= share {
            return Some(Duration::ZERO);
        }
        self.buckets
            .iter()
            .find(|b| b.reached_power_share >= share)
            .map(|b| b.delay)
    }
}

/// Group `(delay, mining power)` arrivals, sorted by delay, into buckets.
///
/// An arrival opens a new bucket once it is a bucket width or more after
/// the current bucket's first arrival.
fn bucketize(
    arrivals: &[(Duration, u64)],
    minter_power: u64,
    total_power: u64,
) -> Vec<PropagationBucket> {
    let share = |power: u64| {
        if total_power == 0 {
            0.0
        } else {
            power as f64 / total_power as f64
        }
    };

    let mut buckets: Vec<PropagationBucket> = Vec::new();
    let mut reached_nodes = 1;
    let mut reached_power = minter_power;
    for &(delay, power) in arrivals {
        reached_nodes += 1;
        reached_power += power;
        let width = if delay < COARSE_AFTER {
            FINE_BUCKET
        } else {
            COARSE_BUCKET
        };
        match buckets.last_mut() {
            Some(bucket) if delay.saturating_sub(bucket.delay) < width => {
                bucket.nodes += 1;
                bucket.mining_power += power;
            }
            _ => buckets.push(PropagationBucket {
                delay,
                nodes: 1,
                mining_power: power,
                reached_nodes: 0,
                reached_power_share: 0.0,
            }),
        }
        if let Some(bucket) = buckets.last_mut() {
            bucket.reached_nodes = reached_nodes;
            bucket.reached_power_share = share(reached_power);
        }
    }
    buckets
}

/// Chain and propagation outcome of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Simulated time when the report was taken.
    pub end_time: Duration,
    /// Best tip across all nodes (highest total difficulty, lowest id on ties).
    pub main_tip: BlockId,
    /// Height of the main tip.
    pub main_chain_length: u64,
    /// Blocks minted, genesis excluded.
    pub blocks_minted: u64,
    /// Minted blocks not on the main chain.
    pub stale_blocks: u64,
    /// Blocks some node holds as an orphan.
    pub distinct_orphans: usize,
    pub mean_orphans_per_node: f64,
    /// `stale_blocks / blocks_minted`.
    pub stale_rate: f64,
    pub propagation: Option<PropagationSummary>,
    /// One curve per block some node observed, lowest id first.
    pub curves: Vec<PropagationCurve>,
}

impl RunReport {
    pub fn collect(
        now: Duration,
        blocks: &BlockArena,
        nodes: &[Node],
        observations: &ObservationLedger,
    ) -> Self {
        let main_tip = nodes
            .iter()
            .filter_map(Node::best)
            .max_by(|&a, &b| {
                blocks
                    .get(a)
                    .total_difficulty
                    .cmp(&blocks.get(b).total_difficulty)
                    .then(b.cmp(&a))
            })
            .unwrap_or(BlockId::GENESIS);

        let main_chain: HashSet<BlockId> = if blocks.is_empty() {
            HashSet::new()
        } else {
            blocks.ancestors(main_tip).collect()
        };
        let main_chain_length = blocks.try_get(main_tip).map_or(0, |b| b.height);

        let blocks_minted = blocks.len().saturating_sub(1) as u64;
        let stale_blocks = blocks
            .iter()
            .filter(|b| !b.is_genesis() && !main_chain.contains(&b.id))
            .count() as u64;

        let distinct_orphans = nodes
            .iter()
            .flat_map(|n| n.orphans().iter())
            .collect::<HashSet<_>>()
            .len();
        let mean_orphans_per_node = if nodes.is_empty() {
            0.0
        } else {
            nodes.iter().map(|n| n.orphans().len()).sum::<usize>() as f64 / nodes.len() as f64
        };

        let stale_rate = if blocks_minted == 0 {
            0.0
        } else {
            stale_blocks as f64 / blocks_minted as f64
        };

        let delays = observations
            .observations()
            .iter()
            .filter(|o| main_chain.contains(&o.block))
            .map(|o| o.at.saturating_sub(blocks.get(o.block).time))
            .collect();

        let power_of = |node: usize| nodes.get(node).map_or(0, Node::mining_power);
        let total_power: u64 = nodes.iter().map(Node::mining_power).sum();
        let mut arrivals: BTreeMap<BlockId, Vec<(Duration, u64)>> = BTreeMap::new();
        for o in observations.observations() {
            let delay = o.at.saturating_sub(blocks.get(o.block).time);
            arrivals
                .entry(o.block)
                .or_default()
                .push((delay, power_of(o.node as usize)));
        }
        let curves = arrivals
            .into_iter()
            .map(|(block, mut arrivals)| {
                arrivals.sort_by_key(|&(delay, _)| delay);
                let minter_power = power_of(blocks.get(block).minter as usize);
                PropagationCurve {
                    block,
                    main_chain: main_chain.contains(&block),
                    minter_power_share: if total_power == 0 {
                        0.0
                    } else {
                        minter_power as f64 / total_power as f64
                    },
                    buckets: bucketize(&arrivals, minter_power, total_power),
                }
            })
            .collect();

        Self {
            end_time: now,
            main_tip,
            main_chain_length,
            blocks_minted,
            stale_blocks,
            distinct_orphans,
            mean_orphans_per_node,
            stale_rate,
            propagation: PropagationSummary::from_delays(delays),
            curves,
        }
    }

    /// Mean delay until `share` of all mining power held a main-chain
    /// block, over the blocks that got there.
    pub fn mean_time_to_power_share(&self, share: f64) -> Option<Duration> {
        let times: Vec<Duration> = self
            .curves
            .iter()
            .filter(|c| c.main_chain)
            .filter_map(|c| c.time_to_power_share(share))
            .collect();
        if times.is_empty() {
            return None;
        }
        Some(times.iter().sum::<Duration>() / times.len() as u32)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "end time:            {:?}", self.end_time)?;
        writeln!(
            f,
            "main chain:          {} blocks (tip {})",
            self.main_chain_length, self.main_tip
        )?;
        writeln!(f, "blocks minted:       {}", self.blocks_minted)?;
        writeln!(
            f,
            "stale blocks:        {} ({:.2}%)",
            self.stale_blocks,
            self.stale_rate * 100.0
        )?;
        writeln!(f, "distinct orphans:    {}", self.distinct_orphans)?;
        writeln!(f, "orphans per node:    {:.3}", self.mean_orphans_per_node)?;
        for share in [0.5, 0.9] {
            match self.mean_time_to_power_share(share) {
                Some(t) => writeln!(f, "{:>3.0}% of power:       {:?} (mean)", share * 100.0, t)?,
                None => writeln!(f, "{:>3.0}% of power:       not reached", share * 100.0)?,
            }
        }
        match &self.propagation {
            Some(p) => write!(
                f,
                "propagation:         n={} mean={:?} p50={:?} p90={:?} p99={:?} max={:?}",
                p.samples, p.mean, p.p50, p.p90, p.p99, p.max
            ),
            None => write!(f, "propagation:         no observations"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_nearest_rank_percentiles() {
        let delays: Vec<Duration> = (1..=10).rev().map(|n| ms(n * 10)).collect();
        let summary = PropagationSummary::from_delays(delays).unwrap();
        assert_eq!(summary.samples, 10);
        assert_eq!(summary.p50, ms(50));
        assert_eq!(summary.p90, ms(90));
        assert_eq!(summary.p99, ms(100));
        assert_eq!(summary.max, ms(100));
        assert_eq!(summary.mean, ms(55));
    }

    #[test]
    fn test_single_sample() {
        let summary = PropagationSummary::from_delays(vec![ms(7)]).unwrap();
        assert_eq!(summary.p50, ms(7));
        assert_eq!(summary.p99, ms(7));
    }

    #[test]
    fn test_no_samples() {
        assert!(PropagationSummary::from_delays(Vec::new()).is_none());
    }

    #[test]
    fn test_empty_run() {
        let report = RunReport::collect(
            Duration::ZERO,
            &BlockArena::new(),
            &[],
            &ObservationLedger::new(),
        );
        assert_eq!(report.main_chain_length, 0);
        assert_eq!(report.blocks_minted, 0);
        assert_eq!(report.stale_rate, 0.0);
        assert!(report.propagation.is_none());
        assert!(report.curves.is_empty());
        assert_eq!(report.mean_time_to_power_share(0.5), None);
    }

    #[test]
    fn test_buckets_widen_after_the_first_second() {
        let arrivals = [
            (ms(12), 10),
            (ms(15), 20),
            (ms(22), 30),
            (ms(1_200), 5),
            (ms(1_290), 5),
            (ms(1_300), 30),
        ];
        let buckets = bucketize(&arrivals, 0, 100);

        let shape: Vec<(Duration, usize, u64)> = buckets
            .iter()
            .map(|b| (b.delay, b.nodes, b.mining_power))
            .collect();
        assert_eq!(
            shape,
            vec![
                (ms(12), 2, 30),
                (ms(22), 1, 30),
                (ms(1_200), 2, 10),
                (ms(1_300), 1, 30),
            ]
        );
        assert_eq!(buckets[1].reached_nodes, 4);
        assert_eq!(buckets[1].reached_power_share, 0.6);
        assert_eq!(buckets[3].reached_power_share, 1.0);
    }

    #[test]
    fn test_time_to_power_share() {
        let curve = PropagationCurve {
            block: BlockId(1),
            main_chain: true,
            minter_power_share: 0.25,
            buckets: bucketize(&[(ms(40), 25), (ms(90), 50)], 25, 100),
        };
        assert_eq!(curve.time_to_power_share(0.2), Some(Duration::ZERO));
        assert_eq!(curve.time_to_power_share(0.5), Some(ms(40)));
        assert_eq!(curve.time_to_power_share(0.9), Some(ms(90)));

        let partial = PropagationCurve {
            buckets: bucketize(&[(ms(40), 25)], 25, 100),
            ..curve
        };
        assert_eq!(partial.time_to_power_share(0.9), None);
    }
}
