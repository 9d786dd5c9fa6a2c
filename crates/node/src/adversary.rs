//! Adversarial delay on selected links.

use crate::{AdversarialDelay, PeerDirectory};
use blocksim_types::NodeIndex;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeSet;
use std::time::Duration;

/// What happens to a send from an adversarial node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Immediate,
    Delayed(Duration),
    Dropped,
}

/// Links an adversarial node holds sends back on.
#[derive(Debug, Clone, Default)]
pub struct AdversarialState {
    delayed_links: BTreeSet<NodeIndex>,
    delay: AdversarialDelay,
}

impl AdversarialState {
    pub fn new(delayed_links: BTreeSet<NodeIndex>, delay: AdversarialDelay) -> Self {
        Self {
            delayed_links,
            delay,
        }
    }

    /// Mark each link to an honest neighbor as delayed with `probability`.
    ///
    /// Links between adversaries are never delayed.
    pub fn choose(
        neighbors: &[NodeIndex],
        peers: &PeerDirectory,
        probability: f64,
        delay: AdversarialDelay,
        rng: &mut ChaCha8Rng,
    ) -> Self {
        let delayed_links = neighbors
            .iter()
            .copied()
            .filter(|&n| !peers.is_adversarial(n) && rng.gen::<f64>() < probability)
            .collect();
        Self::new(delayed_links, delay)
    }

    pub fn route(&self, to: NodeIndex) -> Routing {
        if !self.delayed_links.contains(&to) {
            return Routing::Immediate;
        }
        match self.delay {
            AdversarialDelay::Fixed(delay) => Routing::Delayed(delay),
            AdversarialDelay::Drop => Routing::Dropped,
        }
    }

    pub fn delayed_links(&self) -> &BTreeSet<NodeIndex> {
        &self.delayed_links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerInfo;
    use rand::SeedableRng;

    #[test]
    fn test_never_delays_links_to_adversaries() {
        let peers = PeerDirectory::new(vec![
            PeerInfo {
                adversarial: true,
                ..PeerInfo::default()
            },
            PeerInfo {
                adversarial: true,
                ..PeerInfo::default()
            },
            PeerInfo::default(),
            PeerInfo::default(),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let state = AdversarialState::choose(
            &[1, 2, 3],
            &peers,
            1.0,
            AdversarialDelay::Fixed(Duration::from_millis(100)),
            &mut rng,
        );
        assert_eq!(state.delayed_links().iter().copied().collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(state.route(1), Routing::Immediate);
        assert_eq!(state.route(2), Routing::Delayed(Duration::from_millis(100)));
    }

    #[test]
    fn test_drop_sentinel() {
        let state = AdversarialState::new([4].into_iter().collect(), AdversarialDelay::Drop);
        assert_eq!(state.route(4), Routing::Dropped);
        assert_eq!(state.route(5), Routing::Immediate);
    }
}
