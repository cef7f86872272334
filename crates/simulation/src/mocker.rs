//! Random event generator.
//!
//! Synthesizes node and connection actions against a fixed node
//! population, seeded for reproducible runs.

use crate::SimAction;
use chunkmesh_types::NodeId;
use crossbeam::channel::Sender;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tracing::debug;

/// Mocker tunables.
#[derive(Debug, Clone)]
pub struct MockerConfig {
    /// Seed for the action stream.
    pub seed: u64,
    /// How many actions to emit.
    pub steps: usize,
    /// Pause between actions.
    pub interval: Duration,
}

impl Default for MockerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            steps: 100,
            interval: Duration::from_millis(10),
        }
    }
}

/// Seeded random action source.
pub struct Mocker {
    config: MockerConfig,
}

impl Mocker {
    /// Create a mocker.
    pub fn new(config: MockerConfig) -> Self {
        Self { config }
    }

    /// Emit random actions over `ids` onto the channel. Stops early if
    /// the channel disconnects. Returns how many actions were posted.
    pub fn run(&self, ids: &[NodeId], actions: &Sender<SimAction>) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        let mut posted = 0;
        for _ in 0..self.config.steps {
            let action = self.random_action(&mut rng, ids);
            if actions.send(action).is_err() {
                break;
            }
            posted += 1;
            if !self.config.interval.is_zero() {
                std::thread::sleep(self.config.interval);
            }
        }
        debug!(posted, "mocker finished");
        posted
    }

    fn random_action(&self, rng: &mut ChaCha8Rng, ids: &[NodeId]) -> SimAction {
        let a = ids[rng.gen_range(0..ids.len())];
        match rng.gen_range(0..4u8) {
            0 => SimAction::NodeUp(a),
            1 => SimAction::NodeDown(a),
            kind => {
                let mut b = ids[rng.gen_range(0..ids.len())];
                while b == a && ids.len() > 1 {
                    b = ids[rng.gen_range(0..ids.len())];
                }
                if kind == 2 {
                    SimAction::ConnUp(a, b)
                } else {
                    SimAction::ConnDown(a, b)
                }
            }
        }
    }
}
