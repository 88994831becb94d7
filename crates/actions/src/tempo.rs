use std::fmt;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub const MIN_KEY_DELAY_MS: u64 = 1;
pub const MAX_KEY_DELAY_MS: u64 = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypingStep {
    pub chunk: String,
    pub delay_ms: u64,
}

/// Keystrokes and the pause taken before each one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TypingPlan {
    pub steps: Vec<TypingStep>,
}

impl TypingPlan {
    pub fn total_delay_ms(&self) -> u64 {
        self.steps.iter().map(|step| step.delay_ms).sum()
    }
}

/// Source of inter-keystroke pauses.
pub trait Cadence: Send + Sync + fmt::Debug {
    fn next_delay_ms(&self) -> u64;

    fn plan(&self, text: &str) -> TypingPlan {
        TypingPlan {
            steps: text
                .chars()
                .map(|ch| TypingStep {
                    chunk: ch.to_string(),
                    delay_ms: self.next_delay_ms(),
                })
                .collect(),
        }
    }
}

/// Uniform pauses in `[1, 100]` ms drawn from the thread rng.
#[derive(Clone, Debug, Default)]
pub struct HumanCadence;

impl Cadence for HumanCadence {
    fn next_delay_ms(&self) -> u64 {
        rand::thread_rng().gen_range(MIN_KEY_DELAY_MS..=MAX_KEY_DELAY_MS)
    }
}

/// Reproducible pauses for tests.
#[derive(Debug)]
pub struct SeededCadence {
    rng: Mutex<StdRng>,
}

impl SeededCadence {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Cadence for SeededCadence {
    fn next_delay_ms(&self) -> u64 {
        self.rng
            .lock()
            .gen_range(MIN_KEY_DELAY_MS..=MAX_KEY_DELAY_MS)
    }
}
