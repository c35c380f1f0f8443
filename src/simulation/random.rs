//! Pseudo-random draws used by the stations.
//!
//! Every station owns four independent streams so that changing how often
//! one kind of draw happens (say, more Bernoulli trials under a higher send
//! probability) does not shift the other draws of the same station:
//! - `arrival`: exponential inter-arrival times
//! - `backoff`: back-off counters
//! - `channel`: sub-channel indices
//! - `attempt`: Bernoulli trials
//!
//! Streams are seeded from the scenario seed and the station index, so a run
//! is fully reproducible from `(scenario, seed)`.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Exp1;

const ARRIVAL_STREAM: u64 = 0;
const BACKOFF_STREAM: u64 = 1;
const CHANNEL_STREAM: u64 = 2;
const ATTEMPT_STREAM: u64 = 3;

/// Derive the seed of one stream. The golden-ratio multiplier spreads
/// neighbouring stations apart before `seed_from_u64` expands the value.
fn stream_seed(base_seed: u64, station: usize, stream: u64) -> u64 {
    base_seed
        .wrapping_add((station as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(stream << 56)
}

/// Per-station set of random streams.
pub struct RandomStreams {
    arrival: StdRng,
    backoff: StdRng,
    channel: StdRng,
    attempt: StdRng,
}

impl RandomStreams {
    pub fn new(base_seed: u64, station: usize) -> Self {
        Self {
            arrival: StdRng::seed_from_u64(stream_seed(base_seed, station, ARRIVAL_STREAM)),
            backoff: StdRng::seed_from_u64(stream_seed(base_seed, station, BACKOFF_STREAM)),
            channel: StdRng::seed_from_u64(stream_seed(base_seed, station, CHANNEL_STREAM)),
            attempt: StdRng::seed_from_u64(stream_seed(base_seed, station, ATTEMPT_STREAM)),
        }
    }

    /// Exponentially distributed inter-arrival time with the given mean.
    pub fn exponential(&mut self, mean: f64) -> f64 {
        let unit: f64 = self.arrival.sample(Exp1);
        unit * mean
    }

    /// Uniform sub-channel index in `[lo, hi]`.
    pub fn uniform_channel(&mut self, lo: usize, hi: usize) -> usize {
        self.channel.gen_range(lo..=hi)
    }

    /// Uniform real in `[lo, hi)` from the attempt stream.
    pub fn uniform_real(&mut self, lo: f64, hi: f64) -> f64 {
        self.attempt.gen_range(lo..hi)
    }

    /// Uniform back-off slot count in `[lo, hi]`.
    pub fn backoff_slots(&mut self, lo: u32, hi: u32) -> u32 {
        self.backoff.gen_range(lo..=hi)
    }
}
