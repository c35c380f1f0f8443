//! Type definitions for the simulation.
//!
//! Contains the data structures shared by the components:
//! - Fixed-point simulated time
//! - Packets and the attempts that carry them onto the medium
//! - Feedback signals sent by the channel once per slot
//! - The explicit simulation context handed to every handler

use serde::Deserialize;
use std::ops::{Add, Mul, Sub};

/// Simulated time as an integer number of picoseconds.
///
/// Fixed-point so that slot boundaries and deterministic arrivals that
/// coincide mathematically also coincide in the event queue, however long
/// the run. The range covers about 106 days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SimTime(i64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(i64::MAX);
    pub const TICKS_PER_SECOND: i64 = 1_000_000_000_000;

    /// Round a duration in seconds to the nearest tick.
    pub fn from_secs(secs: f64) -> Self {
        Self((secs * Self::TICKS_PER_SECOND as f64).round() as i64)
    }

    pub fn as_secs(self) -> f64 {
        self.0 as f64 / Self::TICKS_PER_SECOND as f64
    }

    /// Largest representable time, in seconds.
    pub fn max_secs() -> f64 {
        Self::MAX.as_secs()
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl Mul<u64> for SimTime {
    type Output = SimTime;

    fn mul(self, rhs: u64) -> SimTime {
        SimTime(self.0.saturating_mul(i64::try_from(rhs).unwrap_or(i64::MAX)))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}s", self.as_secs())
    }
}

/// Index of a station. Doubles as the index of the station's port on the
/// channel and of the sink wired to that port.
pub type StationId = usize;

/// Smallest back-off window a station can hold. The window starts here and
/// is reset here on every acknowledgement.
pub const MIN_BACKOFF_WINDOW: u32 = 2;

/// Unit of data offered to the medium.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    /// Time of logical arrival at the station (not of the first attempt).
    pub created_at: SimTime,
    /// Station that generated the packet.
    pub station_id: StationId,
    /// Sub-channel the packet is bound to, once one has been drawn.
    pub sub_channel: Option<usize>,
    /// Channel port the packet arrived on. Set by the channel on accept.
    pub port: Option<usize>,
}

impl Packet {
    pub fn new(created_at: SimTime, station_id: StationId) -> Self {
        Self {
            created_at,
            station_id,
            sub_channel: None,
            port: None,
        }
    }

    /// End-to-end latency in seconds if the packet were delivered at `now`.
    pub fn latency_at(&self, now: SimTime) -> f64 {
        (now - self.created_at).as_secs()
    }
}

/// A station's transmission of one packet during one slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    /// Port the attempt was offered on; replies go back through it.
    pub port: usize,
    /// Target sub-channel.
    pub sub_channel: usize,
    /// In-flight duplicate of the station's head-of-buffer packet.
    pub packet: Packet,
}

/// Reply sent by the channel to every station once per slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feedback {
    /// The station's attempt was delivered.
    Acknowledge,
    /// The station's attempt collided.
    NegativeAcknowledge,
    /// The station made no attempt this slot.
    Prompt,
}

/// When a packet gets its sub-channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelAssignment {
    /// Drawn once when the packet arrives and kept across retries.
    AtArrival,
    /// Drawn again on every attempt.
    AtAttempt,
}

/// Time-related state passed explicitly to every handler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimContext {
    pub now: SimTime,
    pub warmup_period: SimTime,
    pub time_limit: SimTime,
}

impl SimContext {
    pub fn new(warmup_period: SimTime, time_limit: SimTime) -> Self {
        Self {
            now: SimTime::ZERO,
            warmup_period,
            time_limit,
        }
    }

    /// Whether statistics gathered at the current time count.
    pub fn measuring(&self) -> bool {
        self.now >= self.warmup_period
    }

    /// Length of the measurement window in seconds, never negative.
    pub fn measured_duration(&self) -> f64 {
        (self.time_limit - self.warmup_period).as_secs().max(0.0)
    }
}
