//! Event queue driving simulated time.
//!
//! Events are popped earliest-first; events scheduled for the same instant
//! come out in the order they were scheduled, so zero-delay messages keep
//! the order in which a handler emitted them.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use super::types::{Attempt, Feedback, Packet, SimTime, StationId};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Next packet arrival at a station.
    Arrival { station: StationId },
    /// End of the current slot at the channel.
    SlotBoundary,
    /// Channel reply reaching a station.
    Feedback { station: StationId, feedback: Feedback },
    /// A station's attempt reaching the channel.
    Attempt(Attempt),
    /// A successful packet reaching a sink.
    Delivery { sink: usize, packet: Packet },
}

#[derive(Debug)]
struct Scheduled {
    time: SimTime,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

#[derive(Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `event` at `time`. Times before `now` are clamped to `now`.
    pub fn schedule(&mut self, now: SimTime, time: SimTime, event: Event) {
        let time = if time < now {
            log::error!("Event {:?} scheduled in the past ({} < {}), delivering now", event, time, now);
            now
        } else {
            time
        };
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Scheduled { time, seq, event }));
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|Reverse(s)| s.time)
    }

    pub fn pop(&mut self) -> Option<(SimTime, Event)> {
        self.queue.pop().map(|Reverse(s)| (s.time, s.event))
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
