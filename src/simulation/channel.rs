//! Shared-medium arbiter.
//!
//! The channel runs a two-phase cycle per slot:
//! - ACCUMULATE: attempts arriving during the slot are appended, in order,
//!   to the in-slot set.
//! - RESOLVE (at the slot boundary): sub-channels carrying two or more
//!   attempts are flagged as collided; every attempt then gets an ACK (and is
//!   forwarded to its sink) or a NACK (and is discarded); stations that made
//!   no attempt get a PROMPT.
//!
//! A collision destroys the whole sub-channel for the slot: the first sender
//! is not privileged and a third attempt is handled like the second.

use super::metrics::{MetricsSink, Observation};
use super::types::{Attempt, Feedback, Packet, SimContext};

/// Message produced when a slot is resolved, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Feedback to the station on `port`.
    Reply { port: usize, feedback: Feedback },
    /// Successful packet for the sink wired to `port`.
    Deliver { port: usize, packet: Packet },
}

pub struct Channel {
    num_ports: usize,
    attempts: Vec<Attempt>,
    collided: Vec<bool>,
}

impl Channel {
    pub fn new(num_sub_channels: usize, num_ports: usize) -> Self {
        Self {
            num_ports,
            attempts: Vec::new(),
            collided: vec![false; num_sub_channels],
        }
    }

    pub fn num_sub_channels(&self) -> usize {
        self.collided.len()
    }

    /// A channel without sub-channels has no valid slot cycle.
    pub fn is_degenerate(&self) -> bool {
        self.collided.is_empty()
    }

    pub fn pending_attempts(&self) -> usize {
        self.attempts.len()
    }

    /// ACCUMULATE phase: store an attempt for the current slot.
    pub fn accept(&mut self, mut attempt: Attempt) -> Result<(), String> {
        if attempt.sub_channel >= self.num_sub_channels() {
            return Err(format!(
                "Attempt from port {} targets sub-channel {} but only {} exist",
                attempt.port,
                attempt.sub_channel,
                self.num_sub_channels()
            ));
        }
        if attempt.port >= self.num_ports {
            return Err(format!("Attempt arrived on unknown port {}", attempt.port));
        }
        attempt.packet.port = Some(attempt.port);
        log::debug!(
            "CH: packet from tx {} arrived at sub-channel {}",
            attempt.packet.station_id,
            attempt.sub_channel
        );
        self.attempts.push(attempt);
        Ok(())
    }

    /// Flag every sub-channel that carries at least two attempts.
    fn find_collisions(&mut self, ctx: &SimContext, metrics: &mut dyn MetricsSink) {
        let mut per_channel = vec![0u32; self.collided.len()];
        for attempt in &self.attempts {
            let ch = attempt.sub_channel;
            per_channel[ch] += 1;
            if per_channel[ch] == 2 {
                self.collided[ch] = true;
                metrics.record(ctx.now, Observation::Collision { sub_channel: ch });
            }
        }
    }

    /// RESOLVE phase. Returns the replies and deliveries to send, leaving the
    /// channel ready for the next slot.
    pub fn resolve_slot(&mut self, ctx: &SimContext, metrics: &mut dyn MetricsSink) -> Vec<Outgoing> {
        self.find_collisions(ctx, metrics);

        let mut replied = vec![false; self.num_ports];
        let mut outgoing = Vec::with_capacity(self.num_ports + self.attempts.len());
        let mut delivered: u64 = 0;

        for attempt in self.attempts.drain(..) {
            let port = attempt.port;
            replied[port] = true;

            if self.collided[attempt.sub_channel] {
                log::debug!("CH: NACK sent to tx {}", attempt.packet.station_id);
                outgoing.push(Outgoing::Reply {
                    port,
                    feedback: Feedback::NegativeAcknowledge,
                });
                continue;
            }

            log::debug!("CH: ACK sent to tx {}", attempt.packet.station_id);
            outgoing.push(Outgoing::Reply {
                port,
                feedback: Feedback::Acknowledge,
            });

            let latency = attempt.packet.latency_at(ctx.now);
            metrics.record(ctx.now, Observation::ChannelLatency { latency });
            outgoing.push(Outgoing::Deliver {
                port,
                packet: attempt.packet,
            });
            delivered += 1;
        }

        log::debug!("CH: {} packets delivered this slot", delivered);
        metrics.record(ctx.now, Observation::SlotThroughput { delivered });

        for (port, _) in replied.iter().enumerate().filter(|(_, r)| !**r) {
            outgoing.push(Outgoing::Reply {
                port,
                feedback: Feedback::Prompt,
            });
        }

        self.collided.iter_mut().for_each(|c| *c = false);
        outgoing
    }

    /// Drop whatever is still in the in-slot set. Returns how many attempts
    /// were discarded.
    pub fn finish(&mut self) -> usize {
        let discarded = self.pending_attempts();
        self.attempts.clear();
        discarded
    }
}
