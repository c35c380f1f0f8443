//! Transmitting station.
//!
//! A station generates packets through its own arrival process, keeps them
//! in a FIFO buffer and, once per slot, reacts to the channel's feedback:
//!
//! 1. While the back-off counter is positive it only counts down.
//! 2. A NACK doubles the back-off window and draws a fresh counter.
//! 3. An ACK drops the delivered head packet and resets the window; after an
//!    ACK or a PROMPT a non-empty buffer gets a Bernoulli trial and, on
//!    success, a duplicate of the head packet is offered to the channel.
//!
//! The head packet stays buffered until it is acknowledged, so a collided
//! attempt is retried implicitly on a later slot.

use std::collections::VecDeque;

use super::metrics::{MetricsSink, Observation};
use super::random::RandomStreams;
use super::scenario::Scenario;
use super::types::{Attempt, ChannelAssignment, Feedback, MIN_BACKOFF_WINDOW, Packet, SimContext, SimTime, StationId};

/// Binary exponential back-off state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    counter: u32,
    window: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            counter: 0,
            window: MIN_BACKOFF_WINDOW,
        }
    }
}

impl Backoff {
    /// Slots left before an attempt is allowed again.
    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    pub fn is_pending(&self) -> bool {
        self.counter > 0
    }

    pub fn tick(&mut self) {
        self.counter = self.counter.saturating_sub(1);
    }

    /// Double the window and draw a new counter in `[1, window]`.
    pub fn on_collision(&mut self, rng: &mut RandomStreams) -> u32 {
        self.window = self.window.saturating_mul(2);
        self.counter = rng.backoff_slots(1, self.window);
        self.counter
    }

    pub fn reset(&mut self) {
        self.window = MIN_BACKOFF_WINDOW;
    }
}

/// Time-integral of the buffer length, restricted to the measurement window.
#[derive(Debug, Default)]
struct OccupancyIntegral {
    sum: f64,
    last_update: SimTime,
}

impl OccupancyIntegral {
    fn update(&mut self, ctx: &SimContext, buffered: usize) {
        if !ctx.measuring() {
            return;
        }
        if self.last_update < ctx.warmup_period {
            self.last_update = ctx.warmup_period;
        }
        self.sum += buffered as f64 * (ctx.now - self.last_update).as_secs();
        self.last_update = ctx.now;
    }

    fn mean(&self, ctx: &SimContext) -> f64 {
        let duration = ctx.measured_duration();
        if duration > 0.0 { self.sum / duration } else { 0.0 }
    }
}

pub struct Station {
    id: StationId,
    buffer: VecDeque<Packet>,
    backoff: Backoff,
    rng: RandomStreams,
    occupancy: OccupancyIntegral,
    num_channels: usize,
    mean_interarrival_time: f64,
    deterministic_interarrival: bool,
    send_probability: f64,
    backoff_enabled: bool,
    channel_assignment: ChannelAssignment,
}

impl Station {
    pub fn new(id: StationId, scenario: &Scenario) -> Self {
        Self {
            id,
            buffer: VecDeque::new(),
            backoff: Backoff::default(),
            rng: RandomStreams::new(scenario.seed, id),
            occupancy: OccupancyIntegral::default(),
            num_channels: scenario.num_channels,
            mean_interarrival_time: scenario.mean_interarrival_time,
            deterministic_interarrival: scenario.deterministic_interarrival,
            send_probability: scenario.send_probability,
            backoff_enabled: scenario.backoff_enabled,
            channel_assignment: scenario.channel_assignment,
        }
    }

    pub fn id(&self) -> StationId {
        self.id
    }

    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub fn head(&self) -> Option<&Packet> {
        self.buffer.front()
    }

    #[cfg(test)]
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Delay until the next packet arrival.
    pub fn next_interarrival(&mut self) -> SimTime {
        // Drawn even in deterministic mode so the arrival stream advances the same way.
        let drawn = self.rng.exponential(self.mean_interarrival_time);
        let delay = if self.deterministic_interarrival { self.mean_interarrival_time } else { drawn };
        SimTime::from_secs(delay)
    }

    fn draw_sub_channel(&mut self) -> Option<usize> {
        let hi = self.num_channels.checked_sub(1)?;
        Some(self.rng.uniform_channel(0, hi))
    }

    /// A packet arrives now. Returns the delay until the next arrival.
    pub fn handle_arrival(&mut self, ctx: &SimContext, metrics: &mut dyn MetricsSink) -> SimTime {
        self.occupancy.update(ctx, self.buffer.len());

        metrics.record(ctx.now, Observation::PacketCreated { station: self.id });

        let mut packet = Packet::new(ctx.now, self.id);
        if self.channel_assignment == ChannelAssignment::AtArrival {
            packet.sub_channel = self.draw_sub_channel();
        }
        self.buffer.push_back(packet);
        log::debug!("TX-{}: packet arrived, {} buffered", self.id, self.buffer.len());

        metrics.record(
            ctx.now,
            Observation::BufferOccupancy {
                station: self.id,
                packets: self.buffer.len(),
            },
        );

        self.next_interarrival()
    }

    /// React to this slot's reply from the channel. Returns the attempt to
    /// offer to the channel, if any.
    pub fn handle_feedback(&mut self, ctx: &SimContext, feedback: Feedback) -> Option<Attempt> {
        if self.backoff_enabled && self.backoff.is_pending() {
            self.backoff.tick();
            log::debug!("TX-{}: back-off remaining {}", self.id, self.backoff.counter());
            return None;
        }

        match feedback {
            Feedback::NegativeAcknowledge if self.backoff_enabled => {
                let counter = self.backoff.on_collision(&mut self.rng);
                log::debug!("TX-{}: NACK received, window {}, back-off {}", self.id, self.backoff.window(), counter);
                return None;
            }
            Feedback::Acknowledge => {
                self.occupancy.update(ctx, self.buffer.len());
                if self.buffer.pop_front().is_none() {
                    log::error!("TX-{}: ACK received with an empty buffer", self.id);
                }
                self.backoff.reset();
                log::debug!("TX-{}: ACK received, {} buffered", self.id, self.buffer.len());
            }
            _ => {}
        }

        self.try_attempt()
    }

    fn try_attempt(&mut self) -> Option<Attempt> {
        if self.buffer.is_empty() {
            return None;
        }
        if self.rng.uniform_real(0.0, 1.0) >= self.send_probability {
            return None;
        }

        let redraw = self.channel_assignment == ChannelAssignment::AtAttempt || self.buffer.front().is_some_and(|p| p.sub_channel.is_none());
        if redraw {
            let drawn = self.draw_sub_channel();
            if let Some(head) = self.buffer.front_mut() {
                head.sub_channel = drawn;
            }
        }

        let packet = self.buffer.front()?.clone();
        let Some(sub_channel) = packet.sub_channel else {
            log::error!("TX-{}: no sub-channel available for attempt", self.id);
            return None;
        };
        log::debug!("TX-{}: attempting on sub-channel {}", self.id, sub_channel);
        Some(Attempt {
            port: self.id,
            sub_channel,
            packet,
        })
    }

    /// Close the occupancy integral, report the mean and release the buffer.
    /// Returns the number of packets released.
    pub fn finish(&mut self, ctx: &SimContext, metrics: &mut dyn MetricsSink) -> usize {
        self.occupancy.update(ctx, self.buffer.len());
        metrics.record(
            ctx.now,
            Observation::MeanBufferOccupancy {
                station: self.id,
                mean: self.occupancy.mean(ctx),
            },
        );
        let released = self.buffer.len();
        self.buffer.clear();
        released
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::metrics::RecordedObservations;

    fn scenario(num_channels: usize, send_probability: f64) -> Scenario {
        Scenario {
            num_channels,
            num_stations: 1,
            slot_size: 1.0,
            mean_interarrival_time: 2.0,
            deterministic_interarrival: true,
            send_probability,
            backoff_enabled: true,
            channel_assignment: ChannelAssignment::AtArrival,
            warmup_period: 0.0,
            sim_time_limit: 100.0,
            seed: 11,
        }
    }

    fn secs(t: f64) -> SimTime {
        SimTime::from_secs(t)
    }

    fn ctx(now: f64) -> SimContext {
        SimContext {
            now: secs(now),
            warmup_period: SimTime::ZERO,
            time_limit: secs(100.0),
        }
    }

    fn station_with_packets(scenario: &Scenario, n: usize) -> Station {
        let mut station = Station::new(0, scenario);
        let mut metrics = RecordedObservations::default();
        for i in 0..n {
            station.handle_arrival(&ctx(i as f64), &mut metrics);
        }
        station
    }

    #[test]
    fn arrival_buffers_packet_and_reports() {
        let sc = scenario(4, 1.0);
        let mut station = Station::new(0, &sc);
        let mut metrics = RecordedObservations::default();

        let next = station.handle_arrival(&ctx(3.0), &mut metrics);

        assert_eq!(next, secs(2.0));
        assert_eq!(station.buffered(), 1);
        let head = station.head().unwrap();
        assert_eq!(head.created_at, secs(3.0));
        assert!(head.sub_channel.unwrap() < 4);
        assert_eq!(
            metrics.entries,
            vec![
                (secs(3.0), Observation::PacketCreated { station: 0 }),
                (secs(3.0), Observation::BufferOccupancy { station: 0, packets: 1 }),
            ]
        );
    }

    #[test]
    fn at_attempt_assignment_leaves_arrivals_unbound() {
        let mut sc = scenario(4, 1.0);
        sc.channel_assignment = ChannelAssignment::AtAttempt;
        let mut station = station_with_packets(&sc, 1);
        assert_eq!(station.head().unwrap().sub_channel, None);

        let attempt = station.handle_feedback(&ctx(1.0), Feedback::Prompt).unwrap();
        assert!(attempt.sub_channel < 4);
        assert_eq!(station.head().unwrap().sub_channel, Some(attempt.sub_channel));
    }

    #[test]
    fn prompt_with_empty_buffer_sends_nothing() {
        let sc = scenario(1, 1.0);
        let mut station = Station::new(0, &sc);
        let mut metrics = RecordedObservations::default();

        assert_eq!(station.handle_feedback(&ctx(1.0), Feedback::Prompt), None);
        station.handle_arrival(&ctx(1.5), &mut metrics);
        assert!(station.handle_feedback(&ctx(2.0), Feedback::Acknowledge).is_none());
        assert_eq!(station.handle_feedback(&ctx(3.0), Feedback::Prompt), None);

        // No Bernoulli trial was drawn while the buffer was empty.
        let mut fresh = RandomStreams::new(sc.seed, 0);
        assert_eq!(station.rng.uniform_real(0.0, 1.0), fresh.uniform_real(0.0, 1.0));
    }

    #[test]
    fn prompt_with_zero_probability_sends_nothing() {
        let sc = scenario(1, 0.0);
        let mut station = station_with_packets(&sc, 2);
        for _ in 0..50 {
            assert_eq!(station.handle_feedback(&ctx(2.0), Feedback::Prompt), None);
        }
        assert_eq!(station.buffered(), 2);
    }

    #[test]
    fn prompt_offers_duplicate_of_head() {
        let sc = scenario(1, 1.0);
        let mut station = station_with_packets(&sc, 2);

        let attempt = station.handle_feedback(&ctx(2.0), Feedback::Prompt).unwrap();

        assert_eq!(attempt.port, 0);
        assert_eq!(attempt.sub_channel, 0);
        assert_eq!(&attempt.packet, station.head().unwrap());
        assert_eq!(station.buffered(), 2);
    }

    #[test]
    fn ack_removes_head_and_resets_window() {
        let sc = scenario(1, 1.0);
        let mut station = station_with_packets(&sc, 2);
        station.backoff.window = 16;

        let attempt = station.handle_feedback(&ctx(2.0), Feedback::Acknowledge).unwrap();

        assert_eq!(station.buffered(), 1);
        assert_eq!(station.backoff().window(), MIN_BACKOFF_WINDOW);
        assert_eq!(attempt.packet.created_at, secs(1.0));
    }

    #[test]
    fn nack_doubles_window_and_suppresses_attempts() {
        let sc = scenario(1, 1.0);
        let mut station = station_with_packets(&sc, 1);

        assert_eq!(station.handle_feedback(&ctx(1.0), Feedback::NegativeAcknowledge), None);
        assert_eq!(station.backoff().window(), 4);
        let counter = station.backoff().counter();
        assert!((1..=4).contains(&counter));

        for remaining in (0..counter).rev() {
            assert_eq!(station.handle_feedback(&ctx(2.0), Feedback::NegativeAcknowledge), None);
            assert_eq!(station.backoff().counter(), remaining);
        }
        assert_eq!(station.backoff().window(), 4);
        assert_eq!(station.buffered(), 1);

        // Counter exhausted: a prompt lets the head packet out again.
        assert!(station.handle_feedback(&ctx(3.0), Feedback::Prompt).is_some());
    }

    #[test]
    fn window_only_grows_on_nack() {
        let sc = scenario(1, 1.0);
        let mut station = station_with_packets(&sc, 3);
        let mut previous = station.backoff().window();
        for _ in 0..200 {
            let before_counter = station.backoff().counter();
            let _ = station.handle_feedback(&ctx(5.0), Feedback::NegativeAcknowledge);
            let window = station.backoff().window();
            if before_counter == 0 {
                assert_eq!(window, previous.saturating_mul(2));
            } else {
                assert_eq!(window, previous);
            }
            assert!(station.backoff().counter() <= window);
            previous = window;
        }
    }

    #[test]
    fn disabled_backoff_treats_nack_like_prompt() {
        let mut sc = scenario(1, 1.0);
        sc.backoff_enabled = false;
        let mut station = station_with_packets(&sc, 1);

        let attempt = station.handle_feedback(&ctx(1.0), Feedback::NegativeAcknowledge);

        assert!(attempt.is_some());
        assert_eq!(station.backoff(), &Backoff::default());
        assert_eq!(station.buffered(), 1);
    }

    #[test]
    fn window_doubling_saturates() {
        let mut backoff = Backoff::default();
        let mut rng = RandomStreams::new(0, 0);
        for _ in 0..40 {
            backoff.on_collision(&mut rng);
        }
        assert_eq!(backoff.window(), u32::MAX);
        assert!(backoff.counter() >= 1);
    }

    #[test]
    fn finish_reports_time_averaged_occupancy() {
        let sc = scenario(1, 1.0);
        let mut station = Station::new(0, &sc);
        let mut metrics = RecordedObservations::default();
        let limit = SimContext {
            now: secs(10.0),
            warmup_period: SimTime::ZERO,
            time_limit: secs(10.0),
        };

        // One packet buffered from t=2 until the end.
        station.handle_arrival(&ctx(2.0), &mut metrics);
        let released = station.finish(&limit, &mut metrics);

        assert_eq!(released, 1);
        assert_eq!(station.buffered(), 0);
        let last = metrics.entries.last().unwrap();
        match last.1 {
            Observation::MeanBufferOccupancy { station, mean } => {
                assert_eq!(station, 0);
                assert!((mean - 0.8).abs() < 1e-12);
            }
            ref other => panic!("unexpected observation {other:?}"),
        }
    }

    #[test]
    fn occupancy_ignores_warmup() {
        let mut integral = OccupancyIntegral::default();
        let mut c = SimContext {
            now: secs(1.0),
            warmup_period: secs(4.0),
            time_limit: secs(8.0),
        };
        integral.update(&c, 3);
        assert_eq!(integral.sum, 0.0);
        c.now = secs(6.0);
        integral.update(&c, 2);
        assert_eq!(integral.sum, 4.0);
        assert!((integral.mean(&c) - 1.0).abs() < 1e-12);
    }
}
