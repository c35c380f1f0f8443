//! Event loop wiring stations, the channel and the sinks together.
//!
//! High-level flow:
//! 1) Initialization schedules each station's first arrival and the first
//!    slot boundary. A channel without sub-channels ends the run here.
//! 2) The loop pops the earliest event and hands it to its component.
//!    Components return what they want to send; the loop turns that into
//!    zero-delay events, which keeps one handler run atomic in simulated time.
//! 3) Once the next event lies past the time limit, every component closes
//!    its books and the collected statistics are returned.

use anyhow::{Context, anyhow};
use serde::Serialize;

use super::channel::{Channel, Outgoing};
use super::metrics::{RunStatistics, StatsCollector};
use super::scenario::Scenario;
use super::scheduler::{Event, Scheduler};
use super::sink::Sink;
use super::station::Station;
use super::types::{SimContext, SimTime, StationId};

/// Result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub seed: u64,
    /// The configuration had no valid slot cycle and no event was processed.
    pub degenerate: bool,
    pub events_processed: u64,
    pub slots: u64,
    /// Packets still waiting in station buffers when the run ended.
    pub buffered_at_end: usize,
    /// Attempts still in the channel's in-slot set when the run ended.
    pub in_flight_discarded: usize,
    pub statistics: RunStatistics,
}

pub struct Simulation {
    ctx: SimContext,
    slot_size: SimTime,
    seed: u64,
    scheduler: Scheduler,
    stations: Vec<Station>,
    channel: Channel,
    sinks: Vec<Sink>,
    metrics: StatsCollector,
    events_processed: u64,
    slots: u64,
}

impl Simulation {
    /// Build the components of one run. The scenario is expected to be validated.
    pub fn new(scenario: &Scenario) -> Self {
        let stations = (0..scenario.num_stations).map(|id| Station::new(id, scenario)).collect();
        let sinks = (0..scenario.num_stations).map(Sink::new).collect();

        Self {
            ctx: SimContext::new(
                SimTime::from_secs(scenario.warmup_period),
                SimTime::from_secs(scenario.sim_time_limit),
            ),
            slot_size: SimTime::from_secs(scenario.slot_size),
            seed: scenario.seed,
            scheduler: Scheduler::new(),
            stations,
            channel: Channel::new(scenario.num_channels, scenario.num_stations),
            sinks,
            metrics: StatsCollector::new(SimTime::from_secs(scenario.warmup_period), scenario.num_stations),
            events_processed: 0,
            slots: 0,
        }
    }

    /// Schedule the initial events. Returns `false` if the run cannot start.
    fn initialize(&mut self) -> bool {
        if self.channel.is_degenerate() {
            log::warn!("Channel has no sub-channels configured, ending simulation");
            return false;
        }

        let now = self.ctx.now;
        for station in &mut self.stations {
            let delay = station.next_interarrival();
            self.scheduler.schedule(now, now + delay, Event::Arrival { station: station.id() });
        }
        self.scheduler.schedule(now, self.slot_size, Event::SlotBoundary);
        true
    }

    fn station_mut(&mut self, id: StationId) -> anyhow::Result<&mut Station> {
        self.stations.get_mut(id).ok_or_else(|| anyhow!("Unknown station {id}"))
    }

    fn dispatch(&mut self, event: Event) -> anyhow::Result<()> {
        let now = self.ctx.now;
        match event {
            Event::Arrival { station } => {
                let ctx = self.ctx;
                let station_ref = self.stations.get_mut(station).ok_or_else(|| anyhow!("Unknown station {station}"))?;
                let delay = station_ref.handle_arrival(&ctx, &mut self.metrics);
                self.scheduler.schedule(now, now + delay, Event::Arrival { station });
            }
            Event::SlotBoundary => {
                self.slots += 1;
                for outgoing in self.channel.resolve_slot(&self.ctx, &mut self.metrics) {
                    let event = match outgoing {
                        Outgoing::Reply { port, feedback } => Event::Feedback { station: port, feedback },
                        Outgoing::Deliver { port, packet } => Event::Delivery { sink: port, packet },
                    };
                    self.scheduler.schedule(now, now, event);
                }
                // Boundaries sit on exact multiples of the slot size.
                self.scheduler.schedule(now, self.slot_size * (self.slots + 1), Event::SlotBoundary);
            }
            Event::Feedback { station, feedback } => {
                let ctx = self.ctx;
                if let Some(attempt) = self.station_mut(station)?.handle_feedback(&ctx, feedback) {
                    self.scheduler.schedule(now, now, Event::Attempt(attempt));
                }
            }
            Event::Attempt(attempt) => {
                self.channel.accept(attempt).map_err(|e| anyhow!(e))?;
            }
            Event::Delivery { sink, packet } => {
                let sink_ref = self.sinks.get_mut(sink).ok_or_else(|| anyhow!("Unknown sink {sink}"))?;
                sink_ref.receive(&self.ctx, packet, &mut self.metrics);
            }
        }
        Ok(())
    }

    /// Run until the time limit and return the collected report.
    pub fn run(mut self) -> anyhow::Result<RunReport> {
        if !self.initialize() {
            return Ok(RunReport {
                seed: self.seed,
                degenerate: true,
                events_processed: 0,
                slots: 0,
                buffered_at_end: 0,
                in_flight_discarded: 0,
                statistics: self.metrics.into_statistics(),
            });
        }

        while let Some(time) = self.scheduler.peek_time() {
            if time > self.ctx.time_limit {
                break;
            }
            let Some((time, event)) = self.scheduler.pop() else {
                break;
            };
            self.ctx.now = time;
            self.dispatch(event)
                .with_context(|| format!("Event handling failed at t={time}"))?;
            self.events_processed += 1;
        }

        self.finish()
    }

    /// Close every component at the time limit.
    fn finish(mut self) -> anyhow::Result<RunReport> {
        self.ctx.now = self.ctx.now.max(self.ctx.time_limit);
        let ctx = self.ctx;

        let mut buffered_at_end = 0;
        for station in &mut self.stations {
            buffered_at_end += station.finish(&ctx, &mut self.metrics);
        }
        let in_flight_discarded = self.channel.finish();
        let received: u64 = self.sinks.iter().map(Sink::received).sum();
        log::debug!(
            "Finished at t={}: {} events, {} received, {} buffered, {} in flight, {} pending events dropped",
            ctx.now,
            self.events_processed,
            received,
            buffered_at_end,
            in_flight_discarded,
            self.scheduler.len()
        );

        Ok(RunReport {
            seed: self.seed,
            degenerate: false,
            events_processed: self.events_processed,
            slots: self.slots,
            buffered_at_end,
            in_flight_discarded,
            statistics: self.metrics.into_statistics(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::types::ChannelAssignment;

    fn scenario() -> Scenario {
        Scenario {
            num_channels: 1,
            num_stations: 1,
            slot_size: 1.0,
            mean_interarrival_time: 2.5,
            deterministic_interarrival: true,
            send_probability: 1.0,
            backoff_enabled: true,
            channel_assignment: ChannelAssignment::AtArrival,
            warmup_period: 0.0,
            sim_time_limit: 20.0,
            seed: 3,
        }
    }

    #[test]
    fn zero_channels_terminate_immediately() {
        let mut sc = scenario();
        sc.num_channels = 0;
        sc.num_stations = 4;

        let report = Simulation::new(&sc).run().unwrap();

        assert!(report.degenerate);
        assert_eq!(report.events_processed, 0);
        assert_eq!(report.slots, 0);
        assert_eq!(report.statistics.packets_created, 0);
        assert_eq!(report.statistics.throughput.count, 0);
    }

    #[test]
    fn lone_station_delivers_everything_without_collisions() {
        let report = Simulation::new(&scenario()).run().unwrap();
        let stats = &report.statistics;

        // Arrivals at 2.5, 5.0, ..., 20.0; the last one is still in flight at the limit.
        assert_eq!(stats.packets_created, 8);
        assert_eq!(stats.packets_received, 7);
        assert_eq!(stats.collisions, 0);
        assert_eq!(report.slots, 20);
        assert_eq!(report.buffered_at_end, 1);
        assert_eq!(report.in_flight_discarded, 1);

        // Half-slot arrivals wait 1.5 slots, aligned ones 1 slot.
        assert_eq!(stats.sink_latency.min, Some(1.0));
        assert_eq!(stats.sink_latency.max, Some(1.5));
        assert_eq!(stats.channel_latency.count, 7);
        assert!((stats.sink_latency.sum - 9.0).abs() < 1e-9);

        assert!((stats.mean_buffer_occupancy[0] - 0.45).abs() < 1e-9);
    }

    #[test]
    fn slot_count_matches_time_limit() {
        let mut sc = scenario();
        sc.slot_size = 0.01;
        sc.sim_time_limit = 1.0;
        assert_eq!(Simulation::new(&sc).run().unwrap().slots, 100);

        sc.sim_time_limit = 300.0;
        assert_eq!(Simulation::new(&sc).run().unwrap().slots, 30_000);
    }

    #[test]
    fn arrivals_on_slot_boundaries_wait_exactly_one_slot() {
        let mut sc = scenario();
        sc.slot_size = 0.01;
        sc.mean_interarrival_time = 0.08;
        sc.sim_time_limit = 10.0;

        let report = Simulation::new(&sc).run().unwrap();
        let stats = &report.statistics;

        // Every arrival coincides with a boundary, is prompted there and
        // acknowledged at the next one.
        assert_eq!(stats.packets_created, 125);
        assert_eq!(stats.packets_received, 124);
        assert_eq!(stats.sink_latency.min, Some(0.01));
        assert_eq!(stats.sink_latency.max, Some(0.01));
        assert_eq!(report.in_flight_discarded, 1);
    }

    #[test]
    fn simultaneous_attempts_on_one_sub_channel_collide() {
        let mut sc = scenario();
        sc.num_stations = 2;
        sc.mean_interarrival_time = 0.5;
        sc.sim_time_limit = 2.0;

        let report = Simulation::new(&sc).run().unwrap();
        let stats = &report.statistics;

        assert_eq!(stats.collisions, 1);
        assert_eq!(stats.packets_received, 0);
        assert_eq!(stats.throughput.count, 2);
        assert_eq!(stats.throughput.sum, 0.0);
        // Both stations hold their NACKed head packet plus later arrivals.
        assert_eq!(report.buffered_at_end, 8);
        assert_eq!(report.in_flight_discarded, 0);
    }

    #[test]
    fn deliveries_are_conserved_across_observers() {
        let mut sc = scenario();
        sc.num_channels = 3;
        sc.num_stations = 12;
        sc.deterministic_interarrival = false;
        sc.mean_interarrival_time = 4.0;
        sc.send_probability = 0.4;
        sc.channel_assignment = ChannelAssignment::AtAttempt;
        sc.sim_time_limit = 500.0;

        let report = Simulation::new(&sc).run().unwrap();
        let stats = &report.statistics;

        assert!(stats.packets_received > 0);
        assert!(stats.collisions > 0);
        assert_eq!(stats.throughput.count, report.slots);
        assert_eq!(stats.throughput.sum as u64, stats.packets_received);
        assert_eq!(stats.channel_latency.count, stats.packets_received);
        assert_eq!(stats.sink_latency.count, stats.packets_received);
        assert!(stats.throughput.max.unwrap() <= 3.0);
        assert_eq!(
            stats.packets_created,
            stats.packets_received + report.buffered_at_end as u64
        );
    }

    #[test]
    fn same_seed_reproduces_run() {
        let mut sc = scenario();
        sc.num_channels = 2;
        sc.num_stations = 6;
        sc.deterministic_interarrival = false;
        sc.send_probability = 0.5;
        sc.sim_time_limit = 200.0;

        let a = Simulation::new(&sc).run().unwrap();
        let b = Simulation::new(&sc).run().unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());

        sc.seed += 1;
        let c = Simulation::new(&sc).run().unwrap();
        assert_ne!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&c).unwrap());
    }

    #[test]
    fn warmup_excludes_early_statistics() {
        let mut sc = scenario();
        sc.warmup_period = 10.0;

        let report = Simulation::new(&sc).run().unwrap();
        let stats = &report.statistics;

        // Arrivals at 10.0 .. 20.0 count; 2.5 .. 7.5 do not.
        assert_eq!(stats.packets_created, 5);
        assert_eq!(stats.throughput.count, 11);
        // Occupancy is integrated from t=10 only: 1 + 1.5 + 1 + 1.5 over 10 s.
        assert!((stats.mean_buffer_occupancy[0] - 0.5).abs() < 1e-9);
    }
}
