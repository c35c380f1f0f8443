//! Observability side channel.
//!
//! Components report what happened through a [`MetricsSink`] handed to
//! them by the event loop. Recording is fire-and-forget: nothing a sink does
//! can influence the protocol.

use serde::Serialize;

use super::types::{SimTime, StationId};

/// Something worth recording.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// A station generated a packet.
    PacketCreated { station: StationId },
    /// Buffer length right after an arrival was enqueued.
    BufferOccupancy { station: StationId, packets: usize },
    /// A sub-channel was flagged as collided for the current slot.
    Collision { sub_channel: usize },
    /// Packets delivered in the slot that just closed.
    SlotThroughput { delivered: u64 },
    /// End-to-end latency (s) measured by the channel on delivery.
    ChannelLatency { latency: f64 },
    /// A sink consumed a packet.
    SinkReceived { sink: usize },
    /// End-to-end latency (s) measured by the sink.
    SinkLatency { latency: f64 },
    /// Time-averaged buffer length over the measurement window, reported once at the end.
    MeanBufferOccupancy { station: StationId, mean: f64 },
}

pub trait MetricsSink {
    fn record(&mut self, now: SimTime, observation: Observation);
}

/// Running count/sum/min/max of a scalar.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Summary {
    pub fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }
}

/// Aggregated statistics of one run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunStatistics {
    pub packets_created: u64,
    pub collisions: u64,
    pub packets_received: u64,
    /// Delivered packets per slot.
    pub throughput: Summary,
    pub channel_latency: Summary,
    pub sink_latency: Summary,
    pub buffer_occupancy: Summary,
    /// Indexed by station.
    pub mean_buffer_occupancy: Vec<f64>,
}

/// Default [`MetricsSink`]: drops everything emitted during the warm-up
/// period and aggregates the rest.
pub struct StatsCollector {
    warmup_period: SimTime,
    stats: RunStatistics,
}

impl StatsCollector {
    pub fn new(warmup_period: SimTime, num_stations: usize) -> Self {
        Self {
            warmup_period,
            stats: RunStatistics {
                mean_buffer_occupancy: vec![0.0; num_stations],
                ..Default::default()
            },
        }
    }

    #[cfg(test)]
    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    pub fn into_statistics(self) -> RunStatistics {
        self.stats
    }
}

impl MetricsSink for StatsCollector {
    fn record(&mut self, now: SimTime, observation: Observation) {
        // The end-of-run average already accounts for the warm-up itself.
        if let Observation::MeanBufferOccupancy { station, mean } = observation {
            if let Some(slot) = self.stats.mean_buffer_occupancy.get_mut(station) {
                *slot = mean;
            } else {
                log::error!("Mean buffer occupancy reported for unknown station {}", station);
            }
            return;
        }

        if now < self.warmup_period {
            return;
        }

        let stats = &mut self.stats;
        match observation {
            Observation::PacketCreated { .. } => stats.packets_created += 1,
            Observation::BufferOccupancy { packets, .. } => stats.buffer_occupancy.add(packets as f64),
            Observation::Collision { .. } => stats.collisions += 1,
            Observation::SlotThroughput { delivered } => stats.throughput.add(delivered as f64),
            Observation::ChannelLatency { latency } => stats.channel_latency.add(latency),
            Observation::SinkReceived { .. } => stats.packets_received += 1,
            Observation::SinkLatency { latency } => stats.sink_latency.add(latency),
            Observation::MeanBufferOccupancy { .. } => {}
        }
    }
}

/// Test sink that keeps every observation in emission order.
#[cfg(test)]
#[derive(Default)]
pub struct RecordedObservations {
    pub entries: Vec<(SimTime, Observation)>,
}

#[cfg(test)]
impl RecordedObservations {
    pub fn count(&self, pred: impl Fn(&Observation) -> bool) -> usize {
        self.entries.iter().filter(|(_, o)| pred(o)).count()
    }
}

#[cfg(test)]
impl MetricsSink for RecordedObservations {
    fn record(&mut self, now: SimTime, observation: Observation) {
        self.entries.push((now, observation));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(t: f64) -> SimTime {
        SimTime::from_secs(t)
    }

    #[test]
    fn summary_tracks_extremes_and_mean() {
        let mut s = Summary::default();
        assert_eq!(s.mean(), 0.0);
        for v in [3.0, 1.0, 2.0] {
            s.add(v);
        }
        assert_eq!(s.count, 3);
        assert_eq!(s.min, Some(1.0));
        assert_eq!(s.max, Some(3.0));
        assert!((s.mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn observations_before_warmup_are_dropped() {
        let mut collector = StatsCollector::new(secs(5.0), 1);
        collector.record(secs(1.0), Observation::PacketCreated { station: 0 });
        collector.record(secs(1.0), Observation::Collision { sub_channel: 0 });
        collector.record(secs(5.0), Observation::PacketCreated { station: 0 });
        collector.record(secs(6.0), Observation::SlotThroughput { delivered: 2 });

        let stats = collector.statistics();
        assert_eq!(stats.packets_created, 1);
        assert_eq!(stats.collisions, 0);
        assert_eq!(stats.throughput.count, 1);
        assert_eq!(stats.throughput.sum, 2.0);
    }

    #[test]
    fn mean_occupancy_is_kept_regardless_of_time() {
        let mut collector = StatsCollector::new(secs(5.0), 2);
        collector.record(SimTime::ZERO, Observation::MeanBufferOccupancy { station: 1, mean: 0.75 });
        collector.record(SimTime::ZERO, Observation::MeanBufferOccupancy { station: 9, mean: 1.0 });
        assert_eq!(collector.statistics().mean_buffer_occupancy, vec![0.0, 0.75]);
    }
}
