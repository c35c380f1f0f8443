//! Receiver wired to one channel port. Consumes delivered packets and
//! records their end-to-end latency; never sends anything back.

use super::metrics::{MetricsSink, Observation};
use super::types::{Packet, SimContext};

pub struct Sink {
    port: usize,
    received: u64,
}

impl Sink {
    pub fn new(port: usize) -> Self {
        Self { port, received: 0 }
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn receive(&mut self, ctx: &SimContext, packet: Packet, metrics: &mut dyn MetricsSink) {
        self.received += 1;
        log::debug!("RX-{}: packet received from tx {}", self.port, packet.station_id);
        metrics.record(ctx.now, Observation::SinkReceived { sink: self.port });

        let latency = packet.latency_at(ctx.now);
        log::debug!("RX-{}: response time {:.6}", self.port, latency);
        metrics.record(ctx.now, Observation::SinkLatency { latency });
    }
}
