use crate::core::{Calculator, Contract, InputPolicy, Outcome, ProcessContext, Timestamp};
use anyhow::{ensure, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use tracing::debug;

pub const FINISHED_TAG: &str = "FINISHED";

/// Admits at most `max_in_flight` packets into the downstream section of a
/// graph.
///
/// Input 0 carries the data. The `FINISHED` input is wired back from the end
/// of the limited section and marked as a back edge. Once its timestamp bound
/// passes T, either through a packet at T or a bound raised without one,
/// every admitted packet stamped T or earlier is released. Data packets
/// arriving while the limit is reached are dropped and counted.
pub struct FlowLimiterCalculator {
    max_in_flight: usize,
    in_flight: VecDeque<Timestamp>,
    dropped: u64,
}

impl Default for FlowLimiterCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowLimiterCalculator {
    pub fn new() -> Self {
        Self {
            max_in_flight: 1,
            in_flight: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn release_before(&mut self, bound: Timestamp) {
        while self.in_flight.front().is_some_and(|&t| t < bound) {
            self.in_flight.pop_front();
        }
    }
}

#[async_trait]
impl Calculator for FlowLimiterCalculator {
    fn configure(&mut self, options: &Value) -> Result<()> {
        if let Some(max) = options.get("max_in_flight").and_then(|v| v.as_u64()) {
            ensure!(max > 0, "`max_in_flight` must be at least 1");
            self.max_in_flight = max as usize;
        }
        Ok(())
    }

    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set_any();
        cc.inputs().tag(FINISHED_TAG).set_any();
        cc.outputs().index(0).set_any();
        cc.set_input_policy(InputPolicy::Immediate);
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        let ts = ctx.input_timestamp();
        self.release_before(ctx.inputs().tag_bound(FINISHED_TAG));

        let packet = ctx.inputs().index(0).clone();
        if packet.is_empty() {
            return Ok(Outcome::Continue);
        }
        if self.in_flight.len() < self.max_in_flight {
            self.in_flight.push_back(ts);
            ctx.outputs().index(0)?.add_packet(packet);
        } else {
            self.dropped += 1;
            ctx.record_drop();
            debug!(node = ctx.node_name(), timestamp = %ts, dropped = self.dropped, "flow limiter dropped packet");
        }
        Ok(Outcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_before_bound() {
        let mut limiter = FlowLimiterCalculator::new();
        limiter.in_flight.extend([Timestamp::new(1), Timestamp::new(3), Timestamp::new(5)]);
        limiter.release_before(Timestamp::new(4));
        assert_eq!(limiter.in_flight(), 1);
        limiter.release_before(Timestamp::new(3));
        assert_eq!(limiter.in_flight(), 1);
        limiter.release_before(Timestamp::DONE);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_contract_is_immediate() {
        let limiter = FlowLimiterCalculator::new();
        let mut cc = Contract::new();
        limiter.contract(&mut cc).unwrap();
        assert_eq!(cc.input_policy(), InputPolicy::Immediate);
        assert_eq!(cc.input_ports().len(), 2);
    }
}
