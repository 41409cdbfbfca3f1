//! Calculators and observers shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streamgraph::{
    Calculator, CalculatorRegistry, Contract, Graph, OpenContext, Outcome, Packet,
    ProcessContext, Timestamp,
};
use tokio::sync::Semaphore;

/// Source emitting `0..count` as `i64`, stamped with the value.
pub struct Counter {
    pub count: i64,
    next: i64,
}

impl Counter {
    pub fn new(count: i64) -> Self {
        Self { count, next: 0 }
    }
}

#[async_trait]
impl Calculator for Counter {
    fn configure(&mut self, options: &serde_json::Value) -> Result<()> {
        if let Some(count) = options.get("count").and_then(|v| v.as_i64()) {
            self.count = count;
        }
        Ok(())
    }

    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.outputs().index(0).set::<i64>();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        if self.next >= self.count {
            return Ok(Outcome::Stop);
        }
        ctx.outputs().index(0)?.add_packet(Packet::new(self.next).at(self.next));
        self.next += 1;
        Ok(Outcome::Continue)
    }
}

/// What a `Join` saw in one firing.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRecord {
    pub timestamp: i64,
    pub left: Option<f64>,
    pub right: Option<f64>,
}

/// Two `f64` inputs; records every firing and emits the sum of what is
/// present.
pub struct Join {
    pub log: Arc<Mutex<Vec<JoinRecord>>>,
}

#[async_trait]
impl Calculator for Join {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set::<f64>();
        cc.inputs().index(1).set::<f64>();
        cc.outputs().index(0).set::<f64>();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        let left = ctx.inputs().index(0).get::<f64>().ok().copied();
        let right = ctx.inputs().index(1).get::<f64>().ok().copied();
        let ts = ctx.input_timestamp();
        self.log.lock().unwrap().push(JoinRecord {
            timestamp: ts.value(),
            left,
            right,
        });
        let sum = left.unwrap_or(0.0) + right.unwrap_or(0.0);
        ctx.outputs().index(0)?.add_packet(Packet::new(sum).at(ts));
        Ok(Outcome::Continue)
    }
}

/// Forwards its input until `fail_at`, where it reports an error.
pub struct FailAt {
    pub fail_at: i64,
}

#[async_trait]
impl Calculator for FailAt {
    fn configure(&mut self, options: &serde_json::Value) -> Result<()> {
        if let Some(ts) = options.get("fail_at").and_then(|v| v.as_i64()) {
            self.fail_at = ts;
        }
        Ok(())
    }

    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set_any();
        cc.outputs().index(0).set_any();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        if ctx.input_timestamp().value() == self.fail_at {
            bail!("sensor dropout");
        }
        let packet = ctx.inputs().index(0).clone();
        ctx.outputs().index(0)?.add_packet(packet);
        Ok(Outcome::Continue)
    }
}

/// Panics on its third packet.
pub struct Panicky {
    seen: usize,
}

#[async_trait]
impl Calculator for Panicky {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set_any();
        cc.outputs().index(0).set_any();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        self.seen += 1;
        if self.seen == 3 {
            panic!("unexpected frame layout");
        }
        let packet = ctx.inputs().index(0).clone();
        ctx.outputs().index(0)?.add_packet(packet);
        Ok(Outcome::Continue)
    }
}

/// Forwards even timestamps only. Odd ones still advance the output bound
/// so downstream joins need not wait for the next even packet.
pub struct EvenOnly;

#[async_trait]
impl Calculator for EvenOnly {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set::<f64>();
        cc.outputs().index(0).set::<f64>();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        let ts = ctx.input_timestamp();
        let packet = ctx.inputs().index(0).clone();
        let out = ctx.outputs().index(0)?;
        if ts.value() % 2 == 0 {
            out.add_packet(packet);
        } else {
            out.set_next_timestamp_bound(ts.next());
        }
        Ok(Outcome::Continue)
    }
}

/// Refuses to open.
pub struct BrokenOpen;

#[async_trait]
impl Calculator for BrokenOpen {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set_any();
        Ok(())
    }

    async fn open(&mut self, _ctx: &mut OpenContext) -> Result<()> {
        bail!("device unavailable")
    }

    async fn process(&mut self, _ctx: &mut ProcessContext) -> Result<Outcome> {
        Ok(Outcome::Continue)
    }
}

/// Forwards its input after a delay.
pub struct Slow {
    pub delay: Duration,
}

#[async_trait]
impl Calculator for Slow {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set_any();
        cc.outputs().index(0).set_any();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        tokio::time::sleep(self.delay).await;
        let packet = ctx.inputs().index(0).clone();
        ctx.outputs().index(0)?.add_packet(packet);
        Ok(Outcome::Continue)
    }
}

/// Forwards one packet per permit taken from `gate`.
pub struct Gate {
    pub gate: Arc<Semaphore>,
}

#[async_trait]
impl Calculator for Gate {
    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set_any();
        cc.outputs().index(0).set_any();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        self.gate.acquire().await?.forget();
        let packet = ctx.inputs().index(0).clone();
        ctx.outputs().index(0)?.add_packet(packet);
        Ok(Outcome::Continue)
    }
}

/// Built-ins plus the calculators above. `Join` logs into `join_log`;
/// `Gate` takes permits from `gate`.
pub fn registry(join_log: Arc<Mutex<Vec<JoinRecord>>>, gate: Arc<Semaphore>) -> CalculatorRegistry {
    let mut registry = CalculatorRegistry::with_builtins();
    registry
        .register("Counter", || Box::new(Counter::new(0)) as Box<dyn Calculator>)
        .register("Join", move || {
            Box::new(Join {
                log: join_log.clone(),
            }) as Box<dyn Calculator>
        })
        .register("FailAt", || Box::new(FailAt { fail_at: -1 }) as Box<dyn Calculator>)
        .register("Panicky", || Box::new(Panicky { seen: 0 }) as Box<dyn Calculator>)
        .register("EvenOnly", || Box::new(EvenOnly) as Box<dyn Calculator>)
        .register("BrokenOpen", || Box::new(BrokenOpen) as Box<dyn Calculator>)
        .register("Slow", || {
            Box::new(Slow {
                delay: Duration::from_millis(20),
            }) as Box<dyn Calculator>
        })
        .register("Gate", move || {
            Box::new(Gate { gate: gate.clone() }) as Box<dyn Calculator>
        });
    registry
}

pub fn default_registry() -> CalculatorRegistry {
    registry(Arc::default(), Arc::new(Semaphore::new(0)))
}

/// Collects every packet seen on `stream`.
pub fn collect(graph: &mut Graph, stream: &str) -> Arc<Mutex<Vec<Packet>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    graph
        .register_observer(stream, move |packet: &Packet| -> Result<()> {
            sink.lock().unwrap().push(packet.clone());
            Ok(())
        })
        .unwrap();
    seen
}

pub fn timestamps(packets: &[Packet]) -> Vec<i64> {
    packets.iter().map(|p| p.timestamp().value()).collect()
}

pub fn ts(value: i64) -> Timestamp {
    Timestamp::new(value)
}
