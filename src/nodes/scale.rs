use crate::core::{Calculator, Contract, OpenContext, Outcome, Packet, ProcessContext};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Computes `a * x + b` for every `f64` packet.
///
/// `a` and `b` come from the options; an `A` side packet, when bound,
/// replaces `a` for the run.
pub struct ScaleCalculator {
    a: f64,
    b: f64,
}

impl Default for ScaleCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScaleCalculator {
    pub fn new() -> Self {
        Self { a: 1.0, b: 0.0 }
    }
}

#[async_trait]
impl Calculator for ScaleCalculator {
    fn configure(&mut self, options: &Value) -> Result<()> {
        if let Some(a) = options.get("a").and_then(|v| v.as_f64()) {
            self.a = a;
        }
        if let Some(b) = options.get("b").and_then(|v| v.as_f64()) {
            self.b = b;
        }
        Ok(())
    }

    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().index(0).set::<f64>();
        cc.outputs().index(0).set::<f64>();
        cc.side_packets().tag("A").set::<f64>().optional();
        Ok(())
    }

    async fn open(&mut self, ctx: &mut OpenContext) -> Result<()> {
        let a = ctx.side_packets().tag("A");
        if !a.is_empty() {
            self.a = *a.get::<f64>().context("side packet A")?;
        }
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        let input = ctx.inputs().index(0);
        if input.is_empty() {
            return Ok(Outcome::Continue);
        }
        let y = self.a * *input.get::<f64>()? + self.b;
        let ts = ctx.input_timestamp();
        ctx.outputs().index(0)?.add_packet(Packet::new(y).at(ts));
        Ok(Outcome::Continue)
    }
}
