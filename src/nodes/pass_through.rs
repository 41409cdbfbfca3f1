use crate::core::{Calculator, Contract, Outcome, ProcessContext};
use anyhow::{ensure, Result};
use async_trait::async_trait;
use serde_json::Value;

/// Forwards input `i` to output `i` unchanged.
///
/// The number of ports comes from the `ports` option and defaults to 1.
pub struct PassThroughCalculator {
    ports: usize,
}

impl Default for PassThroughCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl PassThroughCalculator {
    pub fn new() -> Self {
        Self { ports: 1 }
    }
}

#[async_trait]
impl Calculator for PassThroughCalculator {
    fn configure(&mut self, options: &Value) -> Result<()> {
        if let Some(ports) = options.get("ports").and_then(|v| v.as_u64()) {
            ensure!(ports > 0, "`ports` must be at least 1");
            self.ports = ports as usize;
        }
        Ok(())
    }

    fn contract(&self, cc: &mut Contract) -> Result<()> {
        for i in 0..self.ports {
            cc.inputs().index(i).set_any();
            cc.outputs().index(i).set_any();
        }
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        for i in 0..self.ports {
            let packet = ctx.inputs().index(i).clone();
            if !packet.is_empty() {
                ctx.outputs().index(i)?.add_packet(packet);
            }
        }
        Ok(Outcome::Continue)
    }
}
