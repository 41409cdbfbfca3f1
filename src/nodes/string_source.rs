use crate::core::{Calculator, Contract, Outcome, Packet, ProcessContext};
use anyhow::{ensure, Result};
use async_trait::async_trait;
use serde_json::Value;

pub const STR_TAG: &str = "STR";

/// Source that emits `count` strings on `STR`, stamped `0..count`, then
/// stops. Each string is `prefix` followed by its timestamp.
pub struct StringSourceCalculator {
    count: i64,
    prefix: String,
    next: i64,
}

impl Default for StringSourceCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl StringSourceCalculator {
    pub fn new() -> Self {
        Self {
            count: 17,
            prefix: "item".to_string(),
            next: 0,
        }
    }
}

#[async_trait]
impl Calculator for StringSourceCalculator {
    fn configure(&mut self, options: &Value) -> Result<()> {
        if let Some(count) = options.get("count").and_then(|v| v.as_i64()) {
            ensure!(count >= 0, "`count` must not be negative");
            self.count = count;
        }
        if let Some(prefix) = options.get("prefix").and_then(|v| v.as_str()) {
            self.prefix = prefix.to_string();
        }
        Ok(())
    }

    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.outputs().tag(STR_TAG).set::<String>();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        if self.next >= self.count {
            return Ok(Outcome::Stop);
        }
        let text = format!("{}{}", self.prefix, self.next);
        ctx.outputs().tag(STR_TAG)?.add_packet(Packet::new(text).at(self.next));
        self.next += 1;
        Ok(Outcome::Continue)
    }
}
