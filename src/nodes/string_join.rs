use super::string_source::STR_TAG;
use crate::core::{Calculator, Contract, Outcome, Packet, ProcessContext};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Concatenates the strings on `STR:0` and `STR:1` into `STR`.
///
/// A port with nothing at the firing timestamp contributes `placeholder`.
pub struct StringJoinCalculator {
    placeholder: String,
}

impl Default for StringJoinCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl StringJoinCalculator {
    pub fn new() -> Self {
        Self {
            placeholder: "<EMPTY>".to_string(),
        }
    }

    fn text<'a>(&'a self, packet: &'a Packet) -> Result<&'a str> {
        if packet.is_empty() {
            return Ok(&self.placeholder);
        }
        Ok(packet.get::<String>()?.as_str())
    }
}

#[async_trait]
impl Calculator for StringJoinCalculator {
    fn configure(&mut self, options: &Value) -> Result<()> {
        if let Some(placeholder) = options.get("placeholder").and_then(|v| v.as_str()) {
            self.placeholder = placeholder.to_string();
        }
        Ok(())
    }

    fn contract(&self, cc: &mut Contract) -> Result<()> {
        cc.inputs().get(STR_TAG, 0).set::<String>();
        cc.inputs().get(STR_TAG, 1).set::<String>();
        cc.outputs().tag(STR_TAG).set::<String>();
        Ok(())
    }

    async fn process(&mut self, ctx: &mut ProcessContext) -> Result<Outcome> {
        let joined = format!(
            "{}{}",
            self.text(ctx.inputs().get(STR_TAG, 0))?,
            self.text(ctx.inputs().get(STR_TAG, 1))?
        );
        let ts = ctx.input_timestamp();
        ctx.outputs().tag(STR_TAG)?.add_packet(Packet::new(joined).at(ts));
        Ok(Outcome::Continue)
    }
}
