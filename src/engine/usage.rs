//! Token usage records and the canonical pricing table.
//!
//! Prices are held as integer nano-dollars per token so that folding many
//! deltas into a run total never drifts.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl UsageRecord {
    pub fn new(model: impl Into<String>, input_tokens: i64, output_tokens: i64) -> Self {
        Self {
            model: model.into(),
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelPrice {
    pub input_nanos_per_token: i64,
    pub output_nanos_per_token: i64,
}

/// $1 per million tokens is 1000 nano-dollars per token.
const fn per_million(input_millidollars: i64, output_millidollars: i64) -> ModelPrice {
    ModelPrice {
        input_nanos_per_token: input_millidollars,
        output_nanos_per_token: output_millidollars,
    }
}

/// Known model families, matched by exact id first and then by the longest
/// prefix, so dated ids such as `claude-sonnet-4-20250514` resolve to their
/// family.
const PRICING: &[(&str, ModelPrice)] = &[
    ("claude-3-5-sonnet", per_million(3_000, 15_000)),
    ("claude-3-7-sonnet", per_million(3_000, 15_000)),
    ("claude-sonnet-4", per_million(3_000, 15_000)),
    ("claude-4-sonnet", per_million(3_000, 15_000)),
    ("claude-opus-4", per_million(15_000, 75_000)),
    ("claude-4-opus", per_million(15_000, 75_000)),
    ("claude-3-opus", per_million(15_000, 75_000)),
    ("claude-3-5-haiku", per_million(800, 4_000)),
    ("claude-3-haiku", per_million(250, 1_250)),
    ("gpt-4o", per_million(2_500, 10_000)),
    ("gpt-4o-mini", per_million(150, 600)),
];

/// Applied to any model id the table does not know.
pub const DEFAULT_PRICE: ModelPrice = per_million(3_000, 15_000);

pub fn price_for(model: &str) -> ModelPrice {
    if let Some((_, price)) = PRICING.iter().find(|(id, _)| *id == model) {
        return *price;
    }
    PRICING
        .iter()
        .filter(|(id, _)| model.starts_with(id))
        .max_by_key(|(id, _)| id.len())
        .map(|(_, price)| *price)
        .unwrap_or(DEFAULT_PRICE)
}

pub fn cost_nanos(record: &UsageRecord) -> i64 {
    let price = price_for(&record.model);
    record.input_tokens * price.input_nanos_per_token
        + record.output_tokens * price.output_nanos_per_token
}

/// Render nano-dollars as a decimal USD string with six places.
pub fn format_usd(nanos: i64) -> String {
    let sign = if nanos < 0 { "-" } else { "" };
    let abs = nanos.unsigned_abs();
    let dollars = abs / 1_000_000_000;
    let micros = (abs % 1_000_000_000) / 1_000;
    format!("{}{}.{:06}", sign, dollars, micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert_eq!(price_for("gpt-4o"), per_million(2_500, 10_000));
        assert_eq!(price_for("gpt-4o-mini"), per_million(150, 600));
    }

    #[test]
    fn test_longest_prefix_wins() {
        assert_eq!(price_for("gpt-4o-mini-2024-07-18"), per_million(150, 600));
        assert_eq!(price_for("gpt-4o-2024-08-06"), per_million(2_500, 10_000));
        assert_eq!(
            price_for("claude-sonnet-4-5-20250929"),
            per_million(3_000, 15_000)
        );
        assert_eq!(
            price_for("claude-3-5-haiku-20241022"),
            per_million(800, 4_000)
        );
    }

    #[test]
    fn test_unknown_model_uses_default_tier() {
        assert_eq!(price_for("mystery-model"), DEFAULT_PRICE);
    }

    #[test]
    fn test_cost_of_one_million_sonnet_tokens() {
        let record = UsageRecord::new("claude-sonnet-4-20250514", 1_000_000, 1_000_000);
        assert_eq!(cost_nanos(&record), 18_000_000_000);
        assert_eq!(format_usd(cost_nanos(&record)), "18.000000");
    }

    #[test]
    fn test_format_usd_small_amounts() {
        // 1000 input tokens of gpt-4o = $0.0025
        let record = UsageRecord::new("gpt-4o", 1_000, 0);
        assert_eq!(format_usd(cost_nanos(&record)), "0.002500");
        assert_eq!(format_usd(0), "0.000000");
    }
}
