// Pricing calculations for upstream LLM usage
//
// Prices are per model family, matched by case-insensitive substring of the
// model name. The table is ordered most specific first, so "claude-opus-4"
// hits the opus-4 row before the generic claude-opus one.

/// Pricing for a model family, USD per million tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

const fn price(input_per_million: f64, output_per_million: f64) -> ModelPricing {
    ModelPricing {
        input_per_million,
        output_per_million,
    }
}

/// Family substring → price. First match wins.
const PRICE_TABLE: &[(&str, ModelPricing)] = &[
    ("opus-4", price(15.00, 75.00)),
    ("sonnet-4", price(3.00, 15.00)),
    ("haiku-3-5", price(0.80, 4.00)),
    ("claude-haiku", price(0.25, 1.25)),
    ("claude-opus", price(15.00, 75.00)),
    ("claude-sonnet", price(3.00, 15.00)),
    ("gpt-4o", price(2.50, 10.00)),
    ("gpt-4", price(30.00, 60.00)),
    ("gpt-3.5", price(0.50, 1.50)),
];

/// Mid-tier fallback for models we do not know
pub const DEFAULT_PRICING: ModelPricing = price(3.00, 15.00);

/// Get pricing for a model name
/// Returns the default (mid-tier) pricing for unknown models
pub fn get_pricing(model: &str) -> ModelPricing {
    let model = model.to_lowercase();
    PRICE_TABLE
        .iter()
        .find(|(family, _)| model.contains(family))
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_PRICING)
}

/// Calculate cost in USD for the given token usage
pub fn calculate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
    let pricing = get_pricing(model);

    let input_cost = input_tokens as f64 * pricing.input_per_million;
    let output_cost = output_tokens as f64 * pricing.output_per_million;

    (input_cost + output_cost) / 1_000_000.0
}
