//! Cache-token accounting.
//!
//! Backends behind OpenRouter-style routers report the total billed cost but
//! rarely say how many prompt tokens were served from (or written to) the
//! prompt cache. The counts are inferred here by comparing the billed cost to
//! what the same tokens would have cost uncached.

use crate::pricing::ModelPricing;
use crate::translate::anthropic_types::Usage;
use crate::translate::openai_types::ChatUsage;

const FALLBACK_READ_DISCOUNT: f64 = 0.9;
const FALLBACK_WRITE_EXTRA: f64 = 0.25;
/// Cost differences within this many input tokens' worth are treated as pricing noise.
const NOISE_FLOOR_TOKENS: f64 = 10.0;
/// Cache-write residuals below this fraction of one input token are ignored.
const WRITE_RESIDUAL_FLOOR_TOKENS: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheEstimateInput {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Total billed cost in USD.
    pub cost: f64,
    /// Cache-read count reported by the backend, if any.
    pub reported_cache_read: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheTokens {
    pub read: u64,
    pub write: u64,
}

impl CacheTokens {
    pub fn is_zero(&self) -> bool {
        self.read == 0 && self.write == 0
    }
}

/// Infer cache-read and cache-write token counts from the billed cost.
///
/// Never fails: any input that makes the inference impossible (no prompt
/// tokens, no cost, unknown or zero input price) yields zero for both. One
/// cost figure cannot separate reads from writes on its own, so without a
/// reported read count only one of the two is ever attributed, and results
/// outside `[0, prompt_tokens]` are rejected rather than clamped.
pub fn estimate_cache_tokens(
    input: &CacheEstimateInput,
    pricing: Option<&ModelPricing>,
) -> CacheTokens {
    let Some(pricing) = pricing else {
        return CacheTokens::default();
    };
    if input.prompt_tokens == 0 || input.cost <= 0.0 || !input.cost.is_finite() {
        return CacheTokens::default();
    }

    let input_price = pricing.input_per_token();
    if input_price <= 0.0 {
        return CacheTokens::default();
    }

    let prompt = input.prompt_tokens as f64;
    let normal_cost = prompt * input_price + input.completion_tokens as f64 * pricing.output_per_token();
    let (read_discount, write_extra) = cache_fractions(pricing);

    if let Some(hint) = input.reported_cache_read.filter(|r| *r > 0) {
        let read = hint.min(input.prompt_tokens);
        let expected = normal_cost - read as f64 * input_price * read_discount;
        let residual = input.cost - expected;

        let write = if residual < input_price * WRITE_RESIDUAL_FLOOR_TOKENS || write_extra <= 0.0 {
            0
        } else {
            let tokens = (residual / (input_price * write_extra)).round();
            let ceiling = (input.prompt_tokens - read) as f64;
            tokens.clamp(0.0, ceiling) as u64
        };
        return CacheTokens { read, write };
    }

    let cost_diff = input.cost - normal_cost;
    if cost_diff.abs() <= input_price * NOISE_FLOOR_TOKENS {
        return CacheTokens::default();
    }

    if cost_diff > 0.0 {
        match tokens_within(cost_diff, input_price * write_extra, prompt) {
            Some(write) => CacheTokens { read: 0, write },
            None => CacheTokens::default(),
        }
    } else {
        match tokens_within(-cost_diff, input_price * read_discount, prompt) {
            Some(read) => CacheTokens { read, write: 0 },
            None => CacheTokens::default(),
        }
    }
}

/// `(read_discount, write_extra)` as fractions of the input price.
fn cache_fractions(pricing: &ModelPricing) -> (f64, f64) {
    if pricing.input <= 0.0 {
        return (FALLBACK_READ_DISCOUNT, FALLBACK_WRITE_EXTRA);
    }
    let input = pricing.input_per_token();
    (
        1.0 - pricing.cache_read_per_token() / input,
        pricing.cache_write_per_token() / input - 1.0,
    )
}

fn tokens_within(amount: f64, per_token: f64, max: f64) -> Option<u64> {
    if per_token <= 0.0 {
        return None;
    }
    let tokens = (amount / per_token).round();
    (tokens >= 0.0 && tokens <= max).then_some(tokens as u64)
}

/// Merge backend-reported cache counts with the cost-based estimate.
///
/// A reported read count is ground truth. The estimate only fills in what the
/// backend left out and never replaces reported numbers with zeros.
pub fn reconcile(reported: CacheTokens, has_read_hint: bool, estimate: CacheTokens) -> CacheTokens {
    let write = if estimate.write > 0 {
        estimate.write
    } else {
        reported.write
    };
    if has_read_hint {
        return CacheTokens {
            read: reported.read,
            write,
        };
    }
    if estimate.is_zero() {
        return reported;
    }
    CacheTokens {
        read: estimate.read,
        write,
    }
}

/// Running usage totals for one response, fed from backend usage objects.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageTally {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cache_read: Option<u64>,
    pub cache_write: Option<u64>,
    pub cost: Option<f64>,
}

impl UsageTally {
    pub fn from_chat_usage(usage: &ChatUsage) -> Self {
        let mut tally = Self::default();
        tally.record(usage);
        tally
    }

    /// Fold a (possibly partial) usage report into the totals.
    ///
    /// Backends report cumulative figures, so later values replace earlier ones.
    pub fn record(&mut self, usage: &ChatUsage) {
        if usage.prompt_tokens > 0 {
            self.prompt_tokens = usage.prompt_tokens;
        }
        if usage.completion_tokens > 0 {
            self.completion_tokens = usage.completion_tokens;
        }
        if let Some(read) = usage.reported_cache_read() {
            self.cache_read = Some(read);
        }
        if let Some(write) = usage.reported_cache_write() {
            self.cache_write = Some(write);
        }
        if let Some(cost) = usage.cost {
            self.cost = Some(cost);
        }
    }

    /// Final Anthropic usage, with cache counts estimated from cost when one was billed.
    pub fn finalize(&self, pricing: Option<&ModelPricing>) -> Usage {
        let reported = CacheTokens {
            read: self.cache_read.unwrap_or(0),
            write: self.cache_write.unwrap_or(0),
        };
        let has_read_hint = reported.read > 0;

        let cache = match self.cost {
            Some(cost) if cost > 0.0 => {
                let estimate = estimate_cache_tokens(
                    &CacheEstimateInput {
                        prompt_tokens: self.prompt_tokens,
                        completion_tokens: self.completion_tokens,
                        cost,
                        reported_cache_read: self.cache_read,
                    },
                    pricing,
                );
                reconcile(reported, has_read_hint, estimate)
            }
            _ => reported,
        };

        Usage {
            input_tokens: self
                .prompt_tokens
                .saturating_sub(cache.read)
                .saturating_sub(cache.write),
            output_tokens: self.completion_tokens,
            cache_creation_input_tokens: cache.write,
            cache_read_input_tokens: cache.read,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sonnet() -> ModelPricing {
        ModelPricing::new(3.0, 15.0, 0.3, 3.75)
    }

    fn normal_cost(prompt: u64, completion: u64, p: &ModelPricing) -> f64 {
        prompt as f64 * p.input_per_token() + completion as f64 * p.output_per_token()
    }

    fn input(prompt: u64, completion: u64, cost: f64, hint: Option<u64>) -> CacheEstimateInput {
        CacheEstimateInput {
            prompt_tokens: prompt,
            completion_tokens: completion,
            cost,
            reported_cache_read: hint,
        }
    }

    #[test]
    fn test_uncached_cost_yields_zero() {
        let p = sonnet();
        let cost = normal_cost(1000, 100, &p);
        let est = estimate_cache_tokens(&input(1000, 100, cost, None), Some(&p));
        assert_eq!(est, CacheTokens::default());
    }

    #[test]
    fn test_cache_read_inferred_from_savings() {
        let p = sonnet();
        let savings = 500.0 * p.input_per_token() * 0.9;
        let cost = normal_cost(1000, 100, &p) - savings;
        let est = estimate_cache_tokens(&input(1000, 100, cost, None), Some(&p));
        assert_eq!(est, CacheTokens { read: 500, write: 0 });
    }

    #[test]
    fn test_cache_write_inferred_from_premium() {
        let p = sonnet();
        let premium = 800.0 * p.input_per_token() * 0.25;
        let cost = normal_cost(2000, 50, &p) + premium;
        let est = estimate_cache_tokens(&input(2000, 50, cost, None), Some(&p));
        assert_eq!(est, CacheTokens { read: 0, write: 800 });
    }

    #[test]
    fn test_implausible_savings_rejected() {
        let p = sonnet();
        // Savings larger than caching every prompt token could explain.
        let cost = normal_cost(100, 0, &p) * 0.01;
        let est = estimate_cache_tokens(&input(100, 0, cost, None), Some(&p));
        assert_eq!(est, CacheTokens::default());
    }

    #[test]
    fn test_hint_is_ground_truth_and_residual_becomes_writes() {
        let p = sonnet();
        let read = 300;
        let write = 200;
        let cost = normal_cost(1000, 10, &p) - read as f64 * p.input_per_token() * 0.9
            + write as f64 * p.input_per_token() * 0.25;
        let est = estimate_cache_tokens(&input(1000, 10, cost, Some(read)), Some(&p));
        assert_eq!(est, CacheTokens { read: 300, write: 200 });
    }

    #[test]
    fn test_hint_with_noise_residual_has_no_writes() {
        let p = sonnet();
        let cost = normal_cost(1000, 10, &p) - 300.0 * p.input_per_token() * 0.9;
        let est = estimate_cache_tokens(&input(1000, 10, cost, Some(300)), Some(&p));
        assert_eq!(est, CacheTokens { read: 300, write: 0 });
    }

    #[test]
    fn test_hint_writes_clamped_to_remaining_prompt() {
        let p = sonnet();
        let cost = normal_cost(1000, 0, &p) * 10.0;
        let est = estimate_cache_tokens(&input(1000, 0, cost, Some(900)), Some(&p));
        assert_eq!(est, CacheTokens { read: 900, write: 100 });
    }

    #[test]
    fn test_impossible_inputs_yield_zero() {
        let p = sonnet();
        assert!(estimate_cache_tokens(&input(0, 10, 1.0, None), Some(&p)).is_zero());
        assert!(estimate_cache_tokens(&input(10, 10, 0.0, None), Some(&p)).is_zero());
        assert!(estimate_cache_tokens(&input(10, 10, 1.0, None), None).is_zero());
        let free = ModelPricing::new(0.0, 0.0, 0.0, 0.0);
        assert!(estimate_cache_tokens(&input(10, 10, 1.0, None), Some(&free)).is_zero());
    }

    #[test]
    fn test_reconcile_keeps_reported_when_estimate_empty() {
        let reported = CacheTokens { read: 0, write: 42 };
        assert_eq!(reconcile(reported, false, CacheTokens::default()), reported);
        let est = CacheTokens { read: 12, write: 0 };
        assert_eq!(reconcile(CacheTokens::default(), false, est), est);
        assert_eq!(
            reconcile(CacheTokens { read: 5, write: 7 }, true, CacheTokens { read: 5, write: 0 }),
            CacheTokens { read: 5, write: 7 }
        );
    }

    #[test]
    fn test_cache_fractions() {
        let (read_discount, write_extra) = cache_fractions(&sonnet());
        assert!((read_discount - 0.9).abs() < 1e-9);
        assert!((write_extra - 0.25).abs() < 1e-9);

        let unpriced = ModelPricing::new(0.0, 1.0, 0.0, 0.0);
        assert_eq!(
            cache_fractions(&unpriced),
            (FALLBACK_READ_DISCOUNT, FALLBACK_WRITE_EXTRA)
        );
    }

    #[test]
    fn test_read_estimate_keeps_reported_writes() {
        let reported = CacheTokens { read: 0, write: 300 };
        let est = CacheTokens { read: 120, write: 0 };
        assert_eq!(
            reconcile(reported, false, est),
            CacheTokens { read: 120, write: 300 }
        );
    }

    #[test]
    fn test_finalize_never_negative_input() {
        let tally = UsageTally {
            prompt_tokens: 10,
            completion_tokens: 2,
            cache_read: Some(8),
            cache_write: Some(8),
            cost: None,
        };
        let usage = tally.finalize(None);
        assert_eq!(usage.input_tokens, 0);
        assert_eq!(usage.cache_read_input_tokens, 8);
    }

    #[test]
    fn test_finalize_estimates_from_cost() {
        let p = sonnet();
        let cost = normal_cost(1000, 100, &p) - 500.0 * p.input_per_token() * 0.9;
        let tally = UsageTally {
            prompt_tokens: 1000,
            completion_tokens: 100,
            cache_read: None,
            cache_write: None,
            cost: Some(cost),
        };
        let usage = tally.finalize(Some(&p));
        assert_eq!(usage.input_tokens, 500);
        assert_eq!(usage.cache_read_input_tokens, 500);
        assert_eq!(usage.cache_creation_input_tokens, 0);
        assert_eq!(usage.output_tokens, 100);
    }
}
