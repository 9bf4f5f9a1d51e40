//! Next-token sampling over a normalized distribution.
//!
//! The pipeline runs in a fixed order: length bias on the raw distribution,
//! then top-k, then temperature, then a weighted draw. Length bias comes
//! first so it decides whether `<END>` survives top-k truncation.

use std::cmp::Ordering;

use rand::Rng;

use super::generation_params::GenerationParams;
use super::sequence_model::END_TOKEN;

/// Token probabilities, in the stable order of the underlying state.
pub type Distribution = Vec<(String, f64)>;

/// Percentage of the recommended length at which `<END>` starts being boosted.
const LENGTH_BIAS_OFFSET: f64 = 0.8;
const LENGTH_BIAS_STEEPNESS: f64 = 0.2;
const LENGTH_BIAS_SCALE: f64 = 10.0;

fn renormalize(distribution: &mut Distribution) {
	let total: f64 = distribution.iter().map(|(_, p)| p).sum();
	if total > 0.0 {
		for (_, p) in distribution.iter_mut() {
			*p /= total;
		}
	}
}

/// Multiplier applied to `<END>` after `current_length` emitted tokens.
///
/// `1 + 10 * sigmoid(0.2 * (current_length - 0.8 * recommended_length))`:
/// about 6 at 80% of the target, approaching 11 well beyond it.
pub fn length_boost(current_length: usize, recommended_length: usize) -> f64 {
	let distance = current_length as f64 - LENGTH_BIAS_OFFSET * recommended_length as f64;
	let sigmoid = 1.0 / (1.0 + (-LENGTH_BIAS_STEEPNESS * distance).exp());
	1.0 + LENGTH_BIAS_SCALE * sigmoid
}

/// Boosts `<END>` as the output approaches `recommended_length`, then
/// renormalizes.
///
/// Leaves the distribution untouched if `<END>` is absent or the
/// recommended length is 0.
pub fn apply_length_bias(distribution: &mut Distribution, current_length: usize, recommended_length: usize) {
	if recommended_length == 0 {
		return;
	}
	let Some(end) = distribution.iter_mut().find(|(token, _)| token == END_TOKEN) else {
		return;
	};
	end.1 *= length_boost(current_length, recommended_length);
	renormalize(distribution);
}

/// Keeps the `k` most probable tokens and renormalizes over them.
///
/// The sort is stable: among equal probabilities the earlier token wins.
pub fn apply_top_k(distribution: &mut Distribution, k: usize) {
	if k >= distribution.len() {
		return;
	}
	distribution.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
	distribution.truncate(k);
	renormalize(distribution);
}

/// Reweights each probability as `p^(1/temperature)` and renormalizes.
///
/// Only meaningful for a positive temperature; 1.0 is a no-op. Zero
/// probabilities are dropped.
///
/// Probabilities are divided by the largest one before the power, so the
/// most probable token keeps weight 1 and a tiny temperature cannot
/// underflow the whole distribution to zero.
pub fn apply_temperature(distribution: &mut Distribution, temperature: f32) {
	if temperature <= 0.0 || (temperature - 1.0).abs() < f32::EPSILON {
		return;
	}
	distribution.retain(|(_, p)| *p > 0.0);
	let max = distribution.iter().map(|(_, p)| *p).fold(0.0, f64::max);
	if max <= 0.0 {
		return;
	}

	let exponent = 1.0 / temperature as f64;
	let reweighted: Vec<f64> = distribution.iter().map(|(_, p)| (p / max).powf(exponent)).collect();
	let total: f64 = reweighted.iter().sum();
	if !total.is_finite() || total <= 0.0 {
		return;
	}
	for ((_, p), weight) in distribution.iter_mut().zip(reweighted) {
		*p = weight / total;
	}
}

/// Most probable token; ties go to the earliest entry.
pub fn argmax(distribution: &Distribution) -> Option<&str> {
	let mut best: Option<&(String, f64)> = None;
	for entry in distribution {
		match best {
			Some(current) if entry.1 <= current.1 => {}
			_ => best = Some(entry),
		}
	}
	best.map(|(token, _)| token.as_str())
}

/// Weighted random choice.
///
/// Performs a cumulative subtraction over the entries; returns `None` on an
/// empty distribution.
pub fn weighted_choice<'a, R: Rng + ?Sized>(distribution: &'a Distribution, rng: &mut R) -> Option<&'a str> {
	let total: f64 = distribution.iter().map(|(_, p)| p).sum();
	if total <= 0.0 {
		return None;
	}

	let mut r = rng.random::<f64>() * total;
	let mut fallback: Option<&str> = None;
	for (token, p) in distribution {
		if r < *p {
			return Some(token.as_str());
		}
		r -= p;
		fallback = Some(token.as_str());
	}

	// Floating point leftovers land on the last token.
	fallback
}

/// Full sampling step for one position of the output.
///
/// Returns `None` only for an empty distribution.
pub fn sample_next<R: Rng + ?Sized>(
	mut distribution: Distribution,
	current_length: usize,
	params: &GenerationParams,
	rng: &mut R,
) -> Option<String> {
	if distribution.is_empty() {
		return None;
	}

	if let Some(recommended_length) = params.recommended_length() {
		apply_length_bias(&mut distribution, current_length, recommended_length);
	}

	if let Some(k) = params.top_k() {
		apply_top_k(&mut distribution, k);
	}

	if params.temperature() <= 0.0 {
		return argmax(&distribution).map(str::to_owned);
	}
	apply_temperature(&mut distribution, params.temperature());

	weighted_choice(&distribution, rng).map(str::to_owned)
}
