use rand::SeedableRng;
use rand::rngs::StdRng;

use rs_markov_core::model::sampler::{
	apply_length_bias, apply_temperature, apply_top_k, argmax, length_boost, sample_next, weighted_choice,
	Distribution,
};
use rs_markov_core::{GenerationParams, MarkovError};

fn dist(entries: &[(&str, f64)]) -> Distribution {
	entries.iter().map(|(t, p)| (t.to_string(), *p)).collect()
}

fn prob(distribution: &Distribution, token: &str) -> f64 {
	distribution
		.iter()
		.find(|(t, _)| t == token)
		.map(|(_, p)| *p)
		.unwrap_or(0.0)
}

#[test]
fn test_length_boost_midpoint() {
	// At 80% of the recommended length the sigmoid is exactly 0.5
	assert!((length_boost(8, 10) - 6.0).abs() < 1e-9);
	assert!(length_boost(0, 10) < length_boost(8, 10));
	assert!(length_boost(100, 10) < 11.0);
}

#[test]
fn test_length_bias_boosts_end() {
	let mut d = dist(&[("<END>", 0.5), ("a", 0.5)]);
	apply_length_bias(&mut d, 8, 10);
	assert!((prob(&d, "<END>") - 6.0 / 7.0).abs() < 1e-9);
	assert!((prob(&d, "a") - 1.0 / 7.0).abs() < 1e-9);
}

#[test]
fn test_length_bias_without_end_is_noop() {
	let mut d = dist(&[("a", 0.5), ("b", 0.5)]);
	apply_length_bias(&mut d, 50, 10);
	assert_eq!(d, dist(&[("a", 0.5), ("b", 0.5)]));
}

#[test]
fn test_top_k_keeps_most_probable() {
	let mut d = dist(&[("a", 0.2), ("b", 0.5), ("c", 0.3)]);
	apply_top_k(&mut d, 2);
	assert_eq!(d.len(), 2);
	assert!((prob(&d, "b") - 0.625).abs() < 1e-9);
	assert!((prob(&d, "c") - 0.375).abs() < 1e-9);
	assert_eq!(prob(&d, "a"), 0.0);
}

#[test]
fn test_top_k_ties_keep_earlier_token() {
	let mut d = dist(&[("a", 0.4), ("b", 0.4), ("c", 0.2)]);
	apply_top_k(&mut d, 1);
	assert_eq!(d, dist(&[("a", 1.0)]));
}

#[test]
fn test_top_k_larger_than_distribution_is_noop() {
	let mut d = dist(&[("a", 0.4), ("b", 0.6)]);
	apply_top_k(&mut d, 5);
	assert_eq!(d, dist(&[("a", 0.4), ("b", 0.6)]));
}

#[test]
fn test_temperature_sharpens() {
	let mut d = dist(&[("a", 0.25), ("b", 0.75)]);
	apply_temperature(&mut d, 0.5);
	// 0.25^2 = 0.0625, 0.75^2 = 0.5625, sum 0.625
	assert!((prob(&d, "a") - 0.1).abs() < 1e-9);
	assert!((prob(&d, "b") - 0.9).abs() < 1e-9);
}

#[test]
fn test_temperature_flattens() {
	let mut d = dist(&[("a", 0.1), ("b", 0.9)]);
	apply_temperature(&mut d, 2.0);
	assert!(prob(&d, "a") > 0.2);
	assert!(prob(&d, "b") < 0.8);
}

#[test]
fn test_tiny_temperature_keeps_a_distribution() {
	// p^1000 underflows to zero for every entry without rescaling
	let third = 1.0 / 3.0;
	let mut d = dist(&[("a", third), ("b", third), ("c", third)]);
	apply_temperature(&mut d, 0.001);
	for token in ["a", "b", "c"] {
		assert!((prob(&d, token) - third).abs() < 1e-9);
	}

	let params = GenerationParams::new(10, 0.001).unwrap();
	let mut rng = StdRng::seed_from_u64(4);
	assert!(sample_next(dist(&[("a", third), ("b", third), ("c", third)]), 0, &params, &mut rng).is_some());

	// Unequal weights collapse onto the most probable token
	let skewed = dist(&[("a", 0.25), ("b", 0.4), ("c", 0.35)]);
	for seed in 0..20 {
		let mut rng = StdRng::seed_from_u64(seed);
		assert_eq!(sample_next(skewed.clone(), 0, &params, &mut rng).as_deref(), Some("b"));
	}
}

#[test]
fn test_temperature_one_is_noop() {
	let mut d = dist(&[("a", 0.25), ("b", 0.75)]);
	apply_temperature(&mut d, 1.0);
	assert_eq!(d, dist(&[("a", 0.25), ("b", 0.75)]));
}

#[test]
fn test_argmax_first_wins_ties() {
	assert_eq!(argmax(&dist(&[("a", 0.3), ("b", 0.3), ("c", 0.1)])), Some("a"));
	assert_eq!(argmax(&dist(&[("a", 0.1), ("b", 0.6), ("c", 0.3)])), Some("b"));
	assert_eq!(argmax(&Distribution::new()), None);
}

#[test]
fn test_weighted_choice_skips_zero_weight() {
	let d = dist(&[("a", 0.0), ("b", 1.0)]);
	let mut rng = StdRng::seed_from_u64(3);
	for _ in 0..100 {
		assert_eq!(weighted_choice(&d, &mut rng), Some("b"));
	}
	assert_eq!(weighted_choice(&Distribution::new(), &mut rng), None);
}

#[test]
fn test_weighted_choice_frequencies() {
	let d = dist(&[("a", 0.25), ("b", 0.75)]);
	let mut rng = StdRng::seed_from_u64(42);
	let draws = 20_000;
	let b = (0..draws)
		.filter(|_| weighted_choice(&d, &mut rng) == Some("b"))
		.count();
	let ratio = b as f64 / draws as f64;
	assert!((ratio - 0.75).abs() < 0.03, "ratio was {ratio}");
}

#[test]
fn test_zero_temperature_is_deterministic() {
	let params = GenerationParams::new(10, 0.0).unwrap();
	let d = dist(&[("a", 0.2), ("b", 0.5), ("c", 0.3)]);
	for seed in 0..20 {
		let mut rng = StdRng::seed_from_u64(seed);
		assert_eq!(sample_next(d.clone(), 0, &params, &mut rng).as_deref(), Some("b"));
	}
}

#[test]
fn test_top_k_one_equals_argmax() {
	let mut params = GenerationParams::new(10, 1.3).unwrap();
	params.set_top_k(Some(1)).unwrap();
	let d = dist(&[("a", 0.2), ("b", 0.3), ("c", 0.5)]);
	let mut rng = StdRng::seed_from_u64(11);
	for _ in 0..50 {
		assert_eq!(sample_next(d.clone(), 0, &params, &mut rng).as_deref(), Some("c"));
	}
}

#[test]
fn test_length_bias_runs_before_top_k() {
	// END is the least likely token until the bias kicks in
	let mut params = GenerationParams::new(10, 0.0).unwrap();
	params.set_top_k(Some(1)).unwrap();
	params.set_recommended_length(Some(10)).unwrap();
	let d = dist(&[("<END>", 0.05), ("a", 0.4), ("b", 0.4)]);
	let mut rng = StdRng::seed_from_u64(5);

	assert_eq!(sample_next(d.clone(), 0, &params, &mut rng).as_deref(), Some("a"));
	assert_eq!(sample_next(d, 30, &params, &mut rng).as_deref(), Some("<END>"));
}

#[test]
fn test_sample_empty_distribution() {
	let params = GenerationParams::default();
	let mut rng = StdRng::seed_from_u64(0);
	assert_eq!(sample_next(Distribution::new(), 0, &params, &mut rng), None);
}

#[test]
fn test_generation_params_validation() {
	let params = GenerationParams::default();
	assert_eq!(params.max_tokens, 500);
	assert_eq!(params.temperature(), 1.0);
	assert_eq!(params.top_k(), None);
	assert_eq!(params.recommended_length(), None);

	assert!(matches!(GenerationParams::new(10, f32::NAN), Err(MarkovError::InvalidArgument(_))));
	assert!(GenerationParams::new(10, f32::INFINITY).is_err());

	let mut params = GenerationParams::new(10, -1.0).unwrap();
	assert!(params.set_top_k(Some(0)).is_err());
	assert!(params.set_recommended_length(Some(0)).is_err());
	params.set_top_k(Some(3)).unwrap();
	params.set_top_k(None).unwrap();
	assert_eq!(params.top_k(), None);
}
