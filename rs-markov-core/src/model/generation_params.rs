use crate::error::{MarkovError, Result};

/// Request-level generation parameters.
///
/// `GenerationParams` is built once per request and handed to
/// `SequenceModel::generate`. Every field is validated on assignment so the
/// sampler never has to guess a default.
///
/// # Invariants
/// - `temperature` is finite (`<= 0.0` means greedy decoding)
/// - `top_k`, when set, is at least 1
/// - `recommended_length`, when set, is at least 1
#[derive(Clone, Debug, PartialEq)]
pub struct GenerationParams {
	/// Hard cap on emitted tokens.
	pub max_tokens: usize,

	/// Sampling temperature (0 = deterministic, 1 = raw counts, > 1 = flatter).
	temperature: f32,

	/// Restrict sampling to the `k` most probable tokens.
	top_k: Option<usize>,

	/// Target length; `<END>` is boosted as the output approaches it.
	recommended_length: Option<usize>,
}

impl Default for GenerationParams {
	fn default() -> Self {
		Self {
			max_tokens: 500,
			temperature: 1.0,
			top_k: None,
			recommended_length: None,
		}
	}
}

impl GenerationParams {
	/// Creates parameters with the given budget and temperature.
	///
	/// # Errors
	/// Returns an error if `temperature` is not finite.
	pub fn new(max_tokens: usize, temperature: f32) -> Result<Self> {
		let mut params = Self { max_tokens, ..Self::default() };
		params.set_temperature(temperature)?;
		Ok(params)
	}

	pub fn temperature(&self) -> f32 {
		self.temperature
	}

	pub fn top_k(&self) -> Option<usize> {
		self.top_k
	}

	pub fn recommended_length(&self) -> Option<usize> {
		self.recommended_length
	}

	/// Sets the temperature.
	///
	/// # Errors
	/// Returns an error if the value is NaN or infinite.
	pub fn set_temperature(&mut self, temperature: f32) -> Result<()> {
		if !temperature.is_finite() {
			return Err(MarkovError::InvalidArgument(format!(
				"temperature must be finite, got {temperature}"
			)));
		}
		self.temperature = temperature;
		Ok(())
	}

	/// Sets or clears the top-k restriction.
	///
	/// # Errors
	/// Returns an error for `Some(0)`.
	pub fn set_top_k(&mut self, top_k: Option<usize>) -> Result<()> {
		if top_k == Some(0) {
			return Err(MarkovError::InvalidArgument("top_k must be at least 1".to_owned()));
		}
		self.top_k = top_k;
		Ok(())
	}

	/// Sets or clears the recommended length.
	///
	/// # Errors
	/// Returns an error for `Some(0)`.
	pub fn set_recommended_length(&mut self, recommended_length: Option<usize>) -> Result<()> {
		if recommended_length == Some(0) {
			return Err(MarkovError::InvalidArgument(
				"recommended_length must be at least 1".to_owned(),
			));
		}
		self.recommended_length = recommended_length;
		Ok(())
	}
}
