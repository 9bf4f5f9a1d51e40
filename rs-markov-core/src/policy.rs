/// Post-generation output filter.
///
/// Receives the raw generated text and returns the text to hand back to the
/// caller. Called exactly once per generation.
pub trait OutputPolicy: Send + Sync {
	fn apply(&self, text: &str) -> String;
}

/// Returns the generated text unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThrough;

impl OutputPolicy for PassThrough {
	fn apply(&self, text: &str) -> String {
		text.to_owned()
	}
}
