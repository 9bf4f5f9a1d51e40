//! Word-level n-gram models and generation logic.
//!
//! - Token windows and their counts (`SequenceModel`, `TransitionDeltas`)
//! - Sampling of the next token (`sampler`, `GenerationParams`)
//! - A high-level orchestrator over every order (`Generator`)

/// Request-path orchestrator: ingestion, import, seed selection and
/// generation with order backoff.
pub mod generator;

/// Fixed-order word model (`2 <= order <= 10`).
///
/// Handles sentinel padding, training, hydration from the store and
/// token-by-token generation.
pub mod sequence_model;

/// Per-call transition count accumulators and the training window bound.
pub mod deltas;

/// Distribution transforms: length bias, top-k, temperature, weighted draw.
pub mod sampler;

/// Validated per-request generation settings.
pub mod generation_params;

/// Internal representation of a single state (prefix window).
///
/// Tracks outgoing token counts. Not exposed publicly.
mod state;

/// Parallel delta building for bulk imports.
mod corpus;
