//! Incremental word-level Markov text generation library.
//!
//! This crate provides an n-gram generation system that keeps learning:
//! - Several orders trained side by side, low ones on the request path
//! - A SQLite transition ledger, compacted into a read-optimized cache
//! - A resumable per-order ingestion cursor and background processor
//! - Sampling with temperature, top-k and length-biased termination
//!
//! Tokenization and output filtering are seams (`Tokenizer`,
//! `OutputPolicy`) with simple defaults.

/// Sequence models, sampling and the generation orchestrator.
pub mod model;

/// Transition ledger, compacted cache, messages and ingestion cursor.
pub mod storage;

/// Background processor for the higher orders.
pub mod worker;

/// File and environment configuration.
pub mod config;

pub mod error;
pub mod tokenizer;
pub mod policy;

/// I/O utilities (file loading, path helpers).
///
/// Not exposed
pub(crate) mod io;

pub use config::{Config, Mode};
pub use error::{MarkovError, Result};
pub use model::generation_params::GenerationParams;
pub use model::generator::Generator;
pub use storage::TransitionStore;
pub use worker::BackgroundProcessor;
