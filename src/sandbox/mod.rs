//! Execution sandbox for the hosted JavaScript engine.
//!
//! The engine ships as a WASI preview1 module. It reads source text on
//! stdin, evaluates it, and prints the JSON-encoded result on stdout.
//!
//! Lifecycle:
//!
//! 1. [`loader::load`] reads the image with a hard size cap
//! 2. [`Sandbox::initialize`] compiles and pre-links it once
//! 3. [`Evaluator::evaluate`] stamps out a fresh instance per call, bounded
//!    by a page ceiling and a deadline, and classifies what it produced
//!
//! Instances share nothing but the read-only compiled module.

pub mod evaluator;
pub mod host;
mod instance;
pub mod loader;
pub mod outcome;

pub use evaluator::{EvalContext, Evaluator, ResourceLimits};
pub use host::{HostError, Sandbox, SandboxOptions, TeardownError};
pub use loader::{load, BytecodeImage, LoadError};
pub use outcome::{EvaluationError, EvaluationResult};
