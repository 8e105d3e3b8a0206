//! Analyst implementations for remote model providers.
//!
//! - `GeminiAnalyst` - Google Gemini via the `gemini-client` crate

pub mod gemini;

pub use gemini::GeminiAnalyst;
