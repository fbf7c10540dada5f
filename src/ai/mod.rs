//! AI text service client.
//!
//! * [`TextGenerator`]: async trait implemented by generator backends.
//! * [`GenerativeApiClient`]: `reqwest` client for a `generateContent`
//!   endpoint.
//! * [`BlockingGenerator`]: drives a generator on a private current-thread
//!   runtime so the synchronous session controller can call it.
//! * [`AiError`]: error variants for AI requests.

pub mod client;

use std::sync::Arc;

pub use client::{AiError, GenerativeApiClient, TextGenerator};

#[cfg(test)]
pub use client::MockGenerator;

/// Synchronous front for an async [`TextGenerator`].
///
/// Must not be called from inside another tokio runtime.
pub struct BlockingGenerator {
    inner: Arc<dyn TextGenerator>,
    runtime: tokio::runtime::Runtime,
}

impl BlockingGenerator {
    pub fn new(inner: Arc<dyn TextGenerator>) -> Result<Self, AiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| AiError::Runtime(e.to_string()))?;
        Ok(Self { inner, runtime })
    }

    pub fn generate(&self, prompt: &str) -> Result<String, AiError> {
        self.runtime.block_on(self.inner.generate(prompt))
    }
}
