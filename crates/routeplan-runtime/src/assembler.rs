//! Boundary to the external pipeline execution engine.

use async_trait::async_trait;
use routeplan_core::PipelineEntry;
use thiserror::Error;

/// Errors reported by a pipeline assembler.
#[derive(Error, Debug)]
pub enum AssemblyError {
    #[error("Virtual model '{0}' has no routable entries")]
    NoEntries(String),

    #[error("Assembly of '{virtual_model}' failed: {message}")]
    Failed {
        virtual_model: String,
        message: String,
    },
}

/// Builds an executable pipeline for one virtual model.
///
/// Implemented by the execution engine. The route manager caches whatever it
/// returns, keyed by the fingerprint of `entries`.
#[async_trait]
pub trait PipelineAssembler: Send + Sync {
    /// The engine's pipeline handle.
    type Pipeline: Clone + Send + Sync + 'static;

    /// Assemble from the virtual model's entries, in table order.
    async fn assemble(
        &self,
        virtual_model_id: &str,
        entries: &[PipelineEntry],
    ) -> Result<Self::Pipeline, AssemblyError>;
}
