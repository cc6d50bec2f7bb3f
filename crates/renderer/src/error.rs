//! Renderer errors.

use thiserror::Error;

use tracer_resources::ResourceError;
use tracer_rhi::RhiError;
use tracer_scene::{GeometryId, TextureId};

/// Errors raised by renderer jobs.
///
/// Job failures are logged and skip the affected work for the frame; they
/// never abort the render loop.
#[derive(Error, Debug)]
pub enum RendererError {
    /// A GPU operation failed.
    #[error(transparent)]
    Rhi(#[from] RhiError),

    /// Imported data could not be packed for upload.
    #[error("Invalid resource data: {0}")]
    Resource(#[from] ResourceError),

    /// A geometry job ran before the scene received the geometry's data.
    #[error("No data for {0}")]
    MissingGeometryData(GeometryId),

    #[error("No data for {0}")]
    MissingTextureData(TextureId),
}

/// Result type alias for renderer jobs.
pub type RendererResult<T> = Result<T, RendererError>;
