//! Image encoding: page image on disk → base64 data-URI content part.
//!
//! Chat-completion APIs accept images inline as `data:<mime>;base64,<…>`
//! URIs. The MIME type is taken from the file extension; rasterizers write
//! PNG, but callers may hand in JPEG or WebP pages through a custom
//! [`crate::pipeline::render::Rasterize`].

use crate::error::PipelineError;
use crate::pipeline::llm::ContentPart;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// Build a `data:` URI from raw bytes and a file name used for the MIME type.
pub fn data_uri(bytes: &[u8], path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or(mime_guess::mime::IMAGE_PNG);
    format!("data:{};base64,{}", mime.essence_str(), STANDARD.encode(bytes))
}

/// Read a page image and wrap it as an `image_url` content part.
pub async fn encode_image_file(path: &Path) -> Result<ContentPart, PipelineError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::io(path, e))?;
    let uri = data_uri(&bytes, path);
    debug!("Encoded {} → {} bytes data URI", path.display(), uri.len());
    Ok(ContentPart::image_url(uri))
}
