//! Errores internos del motor de extracción.
//!
//! Ningún error cruza el punto de entrada público: el despachador convierte
//! cualquier `ExtractError` en el campo `error` del registro devuelto.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("image: {0}")]
    Image(#[from] image::ImageError),

    #[error("pdf: {0}")]
    Pdf(#[from] lopdf::Error),

    #[error("archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("xml: {0}")]
    Xml(#[from] xmltree::ParseError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl ExtractError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
