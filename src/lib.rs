//! Motor de extracción de metadata y esteganálisis de archivos.
//!
//! Dado un archivo ya persistido, clasifica su formato, despacha al
//! extractor correspondiente y devuelve un registro anidado totalmente
//! serializable a JSON. Para imágenes JPEG/PNG ejecuta además seis
//! detectores estadísticos de posible esteganografía. Ningún error cruza el
//! punto de entrada: todo fallo queda embebido en el registro.

pub mod classify;
pub mod error;
pub mod extract;
pub mod record;
pub mod stego;
pub mod value;

pub use classify::{FileCategory, classify};
pub use error::ExtractError;
pub use extract::extract_metadata;
pub use record::MetadataRecord;
pub use stego::{StegoReport, StegoThresholds, Verdict};
pub use value::{MetaValue, normalize};
