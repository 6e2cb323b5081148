//! Registro canónico producido por los extractores.

use crate::value::{MetaValue, normalize};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Límite de la vista previa de texto extraído, en caracteres.
pub const TEXT_PREVIEW_LIMIT: usize = 5000;

/// Resultado de una extracción: etiqueta del extractor, campos anidados por
/// categoría, texto extraído con su vista previa, duración y error opcional.
///
/// Se construye fresco en cada llamada y el motor no lo vuelve a tocar
/// después de devolverlo.
#[derive(Clone, Debug)]
pub struct MetadataRecord {
    pub extracted_by: String,
    pub fields: BTreeMap<String, MetaValue>,
    pub extracted_text: Option<String>,
    pub text_preview: Option<String>,
    /// Milisegundos medidos desde un reloj monotónico.
    pub extraction_duration: u64,
    pub error: Option<String>,
}

impl MetadataRecord {
    pub fn new(extracted_by: impl Into<String>) -> Self {
        Self {
            extracted_by: extracted_by.into(),
            fields: BTreeMap::new(),
            extracted_text: None,
            text_preview: None,
            extraction_duration: 0,
            error: None,
        }
    }

    /// Inserta un campo de primer nivel del registro.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<MetaValue>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Registra el texto completo y su vista previa recortada.
    pub fn set_text(&mut self, text: String) {
        self.text_preview = Some(text.chars().take(TEXT_PREVIEW_LIMIT).collect());
        self.extracted_text = Some(text);
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Árbol JSON canónico del registro. La normalización de valores mixtos
    /// ocurre aquí, una única vez.
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(
            "extracted_by".to_string(),
            Value::String(self.extracted_by.clone()),
        );
        for (key, value) in &self.fields {
            object.insert(key.clone(), normalize(value));
        }
        if let Some(text) = &self.extracted_text {
            object.insert("extracted_text".to_string(), Value::String(text.clone()));
        }
        if let Some(preview) = &self.text_preview {
            object.insert("text_preview".to_string(), Value::String(preview.clone()));
        }
        object.insert(
            "extraction_duration".to_string(),
            Value::Number(Number::from(self.extraction_duration)),
        );
        if let Some(error) = &self.error {
            object.insert("error".to_string(), Value::String(error.clone()));
        }
        Value::Object(object)
    }
}

impl Serialize for MetadataRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_through_normalizer() {
        let mut record = MetadataRecord::new("ImageMetadataExtractor");
        record.set(
            "image_info",
            MetaValue::Map(BTreeMap::from([(
                "exposure".to_string(),
                MetaValue::rational(1, 4),
            )])),
        );
        record.extraction_duration = 12;

        let json = record.to_json();
        assert_eq!(json["extracted_by"], Value::from("ImageMetadataExtractor"));
        assert_eq!(json["image_info"]["exposure"], Value::from(0.25));
        assert_eq!(json["extraction_duration"], Value::from(12));
        assert!(json.get("error").is_none());
    }

    #[test]
    fn preview_is_capped_at_limit() {
        let mut record = MetadataRecord::new("TextMetadataExtractor");
        record.set_text("x".repeat(TEXT_PREVIEW_LIMIT + 100));
        assert_eq!(
            record.text_preview.as_ref().map(|p| p.chars().count()),
            Some(TEXT_PREVIEW_LIMIT)
        );
        assert_eq!(
            record.extracted_text.as_ref().map(String::len),
            Some(TEXT_PREVIEW_LIMIT + 100)
        );
    }
}
