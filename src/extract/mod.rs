//! Despacho de extractores por categoría y punto de entrada del motor.
//!
//! Agregar un formato nuevo es agregar una variante en [`FileCategory`] y una
//! fila en la tabla de despacho; ningún error de extracción cruza
//! [`extract_metadata`].

mod basic;
mod docx;
mod exif_raw;
mod image;
mod media;
mod ooxml;
mod pdf;
mod sheet;
mod text;

use crate::classify::{FileCategory, classify};
use crate::record::MetadataRecord;
use std::path::Path;
use std::time::Instant;
use tracing::debug;

type ExtractorFn = fn(&Path, &mut MetadataRecord);

/// Tabla cerrada categoría → (etiqueta `extracted_by`, extractor).
///
/// Las etiquetas clasifican los registros almacenados río abajo; conservan
/// los nombres históricos.
fn dispatch(category: FileCategory) -> (&'static str, ExtractorFn) {
    match category {
        FileCategory::Image => ("ImageMetadataExtractor", image::extract),
        FileCategory::Pdf => ("PDFMetadataExtractor", pdf::extract),
        FileCategory::Docx => ("DocxMetadataExtractor", docx::extract),
        FileCategory::Spreadsheet => ("ExcelMetadataExtractor", sheet::extract),
        FileCategory::Text => ("TextMetadataExtractor", text::extract),
        FileCategory::Audio => ("AudioMetadataExtractor", media::extract_audio),
        FileCategory::Video => ("VideoMetadataExtractor", media::extract_video),
        FileCategory::Unknown => ("BasicFileInfo", basic::extract),
    }
}

/// Extrae la metadata de un archivo ya persistido.
///
/// Llamada síncrona y autocontenida: sin estado compartido ni paralelismo
/// interno, de modo que llamadas concurrentes sobre archivos distintos no
/// requieren coordinación. Cualquier fallo queda embebido en el registro.
pub fn extract_metadata(path: &Path) -> MetadataRecord {
    let started = Instant::now();
    let category = classify(path);
    let (tag, extractor) = dispatch(category);
    debug!(?category, extractor = tag, path = %path.display(), "archivo clasificado");

    let mut record = MetadataRecord::new(tag);
    extractor(path, &mut record);
    record.extraction_duration = started.elapsed().as_millis() as u64;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// Archivos truncados o corruptos de cada categoría: el registro vuelve
    /// igual, con etiqueta poblada y sin pánico.
    #[test]
    fn corrupt_files_still_produce_tagged_records() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let samples: [(&str, &[u8]); 7] = [
            ("roto.png", &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0]),
            ("roto.pdf", b"%PDF-1.4 truncado"),
            ("roto.docx", b"PK\x03\x04basura"),
            ("roto.xlsx", b"PK\x03\x04basura"),
            ("roto.mp3", b"ID3\x04\x00\x00\x00\x00\x00"),
            ("roto.mp4", &[0, 0, 0, 8, b'f', b't', b'y', b'p']),
            ("roto.zzz", &[0xde, 0xad, 0xbe, 0xef]),
        ];

        for (name, bytes) in samples {
            let path = dir.path().join(name);
            fs::write(&path, bytes).expect("no se pudo escribir la muestra");
            let record = extract_metadata(&path);
            assert!(
                !record.extracted_by.is_empty(),
                "{name}: extracted_by vacío"
            );
            let json = record.to_json();
            assert!(json.get("extraction_duration").is_some(), "{name}");
        }
    }

    #[test]
    fn unknown_files_get_basic_info() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("datos.zzz");
        fs::write(&path, [1, 2, 3, 4, 5]).expect("no se pudo escribir la muestra");

        let record = extract_metadata(&path);
        assert_eq!(record.extracted_by, "BasicFileInfo");
        let json = record.to_json();
        assert_eq!(json["file_info"]["file_size"], serde_json::Value::from(5));
        assert_eq!(json["file_info"]["extension"], serde_json::Value::from("zzz"));
    }

    #[test]
    fn text_files_report_counts_and_preview() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("notas.txt");
        fs::write(&path, "hola mundo\nsegunda línea\n").expect("no se pudo escribir");

        let record = extract_metadata(&path);
        assert_eq!(record.extracted_by, "TextMetadataExtractor");
        let json = record.to_json();
        assert_eq!(json["text_info"]["line_count"], serde_json::Value::from(2));
        assert_eq!(json["text_info"]["word_count"], serde_json::Value::from(4));
        assert!(
            json["text_preview"]
                .as_str()
                .is_some_and(|preview| preview.starts_with("hola mundo"))
        );
    }
}
