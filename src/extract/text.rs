//! Extracción de metadata de texto plano, con sondeo de dialecto CSV.

use crate::classify;
use crate::error::ExtractError;
use crate::record::MetadataRecord;
use crate::value::MetaValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub fn extract(path: &Path, record: &mut MetadataRecord) {
    if let Err(error) = read_text(path, record) {
        record.set_error(error.to_string());
    }
}

fn read_text(path: &Path, record: &mut MetadataRecord) -> Result<(), ExtractError> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes).to_string();

    let mut info = BTreeMap::new();
    info.insert(
        "line_count".to_string(),
        MetaValue::from(content.lines().count()),
    );
    info.insert(
        "word_count".to_string(),
        MetaValue::from(content.split_whitespace().count()),
    );
    info.insert(
        "character_count".to_string(),
        MetaValue::from(content.chars().count()),
    );
    info.insert("file_size_bytes".to_string(), MetaValue::from(bytes.len()));

    let (bom, bom_len) = detect_bom(&bytes);
    info.insert(
        "encoding".to_string(),
        MetaValue::Text(match &bom {
            Some(label) => label.clone(),
            None if std::str::from_utf8(&bytes).is_ok() => "UTF-8".to_string(),
            None => "ISO-8859-1 (heuristic)".to_string(),
        }),
    );
    info.insert("bom".to_string(), MetaValue::from(bom));
    info.insert(
        "line_endings".to_string(),
        MetaValue::Text(line_ending_census(&bytes[bom_len..])),
    );
    record.set("text_info", MetaValue::Map(info));

    if classify::extension_of(path).as_deref() == Some("csv") {
        record.set("csv_info", MetaValue::Map(csv_dialect(&content)));
    }

    record.set_text(content);
    Ok(())
}

fn detect_bom(bytes: &[u8]) -> (Option<String>, usize) {
    if bytes.starts_with(b"\xEF\xBB\xBF") {
        return (Some("UTF-8 BOM".to_string()), 3);
    }
    if bytes.starts_with(b"\x00\x00\xFE\xFF") {
        return (Some("UTF-32 BE".to_string()), 4);
    }
    if bytes.starts_with(b"\xFF\xFE\x00\x00") {
        return (Some("UTF-32 LE".to_string()), 4);
    }
    if bytes.starts_with(b"\xFF\xFE") {
        return (Some("UTF-16 LE".to_string()), 2);
    }
    if bytes.starts_with(b"\xFE\xFF") {
        return (Some("UTF-16 BE".to_string()), 2);
    }
    (None, 0)
}

fn line_ending_census(bytes: &[u8]) -> String {
    let mut lf = 0_usize;
    let mut crlf = 0_usize;
    let mut cr = 0_usize;
    let mut previous = 0_u8;
    for &byte in bytes {
        if byte == b'\n' {
            if previous == b'\r' {
                crlf += 1;
            } else {
                lf += 1;
            }
        } else if previous == b'\r' {
            cr += 1;
        }
        previous = byte;
    }
    if previous == b'\r' {
        cr += 1;
    }
    format!("LF:{lf}, CRLF:{crlf}, CR:{cr}")
}

// === CSV ===

/// Sondeo de dialecto: delimitador por puntaje, comilla presente, heurística
/// de encabezado y conteo de filas y columnas.
fn csv_dialect(content: &str) -> BTreeMap<String, MetaValue> {
    let mut info = BTreeMap::new();
    let delimiter = detect_delimiter(content);
    info.insert(
        "delimiter".to_string(),
        MetaValue::Text((delimiter as char).to_string()),
    );
    info.insert(
        "quote".to_string(),
        MetaValue::Text(if content.contains('"') { "\"" } else { "none" }.to_string()),
    );

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = reader.records();
    let first = records.next().and_then(Result::ok);
    let second = records.next().and_then(Result::ok);
    let has_header = match (&first, &second) {
        (Some(first), Some(second)) => looks_like_header(first, second),
        _ => false,
    };

    let mut columns = first.as_ref().map_or(0, csv::StringRecord::len);
    let mut rows = [&first, &second].iter().filter(|r| r.is_some()).count();
    let mut inconsistent = 0_usize;
    for row in records.flatten() {
        rows += 1;
        if columns == 0 {
            columns = row.len();
        } else if row.len() != columns {
            inconsistent += 1;
        }
    }
    if has_header {
        rows = rows.saturating_sub(1);
        if let Some(header) = &first {
            info.insert(
                "columns".to_string(),
                MetaValue::List(
                    header
                        .iter()
                        .map(|field| MetaValue::Text(field.trim().to_string()))
                        .collect(),
                ),
            );
        }
    }
    info.insert("has_header".to_string(), MetaValue::Bool(has_header));
    info.insert("row_count".to_string(), MetaValue::from(rows));
    info.insert("column_count".to_string(), MetaValue::from(columns));
    if inconsistent > 0 {
        info.insert(
            "inconsistent_rows".to_string(),
            MetaValue::from(inconsistent),
        );
    }
    info
}

fn detect_delimiter(content: &str) -> u8 {
    let sample: Vec<&str> = content.lines().take(20).collect();
    let mut best = b',';
    let mut best_score = 0_usize;
    for candidate in [b',', b';', b'\t', b'|'] {
        let score = sample
            .iter()
            .map(|line| line.bytes().filter(|byte| *byte == candidate).count())
            .sum();
        if score > best_score {
            best_score = score;
            best = candidate;
        }
    }
    best
}

/// La primera fila parece encabezado si tiene menos campos numéricos que la
/// segunda.
fn looks_like_header(first: &csv::StringRecord, second: &csv::StringRecord) -> bool {
    let numeric = |record: &csv::StringRecord| {
        record
            .iter()
            .filter(|field| field.trim().parse::<f64>().is_ok())
            .count()
    };
    numeric(first) < numeric(second)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_metadata;
    use serde_json::Value;
    use tempfile::tempdir;

    #[test]
    fn csv_dialect_is_probed() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("ventas.csv");
        std::fs::write(&path, "producto;monto\nteclado;149.9\nmouse;59.9\n")
            .expect("no se pudo escribir");

        let record = extract_metadata(&path);
        let json = record.to_json();
        assert_eq!(json["csv_info"]["delimiter"], Value::from(";"));
        assert_eq!(json["csv_info"]["has_header"], Value::from(true));
        assert_eq!(json["csv_info"]["row_count"], Value::from(2));
        assert_eq!(json["csv_info"]["column_count"], Value::from(2));
    }

    #[test]
    fn bom_and_line_endings_are_reported() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("notas.txt");
        std::fs::write(&path, b"\xEF\xBB\xBFuno\r\ndos\n").expect("no se pudo escribir");

        let record = extract_metadata(&path);
        let json = record.to_json();
        assert_eq!(json["text_info"]["encoding"], Value::from("UTF-8 BOM"));
        assert_eq!(
            json["text_info"]["line_endings"],
            Value::from("LF:1, CRLF:1, CR:0")
        );
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("latin1.txt");
        std::fs::write(&path, b"a\xFFb\n").expect("no se pudo escribir");

        let record = extract_metadata(&path);
        assert!(record.error.is_none());
        let json = record.to_json();
        assert_eq!(
            json["text_info"]["encoding"],
            Value::from("ISO-8859-1 (heuristic)")
        );
        assert!(
            json["extracted_text"]
                .as_str()
                .is_some_and(|text| text.contains('\u{FFFD}'))
        );
    }
}
