//! Extracción de metadata y texto de documentos PDF.

use crate::error::ExtractError;
use crate::record::MetadataRecord;
use crate::value::MetaValue;
use lopdf::{Document, Object};
use std::collections::BTreeMap;
use std::path::Path;

/// Tope de páginas cuyo texto se extrae; acota el costo en documentos largos.
const PAGE_LIMIT: usize = 10;

pub fn extract(path: &Path, record: &mut MetadataRecord) {
    if let Err(error) = read_pdf(path, record) {
        record.set_error(error.to_string());
    }
}

fn read_pdf(path: &Path, record: &mut MetadataRecord) -> Result<(), ExtractError> {
    let document = Document::load(path)?;
    let pages = document.get_pages();

    let mut info = BTreeMap::new();
    info.insert("num_pages".to_string(), MetaValue::from(pages.len()));
    info.insert(
        "is_encrypted".to_string(),
        MetaValue::Bool(document.is_encrypted()),
    );
    if let Ok(reference) = document.trailer.get(b"Info")
        && let Some(dictionary) = deref_dictionary(&document, reference)
    {
        for (key, object) in dictionary.iter() {
            let name = String::from_utf8_lossy(key).to_string();
            if let Some(value) = object_to_meta(&document, object) {
                info.insert(name, value);
            }
        }
    }
    record.set("pdf_info", MetaValue::Map(info));

    let mut chunks = Vec::new();
    for (index, page_number) in pages.keys().take(PAGE_LIMIT).enumerate() {
        match document.extract_text(&[*page_number]) {
            Ok(text) if !text.trim().is_empty() => {
                chunks.push(format!("[Page {}]\n{}", index + 1, text.trim_end()));
            }
            Ok(_) => {}
            Err(error) => {
                chunks.push(format!("[Error extracting page {}: {}]", index + 1, error));
            }
        }
    }
    record.set_text(chunks.join("\n\n"));
    Ok(())
}

fn deref_dictionary<'a>(
    document: &'a Document,
    object: &'a Object,
) -> Option<&'a lopdf::Dictionary> {
    match object {
        Object::Reference(reference) => document.get_dictionary(*reference).ok(),
        Object::Dictionary(dictionary) => Some(dictionary),
        _ => None,
    }
}

/// Valor de un objeto del diccionario Info; los campos no representables se
/// omiten en silencio.
fn object_to_meta(document: &Document, object: &Object) -> Option<MetaValue> {
    match object {
        Object::String(bytes, _) => Some(MetaValue::Text(decode_pdf_string(bytes))),
        Object::Name(name) => Some(MetaValue::Text(
            String::from_utf8_lossy(name).trim().to_string(),
        )),
        Object::Integer(number) => Some(MetaValue::Int(*number)),
        Object::Real(number) => Some(MetaValue::Float((*number).into())),
        Object::Boolean(flag) => Some(MetaValue::Bool(*flag)),
        Object::Reference(reference) => document
            .get_object(*reference)
            .ok()
            .and_then(|inner| object_to_meta(document, inner)),
        _ => None,
    }
}

/// Cadenas PDF: UTF-16BE con BOM o, en su defecto, bytes interpretados de
/// forma laxa.
fn decode_pdf_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return String::from_utf16_lossy(&units).trim().to_string();
    }
    String::from_utf8_lossy(bytes).trim().to_string()
}
