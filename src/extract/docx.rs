//! Extracción de metadata y texto de documentos Word empaquetados en ZIP.

use crate::error::ExtractError;
use crate::extract::ooxml::{self, APP_NS, CP_NS, DC_NS, DCTERMS_NS, PropertySpec};
use crate::record::MetadataRecord;
use crate::value::MetaValue;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use xmltree::{Element, XMLNode};
use zip::ZipArchive;

/// Propiedades núcleo con las claves históricas del registro de documentos.
const CORE_PROPERTIES: [PropertySpec; 11] = [
    PropertySpec { key: "author", local_name: "creator", namespace: Some(DC_NS) },
    PropertySpec { key: "created", local_name: "created", namespace: Some(DCTERMS_NS) },
    PropertySpec { key: "last_modified_by", local_name: "lastModifiedBy", namespace: Some(CP_NS) },
    PropertySpec { key: "modified", local_name: "modified", namespace: Some(DCTERMS_NS) },
    PropertySpec { key: "title", local_name: "title", namespace: Some(DC_NS) },
    PropertySpec { key: "subject", local_name: "subject", namespace: Some(DC_NS) },
    PropertySpec { key: "keywords", local_name: "keywords", namespace: Some(CP_NS) },
    PropertySpec { key: "language", local_name: "language", namespace: Some(DC_NS) },
    PropertySpec { key: "category", local_name: "category", namespace: Some(CP_NS) },
    PropertySpec { key: "comments", local_name: "description", namespace: Some(DC_NS) },
    PropertySpec { key: "content_status", local_name: "contentStatus", namespace: Some(CP_NS) },
];

const APP_PROPERTIES: [PropertySpec; 4] = [
    PropertySpec { key: "application", local_name: "Application", namespace: Some(APP_NS) },
    PropertySpec { key: "company", local_name: "Company", namespace: Some(APP_NS) },
    PropertySpec { key: "pages", local_name: "Pages", namespace: Some(APP_NS) },
    PropertySpec { key: "words", local_name: "Words", namespace: Some(APP_NS) },
];

pub fn extract(path: &Path, record: &mut MetadataRecord) {
    if let Err(error) = read_document(path, record) {
        record.set_error(error.to_string());
    }
}

fn read_document(path: &Path, record: &mut MetadataRecord) -> Result<(), ExtractError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut info = BTreeMap::new();
    if let Some(core) = ooxml::read_zip_xml(&mut archive, "docProps/core.xml") {
        info.extend(ooxml::read_properties(&core, &CORE_PROPERTIES));
    }
    if let Some(app) = ooxml::read_zip_xml(&mut archive, "docProps/app.xml") {
        info.extend(ooxml::read_properties(&app, &APP_PROPERTIES));
    }

    let mut paragraphs = Vec::new();
    let mut paragraph_count = 0_usize;
    let mut section_count = 0_usize;
    if let Some(document) = ooxml::read_zip_xml(&mut archive, "word/document.xml") {
        walk_body(
            &document,
            &mut paragraphs,
            &mut paragraph_count,
            &mut section_count,
        );
    }
    info.insert("paragraphs".to_string(), MetaValue::from(paragraph_count));
    info.insert(
        "sections".to_string(),
        MetaValue::from(section_count.max(1)),
    );
    record.set("document_info", MetaValue::Map(info));
    record.set_text(paragraphs.join("\n"));
    Ok(())
}

/// Recorre el cuerpo recolectando texto de párrafos y contando secciones.
fn walk_body(
    element: &Element,
    paragraphs: &mut Vec<String>,
    paragraph_count: &mut usize,
    section_count: &mut usize,
) {
    for node in &element.children {
        let XMLNode::Element(child) = node else {
            continue;
        };
        match child.name.as_str() {
            "p" => {
                *paragraph_count += 1;
                let text = ooxml::collect_text(child);
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    paragraphs.push(trimmed.to_string());
                }
            }
            "sectPr" => *section_count += 1,
            _ => walk_body(child, paragraphs, paragraph_count, section_count),
        }
    }
}
