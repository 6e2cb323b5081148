//! Extracción de metadata y muestreo de datos de libros de cálculo OOXML.

use crate::error::ExtractError;
use crate::extract::ooxml::{self, CP_NS, DC_NS, DCTERMS_NS, PropertySpec};
use crate::record::MetadataRecord;
use crate::value::MetaValue;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use xmltree::{Element, XMLNode};
use zip::ZipArchive;

/// Cotas de muestreo por hoja: el costo de extracción no crece con el libro.
const ROW_SAMPLE_LIMIT: usize = 50;
const COLUMN_SAMPLE_LIMIT: usize = 10;
const QUOTED_ROW_LIMIT: usize = 20;

const WORKBOOK_PROPERTIES: [PropertySpec; 9] = [
    PropertySpec { key: "creator", local_name: "creator", namespace: Some(DC_NS) },
    PropertySpec { key: "last_modified_by", local_name: "lastModifiedBy", namespace: Some(CP_NS) },
    PropertySpec { key: "created", local_name: "created", namespace: Some(DCTERMS_NS) },
    PropertySpec { key: "modified", local_name: "modified", namespace: Some(DCTERMS_NS) },
    PropertySpec { key: "title", local_name: "title", namespace: Some(DC_NS) },
    PropertySpec { key: "subject", local_name: "subject", namespace: Some(DC_NS) },
    PropertySpec { key: "keywords", local_name: "keywords", namespace: Some(CP_NS) },
    PropertySpec { key: "category", local_name: "category", namespace: Some(CP_NS) },
    PropertySpec { key: "description", local_name: "description", namespace: Some(DC_NS) },
];

pub fn extract(path: &Path, record: &mut MetadataRecord) {
    if let Err(error) = read_workbook(path, record) {
        record.set_error(error.to_string());
    }
}

fn read_workbook(path: &Path, record: &mut MetadataRecord) -> Result<(), ExtractError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file)?;

    let mut properties = BTreeMap::new();
    if let Some(core) = ooxml::read_zip_xml(&mut archive, "docProps/core.xml") {
        properties = ooxml::read_properties(&core, &WORKBOOK_PROPERTIES);
    }

    let sheet_names = read_sheet_names(&mut archive);
    let shared_strings = read_shared_strings(&mut archive);

    let mut workbook_info = BTreeMap::new();
    workbook_info.insert(
        "sheet_names".to_string(),
        MetaValue::List(
            sheet_names
                .iter()
                .map(|name| MetaValue::Text(name.clone()))
                .collect(),
        ),
    );
    workbook_info.insert("sheet_count".to_string(), MetaValue::from(sheet_names.len()));
    workbook_info.insert("properties".to_string(), MetaValue::Map(properties));
    record.set("workbook_info", MetaValue::Map(workbook_info));

    let mut sheets = Vec::new();
    let mut text = Vec::new();
    for (index, name) in sheet_names.iter().enumerate() {
        // Las hojas estándar se numeran en orden de declaración; un libro con
        // partes renombradas simplemente no aporta muestra para esa hoja.
        let part = format!("xl/worksheets/sheet{}.xml", index + 1);
        let Some(sheet_xml) = ooxml::read_zip_xml(&mut archive, &part) else {
            continue;
        };
        let grid = read_grid(&sheet_xml, &shared_strings);

        let mut sheet_info = BTreeMap::new();
        sheet_info.insert("name".to_string(), MetaValue::Text(name.clone()));
        sheet_info.insert("max_row".to_string(), MetaValue::from(grid.max_row));
        sheet_info.insert("max_column".to_string(), MetaValue::from(grid.max_column));
        sheets.push(MetaValue::Map(sheet_info));

        text.push(format!("[Sheet: {name}]"));
        let mut rows = grid.rows.into_iter();
        if let Some(header) = rows.next()
            && !header.is_empty()
        {
            text.push(format!("Headers: {}", header.join(" | ")));
        }
        let samples: Vec<String> = rows
            .filter(|row| !row.is_empty())
            .take(QUOTED_ROW_LIMIT)
            .map(|row| row.join(" | "))
            .collect();
        if !samples.is_empty() {
            text.push("Data Sample:".to_string());
            text.extend(samples);
        }
    }
    record.set("sheets", MetaValue::List(sheets));
    record.set_text(text.join("\n"));
    Ok(())
}

fn read_sheet_names(archive: &mut ZipArchive<File>) -> Vec<String> {
    let Some(workbook) = ooxml::read_zip_xml(archive, "xl/workbook.xml") else {
        return Vec::new();
    };
    let mut names = Vec::new();
    for node in &workbook.children {
        let XMLNode::Element(sheets) = node else {
            continue;
        };
        if sheets.name != "sheets" {
            continue;
        }
        for entry in &sheets.children {
            if let XMLNode::Element(sheet) = entry
                && sheet.name == "sheet"
                && let Some(name) = sheet.attributes.get("name")
            {
                names.push(name.clone());
            }
        }
    }
    names
}

/// Tabla de cadenas compartidas; las celdas de tipo `s` la referencian.
fn read_shared_strings(archive: &mut ZipArchive<File>) -> Vec<String> {
    let Some(root) = ooxml::read_zip_xml(archive, "xl/sharedStrings.xml") else {
        return Vec::new();
    };
    root.children
        .iter()
        .filter_map(|node| match node {
            XMLNode::Element(item) if item.name == "si" => Some(ooxml::collect_text(item)),
            _ => None,
        })
        .collect()
}

struct SheetGrid {
    max_row: usize,
    max_column: usize,
    /// Primeras filas, cada una con sus primeras celdas no vacías.
    rows: Vec<Vec<String>>,
}

fn read_grid(root: &Element, shared_strings: &[String]) -> SheetGrid {
    let mut grid = SheetGrid {
        max_row: 0,
        max_column: 0,
        rows: Vec::new(),
    };

    let Some(sheet_data) = root.children.iter().find_map(|node| match node {
        XMLNode::Element(child) if child.name == "sheetData" => Some(child),
        _ => None,
    }) else {
        return grid;
    };

    for node in &sheet_data.children {
        let XMLNode::Element(row) = node else {
            continue;
        };
        if row.name != "row" {
            continue;
        }
        grid.max_row += 1;

        let mut cells = Vec::new();
        for cell_node in &row.children {
            let XMLNode::Element(cell) = cell_node else {
                continue;
            };
            if cell.name != "c" {
                continue;
            }
            let column = cell
                .attributes
                .get("r")
                .map(|reference| column_index(reference))
                .unwrap_or(cells.len());
            grid.max_column = grid.max_column.max(column + 1);
            if grid.rows.len() >= ROW_SAMPLE_LIMIT || column >= COLUMN_SAMPLE_LIMIT {
                continue;
            }
            if let Some(value) = cell_value(cell, shared_strings) {
                cells.push(value);
            }
        }
        if grid.rows.len() < ROW_SAMPLE_LIMIT {
            grid.rows.push(cells);
        }
    }
    grid
}

/// Valor textual de una celda según su atributo de tipo.
fn cell_value(cell: &Element, shared_strings: &[String]) -> Option<String> {
    let cell_type = cell.attributes.get("t").map(String::as_str).unwrap_or("n");
    match cell_type {
        "inlineStr" => {
            let text = ooxml::collect_text(cell);
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        "s" => {
            let raw = raw_cell_value(cell)?;
            let index: usize = raw.trim().parse().ok()?;
            shared_strings.get(index).map(|text| text.trim().to_string())
        }
        "b" => raw_cell_value(cell).map(|raw| {
            if raw.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()
        }),
        _ => raw_cell_value(cell).map(|raw| raw.trim().to_string()),
    }
}

fn raw_cell_value(cell: &Element) -> Option<String> {
    cell.children.iter().find_map(|node| match node {
        XMLNode::Element(child) if child.name == "v" => {
            let text = ooxml::collect_text(child);
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    })
}

/// Índice de columna (base cero) a partir de una referencia tipo `B3`.
fn column_index(reference: &str) -> usize {
    let mut index = 0_usize;
    for letter in reference.chars().take_while(char::is_ascii_alphabetic) {
        index = index * 26 + (letter.to_ascii_uppercase() as usize - 'A' as usize + 1);
    }
    index.saturating_sub(1)
}
