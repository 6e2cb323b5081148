//! Utilidades compartidas para paquetes OOXML (docx y xlsx).

use crate::value::MetaValue;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use xmltree::{Element, XMLNode};
use zip::ZipArchive;

pub const DC_NS: &str = "http://purl.org/dc/elements/1.1/";
pub const CP_NS: &str = "http://schemas.openxmlformats.org/package/2006/metadata/core-properties";
pub const DCTERMS_NS: &str = "http://purl.org/dc/terms/";
pub const APP_NS: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/extended-properties";

/// Ubica una propiedad del paquete y la clave con la que se reporta.
pub struct PropertySpec {
    pub key: &'static str,
    pub local_name: &'static str,
    pub namespace: Option<&'static str>,
}

/// Lee y parsea una entrada XML del paquete; `None` si falta o está rota.
pub fn read_zip_xml(archive: &mut ZipArchive<File>, name: &str) -> Option<Element> {
    let mut entry = archive.by_name(name).ok()?;
    let mut contents = String::new();
    entry.read_to_string(&mut contents).ok()?;
    Element::parse(contents.as_bytes()).ok()
}

/// Extrae las propiedades declaradas de un `docProps/*.xml` ya parseado.
///
/// Los valores que parsean como entero se reportan numéricos (conteos de
/// páginas o palabras); el resto queda como texto.
pub fn read_properties(
    root: &Element,
    specs: &[PropertySpec],
) -> BTreeMap<String, MetaValue> {
    let mut properties = BTreeMap::new();
    for spec in specs {
        if let Some(text) = find_child_text(root, spec.local_name, spec.namespace) {
            let value = text
                .parse::<i64>()
                .map_or_else(|_| MetaValue::Text(text), MetaValue::Int);
            properties.insert(spec.key.to_string(), value);
        }
    }
    properties
}

/// Texto del primer hijo directo con ese nombre local y espacio de nombres.
pub fn find_child_text(
    root: &Element,
    local_name: &str,
    namespace: Option<&str>,
) -> Option<String> {
    root.children.iter().find_map(|node| match node {
        XMLNode::Element(child)
            if child.name == local_name && namespace_matches(child, namespace) =>
        {
            let text = collect_text(child);
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        _ => None,
    })
}

fn namespace_matches(element: &Element, namespace: Option<&str>) -> bool {
    match namespace {
        Some(expected) => element.namespace.as_deref() == Some(expected),
        None => true,
    }
}

/// Concatena los nodos de texto descendientes de un elemento.
pub fn collect_text(element: &Element) -> String {
    let mut text = String::new();
    push_text(element, &mut text);
    text
}

fn push_text(element: &Element, text: &mut String) {
    for node in &element.children {
        match node {
            XMLNode::Text(chunk) => text.push_str(chunk),
            XMLNode::Element(child) => push_text(child, text),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_namespaced_children_and_numeric_values() {
        let xml = r#"<?xml version="1.0"?>
<cp:coreProperties xmlns:cp="http://schemas.openxmlformats.org/package/2006/metadata/core-properties"
                   xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:creator>Ana</dc:creator>
    <cp:revision>7</cp:revision>
</cp:coreProperties>"#;
        let root = Element::parse(xml.as_bytes()).expect("xml de prueba inválido");

        let specs = [
            PropertySpec {
                key: "author",
                local_name: "creator",
                namespace: Some(DC_NS),
            },
            PropertySpec {
                key: "revision",
                local_name: "revision",
                namespace: Some(CP_NS),
            },
            PropertySpec {
                key: "title",
                local_name: "title",
                namespace: Some(DC_NS),
            },
        ];
        let properties = read_properties(&root, &specs);

        assert_eq!(properties.get("author"), Some(&MetaValue::Text("Ana".into())));
        assert_eq!(properties.get("revision"), Some(&MetaValue::Int(7)));
        assert!(!properties.contains_key("title"));
    }
}
