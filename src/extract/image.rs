//! Extracción de metadata de imágenes: info del raster, EXIF por dos
//! lectores independientes, coordenadas GPS y disparo del esteganálisis.

use crate::error::ExtractError;
use crate::extract::exif_raw;
use crate::record::MetadataRecord;
use crate::stego::{self, StegoThresholds};
use crate::value::MetaValue;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

pub fn extract(path: &Path, record: &mut MetadataRecord) {
    if let Err(error) = read_image(path, record) {
        record.set_error(error.to_string());
    }
}

fn read_image(path: &Path, record: &mut MetadataRecord) -> Result<(), ExtractError> {
    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let format = reader.format();
    let image = reader.decode()?;

    let mut info = BTreeMap::new();
    info.insert(
        "format".to_string(),
        format.map_or(MetaValue::Null, |format| {
            MetaValue::Text(format_label(format))
        }),
    );
    info.insert("mode".to_string(), MetaValue::Text(mode_label(&image)));
    info.insert("width".to_string(), MetaValue::from(image.width()));
    info.insert("height".to_string(), MetaValue::from(image.height()));
    info.insert(
        "aspect_ratio".to_string(),
        if image.height() == 0 {
            MetaValue::Null
        } else {
            let ratio = f64::from(image.width()) / f64::from(image.height());
            MetaValue::Float((ratio * 100.0).round() / 100.0)
        },
    );
    record.set("image_info", MetaValue::Map(info));

    // Lector EXIF principal: tags planos del IFD primario más GPS decodificado.
    let mut flat_tags = BTreeMap::new();
    if let Ok(exif) = read_primary_exif(path) {
        for field in exif.fields() {
            if field.ifd_num != exif::In::PRIMARY || field.tag.context() == exif::Context::Gps {
                continue;
            }
            flat_tags.insert(field.tag.to_string(), exif_value_to_meta(&field.value));
        }
        if let Some((latitude, longitude)) = gps_coordinates(&exif) {
            let mut gps = BTreeMap::new();
            gps.insert("latitude".to_string(), MetaValue::Float(latitude));
            gps.insert("longitude".to_string(), MetaValue::Float(longitude));
            gps.insert(
                "google_maps_url".to_string(),
                MetaValue::Text(format!(
                    "https://www.google.com/maps/search/?api=1&query={latitude},{longitude}"
                )),
            );
            record.set("gps_coordinates", MetaValue::Map(gps));
        }
    }

    // Lector secundario independiente, agrupado por espacio de nombres.
    let detailed = exif_raw::read(path).map(|raw| raw.groups).unwrap_or_default();

    let text = free_text_blob(&flat_tags, &detailed);
    if !text.is_empty() {
        record.set_text(text);
    }

    record.set(
        "exif",
        MetaValue::Map(flat_tags),
    );
    record.set(
        "exif_detailed",
        MetaValue::Map(
            detailed
                .into_iter()
                .map(|(group, tags)| (group, MetaValue::Map(tags)))
                .collect(),
        ),
    );

    if matches!(format, Some(ImageFormat::Jpeg | ImageFormat::Png)) {
        let thresholds = StegoThresholds::default();
        let report = stego::analyze(&image, &thresholds);
        if report.size_gated() {
            debug!(path = %path.display(), "detectores costosos omitidos por tamaño");
            record.set(
                "Analysis_Note",
                "Some analyses were skipped due to large image size",
            );
        }
        for (key, verdict) in report.entries() {
            record.set(key, verdict.to_string());
        }
    }
    Ok(())
}

fn read_primary_exif(path: &Path) -> Result<exif::Exif, exif::Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    exif::Reader::new().read_from_container(&mut reader)
}

fn format_label(format: ImageFormat) -> String {
    match format {
        ImageFormat::Png => "PNG".to_string(),
        ImageFormat::Jpeg => "JPEG".to_string(),
        ImageFormat::Gif => "GIF".to_string(),
        ImageFormat::Bmp => "BMP".to_string(),
        ImageFormat::Tiff => "TIFF".to_string(),
        ImageFormat::WebP => "WEBP".to_string(),
        other => other
            .extensions_str()
            .first()
            .map_or_else(|| format!("{other:?}"), |ext| ext.to_uppercase()),
    }
}

/// Modo de color en la nomenclatura corta habitual.
fn mode_label(image: &DynamicImage) -> String {
    use image::ColorType;
    match image.color() {
        ColorType::L8 => "L".to_string(),
        ColorType::La8 => "LA".to_string(),
        ColorType::Rgb8 => "RGB".to_string(),
        ColorType::Rgba8 => "RGBA".to_string(),
        ColorType::L16 => "L16".to_string(),
        ColorType::La16 => "LA16".to_string(),
        ColorType::Rgb16 => "RGB16".to_string(),
        ColorType::Rgba16 => "RGBA16".to_string(),
        other => format!("{other:?}"),
    }
}

/// Valores EXIF al árbol mixto; los racionales quedan como fracciones y el
/// normalizador los resuelve a flotante en la frontera de salida.
fn exif_value_to_meta(value: &exif::Value) -> MetaValue {
    match value {
        exif::Value::Ascii(lines) => MetaValue::Text(
            lines
                .iter()
                .map(|line| String::from_utf8_lossy(line).trim().to_string())
                .collect::<Vec<_>>()
                .join("; "),
        ),
        exif::Value::Byte(values) => int_list(values.iter().map(|v| i64::from(*v))),
        exif::Value::Short(values) => int_list(values.iter().map(|v| i64::from(*v))),
        exif::Value::Long(values) => int_list(values.iter().map(|v| i64::from(*v))),
        exif::Value::SByte(values) => int_list(values.iter().map(|v| i64::from(*v))),
        exif::Value::SShort(values) => int_list(values.iter().map(|v| i64::from(*v))),
        exif::Value::SLong(values) => int_list(values.iter().map(|v| i64::from(*v))),
        exif::Value::Rational(values) => rational_list(
            values
                .iter()
                .map(|r| (i64::from(r.num), i64::from(r.denom))),
        ),
        exif::Value::SRational(values) => rational_list(
            values
                .iter()
                .map(|r| (i64::from(r.num), i64::from(r.denom))),
        ),
        exif::Value::Float(values) => float_list(values.iter().map(|v| f64::from(*v))),
        exif::Value::Double(values) => float_list(values.iter().copied()),
        exif::Value::Undefined(bytes, _) => MetaValue::Text(undefined_to_text(bytes)),
        _ => MetaValue::Null,
    }
}

fn int_list(values: impl Iterator<Item = i64>) -> MetaValue {
    collapse(values.map(MetaValue::Int).collect())
}

fn float_list(values: impl Iterator<Item = f64>) -> MetaValue {
    collapse(values.map(MetaValue::Float).collect())
}

fn rational_list(values: impl Iterator<Item = (i64, i64)>) -> MetaValue {
    collapse(
        values
            .map(|(num, den)| MetaValue::rational(num, den))
            .collect(),
    )
}

fn collapse(mut values: Vec<MetaValue>) -> MetaValue {
    match values.len() {
        0 => MetaValue::Null,
        1 => values.remove(0),
        _ => MetaValue::List(values),
    }
}

/// `UserComment` y afines llevan un prefijo de charset de ocho bytes.
fn undefined_to_text(bytes: &[u8]) -> String {
    let payload = [b"ASCII\0\0\0".as_slice(), b"UNICODE\0", b"\0\0\0\0\0\0\0\0"]
        .iter()
        .find_map(|prefix| bytes.strip_prefix(*prefix))
        .unwrap_or(bytes);
    String::from_utf8_lossy(payload)
        .trim_matches(['\0', ' '])
        .to_string()
}

// === GPS ===

/// Grados decimales desde el triple grados-minutos-segundos.
pub(crate) fn dms_to_decimal(parts: [f64; 3]) -> f64 {
    parts[0] + parts[1] / 60.0 + parts[2] / 3600.0
}

/// Aplica el signo del hemisferio: las referencias S y W niegan el valor.
pub(crate) fn signed_coordinate(value: f64, reference: Option<char>, negative: char) -> f64 {
    if reference == Some(negative) { -value } else { value }
}

fn gps_coordinates(exif: &exif::Exif) -> Option<(f64, f64)> {
    let latitude = signed_coordinate(
        dms_to_decimal(dms_parts(exif, exif::Tag::GPSLatitude)?),
        hemisphere(exif, exif::Tag::GPSLatitudeRef),
        'S',
    );
    let longitude = signed_coordinate(
        dms_to_decimal(dms_parts(exif, exif::Tag::GPSLongitude)?),
        hemisphere(exif, exif::Tag::GPSLongitudeRef),
        'W',
    );
    (latitude.is_finite() && longitude.is_finite()).then_some((latitude, longitude))
}

fn dms_parts(exif: &exif::Exif, tag: exif::Tag) -> Option<[f64; 3]> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Rational(parts) if parts.len() >= 3 => Some([
            parts[0].to_f64(),
            parts[1].to_f64(),
            parts[2].to_f64(),
        ]),
        _ => None,
    }
}

fn hemisphere(exif: &exif::Exif, tag: exif::Tag) -> Option<char> {
    let field = exif.get_field(tag, exif::In::PRIMARY)?;
    match &field.value {
        exif::Value::Ascii(lines) => lines
            .first()
            .and_then(|line| line.first())
            .map(|byte| *byte as char),
        _ => None,
    }
}

// === Texto libre ===

/// Concatena los campos de texto descriptivos del EXIF en un solo bloque.
fn free_text_blob(
    flat_tags: &BTreeMap<String, MetaValue>,
    detailed: &BTreeMap<String, BTreeMap<String, MetaValue>>,
) -> String {
    let mut parts = Vec::new();
    for tags in detailed.values() {
        for (tag, value) in tags {
            if let Some(text) = value.as_text()
                && text.len() > 10
                && !text.starts_with('[')
            {
                parts.push(format!("{tag}: {text}"));
            }
        }
    }
    for (label, tag_name) in [
        ("Image Description", "ImageDescription"),
        ("User Comment", "UserComment"),
        ("Artist", "Artist"),
        ("Copyright", "Copyright"),
    ] {
        if let Some(text) = flat_tags.get(tag_name).and_then(MetaValue::as_text)
            && !text.is_empty()
        {
            parts.push(format!("{label}: {text}"));
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_metadata;
    use image::{GrayImage, Luma};
    use serde_json::Value;
    use tempfile::tempdir;

    #[test]
    fn dms_conversion_matches_known_coordinates() {
        let decimal = dms_to_decimal([2.0, 29.0, 40.4453]);
        assert!((decimal - 2.4946).abs() < 0.0005, "decimal = {decimal}");
    }

    #[test]
    fn southern_and_western_hemispheres_negate() {
        let decimal = dms_to_decimal([2.0, 29.0, 40.4453]);
        let south = signed_coordinate(decimal, Some('S'), 'S');
        assert!((south + 2.4946).abs() < 0.0005, "sur = {south}");
        assert_eq!(signed_coordinate(decimal, Some('N'), 'S'), decimal);
        assert_eq!(signed_coordinate(decimal, None, 'S'), decimal);
    }

    #[test]
    fn png_gets_raster_info_and_steganalysis_keys() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("muestra.png");
        let raster = GrayImage::from_fn(64, 32, |x, y| Luma([((x + y) % 256) as u8]));
        raster.save(&path).expect("no se pudo guardar la imagen");

        let record = extract_metadata(&path);
        assert_eq!(record.extracted_by, "ImageMetadataExtractor");
        assert!(record.error.is_none(), "error inesperado: {:?}", record.error);

        let json = record.to_json();
        assert_eq!(json["image_info"]["format"], Value::from("PNG"));
        assert_eq!(json["image_info"]["width"], Value::from(64));
        assert_eq!(json["image_info"]["aspect_ratio"], Value::from(2.0));
        for key in ["LSB_Analysis", "Chi_Square_Analysis", "DCT_Analysis"] {
            assert!(json.get(key).is_some(), "falta {key}");
        }
        assert!(json.get("Analysis_Note").is_none());
    }

    #[test]
    fn large_png_reports_gated_detectors() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("grande.png");
        let raster = GrayImage::from_fn(1200, 1200, |x, y| Luma([((x * 3 + y) % 256) as u8]));
        raster.save(&path).expect("no se pudo guardar la imagen");

        let record = extract_metadata(&path);
        let json = record.to_json();
        for key in [
            "DCT_Analysis",
            "Sample_Pair_Analysis",
            "RS_Analysis",
            "PVD_Analysis",
        ] {
            assert_eq!(json[key], Value::from("skipped for large image"), "{key}");
        }
        assert!(
            json["LSB_Analysis"] == Value::from("suspicious")
                || json["LSB_Analysis"] == Value::from("not suspicious")
        );
        assert_eq!(
            json["Analysis_Note"],
            Value::from("Some analyses were skipped due to large image size")
        );
    }

    #[test]
    fn tiff_skips_steganalysis() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("muestra.tiff");
        let raster = GrayImage::from_fn(16, 16, |x, _| Luma([(x * 16) as u8]));
        raster.save(&path).expect("no se pudo guardar la imagen");

        let record = extract_metadata(&path);
        let json = record.to_json();
        assert!(json.get("LSB_Analysis").is_none());
    }

    #[test]
    fn user_comment_charset_prefix_is_stripped() {
        assert_eq!(undefined_to_text(b"ASCII\0\0\0hola"), "hola");
        assert_eq!(undefined_to_text(b"sin prefijo"), "sin prefijo");
    }
}
