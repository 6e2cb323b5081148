//! Lector EXIF secundario e independiente del principal.
//!
//! Localiza el bloque TIFF embebido (segmento APP1 en JPEG, chunk `eXIf` en
//! PNG, o el archivo TIFF completo) y recorre los IFD a mano sobre un
//! conjunto curado de tags. Aporta redundancia cuando el lector principal
//! rechaza el contenedor, y agrupa por espacio de nombres. El IFD de GPS se
//! omite aquí: las coordenadas salen decodificadas del lector principal.

use crate::value::MetaValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Tags agrupados por espacio de nombres (`Image`, `EXIF`, `Thumbnail`).
pub struct RawExif {
    pub groups: BTreeMap<String, BTreeMap<String, MetaValue>>,
}

/// Lee el bloque EXIF del archivo, si existe y es parseable.
pub fn read(path: &Path) -> Option<RawExif> {
    let data = fs::read(path).ok()?;
    let tiff = locate_tiff(&data)?;
    parse_tiff(tiff)
}

// === Localización del bloque TIFF ===

fn locate_tiff(data: &[u8]) -> Option<&[u8]> {
    if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        return Some(data);
    }
    if data.starts_with(&[0xFF, 0xD8]) {
        return jpeg_app1(data);
    }
    if data.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return png_exif_chunk(data);
    }
    None
}

/// Recorre los segmentos JPEG hasta el APP1 con firma `Exif\0\0`.
fn jpeg_app1(data: &[u8]) -> Option<&[u8]> {
    let mut offset = 2;
    loop {
        if *data.get(offset)? != 0xFF {
            return None;
        }
        let marker = *data.get(offset + 1)?;
        match marker {
            // Marcadores sin carga útil.
            0xD8 | 0x01 | 0xD0..=0xD7 => {
                offset += 2;
                continue;
            }
            // Inicio del flujo comprimido: ya no habrá APP1.
            0xDA => return None,
            _ => {}
        }
        let length = u16::from_be_bytes([*data.get(offset + 2)?, *data.get(offset + 3)?]) as usize;
        if length < 2 {
            return None;
        }
        let payload = data.get(offset + 4..offset + 2 + length)?;
        if marker == 0xE1
            && let Some(tiff) = payload.strip_prefix(b"Exif\0\0")
        {
            return Some(tiff);
        }
        offset += 2 + length;
    }
}

/// Recorre los chunks PNG hasta `eXIf`.
fn png_exif_chunk(data: &[u8]) -> Option<&[u8]> {
    let mut offset = 8;
    while offset + 8 <= data.len() {
        let length = u32::from_be_bytes(data.get(offset..offset + 4)?.try_into().ok()?) as usize;
        let kind = data.get(offset + 4..offset + 8)?;
        let payload = data.get(offset + 8..offset + 8 + length)?;
        if kind == b"eXIf" {
            return Some(payload);
        }
        if kind == b"IEND" {
            return None;
        }
        offset += 12 + length;
    }
    None
}

// === Recorrido de IFDs ===

struct TiffReader<'a> {
    data: &'a [u8],
    little_endian: bool,
}

impl<'a> TiffReader<'a> {
    fn u16_at(&self, offset: usize) -> Option<u16> {
        let bytes: [u8; 2] = self.data.get(offset..offset + 2)?.try_into().ok()?;
        Some(if self.little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    }

    fn u32_at(&self, offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(offset..offset + 4)?.try_into().ok()?;
        Some(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    fn i32_at(&self, offset: usize) -> Option<i32> {
        self.u32_at(offset).map(|value| value as i32)
    }
}

fn parse_tiff(tiff: &[u8]) -> Option<RawExif> {
    let little_endian = match tiff.get(..2)? {
        b"II" => true,
        b"MM" => false,
        _ => return None,
    };
    let reader = TiffReader {
        data: tiff,
        little_endian,
    };
    if reader.u16_at(2)? != 42 {
        return None;
    }

    let mut groups = BTreeMap::new();
    let ifd0_offset = reader.u32_at(4)? as usize;
    let (ifd0, next_offset) = parse_ifd(&reader, ifd0_offset, image_tag_name);
    let mut exif_pointer = None;
    let mut entries = BTreeMap::new();
    for (tag, name, value) in ifd0 {
        match tag {
            0x8769 => {
                if let MetaValue::Int(offset) = value {
                    exif_pointer = Some(offset as usize);
                }
            }
            // El IFD de GPS no se recorre en este lector.
            0x8825 => {}
            _ => {
                entries.insert(name, value);
            }
        }
    }
    if !entries.is_empty() {
        groups.insert("Image".to_string(), entries);
    }

    if let Some(offset) = exif_pointer {
        let (fields, _) = parse_ifd(&reader, offset, photo_tag_name);
        let entries: BTreeMap<String, MetaValue> = fields
            .into_iter()
            .map(|(_, name, value)| (name, value))
            .collect();
        if !entries.is_empty() {
            groups.insert("EXIF".to_string(), entries);
        }
    }

    if let Some(offset) = next_offset {
        let (fields, _) = parse_ifd(&reader, offset, image_tag_name);
        let entries: BTreeMap<String, MetaValue> = fields
            .into_iter()
            .filter(|(tag, _, _)| !matches!(tag, 0x8769 | 0x8825))
            .map(|(_, name, value)| (name, value))
            .collect();
        if !entries.is_empty() {
            groups.insert("Thumbnail".to_string(), entries);
        }
    }

    (!groups.is_empty()).then_some(RawExif { groups })
}

/// Devuelve las entradas de un IFD y el offset del siguiente, si lo hay.
fn parse_ifd(
    reader: &TiffReader<'_>,
    offset: usize,
    tag_name: fn(u16) -> Option<&'static str>,
) -> (Vec<(u16, String, MetaValue)>, Option<usize>) {
    let mut fields = Vec::new();
    let Some(count) = reader.u16_at(offset) else {
        return (fields, None);
    };
    for index in 0..count as usize {
        let entry = offset + 2 + index * 12;
        let Some(tag) = reader.u16_at(entry) else {
            break;
        };
        let Some(kind) = reader.u16_at(entry + 2) else {
            break;
        };
        let Some(value_count) = reader.u32_at(entry + 4) else {
            break;
        };
        if let Some(value) = read_entry_value(reader, entry + 8, kind, value_count as usize) {
            let name = tag_name(tag)
                .map(str::to_string)
                .unwrap_or_else(|| format!("Tag 0x{tag:04x}"));
            fields.push((tag, name, value));
        }
    }
    let next = reader
        .u32_at(offset + 2 + count as usize * 12)
        .filter(|next| *next != 0)
        .map(|next| next as usize);
    (fields, next)
}

fn type_size(kind: u16) -> Option<usize> {
    match kind {
        1 | 2 | 6 | 7 => Some(1),
        3 | 8 => Some(2),
        4 | 9 | 11 => Some(4),
        5 | 10 | 12 => Some(8),
        _ => None,
    }
}

fn read_entry_value(
    reader: &TiffReader<'_>,
    value_slot: usize,
    kind: u16,
    count: usize,
) -> Option<MetaValue> {
    let size = type_size(kind)?.checked_mul(count)?;
    // Valores de más de cuatro bytes viven fuera de la entrada.
    let start = if size <= 4 {
        value_slot
    } else {
        reader.u32_at(value_slot)? as usize
    };
    reader.data.get(start..start + size)?;

    let value = match kind {
        // ASCII con terminador nulo.
        2 => MetaValue::Text(
            String::from_utf8_lossy(&reader.data[start..start + count])
                .trim_matches('\0')
                .trim()
                .to_string(),
        ),
        // UNDEFINED se reporta como texto laxo.
        7 => MetaValue::Text(
            String::from_utf8_lossy(&reader.data[start..start + count])
                .trim_matches('\0')
                .trim()
                .to_string(),
        ),
        1 | 6 => collapse(
            (0..count)
                .map(|i| MetaValue::Int(i64::from(reader.data[start + i])))
                .collect(),
        ),
        3 => collapse(
            (0..count)
                .filter_map(|i| reader.u16_at(start + i * 2))
                .map(|v| MetaValue::Int(i64::from(v)))
                .collect(),
        ),
        8 => collapse(
            (0..count)
                .filter_map(|i| reader.u16_at(start + i * 2))
                .map(|v| MetaValue::Int(i64::from(v as i16)))
                .collect(),
        ),
        4 => collapse(
            (0..count)
                .filter_map(|i| reader.u32_at(start + i * 4))
                .map(|v| MetaValue::Int(i64::from(v)))
                .collect(),
        ),
        9 => collapse(
            (0..count)
                .filter_map(|i| reader.i32_at(start + i * 4))
                .map(|v| MetaValue::Int(i64::from(v)))
                .collect(),
        ),
        5 => collapse(
            (0..count)
                .filter_map(|i| {
                    let num = reader.u32_at(start + i * 8)?;
                    let den = reader.u32_at(start + i * 8 + 4)?;
                    Some(MetaValue::rational(i64::from(num), i64::from(den)))
                })
                .collect(),
        ),
        10 => collapse(
            (0..count)
                .filter_map(|i| {
                    let num = reader.i32_at(start + i * 8)?;
                    let den = reader.i32_at(start + i * 8 + 4)?;
                    Some(MetaValue::rational(i64::from(num), i64::from(den)))
                })
                .collect(),
        ),
        _ => return None,
    };
    Some(value)
}

fn collapse(mut values: Vec<MetaValue>) -> MetaValue {
    match values.len() {
        0 => MetaValue::Null,
        1 => values.remove(0),
        _ => MetaValue::List(values),
    }
}

// === Tablas de nombres ===

fn image_tag_name(tag: u16) -> Option<&'static str> {
    match tag {
        0x0100 => Some("ImageWidth"),
        0x0101 => Some("ImageLength"),
        0x010e => Some("ImageDescription"),
        0x010f => Some("Make"),
        0x0110 => Some("Model"),
        0x0112 => Some("Orientation"),
        0x011a => Some("XResolution"),
        0x011b => Some("YResolution"),
        0x0128 => Some("ResolutionUnit"),
        0x0131 => Some("Software"),
        0x0132 => Some("DateTime"),
        0x013b => Some("Artist"),
        0x0201 => Some("JPEGInterchangeFormat"),
        0x0202 => Some("JPEGInterchangeFormatLength"),
        0x8298 => Some("Copyright"),
        _ => None,
    }
}

fn photo_tag_name(tag: u16) -> Option<&'static str> {
    match tag {
        0x829a => Some("ExposureTime"),
        0x829d => Some("FNumber"),
        0x8822 => Some("ExposureProgram"),
        0x8827 => Some("PhotographicSensitivity"),
        0x9003 => Some("DateTimeOriginal"),
        0x9004 => Some("DateTimeDigitized"),
        0x9201 => Some("ShutterSpeedValue"),
        0x9202 => Some("ApertureValue"),
        0x9204 => Some("ExposureBiasValue"),
        0x920a => Some("FocalLength"),
        0x9286 => Some("UserComment"),
        0xa002 => Some("PixelXDimension"),
        0xa003 => Some("PixelYDimension"),
        0xa402 => Some("ExposureMode"),
        0xa403 => Some("WhiteBalance"),
        0xa405 => Some("FocalLengthIn35mmFilm"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Construye un TIFF little-endian mínimo con un IFD0 de prueba.
    fn sample_tiff() -> Vec<u8> {
        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8_u32.to_le_bytes()); // IFD0 en el offset 8

        // Tres entradas: Make (ASCII externo), Orientation (SHORT en línea) y
        // XResolution (RATIONAL externo).
        tiff.extend_from_slice(&3_u16.to_le_bytes());
        let value_area = 8 + 2 + 3 * 12 + 4;

        // Make: tipo 2, 5 bytes, fuera de línea.
        tiff.extend_from_slice(&0x010f_u16.to_le_bytes());
        tiff.extend_from_slice(&2_u16.to_le_bytes());
        tiff.extend_from_slice(&5_u32.to_le_bytes());
        tiff.extend_from_slice(&(value_area as u32).to_le_bytes());

        // Orientation: tipo 3, un valor, en línea.
        tiff.extend_from_slice(&0x0112_u16.to_le_bytes());
        tiff.extend_from_slice(&3_u16.to_le_bytes());
        tiff.extend_from_slice(&1_u32.to_le_bytes());
        tiff.extend_from_slice(&1_u16.to_le_bytes());
        tiff.extend_from_slice(&0_u16.to_le_bytes());

        // XResolution: tipo 5, un racional, fuera de línea.
        tiff.extend_from_slice(&0x011a_u16.to_le_bytes());
        tiff.extend_from_slice(&5_u16.to_le_bytes());
        tiff.extend_from_slice(&1_u32.to_le_bytes());
        tiff.extend_from_slice(&((value_area + 8) as u32).to_le_bytes());

        // Sin IFD siguiente.
        tiff.extend_from_slice(&0_u32.to_le_bytes());

        // Área de valores.
        tiff.extend_from_slice(b"Acme\0");
        while tiff.len() < value_area + 8 {
            tiff.push(0);
        }
        tiff.extend_from_slice(&72_u32.to_le_bytes());
        tiff.extend_from_slice(&1_u32.to_le_bytes());
        tiff
    }

    #[test]
    fn parses_a_minimal_tiff_block() {
        let tiff = sample_tiff();
        let raw = parse_tiff(&tiff).expect("el TIFF de prueba debería parsear");
        let image = raw.groups.get("Image").expect("falta el grupo Image");

        assert_eq!(image.get("Make"), Some(&MetaValue::Text("Acme".into())));
        assert_eq!(image.get("Orientation"), Some(&MetaValue::Int(1)));
        assert_eq!(
            image.get("XResolution"),
            Some(&MetaValue::rational(72, 1))
        );
    }

    #[test]
    fn jpeg_wrapper_is_unwrapped() {
        let tiff = sample_tiff();
        let mut jpeg = vec![0xFF, 0xD8];
        // Un APP0 cualquiera antes del APP1.
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00]);
        let payload_len = (tiff.len() + 8) as u16;
        jpeg.extend_from_slice(&[0xFF, 0xE1]);
        jpeg.extend_from_slice(&payload_len.to_be_bytes());
        jpeg.extend_from_slice(b"Exif\0\0");
        jpeg.extend_from_slice(&tiff);
        jpeg.extend_from_slice(&[0xFF, 0xDA, 0x00, 0x02]);

        let located = locate_tiff(&jpeg).expect("debería encontrar el bloque TIFF");
        assert!(located.starts_with(b"II*\0"));
        assert!(parse_tiff(located).is_some());
    }

    #[test]
    fn png_chunk_walk_finds_exif() {
        let tiff = sample_tiff();
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        // IHDR ficticio.
        png.extend_from_slice(&13_u32.to_be_bytes());
        png.extend_from_slice(b"IHDR");
        png.extend_from_slice(&[0; 13 + 4]);
        // eXIf con el bloque TIFF.
        png.extend_from_slice(&(tiff.len() as u32).to_be_bytes());
        png.extend_from_slice(b"eXIf");
        png.extend_from_slice(&tiff);
        png.extend_from_slice(&[0; 4]);

        let located = locate_tiff(&png).expect("debería encontrar el chunk eXIf");
        assert!(parse_tiff(located).is_some());
    }

    #[test]
    fn garbage_yields_none() {
        assert!(locate_tiff(b"no es una imagen").is_none());
        assert!(parse_tiff(b"II*\0corto").is_none());
    }
}
