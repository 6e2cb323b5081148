//! Clasificación de archivos por contenido y extensión.
//!
//! El tipo detectado por firma de contenido manda; la extensión solo decide
//! cuando la firma no alcanza para asignar una categoría. Nunca falla: lo
//! irreconocible queda en `Unknown`.

use std::path::Path;

/// Conjunto cerrado de categorías que el despachador entiende.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FileCategory {
    Image,
    Pdf,
    Docx,
    Spreadsheet,
    Text,
    Audio,
    Video,
    Unknown,
}

/// Resuelve la categoría de un archivo a partir de su contenido y extensión.
pub fn classify(path: &Path) -> FileCategory {
    if let Some(mime) = sniff_mime(path)
        && let Some(category) = category_from_mime(&mime)
    {
        return category;
    }
    extension_of(path)
        .and_then(|extension| category_from_extension(&extension))
        .unwrap_or(FileCategory::Unknown)
}

/// Tipo MIME inferido de los bytes iniciales del archivo, si se reconoce.
pub(crate) fn sniff_mime(path: &Path) -> Option<String> {
    infer::get_from_path(path)
        .ok()
        .flatten()
        .map(|kind| kind.mime_type().to_string())
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_lowercase)
}

fn category_from_mime(mime: &str) -> Option<FileCategory> {
    if mime.starts_with("image/") {
        return Some(FileCategory::Image);
    }
    if mime.starts_with("audio/") {
        return Some(FileCategory::Audio);
    }
    if mime.starts_with("video/") {
        return Some(FileCategory::Video);
    }
    if mime.starts_with("text/") {
        return Some(FileCategory::Text);
    }
    match mime {
        "application/pdf" => Some(FileCategory::Pdf),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        | "application/msword" => Some(FileCategory::Docx),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
        | "application/vnd.ms-excel"
        | "application/vnd.oasis.opendocument.spreadsheet" => Some(FileCategory::Spreadsheet),
        "application/json" | "application/xml" => Some(FileCategory::Text),
        _ => None,
    }
}

fn category_from_extension(extension: &str) -> Option<FileCategory> {
    match extension {
        "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tiff" | "webp" => Some(FileCategory::Image),
        "pdf" => Some(FileCategory::Pdf),
        "docx" => Some(FileCategory::Docx),
        "xlsx" | "xls" => Some(FileCategory::Spreadsheet),
        "txt" | "csv" | "md" | "json" | "xml" | "html" => Some(FileCategory::Text),
        "mp3" | "wav" | "flac" | "ogg" | "oga" | "m4a" | "aac" => Some(FileCategory::Audio),
        "mp4" | "avi" | "mov" | "mkv" | "webm" | "flv" | "wmv" => Some(FileCategory::Video),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn sniffed_content_wins_over_extension() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("engañoso.pdf");
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(&[0; 32]);
        fs::write(&path, bytes).expect("no se pudo escribir el archivo de prueba");

        assert_eq!(classify(&path), FileCategory::Image);
    }

    #[test]
    fn plain_text_falls_back_to_extension() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("notas.csv");
        fs::write(&path, "a,b,c\n1,2,3\n").expect("no se pudo escribir el archivo de prueba");

        assert_eq!(classify(&path), FileCategory::Text);
    }

    #[test]
    fn unrecognized_bytes_and_extension_are_unknown() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("misterio.zzz");
        fs::write(&path, [0x00, 0x01, 0x02, 0x03]).expect("no se pudo escribir el archivo");

        assert_eq!(classify(&path), FileCategory::Unknown);
    }

    #[test]
    fn missing_file_is_unknown_not_an_error() {
        assert_eq!(
            classify(Path::new("/ruta/que/no/existe.bin")),
            FileCategory::Unknown
        );
    }

    #[test]
    fn media_extensions_map_to_their_category() {
        assert_eq!(category_from_extension("mp3"), Some(FileCategory::Audio));
        assert_eq!(category_from_extension("mkv"), Some(FileCategory::Video));
        assert_eq!(category_from_extension("xlsx"), Some(FileCategory::Spreadsheet));
        assert_eq!(category_from_extension("exe"), None);
    }
}
