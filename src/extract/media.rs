//! Extracción de metadata de audio y video mediante backends independientes.
//!
//! Tres backends complementarios alimentan las mismas categorías: el lector
//! de tags embebidos, el parser estructural de contenedores y, si el binario
//! está disponible, `ffprobe` con salida JSON. La fusión es aditiva y por
//! clave: el primer backend que escribe una clave gana. La ausencia o el
//! fallo de un backend queda registrado en `*_status` / `*_error` sin
//! abortar a los demás.

use crate::error::ExtractError;
use crate::record::MetadataRecord;
use crate::value::MetaValue;
use chrono::{Duration, NaiveDate};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Cotas de lectura por backend: el costo no crece con el archivo.
const TAG_SCAN_LIMIT: usize = 2 * 1024 * 1024;
const OGG_SCAN_LIMIT: usize = 256 * 1024;
const MKV_SCAN_LIMIT: usize = 2 * 1024 * 1024;
const MOOV_PAYLOAD_LIMIT: usize = 8 * 1024 * 1024;
const FRAME_SCAN_LIMIT: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ContainerKind {
    Mp3,
    Wav,
    Flac,
    Ogg,
    Mp4,
    Mkv,
    Unknown,
}

/// Inserta solo si la clave aún no existe: primera escritura gana.
fn merge_entry(map: &mut BTreeMap<String, MetaValue>, key: &str, value: MetaValue) {
    map.entry(key.to_string()).or_insert(value);
}

/// Descriptor de una pista de un contenedor multimedia.
#[derive(Clone, Debug, Default)]
pub struct TrackDescriptor {
    pub kind: String,
    pub codec: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f64>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
    pub bit_rate: Option<u64>,
    pub language: Option<String>,
    pub extras: BTreeMap<String, MetaValue>,
}

impl TrackDescriptor {
    fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    fn to_meta(&self) -> MetaValue {
        let mut map = BTreeMap::new();
        map.insert("kind".to_string(), MetaValue::Text(self.kind.clone()));
        if let Some(codec) = &self.codec {
            map.insert("codec".to_string(), MetaValue::Text(codec.clone()));
        }
        if let Some(width) = self.width {
            map.insert("width".to_string(), MetaValue::from(width));
        }
        if let Some(height) = self.height {
            map.insert("height".to_string(), MetaValue::from(height));
        }
        if let Some(frame_rate) = self.frame_rate {
            map.insert("frame_rate".to_string(), MetaValue::Float(frame_rate));
        }
        if let Some(sample_rate) = self.sample_rate {
            map.insert("sample_rate".to_string(), MetaValue::from(sample_rate));
        }
        if let Some(channels) = self.channels {
            map.insert("channels".to_string(), MetaValue::from(channels));
        }
        if let Some(bit_rate) = self.bit_rate {
            map.insert("bit_rate".to_string(), MetaValue::from(bit_rate));
        }
        if let Some(language) = &self.language {
            map.insert("language".to_string(), MetaValue::Text(language.clone()));
        }
        for (key, value) in &self.extras {
            merge_entry(&mut map, key, value.clone());
        }
        MetaValue::Map(map)
    }
}

/// Resultado parcial que cada backend aporta a la fusión.
#[derive(Default)]
struct BackendYield {
    info: BTreeMap<String, MetaValue>,
    tags: BTreeMap<String, MetaValue>,
    technical: BTreeMap<String, MetaValue>,
    video_tracks: Vec<TrackDescriptor>,
    audio_tracks: Vec<TrackDescriptor>,
    subtitle_tracks: Vec<TrackDescriptor>,
}

// === Entradas del despachador ===

pub fn extract_audio(path: &Path, record: &mut MetadataRecord) {
    let mut info = BTreeMap::new();
    if let Ok(metadata) = fs::metadata(path) {
        info.insert("file_size_bytes".to_string(), MetaValue::from(metadata.len()));
    }
    let mut tags = BTreeMap::new();
    let mut technical = BTreeMap::new();
    let kind = detect_container(path);
    debug!(?kind, path = %path.display(), "contenedor de audio detectado");

    match tag_backend(path, kind) {
        Ok(found) => {
            for (key, value) in found {
                merge_entry(&mut tags, &key, value);
            }
        }
        Err(error) => {
            warn!(%error, "el lector de tags falló");
            record.set("tags_error", error.to_string());
        }
    }

    match container_backend(path, kind) {
        Ok(yielded) => {
            for (key, value) in yielded.info {
                merge_entry(&mut info, &key, value);
            }
            for (key, value) in yielded.technical {
                merge_entry(&mut technical, &key, value);
            }
        }
        Err(error) => {
            warn!(%error, "el parser de contenedor falló");
            record.set("container_error", error.to_string());
        }
    }

    match ffprobe_backend(path) {
        FfprobeOutcome::Unavailable => {
            record.set("ffprobe_status", "not available");
        }
        FfprobeOutcome::Failed(error) => {
            record.set("ffprobe_error", error);
        }
        FfprobeOutcome::Parsed(yielded) => {
            for (key, value) in yielded.info {
                merge_entry(&mut info, &key, value);
            }
            for (key, value) in yielded.tags {
                merge_entry(&mut tags, &key, value);
            }
            for (key, value) in yielded.technical {
                merge_entry(&mut technical, &key, value);
            }
        }
    }

    let formatted = match info.get("length_seconds") {
        Some(MetaValue::Float(seconds)) => Some(format_duration(*seconds)),
        _ => None,
    };
    if let Some(formatted) = formatted {
        merge_entry(&mut info, "length_formatted", MetaValue::Text(formatted));
    }

    record.set("audio_info", MetaValue::Map(info));
    record.set("tags", MetaValue::Map(tags));
    record.set("technical_info", MetaValue::Map(technical));
}

pub fn extract_video(path: &Path, record: &mut MetadataRecord) {
    let mut info = BTreeMap::new();
    if let Ok(metadata) = fs::metadata(path) {
        info.insert("file_size_bytes".to_string(), MetaValue::from(metadata.len()));
    }
    let mut technical = BTreeMap::new();
    let mut video_tracks = Vec::new();
    let mut audio_tracks = Vec::new();
    let mut subtitle_tracks = Vec::new();
    let kind = detect_container(path);
    debug!(?kind, path = %path.display(), "contenedor de video detectado");

    match container_backend(path, kind) {
        Ok(yielded) => {
            for (key, value) in yielded.info {
                merge_entry(&mut info, &key, value);
            }
            for (key, value) in yielded.technical {
                merge_entry(&mut technical, &key, value);
            }
            video_tracks = yielded.video_tracks;
            audio_tracks = yielded.audio_tracks;
            subtitle_tracks = yielded.subtitle_tracks;
        }
        Err(error) => {
            warn!(%error, "el parser de contenedor falló");
            record.set("container_error", error.to_string());
        }
    }

    match ffprobe_backend(path) {
        FfprobeOutcome::Unavailable => {
            record.set("ffprobe_status", "not available");
        }
        FfprobeOutcome::Failed(error) => {
            record.set("ffprobe_error", error);
        }
        FfprobeOutcome::Parsed(yielded) => {
            for (key, value) in yielded.info {
                merge_entry(&mut info, &key, value);
            }
            for (key, value) in yielded.technical {
                merge_entry(&mut technical, &key, value);
            }
            // Las listas de pistas son aditivas solo si el parser estructural
            // no aportó las suyas: evita duplicar la misma pista.
            if video_tracks.is_empty() {
                video_tracks = yielded.video_tracks;
            }
            if audio_tracks.is_empty() {
                audio_tracks = yielded.audio_tracks;
            }
            if subtitle_tracks.is_empty() {
                subtitle_tracks = yielded.subtitle_tracks;
            }
        }
    }

    record.set("video_info", MetaValue::Map(info));
    record.set(
        "video_tracks",
        MetaValue::List(video_tracks.iter().map(TrackDescriptor::to_meta).collect()),
    );
    record.set(
        "audio_tracks",
        MetaValue::List(audio_tracks.iter().map(TrackDescriptor::to_meta).collect()),
    );
    record.set(
        "subtitle_tracks",
        MetaValue::List(
            subtitle_tracks
                .iter()
                .map(TrackDescriptor::to_meta)
                .collect(),
        ),
    );
    record.set("technical_info", MetaValue::Map(technical));
}

fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

// === Detección de contenedor ===

fn detect_container(path: &Path) -> ContainerKind {
    let mut header = [0_u8; 12];
    if let Ok(mut file) = File::open(path) {
        let _ = file.read(&mut header);
    }
    if header.starts_with(b"ID3") || header.starts_with(&[0xFF, 0xFB]) {
        return ContainerKind::Mp3;
    }
    if header.starts_with(b"RIFF") && &header[8..12] == b"WAVE" {
        return ContainerKind::Wav;
    }
    if header.starts_with(b"fLaC") {
        return ContainerKind::Flac;
    }
    if header.starts_with(b"OggS") {
        return ContainerKind::Ogg;
    }
    if &header[4..8] == b"ftyp" {
        return ContainerKind::Mp4;
    }
    if header.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return ContainerKind::Mkv;
    }
    match crate::classify::extension_of(path).as_deref() {
        Some("mp3") => ContainerKind::Mp3,
        Some("wav") => ContainerKind::Wav,
        Some("flac") => ContainerKind::Flac,
        Some("ogg" | "oga" | "opus") => ContainerKind::Ogg,
        Some("mp4" | "m4a" | "mov") => ContainerKind::Mp4,
        Some("mkv" | "webm") => ContainerKind::Mkv,
        _ => ContainerKind::Unknown,
    }
}

// === Backend de tags embebidos ===

/// Lee los tags declarados por el propio archivo (ID3v2, comentarios
/// Vorbis). Los formatos sin bloque de tags devuelven un mapa vacío.
fn tag_backend(
    path: &Path,
    kind: ContainerKind,
) -> Result<BTreeMap<String, MetaValue>, ExtractError> {
    match kind {
        ContainerKind::Mp3 => read_id3_tags(path),
        ContainerKind::Flac => read_flac_tags(path),
        ContainerKind::Ogg => read_ogg_tags(path),
        _ => Ok(BTreeMap::new()),
    }
}

fn read_id3_tags(path: &Path) -> Result<BTreeMap<String, MetaValue>, ExtractError> {
    let mut tags = BTreeMap::new();
    let mut file = File::open(path)?;
    let mut header = [0_u8; 10];
    file.read_exact(&mut header)?;
    if &header[0..3] != b"ID3" {
        return Ok(tags);
    }
    tags.insert(
        "ID3_version".to_string(),
        MetaValue::Text(format!("v2.{}.{}", header[3], header[4])),
    );

    let declared = synchsafe(&header[6..10]) as usize;
    let mut body = vec![0_u8; declared.min(TAG_SCAN_LIMIT)];
    file.read_exact(&mut body)?;

    let mut offset = 0;
    while offset + 10 <= body.len() {
        let id = &body[offset..offset + 4];
        if id.iter().all(|byte| *byte == 0) {
            break;
        }
        let size = u32::from_be_bytes([
            body[offset + 4],
            body[offset + 5],
            body[offset + 6],
            body[offset + 7],
        ]) as usize;
        let start = offset + 10;
        let end = start + size;
        if end > body.len() {
            break;
        }
        let frame_id = String::from_utf8_lossy(id).to_string();
        if frame_id.starts_with('T') || frame_id == "COMM" {
            if let Some(text) = decode_id3_text(&body[start..end]) {
                merge_entry(&mut tags, &frame_id, MetaValue::Text(text));
            }
        } else if frame_id == "APIC" {
            merge_entry(
                &mut tags,
                "APIC",
                MetaValue::Text(format!("attached picture ({size} bytes)")),
            );
        }
        offset = end;
    }
    Ok(tags)
}

/// Texto de un frame ID3 según su byte de codificación.
fn decode_id3_text(frame: &[u8]) -> Option<String> {
    let (encoding, payload) = frame.split_first()?;
    let text = match encoding {
        0 | 3 => String::from_utf8_lossy(payload).to_string(),
        1 | 2 => {
            let units: Vec<u16> = payload
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => return None,
    };
    let trimmed = text.trim_matches(['\0', '\u{FEFF}']).trim().to_string();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn synchsafe(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(0_u32, |acc, byte| (acc << 7) | u32::from(byte & 0x7F))
}

fn read_flac_tags(path: &Path) -> Result<BTreeMap<String, MetaValue>, ExtractError> {
    let mut tags = BTreeMap::new();
    let mut file = File::open(path)?;
    let mut signature = [0_u8; 4];
    file.read_exact(&mut signature)?;
    if &signature != b"fLaC" {
        return Ok(tags);
    }
    let mut last = false;
    while !last {
        let mut header = [0_u8; 4];
        if file.read_exact(&mut header).is_err() {
            break;
        }
        last = header[0] & 0x80 != 0;
        let block_type = header[0] & 0x7F;
        let length =
            ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
        if block_type == 4 {
            let mut payload = vec![0_u8; length.min(TAG_SCAN_LIMIT)];
            file.read_exact(&mut payload)?;
            parse_vorbis_comments(&payload, &mut tags);
            if length > payload.len() {
                file.seek(SeekFrom::Current((length - payload.len()) as i64))?;
            }
        } else {
            file.seek(SeekFrom::Current(length as i64))?;
        }
    }
    Ok(tags)
}

/// Bloque de comentarios Vorbis: vendor más pares `CLAVE=valor`.
fn parse_vorbis_comments(payload: &[u8], tags: &mut BTreeMap<String, MetaValue>) {
    let mut cursor = payload;
    let vendor_len = take_u32_le(&mut cursor) as usize;
    if cursor.len() >= vendor_len {
        let vendor = String::from_utf8_lossy(&cursor[..vendor_len]).to_string();
        if !vendor.is_empty() {
            merge_entry(tags, "vendor", MetaValue::Text(vendor));
        }
        cursor = &cursor[vendor_len..];
    }
    let count = take_u32_le(&mut cursor);
    for _ in 0..count {
        let length = take_u32_le(&mut cursor) as usize;
        if cursor.len() < length {
            break;
        }
        let entry = String::from_utf8_lossy(&cursor[..length]).to_string();
        cursor = &cursor[length..];
        if let Some((key, value)) = entry.split_once('=') {
            merge_entry(tags, &key.to_uppercase(), MetaValue::Text(value.to_string()));
        }
    }
}

fn take_u32_le(cursor: &mut &[u8]) -> u32 {
    if cursor.len() < 4 {
        return 0;
    }
    let value = u32::from_le_bytes([cursor[0], cursor[1], cursor[2], cursor[3]]);
    *cursor = &cursor[4..];
    value
}

fn read_ogg_tags(path: &Path) -> Result<BTreeMap<String, MetaValue>, ExtractError> {
    let mut tags = BTreeMap::new();
    for packet in ogg_packets(path)? {
        if let Some(rest) = packet.strip_prefix(b"OpusTags") {
            parse_vorbis_comments(rest, &mut tags);
        } else if packet.len() > 7 && packet[0] == 0x03 && &packet[1..7] == b"vorbis" {
            parse_vorbis_comments(&packet[7..], &mut tags);
        }
    }
    Ok(tags)
}

/// Paquetes de las primeras páginas OGG del archivo.
fn ogg_packets(path: &Path) -> Result<Vec<Vec<u8>>, ExtractError> {
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.by_ref()
        .take(OGG_SCAN_LIMIT as u64)
        .read_to_end(&mut data)?;

    let mut packets = Vec::new();
    let mut offset = 0;
    while offset + 27 <= data.len() && &data[offset..offset + 4] == b"OggS" {
        let segments = data[offset + 26] as usize;
        let table_end = offset + 27 + segments;
        if table_end > data.len() {
            break;
        }
        let payload_len: usize = data[offset + 27..table_end]
            .iter()
            .map(|lace| *lace as usize)
            .sum();
        let payload_end = table_end + payload_len;
        if payload_end > data.len() {
            break;
        }
        packets.push(data[table_end..payload_end].to_vec());
        offset = payload_end;
    }
    Ok(packets)
}

// === Backend estructural de contenedores ===

fn container_backend(path: &Path, kind: ContainerKind) -> Result<BackendYield, ExtractError> {
    match kind {
        ContainerKind::Mp3 => read_mp3_stream(path),
        ContainerKind::Wav => read_wav_stream(path),
        ContainerKind::Flac => read_flac_stream(path),
        ContainerKind::Ogg => read_ogg_stream(path),
        ContainerKind::Mp4 => read_mp4_container(path),
        ContainerKind::Mkv => read_mkv_container(path),
        ContainerKind::Unknown => Err(ExtractError::other("unrecognized media container")),
    }
}

fn read_mp3_stream(path: &Path) -> Result<BackendYield, ExtractError> {
    let mut yielded = BackendYield::default();
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();

    // El audio arranca después del bloque ID3, si lo hay.
    let mut header = [0_u8; 10];
    let audio_offset = if file.read_exact(&mut header).is_ok() && &header[0..3] == b"ID3" {
        u64::from(synchsafe(&header[6..10])) + 10
    } else {
        0
    };

    file.seek(SeekFrom::Start(audio_offset))?;
    let mut window = vec![0_u8; FRAME_SCAN_LIMIT];
    let read = file.read(&mut window)?;
    window.truncate(read);

    let Some(frame) = find_mp3_frame(&window) else {
        return Err(ExtractError::other("no mp3 frame header found"));
    };
    merge_entry(
        &mut yielded.info,
        "codec",
        MetaValue::Text(format!("{} {}", frame.version, frame.layer)),
    );
    if let Some(bitrate) = frame.bitrate_kbps {
        merge_entry(&mut yielded.info, "bitrate", MetaValue::from(bitrate * 1000));
        let audio_size = file_size.saturating_sub(audio_offset);
        let seconds = (audio_size as f64 * 8.0) / (f64::from(bitrate) * 1000.0);
        merge_entry(&mut yielded.info, "length_seconds", MetaValue::Float(seconds));
    }
    if let Some(rate) = frame.sample_rate {
        merge_entry(&mut yielded.info, "sample_rate", MetaValue::from(rate));
    }
    merge_entry(&mut yielded.info, "channels", MetaValue::from(frame.channels));

    if let Some(index) = find_bytes(&window, b"Xing") {
        merge_entry(&mut yielded.technical, "bitrate_mode", MetaValue::from("VBR"));
        if let Some(frames) = xing_frame_count(&window, index) {
            merge_entry(&mut yielded.technical, "frame_count", MetaValue::from(frames));
        }
    } else if find_bytes(&window, b"Info").is_some() {
        merge_entry(&mut yielded.technical, "bitrate_mode", MetaValue::from("CBR"));
    }
    for encoder in [&b"LAME"[..], b"Lavf", b"Lavc"] {
        if let Some(index) = find_bytes(&window, encoder) {
            let label = ascii_run(&window[index..], 12);
            if !label.is_empty() {
                merge_entry(&mut yielded.technical, "encoder", MetaValue::Text(label));
            }
            break;
        }
    }
    Ok(yielded)
}

struct Mp3Frame {
    version: &'static str,
    layer: &'static str,
    bitrate_kbps: Option<u32>,
    sample_rate: Option<u32>,
    channels: u32,
}

/// Busca la primera cabecera de frame MPEG válida en la ventana.
fn find_mp3_frame(window: &[u8]) -> Option<Mp3Frame> {
    for pair in window.windows(4) {
        if pair[0] != 0xFF || pair[1] & 0xE0 != 0xE0 {
            continue;
        }
        let header = u32::from_be_bytes([pair[0], pair[1], pair[2], pair[3]]);
        let version_bits = (header >> 19) & 0x3;
        let layer_bits = (header >> 17) & 0x3;
        if version_bits == 0b01 || layer_bits == 0b00 {
            continue;
        }
        let bitrate_index = (header >> 12) & 0xF;
        let sample_index = (header >> 10) & 0x3;
        let channel_mode = (header >> 6) & 0x3;

        let (version, rates) = match version_bits {
            0b11 => ("MPEG1", [44_100, 48_000, 32_000]),
            0b10 => ("MPEG2", [22_050, 24_000, 16_000]),
            _ => ("MPEG2.5", [11_025, 12_000, 8_000]),
        };
        let layer = match layer_bits {
            0b11 => "Layer I",
            0b10 => "Layer II",
            _ => "Layer III",
        };
        return Some(Mp3Frame {
            version,
            layer,
            bitrate_kbps: mp3_bitrate(version_bits, layer_bits, bitrate_index),
            sample_rate: rates.get(sample_index as usize).copied(),
            channels: if channel_mode == 3 { 1 } else { 2 },
        });
    }
    None
}

fn mp3_bitrate(version_bits: u32, layer_bits: u32, index: u32) -> Option<u32> {
    if index == 0 || index == 0xF {
        return None;
    }
    let table: [u32; 16] = match (version_bits, layer_bits) {
        (0b11, 0b01) => [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 0],
        (0b11, 0b10) => [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384, 0],
        (0b11, 0b11) => [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448, 0],
        _ => [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160, 0],
    };
    Some(table[index as usize]).filter(|rate| *rate > 0)
}

fn xing_frame_count(window: &[u8], index: usize) -> Option<u32> {
    let flags = u32::from_be_bytes(window.get(index + 4..index + 8)?.try_into().ok()?);
    if flags & 0x1 == 0 {
        return None;
    }
    Some(u32::from_be_bytes(
        window.get(index + 8..index + 12)?.try_into().ok()?,
    ))
}

fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn ascii_run(data: &[u8], max: usize) -> String {
    data.iter()
        .take(max)
        .take_while(|byte| byte.is_ascii_graphic() || **byte == b' ')
        .map(|byte| *byte as char)
        .collect::<String>()
        .trim()
        .to_string()
}

fn read_wav_stream(path: &Path) -> Result<BackendYield, ExtractError> {
    let mut yielded = BackendYield::default();
    let mut file = File::open(path)?;
    let mut header = [0_u8; 12];
    file.read_exact(&mut header)?;
    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" {
        return Err(ExtractError::other("not a wave file"));
    }

    let mut byte_rate = None;
    let mut chunks = Vec::new();
    loop {
        let mut chunk = [0_u8; 8];
        if file.read_exact(&mut chunk).is_err() {
            break;
        }
        let kind = String::from_utf8_lossy(&chunk[0..4]).to_string();
        let size = u32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]) as usize;
        chunks.push(kind.clone());
        match kind.as_str() {
            "fmt " => {
                let mut payload = vec![0_u8; size.min(16)];
                file.read_exact(&mut payload)?;
                if payload.len() >= 16 {
                    let channels = u16::from_le_bytes([payload[2], payload[3]]);
                    let sample_rate =
                        u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
                    let rate = u32::from_le_bytes([payload[8], payload[9], payload[10], payload[11]]);
                    let bits = u16::from_le_bytes([payload[14], payload[15]]);
                    byte_rate = Some(rate);
                    merge_entry(&mut yielded.info, "codec", MetaValue::from("PCM"));
                    merge_entry(&mut yielded.info, "channels", MetaValue::from(u32::from(channels)));
                    merge_entry(&mut yielded.info, "sample_rate", MetaValue::from(sample_rate));
                    merge_entry(&mut yielded.info, "bitrate", MetaValue::from(rate * 8));
                    merge_entry(
                        &mut yielded.technical,
                        "bits_per_sample",
                        MetaValue::from(u32::from(bits)),
                    );
                }
                if size > payload.len() {
                    file.seek(SeekFrom::Current((size - payload.len()) as i64))?;
                }
            }
            "data" => {
                if let Some(rate) = byte_rate.filter(|rate| *rate > 0) {
                    merge_entry(
                        &mut yielded.info,
                        "length_seconds",
                        MetaValue::Float(size as f64 / f64::from(rate)),
                    );
                }
                file.seek(SeekFrom::Current(size as i64))?;
            }
            _ => {
                file.seek(SeekFrom::Current(size as i64))?;
            }
        }
        if size % 2 == 1 {
            file.seek(SeekFrom::Current(1))?;
        }
    }
    merge_entry(
        &mut yielded.technical,
        "chunks",
        MetaValue::Text(chunks.join(", ")),
    );
    Ok(yielded)
}

fn read_flac_stream(path: &Path) -> Result<BackendYield, ExtractError> {
    let mut yielded = BackendYield::default();
    let mut file = File::open(path)?;
    let mut signature = [0_u8; 4];
    file.read_exact(&mut signature)?;
    if &signature != b"fLaC" {
        return Err(ExtractError::other("not a flac file"));
    }

    let mut header = [0_u8; 4];
    file.read_exact(&mut header)?;
    let length = ((header[1] as usize) << 16) | ((header[2] as usize) << 8) | header[3] as usize;
    // El primer bloque siempre es STREAMINFO.
    if header[0] & 0x7F != 0 || length < 34 {
        return Err(ExtractError::other("missing streaminfo block"));
    }
    let mut payload = vec![0_u8; length];
    file.read_exact(&mut payload)?;

    let sample_rate = (u32::from(payload[10]) << 12)
        | (u32::from(payload[11]) << 4)
        | (u32::from(payload[12]) >> 4);
    let channels = ((payload[12] >> 1) & 0x07) + 1;
    let bits = ((u16::from(payload[12] & 0x01)) << 4) | (u16::from(payload[13]) >> 4);
    let total_samples = ((u64::from(payload[13]) & 0x0F) << 32)
        | (u64::from(payload[14]) << 24)
        | (u64::from(payload[15]) << 16)
        | (u64::from(payload[16]) << 8)
        | u64::from(payload[17]);

    merge_entry(&mut yielded.info, "codec", MetaValue::from("FLAC"));
    merge_entry(&mut yielded.info, "sample_rate", MetaValue::from(sample_rate));
    merge_entry(&mut yielded.info, "channels", MetaValue::from(u32::from(channels)));
    merge_entry(
        &mut yielded.technical,
        "bits_per_sample",
        MetaValue::from(u32::from(bits)),
    );
    merge_entry(
        &mut yielded.technical,
        "total_samples",
        MetaValue::from(total_samples),
    );
    if sample_rate > 0 && total_samples > 0 {
        merge_entry(
            &mut yielded.info,
            "length_seconds",
            MetaValue::Float(total_samples as f64 / f64::from(sample_rate)),
        );
    }
    Ok(yielded)
}

fn read_ogg_stream(path: &Path) -> Result<BackendYield, ExtractError> {
    let mut yielded = BackendYield::default();
    let packets = ogg_packets(path)?;
    if packets.is_empty() {
        return Err(ExtractError::other("no ogg pages found"));
    }
    for packet in &packets {
        if let Some(rest) = packet.strip_prefix(b"OpusHead") {
            merge_entry(&mut yielded.info, "codec", MetaValue::from("Opus"));
            if let Some(channels) = rest.get(1) {
                merge_entry(&mut yielded.info, "channels", MetaValue::from(u32::from(*channels)));
            }
            merge_entry(&mut yielded.info, "sample_rate", MetaValue::from(48_000_u32));
        } else if packet.len() > 16 && packet[0] == 0x01 && &packet[1..7] == b"vorbis" {
            merge_entry(&mut yielded.info, "codec", MetaValue::from("Vorbis"));
            merge_entry(
                &mut yielded.info,
                "channels",
                MetaValue::from(u32::from(packet[11])),
            );
            let rate = u32::from_le_bytes([packet[12], packet[13], packet[14], packet[15]]);
            merge_entry(&mut yielded.info, "sample_rate", MetaValue::from(rate));
        }
    }
    Ok(yielded)
}

fn read_mp4_container(path: &Path) -> Result<BackendYield, ExtractError> {
    let mut yielded = BackendYield::default();
    let mut file = File::open(path)?;
    let mut moov = None;
    let mut brands = Vec::new();

    loop {
        let mut header = [0_u8; 8];
        if file.read_exact(&mut header).is_err() {
            break;
        }
        let size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let kind = [header[4], header[5], header[6], header[7]];
        if size < 8 {
            break;
        }
        let payload_size = size - 8;
        match &kind {
            b"ftyp" => {
                let mut payload = vec![0_u8; (payload_size as usize).min(256)];
                file.read_exact(&mut payload)?;
                for brand in payload.chunks_exact(4).take(8) {
                    let label = String::from_utf8_lossy(brand).trim().to_string();
                    if !label.is_empty() && label != "\0\0\0\0" && !brands.contains(&label) {
                        brands.push(label);
                    }
                }
                if payload_size as usize > payload.len() {
                    file.seek(SeekFrom::Current(payload_size as i64 - payload.len() as i64))?;
                }
            }
            b"moov" => {
                let mut payload = vec![0_u8; (payload_size as usize).min(MOOV_PAYLOAD_LIMIT)];
                file.read_exact(&mut payload)?;
                moov = Some(payload);
                break;
            }
            _ => {
                file.seek(SeekFrom::Current(payload_size as i64))?;
            }
        }
    }

    if !brands.is_empty() {
        // El brand mayor descarta el segundo campo (versión menor).
        let listed: Vec<String> = brands
            .iter()
            .filter(|brand| brand.chars().any(|c| c.is_ascii_alphabetic()))
            .cloned()
            .collect();
        merge_entry(
            &mut yielded.technical,
            "brands",
            MetaValue::Text(listed.join(", ")),
        );
    }

    let Some(moov) = moov else {
        return Err(ExtractError::other("no moov box found"));
    };
    if let Some(mvhd) = find_box(&moov, b"mvhd") {
        parse_mvhd(mvhd, &mut yielded);
    }
    each_box(&moov, |kind, payload| {
        if kind == b"trak"
            && let Some(track) = parse_trak(payload)
        {
            match track.kind.as_str() {
                "video" => yielded.video_tracks.push(track),
                "audio" => yielded.audio_tracks.push(track),
                "subtitle" => yielded.subtitle_tracks.push(track),
                _ => {}
            }
        }
    });
    Ok(yielded)
}

/// Itera las cajas de primer nivel de un payload MP4.
fn each_box(data: &[u8], mut visit: impl FnMut(&[u8; 4], &[u8])) {
    let mut offset = 0;
    while offset + 8 <= data.len() {
        let size = u32::from_be_bytes([
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]) as usize;
        if size < 8 || offset + size > data.len() {
            break;
        }
        let kind: [u8; 4] = [
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ];
        visit(&kind, &data[offset + 8..offset + size]);
        offset += size;
    }
}

fn find_box<'a>(data: &'a [u8], wanted: &[u8; 4]) -> Option<&'a [u8]> {
    let mut found = None;
    each_box(data, |kind, payload| {
        if kind == wanted && found.is_none() {
            // Se conserva el rango para no retener el préstamo del closure.
            let start = payload.as_ptr() as usize - data.as_ptr() as usize;
            found = Some((start, payload.len()));
        }
    });
    found.map(|(start, len)| &data[start..start + len])
}

fn parse_mvhd(payload: &[u8], yielded: &mut BackendYield) {
    let version = *payload.first().unwrap_or(&0);
    let (creation, modification, timescale, duration) = if version == 1 && payload.len() >= 32 {
        (
            be_u64(&payload[4..12]),
            be_u64(&payload[12..20]),
            be_u32(&payload[20..24]),
            be_u64(&payload[24..32]),
        )
    } else if payload.len() >= 20 {
        (
            u64::from(be_u32(&payload[4..8])),
            u64::from(be_u32(&payload[8..12])),
            be_u32(&payload[12..16]),
            u64::from(be_u32(&payload[16..20])),
        )
    } else {
        return;
    };

    if timescale > 0 {
        let seconds = duration as f64 / f64::from(timescale);
        merge_entry(&mut yielded.info, "duration_seconds", MetaValue::Float(seconds));
        merge_entry(
            &mut yielded.info,
            "duration_formatted",
            MetaValue::Text(format_duration(seconds)),
        );
        merge_entry(&mut yielded.technical, "timescale", MetaValue::from(timescale));
    }
    if creation > 0 {
        merge_entry(
            &mut yielded.info,
            "creation_time",
            MetaValue::Text(mp4_epoch_time(creation)),
        );
    }
    if modification > 0 {
        merge_entry(
            &mut yielded.info,
            "modification_time",
            MetaValue::Text(mp4_epoch_time(modification)),
        );
    }
}

fn parse_trak(payload: &[u8]) -> Option<TrackDescriptor> {
    let mdia = find_box(payload, b"mdia")?;
    let handler = find_box(mdia, b"hdlr")
        .and_then(|hdlr| hdlr.get(8..12))
        .map(|kind| String::from_utf8_lossy(kind).to_string())?;
    let kind = match handler.as_str() {
        "vide" => "video",
        "soun" => "audio",
        "text" | "sbtl" | "subt" => "subtitle",
        _ => return None,
    };
    let mut track = TrackDescriptor::new(kind);

    if let Some(tkhd) = find_box(payload, b"tkhd")
        && tkhd.len() >= 84
    {
        let width = be_u32(&tkhd[76..80]) >> 16;
        let height = be_u32(&tkhd[80..84]) >> 16;
        if width > 0 && height > 0 {
            track.width = Some(width);
            track.height = Some(height);
        }
    }
    if let Some(mdhd) = find_box(mdia, b"mdhd")
        && mdhd.len() >= 20
        && mdhd[0] == 0
    {
        let timescale = be_u32(&mdhd[12..16]);
        let duration = be_u32(&mdhd[16..20]);
        if timescale > 0 {
            track.extras.insert(
                "duration_seconds".to_string(),
                MetaValue::Float(f64::from(duration) / f64::from(timescale)),
            );
        }
        if mdhd.len() >= 22 {
            let language = mdhd_language(be_u16(&mdhd[20..22]));
            if language != "und" {
                track.language = Some(language);
            }
        }
    }
    if let Some(stsd) = find_box(mdia, b"minf")
        .and_then(|minf| find_box(minf, b"stbl"))
        .and_then(|stbl| find_box(stbl, b"stsd"))
        && stsd.len() >= 16
    {
        track.codec = Some(String::from_utf8_lossy(&stsd[12..16]).trim().to_string());
        if kind == "audio" && stsd.len() >= 36 {
            track.channels = Some(u32::from(be_u16(&stsd[24..26])));
            track.sample_rate = Some(be_u32(&stsd[32..36]) >> 16);
        }
    }
    Some(track)
}

/// Código de idioma ISO-639 empaquetado en tres grupos de cinco bits.
fn mdhd_language(packed: u16) -> String {
    let letters = [
        ((packed >> 10) & 0x1F) as u8,
        ((packed >> 5) & 0x1F) as u8,
        (packed & 0x1F) as u8,
    ];
    if letters.iter().any(|letter| *letter == 0) {
        return "und".to_string();
    }
    letters.iter().map(|letter| (letter + 0x60) as char).collect()
}

fn be_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Tiempos MP4: segundos desde la época 1904-01-01.
fn mp4_epoch_time(seconds: u64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1904, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0))
    else {
        return seconds.to_string();
    };
    (epoch + Duration::seconds(seconds as i64))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

// === MKV ===

fn read_mkv_container(path: &Path) -> Result<BackendYield, ExtractError> {
    let mut yielded = BackendYield::default();
    let mut file = File::open(path)?;
    let mut data = Vec::new();
    file.by_ref()
        .take(MKV_SCAN_LIMIT as u64)
        .read_to_end(&mut data)?;
    if !data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Err(ExtractError::other("not an ebml stream"));
    }

    let mut position = 0;
    while let Some((id, size, body_start)) = ebml_element(&data, position) {
        let body_end = (body_start + size as usize).min(data.len());
        match id {
            // Cabecera EBML
            0x1A45_DFA3 => {
                if let Some(doc_type) = ebml_find_string(&data[body_start..body_end], 0x4282) {
                    merge_entry(&mut yielded.technical, "doc_type", MetaValue::Text(doc_type));
                }
            }
            // Segment: descendemos sin saltar su cuerpo.
            0x1853_8067 => {
                position = body_start;
                continue;
            }
            // Info
            0x1549_A966 => parse_mkv_info(&data[body_start..body_end], &mut yielded),
            // Tracks
            0x1654_AE6B => parse_mkv_tracks(&data[body_start..body_end], &mut yielded),
            _ => {}
        }
        position = body_end;
    }
    Ok(yielded)
}

fn parse_mkv_info(body: &[u8], yielded: &mut BackendYield) {
    let mut timescale = 1_000_000_u64;
    let mut raw_duration = None;
    let mut position = 0;
    while let Some((id, size, start)) = ebml_element(body, position) {
        let end = (start + size as usize).min(body.len());
        match id {
            0x2AD7_B1 => timescale = ebml_uint(&body[start..end]),
            0x4489 => raw_duration = ebml_float(&body[start..end]),
            0x4D80 => {
                merge_entry(
                    &mut yielded.technical,
                    "muxing_app",
                    MetaValue::Text(String::from_utf8_lossy(&body[start..end]).trim().to_string()),
                );
            }
            0x5741 => {
                merge_entry(
                    &mut yielded.technical,
                    "writing_app",
                    MetaValue::Text(String::from_utf8_lossy(&body[start..end]).trim().to_string()),
                );
            }
            _ => {}
        }
        position = end;
    }
    if let Some(duration) = raw_duration {
        let seconds = duration * timescale as f64 / 1_000_000_000.0;
        merge_entry(&mut yielded.info, "duration_seconds", MetaValue::Float(seconds));
        merge_entry(
            &mut yielded.info,
            "duration_formatted",
            MetaValue::Text(format_duration(seconds)),
        );
    }
}

fn parse_mkv_tracks(body: &[u8], yielded: &mut BackendYield) {
    let mut position = 0;
    while let Some((id, size, start)) = ebml_element(body, position) {
        let end = (start + size as usize).min(body.len());
        if id == 0xAE
            && let Some(track) = parse_mkv_track_entry(&body[start..end])
        {
            match track.kind.as_str() {
                "video" => yielded.video_tracks.push(track),
                "audio" => yielded.audio_tracks.push(track),
                "subtitle" => yielded.subtitle_tracks.push(track),
                _ => {}
            }
        }
        position = end;
    }
}

fn parse_mkv_track_entry(body: &[u8]) -> Option<TrackDescriptor> {
    let mut kind = None;
    let mut codec = None;
    let mut language = None;
    let mut video_dims = None;
    let mut audio_spec = (None, None);

    let mut position = 0;
    while let Some((id, size, start)) = ebml_element(body, position) {
        let end = (start + size as usize).min(body.len());
        match id {
            0x83 => {
                kind = Some(match ebml_uint(&body[start..end]) {
                    1 => "video",
                    2 => "audio",
                    17 => "subtitle",
                    _ => "other",
                });
            }
            0x86 => {
                codec = Some(String::from_utf8_lossy(&body[start..end]).trim().to_string());
            }
            0x22B5_9C => {
                language = Some(String::from_utf8_lossy(&body[start..end]).trim().to_string());
            }
            // Video: dimensiones en píxeles.
            0xE0 => {
                let video = &body[start..end];
                let width = ebml_find_uint(video, 0xB0);
                let height = ebml_find_uint(video, 0xBA);
                if let (Some(width), Some(height)) = (width, height) {
                    video_dims = Some((width as u32, height as u32));
                }
            }
            // Audio: frecuencia y canales.
            0xE1 => {
                let audio = &body[start..end];
                audio_spec = (
                    ebml_find_float(audio, 0xB5).map(|rate| rate as u32),
                    ebml_find_uint(audio, 0x9F).map(|channels| channels as u32),
                );
            }
            _ => {}
        }
        position = end;
    }

    let mut track = TrackDescriptor::new(kind?);
    track.codec = codec;
    track.language = language.filter(|lang| lang != "und");
    if let Some((width, height)) = video_dims {
        track.width = Some(width);
        track.height = Some(height);
    }
    track.sample_rate = audio_spec.0;
    track.channels = audio_spec.1;
    Some(track)
}

/// Lee un elemento EBML: identificador, tamaño y offset del cuerpo.
fn ebml_element(data: &[u8], position: usize) -> Option<(u32, u64, usize)> {
    let (id, id_len) = ebml_vint(data, position, false)?;
    let (size, size_len) = ebml_vint(data, position + id_len, true)?;
    Some((id as u32, size, position + id_len + size_len))
}

/// Entero de longitud variable EBML; `mask_marker` limpia el bit de longitud
/// (tamaños) o lo conserva (identificadores).
fn ebml_vint(data: &[u8], position: usize, mask_marker: bool) -> Option<(u64, usize)> {
    let first = *data.get(position)?;
    if first == 0 {
        return None;
    }
    let length = first.leading_zeros() as usize + 1;
    if length > 8 || position + length > data.len() {
        return None;
    }
    let mut value = if mask_marker {
        u64::from(first & (0xFF >> length))
    } else {
        u64::from(first)
    };
    for byte in &data[position + 1..position + length] {
        value = (value << 8) | u64::from(*byte);
    }
    Some((value, length))
}

fn ebml_uint(data: &[u8]) -> u64 {
    data.iter().fold(0, |acc, byte| (acc << 8) | u64::from(*byte))
}

fn ebml_float(data: &[u8]) -> Option<f64> {
    match data.len() {
        4 => Some(f64::from(f32::from_be_bytes(data.try_into().ok()?))),
        8 => Some(f64::from_be_bytes(data.try_into().ok()?)),
        _ => None,
    }
}

fn ebml_find(data: &[u8], wanted: u32) -> Option<&[u8]> {
    let mut position = 0;
    while let Some((id, size, start)) = ebml_element(data, position) {
        let end = (start + size as usize).min(data.len());
        if id == wanted {
            return Some(&data[start..end]);
        }
        position = end;
    }
    None
}

fn ebml_find_uint(data: &[u8], wanted: u32) -> Option<u64> {
    ebml_find(data, wanted).map(ebml_uint)
}

fn ebml_find_float(data: &[u8], wanted: u32) -> Option<f64> {
    ebml_find(data, wanted).and_then(ebml_float)
}

fn ebml_find_string(data: &[u8], wanted: u32) -> Option<String> {
    ebml_find(data, wanted).map(|body| String::from_utf8_lossy(body).trim().to_string())
}

// === Backend ffprobe ===

enum FfprobeOutcome {
    Unavailable,
    Failed(String),
    Parsed(Box<BackendYield>),
}

/// Sondeo de capacidad: presencia del binario en el PATH. La ausencia es un
/// estado representable, no un error.
fn ffprobe_available() -> bool {
    Command::new("ffprobe")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn ffprobe_backend(path: &Path) -> FfprobeOutcome {
    if !ffprobe_available() {
        return FfprobeOutcome::Unavailable;
    }
    match run_ffprobe(path) {
        Ok(json) => FfprobeOutcome::Parsed(Box::new(map_ffprobe(&json))),
        Err(error) => FfprobeOutcome::Failed(error.to_string()),
    }
}

fn run_ffprobe(path: &Path) -> Result<Value, ExtractError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .output()?;
    if !output.status.success() {
        return Err(ExtractError::other(format!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(serde_json::from_slice(&output.stdout)?)
}

fn map_ffprobe(json: &Value) -> BackendYield {
    let mut yielded = BackendYield::default();

    if let Some(format) = json.get("format") {
        if let Some(name) = format.get("format_name").and_then(Value::as_str) {
            merge_entry(&mut yielded.technical, "format_name", MetaValue::from(name));
        }
        if let Some(name) = format.get("format_long_name").and_then(Value::as_str) {
            merge_entry(&mut yielded.technical, "format_long_name", MetaValue::from(name));
        }
        if let Some(duration) = number_field(format, "duration") {
            merge_entry(&mut yielded.info, "length_seconds", MetaValue::Float(duration));
            merge_entry(&mut yielded.info, "duration_seconds", MetaValue::Float(duration));
        }
        if let Some(bit_rate) = number_field(format, "bit_rate") {
            merge_entry(&mut yielded.info, "bitrate", MetaValue::from(bit_rate as u64));
        }
        if let Some(tags) = format.get("tags").and_then(Value::as_object) {
            for (key, value) in tags {
                if let Some(text) = value.as_str() {
                    merge_entry(&mut yielded.tags, key, MetaValue::from(text));
                }
            }
        }
    }

    let streams = json
        .get("streams")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for stream in streams {
        let codec_type = stream.get("codec_type").and_then(Value::as_str).unwrap_or("");
        let mut track = TrackDescriptor::new(match codec_type {
            "video" => "video",
            "audio" => "audio",
            "subtitle" => "subtitle",
            _ => continue,
        });
        track.codec = stream
            .get("codec_name")
            .and_then(Value::as_str)
            .map(str::to_string);
        track.width = stream.get("width").and_then(Value::as_u64).map(|v| v as u32);
        track.height = stream.get("height").and_then(Value::as_u64).map(|v| v as u32);
        track.frame_rate = stream
            .get("avg_frame_rate")
            .and_then(Value::as_str)
            .and_then(parse_frame_rate);
        track.sample_rate = number_field(stream, "sample_rate").map(|v| v as u32);
        track.channels = stream.get("channels").and_then(Value::as_u64).map(|v| v as u32);
        track.bit_rate = number_field(stream, "bit_rate").map(|v| v as u64);
        track.language = stream
            .get("tags")
            .and_then(|tags| tags.get("language"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match codec_type {
            "video" => yielded.video_tracks.push(track),
            "audio" => {
                if let Some(rate) = track.sample_rate {
                    merge_entry(&mut yielded.info, "sample_rate", MetaValue::from(rate));
                }
                if let Some(channels) = track.channels {
                    merge_entry(&mut yielded.info, "channels", MetaValue::from(channels));
                }
                if let Some(codec) = &track.codec {
                    merge_entry(&mut yielded.info, "codec", MetaValue::Text(codec.clone()));
                }
                yielded.audio_tracks.push(track);
            }
            _ => yielded.subtitle_tracks.push(track),
        }
    }
    yielded
}

/// Campos numéricos que ffprobe entrega como número o como cadena.
fn number_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
}

/// Tasas tipo `30000/1001` o `25/1`.
fn parse_frame_rate(raw: &str) -> Option<f64> {
    let (num, den) = raw.split_once('/')?;
    let num: f64 = num.parse().ok()?;
    let den: f64 = den.parse().ok()?;
    (den != 0.0 && num > 0.0).then(|| num / den)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::extract_metadata;
    use serde_json::json;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn first_writer_wins_per_key() {
        let mut merged = BTreeMap::new();
        merge_entry(&mut merged, "bitrate", MetaValue::Int(128));
        // Un backend posterior no puede pisar la clave ya escrita.
        merge_entry(&mut merged, "bitrate", MetaValue::Int(320));
        merge_entry(&mut merged, "channels", MetaValue::Int(2));

        assert_eq!(merged.get("bitrate"), Some(&MetaValue::Int(128)));
        assert_eq!(merged.get("channels"), Some(&MetaValue::Int(2)));
    }

    #[test]
    fn wav_stream_info_is_parsed() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("tono.wav");
        let mut file = File::create(&path)?;

        let sample_rate: u32 = 8000;
        let data: Vec<u8> = vec![0; 16000]; // dos segundos de silencio PCM8 mono
        file.write_all(b"RIFF")?;
        file.write_all(&(36 + data.len() as u32).to_le_bytes())?;
        file.write_all(b"WAVE")?;
        file.write_all(b"fmt ")?;
        file.write_all(&16_u32.to_le_bytes())?;
        file.write_all(&1_u16.to_le_bytes())?; // PCM
        file.write_all(&1_u16.to_le_bytes())?; // mono
        file.write_all(&sample_rate.to_le_bytes())?;
        file.write_all(&sample_rate.to_le_bytes())?; // byte rate
        file.write_all(&1_u16.to_le_bytes())?; // block align
        file.write_all(&8_u16.to_le_bytes())?; // bits
        file.write_all(b"data")?;
        file.write_all(&(data.len() as u32).to_le_bytes())?;
        file.write_all(&data)?;
        drop(file);

        let record = extract_metadata(&path);
        assert_eq!(record.extracted_by, "AudioMetadataExtractor");
        let json = record.to_json();
        assert_eq!(json["audio_info"]["sample_rate"], serde_json::Value::from(8000));
        assert_eq!(json["audio_info"]["channels"], serde_json::Value::from(1));
        assert_eq!(json["audio_info"]["length_seconds"], serde_json::Value::from(2.0));
        assert_eq!(
            json["audio_info"]["length_formatted"],
            serde_json::Value::from("00:00:02")
        );
        Ok(())
    }

    #[test]
    fn id3_tags_are_read_with_frame_ids() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("cancion.mp3");

        let mut frames = Vec::new();
        for (id, text) in [(b"TIT2", "Valsecito"), (b"TPE1", "Trío Demo")] {
            let mut payload = vec![3_u8]; // UTF-8
            payload.extend_from_slice(text.as_bytes());
            frames.extend_from_slice(id);
            frames.extend_from_slice(&(payload.len() as u32).to_be_bytes());
            frames.extend_from_slice(&[0, 0]);
            frames.extend_from_slice(&payload);
        }
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"ID3\x04\x00\x00");
        let size = frames.len() as u32;
        bytes.extend_from_slice(&[
            ((size >> 21) & 0x7F) as u8,
            ((size >> 14) & 0x7F) as u8,
            ((size >> 7) & 0x7F) as u8,
            (size & 0x7F) as u8,
        ]);
        bytes.extend_from_slice(&frames);
        // Un frame MPEG1 Layer III válido: 128 kbps, 44100 Hz, stereo.
        bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        bytes.extend_from_slice(&[0; 64]);
        std::fs::write(&path, &bytes)?;

        let record = extract_metadata(&path);
        let json = record.to_json();
        assert_eq!(json["tags"]["TIT2"], serde_json::Value::from("Valsecito"));
        assert_eq!(json["tags"]["TPE1"], serde_json::Value::from("Trío Demo"));
        assert_eq!(json["audio_info"]["bitrate"], serde_json::Value::from(128_000));
        assert_eq!(json["audio_info"]["sample_rate"], serde_json::Value::from(44_100));
        Ok(())
    }

    #[test]
    fn unknown_container_records_error_without_aborting() {
        let dir = tempdir().expect("no se pudo crear el directorio temporal");
        let path = dir.path().join("raro.aac");
        std::fs::write(&path, [0x00, 0x11, 0x22, 0x33]).expect("no se pudo escribir");

        let record = extract_metadata(&path);
        assert_eq!(record.extracted_by, "AudioMetadataExtractor");
        let json = record.to_json();
        assert!(json.get("container_error").is_some());
        assert!(json.get("audio_info").is_some());
        assert!(json.get("tags").is_some());
    }

    #[test]
    fn ffprobe_json_maps_to_tracks_and_info() {
        let json = json!({
            "format": {
                "format_name": "matroska,webm",
                "duration": "12.5",
                "bit_rate": "1500000",
                "tags": {"title": "Demo"}
            },
            "streams": [
                {
                    "codec_type": "video",
                    "codec_name": "h264",
                    "width": 1280,
                    "height": 720,
                    "avg_frame_rate": "30000/1001"
                },
                {
                    "codec_type": "audio",
                    "codec_name": "aac",
                    "sample_rate": "48000",
                    "channels": 2
                }
            ]
        });
        let yielded = map_ffprobe(&json);

        assert_eq!(yielded.video_tracks.len(), 1);
        assert_eq!(yielded.audio_tracks.len(), 1);
        let video = &yielded.video_tracks[0];
        assert_eq!(video.codec.as_deref(), Some("h264"));
        assert_eq!(video.width, Some(1280));
        assert!(video.frame_rate.is_some_and(|rate| (rate - 29.97).abs() < 0.01));
        assert_eq!(
            yielded.info.get("channels"),
            Some(&MetaValue::Int(2))
        );
        assert_eq!(
            yielded.tags.get("title"),
            Some(&MetaValue::Text("Demo".into()))
        );
    }

    #[test]
    fn mp4_boxes_yield_duration_and_tracks() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("clip.mp4");

        // mvhd versión 0: timescale 1000, duración 2500 ms.
        let mut mvhd = vec![0_u8; 100];
        mvhd[12..16].copy_from_slice(&1000_u32.to_be_bytes());
        mvhd[16..20].copy_from_slice(&2500_u32.to_be_bytes());
        let mvhd_box = wrap_box(b"mvhd", &mvhd);

        let moov = wrap_box(b"moov", &mvhd_box);
        let ftyp = wrap_box(b"ftyp", b"isomiso2");
        let mut bytes = ftyp;
        bytes.extend_from_slice(&moov);
        std::fs::write(&path, &bytes)?;

        let record = extract_metadata(&path);
        assert_eq!(record.extracted_by, "VideoMetadataExtractor");
        let json = record.to_json();
        assert_eq!(
            json["video_info"]["duration_seconds"],
            serde_json::Value::from(2.5)
        );
        assert_eq!(
            json["video_info"]["duration_formatted"],
            serde_json::Value::from("00:00:02")
        );
        Ok(())
    }

    fn wrap_box(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        bytes.extend_from_slice(kind);
        bytes.extend_from_slice(payload);
        bytes
    }

    #[test]
    fn frame_rates_parse_from_fractions() {
        assert_eq!(parse_frame_rate("25/1"), Some(25.0));
        assert!(parse_frame_rate("0/0").is_none());
        assert!(parse_frame_rate("treinta").is_none());
    }
}
