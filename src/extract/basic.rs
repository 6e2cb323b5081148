//! Información básica para archivos sin extractor dedicado.

use crate::classify;
use crate::record::MetadataRecord;
use crate::value::MetaValue;
use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

pub fn extract(path: &Path, record: &mut MetadataRecord) {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(error) => {
            record.set_error(format!("could not stat file: {error}"));
            return;
        }
    };

    let mut info = BTreeMap::new();
    info.insert("file_size".to_string(), MetaValue::from(metadata.len()));
    info.insert(
        "mime_type".to_string(),
        MetaValue::Text(
            classify::sniff_mime(path).unwrap_or_else(|| "application/octet-stream".to_string()),
        ),
    );
    info.insert(
        "extension".to_string(),
        MetaValue::from(classify::extension_of(path).unwrap_or_default()),
    );
    if let Ok(modified) = metadata.modified() {
        info.insert(
            "last_modified".to_string(),
            MetaValue::Text(format_local_time(modified)),
        );
    }
    if let Ok(created) = metadata.created() {
        info.insert(
            "created".to_string(),
            MetaValue::Text(format_local_time(created)),
        );
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Some(user) = users::get_user_by_uid(metadata.uid()) {
            info.insert(
                "owner".to_string(),
                MetaValue::Text(user.name().to_string_lossy().to_string()),
            );
        }
        if let Some(group) = users::get_group_by_gid(metadata.gid()) {
            info.insert(
                "group".to_string(),
                MetaValue::Text(group.name().to_string_lossy().to_string()),
            );
        }
    }

    record.set("file_info", MetaValue::Map(info));
}

fn format_local_time(time: SystemTime) -> String {
    DateTime::<Local>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
