use crate::store::{Store, KEY_ACTIVITIES, KEY_STUDENTS};
use anyhow::{anyhow, Context};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const STUDENTS_ENTRY: &str = "data/students.json";
const ACTIVITIES_ENTRY: &str = "data/activities.json";
pub const BUNDLE_FORMAT_V1: &str = "roster-backup-v1";

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub student_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub student_count: usize,
}

/// Writes the current local dataset to a zip bundle: a manifest with a
/// SHA-256 of the student payload plus the two data blobs. This is the
/// manual-backup escape hatch offered when sync enters an error state.
pub fn export_backup(store: &Store, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let students = store.load_students();
    let students_json =
        serde_json::to_string_pretty(&students).context("failed to serialize students")?;
    let activities_json = serde_json::to_string_pretty(&store.load_activities())
        .context("failed to serialize activity log")?;

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let checksum = hex_sha256(students_json.as_bytes());
    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "studentCount": students.len(),
        "studentsSha256": checksum,
    });

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    zip.start_file(STUDENTS_ENTRY, opts)
        .context("failed to start students entry")?;
    zip.write_all(students_json.as_bytes())
        .context("failed to write students entry")?;

    zip.start_file(ACTIVITIES_ENTRY, opts)
        .context("failed to start activities entry")?;
    zip.write_all(activities_json.as_bytes())
        .context("failed to write activities entry")?;

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        student_count: students.len(),
    })
}

/// Validates the bundle's format tag and checksum, then replaces both local
/// blobs wholesale. Nothing is written if validation fails.
pub fn import_backup(store: &Store, in_path: &Path) -> anyhow::Result<ImportSummary> {
    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let mut students_text = String::new();
    archive
        .by_name(STUDENTS_ENTRY)
        .context("bundle missing data/students.json")?
        .read_to_string(&mut students_text)
        .context("failed to read students entry")?;
    if let Some(expected) = manifest.get("studentsSha256").and_then(|v| v.as_str()) {
        let actual = hex_sha256(students_text.as_bytes());
        if actual != expected {
            return Err(anyhow!(
                "students payload checksum mismatch: expected {expected}, got {actual}"
            ));
        }
    }
    let students: Vec<crate::model::Student> =
        serde_json::from_str(&students_text).context("students entry is not a valid collection")?;

    let mut activities_text = String::new();
    archive
        .by_name(ACTIVITIES_ENTRY)
        .context("bundle missing data/activities.json")?
        .read_to_string(&mut activities_text)
        .context("failed to read activities entry")?;
    let _: Vec<crate::model::Activity> =
        serde_json::from_str(&activities_text).context("activities entry is not a valid log")?;

    store
        .write_blob(KEY_STUDENTS, &students_text)
        .context("failed to write students blob")?;
    store
        .write_blob(KEY_ACTIVITIES, &activities_text)
        .context("failed to write activities blob")?;

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        student_count: students.len(),
    })
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
