use anyhow::{anyhow, Context};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::db::DB_FILE_NAME;

const MANIFEST_ENTRY: &str = "manifest.json";
const DB_ENTRY: &str = "db/absensi.sqlite3";
pub const BUNDLE_FORMAT: &str = "absensi-workspace-v1";
const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleManifest {
    pub format: String,
    pub app_version: String,
    pub exported_at: String,
    pub db_sha256: String,
    pub db_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportSummary {
    pub bundle_format: String,
    pub db_sha256: String,
    pub db_bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub db_sha256: String,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn export_workspace_bundle(workspace: &Path, out_path: &Path) -> anyhow::Result<ExportSummary> {
    let db_path = workspace.join(DB_FILE_NAME);
    let db_bytes = std::fs::read(&db_path)
        .with_context(|| format!("workspace database not found: {}", db_path.display()))?;
    let manifest = BundleManifest {
        format: BUNDLE_FORMAT.to_string(),
        app_version: env!("CARGO_PKG_VERSION").to_string(),
        exported_at: Utc::now().to_rfc3339(),
        db_sha256: sha256_hex(&db_bytes),
        db_bytes: db_bytes.len() as u64,
    };

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    let out_file = File::create(out_path)
        .with_context(|| format!("failed to create output file {}", out_path.display()))?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())
        .context("failed to write manifest entry")?;
    zip.start_file(DB_ENTRY, opts)
        .context("failed to start database entry")?;
    zip.write_all(&db_bytes)
        .context("failed to write database entry")?;
    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: manifest.format,
        db_sha256: manifest.db_sha256,
        db_bytes: manifest.db_bytes,
    })
}

/// Restore a bundle (or a bare SQLite file) into `workspace`, replacing its
/// database. The caller must drop any open connection first.
pub fn import_workspace_bundle(in_path: &Path, workspace: &Path) -> anyhow::Result<ImportSummary> {
    let raw = std::fs::read(in_path)
        .with_context(|| format!("failed to open input file {}", in_path.display()))?;

    let (format, db_bytes) = if raw.starts_with(SQLITE_MAGIC) {
        ("plain-sqlite3".to_string(), raw)
    } else {
        let mut archive =
            ZipArchive::new(std::io::Cursor::new(raw)).context("input is neither a bundle nor a sqlite file")?;
        let mut manifest_text = String::new();
        archive
            .by_name(MANIFEST_ENTRY)
            .context("bundle missing manifest.json")?
            .read_to_string(&mut manifest_text)
            .context("failed to read manifest.json")?;
        let manifest: BundleManifest =
            serde_json::from_str(&manifest_text).context("manifest.json is invalid")?;
        if manifest.format != BUNDLE_FORMAT {
            return Err(anyhow!("unsupported bundle format: {}", manifest.format));
        }
        let mut db_bytes = Vec::new();
        archive
            .by_name(DB_ENTRY)
            .with_context(|| format!("bundle missing {}", DB_ENTRY))?
            .read_to_end(&mut db_bytes)
            .context("failed to extract database entry")?;
        let actual = sha256_hex(&db_bytes);
        if actual != manifest.db_sha256 {
            return Err(anyhow!(
                "database checksum mismatch: manifest {} actual {}",
                manifest.db_sha256,
                actual
            ));
        }
        (manifest.format, db_bytes)
    };

    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.display()))?;
    let dst = workspace.join(DB_FILE_NAME);
    let tmp = workspace.join(format!("{}.importing", DB_FILE_NAME));
    {
        let mut f = File::create(&tmp)
            .with_context(|| format!("failed to create temp database {}", tmp.display()))?;
        f.write_all(&db_bytes)?;
        f.flush().context("failed to flush extracted database")?;
    }
    std::fs::rename(&tmp, &dst)
        .with_context(|| format!("failed to move extracted database to {}", dst.display()))?;

    Ok(ImportSummary {
        bundle_format_detected: format,
        db_sha256: sha256_hex(&db_bytes),
    })
}
