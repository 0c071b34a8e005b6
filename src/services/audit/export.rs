//! Signed CSV export and tamper verification for the audit log (C3),
//! grounded in `shared/audit/export.py::AuditExporter`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use subtle::ConstantTimeEq;
use utoipa::ToSchema;

use crate::models::audit::AuditQueryFilters;
use crate::services::audit::AuditLog;
use crate::utils::ApiError;

type HmacSha256 = Hmac<Sha256>;

const CSV_HEADER: &[&str] =
    &["timestamp", "event_type", "user_id", "session_id", "ip_address", "resource", "action", "details", "success", "error_message"];

/// Sidecar metadata written next to the CSV (spec.md §4.3/§6): export time,
/// range, record count, the CSV's SHA-256, and the signature algorithm
/// name.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ExportManifest {
    pub export_timestamp: DateTime<Utc>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub record_count: usize,
    pub csv_hash: String,
    pub signature_algorithm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VerificationReport {
    pub hash_valid: bool,
    pub signature_valid: bool,
    pub tampered: bool,
    pub record_count: usize,
    pub export_date: Option<DateTime<Utc>>,
}

/// Writes `<path>`, `<path>.sig` (hex HMAC-SHA256), and `<path>.meta.json`
/// (spec.md §6 "Persisted state layout"). The signing key is injected at
/// construction rather than read from the audit log itself.
pub struct AuditExporter<'a> {
    audit: &'a AuditLog,
    secret_key: String,
}

impl<'a> AuditExporter<'a> {
    pub fn new(audit: &'a AuditLog, secret_key: impl Into<String>) -> Self {
        Self { audit, secret_key: secret_key.into() }
    }

    pub async fn export_csv(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        output_path: &Path,
    ) -> Result<ExportManifest, ApiError> {
        let events = self
            .audit
            .query(&AuditQueryFilters { start: Some(start), end: Some(end), limit: i64::MAX, offset: 0, ..Default::default() })
            .await?;

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent).map_err(|e| ApiError::storage(format!("could not create export directory: {e}")))?;
        }

        let mut writer = csv::WriterBuilder::new()
            .from_writer(Vec::new());
        writer.write_record(CSV_HEADER).map_err(|e| ApiError::storage(format!("CSV write failed: {e}")))?;
        for event in &events {
            writer
                .write_record(&[
                    event.timestamp.to_rfc3339(),
                    event.event_type.as_str().to_string(),
                    event.user_id.clone().unwrap_or_default(),
                    event.session_id.clone().unwrap_or_default(),
                    event.ip_address.clone().unwrap_or_default(),
                    event.resource.clone().unwrap_or_default(),
                    event.action.clone().unwrap_or_default(),
                    event.details.to_string(),
                    event.success.to_string(),
                    event.error_message.clone().unwrap_or_default(),
                ])
                .map_err(|e| ApiError::storage(format!("CSV write failed: {e}")))?;
        }
        let csv_bytes = writer.into_inner().map_err(|e| ApiError::storage(format!("CSV flush failed: {e}")))?;

        fs::write(output_path, &csv_bytes).map_err(|e| ApiError::storage(format!("could not write export CSV: {e}")))?;

        let csv_hash = hex_digest(&csv_bytes);
        let signature = self.sign(&csv_bytes)?;

        let sig_path = sidecar_path(output_path, "sig");
        fs::write(&sig_path, &signature).map_err(|e| ApiError::storage(format!("could not write signature: {e}")))?;

        let manifest = ExportManifest {
            export_timestamp: Utc::now(),
            start_date: start,
            end_date: end,
            record_count: events.len(),
            csv_hash,
            signature_algorithm: "HMAC-SHA256".to_string(),
        };

        let meta_path = sidecar_path(output_path, "meta.json");
        let meta_json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&meta_path, meta_json).map_err(|e| ApiError::storage(format!("could not write export metadata: {e}")))?;

        Ok(manifest)
    }

    /// Recomputes hash and signature and compares both in constant time
    /// (spec.md §4.3). Missing sidecar files count as tampering rather than
    /// an I/O error, matching the source's `FileNotFoundError` handling.
    pub fn verify_export(csv_path: &Path, secret_key: &str) -> Result<VerificationReport, ApiError> {
        let sig_path = sidecar_path(csv_path, "sig");
        let meta_path = sidecar_path(csv_path, "meta.json");

        if !csv_path.exists() || !sig_path.exists() || !meta_path.exists() {
            return Ok(VerificationReport { hash_valid: false, signature_valid: false, tampered: true, record_count: 0, export_date: None });
        }

        let csv_bytes = fs::read(csv_path).map_err(|e| ApiError::storage(format!("could not read export CSV: {e}")))?;
        let stored_signature = fs::read_to_string(&sig_path).map_err(|e| ApiError::storage(format!("could not read signature: {e}")))?;
        let meta_raw = fs::read_to_string(&meta_path).map_err(|e| ApiError::storage(format!("could not read metadata: {e}")))?;
        let manifest: ExportManifest = serde_json::from_str(&meta_raw)?;

        let recomputed_hash = hex_digest(&csv_bytes);
        let hash_valid = recomputed_hash == manifest.csv_hash;

        let recomputed_signature = sign_with_key(&csv_bytes, secret_key)?;
        let signature_valid = constant_time_eq_str(recomputed_signature.trim(), stored_signature.trim());

        let tampered = !hash_valid || !signature_valid;

        Ok(VerificationReport {
            hash_valid,
            signature_valid,
            tampered,
            record_count: manifest.record_count,
            export_date: Some(manifest.export_timestamp),
        })
    }

    fn sign(&self, data: &[u8]) -> Result<String, ApiError> {
        sign_with_key(data, &self.secret_key)
    }
}

fn sign_with_key(data: &[u8], secret_key: &str) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .map_err(|e| ApiError::storage(format!("invalid signing key: {e}")))?;
    mac.update(data);
    Ok(hex_encode(&mac.finalize().into_bytes()))
}

fn hex_digest(data: &[u8]) -> String {
    hex_encode(&Sha256::digest(data))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn constant_time_eq_str(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn sidecar_path(csv_path: &Path, suffix: &str) -> std::path::PathBuf {
    let mut name = csv_path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    std::path::PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit::{AuditEvent, AuditEventType};
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::tempdir;

    async fn populated_log() -> AuditLog {
        let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
        let log = AuditLog::new(pool).await.unwrap();
        for _ in 0..3 {
            log.log(&AuditEvent::new(AuditEventType::QuerySql)).await.unwrap();
        }
        log
    }

    #[tokio::test]
    async fn exports_and_verifies_untampered_csv() {
        let log = populated_log().await;
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("audit.csv");

        let exporter = AuditExporter::new(&log, "test-secret");
        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now() + chrono::Duration::days(1);
        let manifest = exporter.export_csv(start, end, &csv_path).await.unwrap();
        assert_eq!(manifest.record_count, 3);

        let report = AuditExporter::verify_export(&csv_path, "test-secret").unwrap();
        assert!(report.hash_valid);
        assert!(report.signature_valid);
        assert!(!report.tampered);
        assert_eq!(report.record_count, 3);
    }

    #[tokio::test]
    async fn detects_tampering_after_append() {
        let log = populated_log().await;
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("audit.csv");

        let exporter = AuditExporter::new(&log, "test-secret");
        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now() + chrono::Duration::days(1);
        exporter.export_csv(start, end, &csv_path).await.unwrap();

        let mut contents = fs::read_to_string(&csv_path).unwrap();
        contents.push_str("tampered,line,here\n");
        fs::write(&csv_path, contents).unwrap();

        let report = AuditExporter::verify_export(&csv_path, "test-secret").unwrap();
        assert!(!report.hash_valid);
        assert!(!report.signature_valid);
        assert!(report.tampered);
    }

    #[test]
    fn missing_sidecar_files_report_tampered() {
        let dir = tempdir().unwrap();
        let csv_path = dir.path().join("missing.csv");
        let report = AuditExporter::verify_export(&csv_path, "any-key").unwrap();
        assert!(report.tampered);
    }
}
