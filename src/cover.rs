//! Builds the cover page from a remote template document.
//!
//! The template is copied remotely so the original is never mutated; the
//! copy gets its placeholder tokens replaced in one batched request, is
//! exported as PDF into the local cache, and is then deleted best-effort.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, Local, NaiveDate};
use tracing::{info, warn};

use crate::contract::SourceClient;
use crate::error::{Result, SongbookError};

/// Placeholder token replaced with today's date in the default substitution
/// map.
pub const DATE_PLACEHOLDER: &str = "{{DATE}}";

/// Resolves the on-disk cache directory for exported covers, creating it if
/// absent. Defaults to `<user cache dir>/songbook-generator/covers`.
pub fn cover_cache_dir(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => directories::BaseDirs::new()
            .map(|base| base.cache_dir().join("songbook-generator").join("covers"))
            .unwrap_or_else(|| PathBuf::from(".songbook-cache/covers")),
    };
    fs::create_dir_all(&dir).map_err(|source| SongbookError::WriteError {
        path: dir.clone(),
        source,
    })?;
    Ok(dir)
}

/// Default substitutions applied to the template: the date placeholder,
/// formatted like "21st August 2026".
pub fn default_substitutions() -> BTreeMap<String, String> {
    let today = Local::now().date_naive();
    let mut map = BTreeMap::new();
    map.insert(DATE_PLACEHOLDER.to_string(), format_cover_date(today));
    map
}

pub(crate) fn format_cover_date(date: NaiveDate) -> String {
    let day = date.day();
    let suffix = match day {
        11..=13 => "th",
        _ => match day % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        },
    };
    format!("{day}{suffix} {} {}", date.format("%B"), date.year())
}

/// Copies the template, substitutes placeholders, exports the copy as PDF
/// and saves it under the cache directory keyed by the copy's ID.
///
/// Returns the path of the validated local artifact. The remote copy is
/// deleted on every exit path; a deletion failure is logged and never
/// propagated, since the local artifact is already in hand.
pub async fn build_cover<C>(
    client: &C,
    template_id: &str,
    substitutions: &BTreeMap<String, String>,
    cache_dir: &Path,
) -> Result<PathBuf>
where
    C: SourceClient + ?Sized,
{
    let copy_title = format!(
        "Songbook cover {}",
        Local::now().date_naive().format("%Y-%m-%d")
    );
    let copy_id = client
        .copy_document(template_id, &copy_title)
        .await
        .map_err(|e| SongbookError::Remote {
            file_id: template_id.to_string(),
            detail: format!("copying cover template failed: {e}"),
        })?;
    info!(template_id = %template_id, copy_id = %copy_id, "Copied cover template");

    let result = export_cover_copy(client, &copy_id, substitutions, cache_dir).await;

    // Best-effort cleanup, on success and failure alike.
    match client.delete_document(&copy_id).await {
        Ok(()) => info!(copy_id = %copy_id, "Deleted temporary cover copy"),
        Err(e) => warn!(copy_id = %copy_id, error = %e, "Failed to delete temporary cover copy"),
    }

    result
}

async fn export_cover_copy<C>(
    client: &C,
    copy_id: &str,
    substitutions: &BTreeMap<String, String>,
    cache_dir: &Path,
) -> Result<PathBuf>
where
    C: SourceClient + ?Sized,
{
    let replaced = client
        .batch_replace_text(copy_id, substitutions)
        .await
        .map_err(|e| SongbookError::Remote {
            file_id: copy_id.to_string(),
            detail: format!("placeholder substitution failed: {e}"),
        })?;
    // Zero replacements is informational, not an error: a template without
    // placeholders is allowed.
    info!(copy_id = %copy_id, occurrences = replaced, "Replaced placeholder occurrences in cover copy");

    let pdf_bytes = client
        .export_pdf(copy_id)
        .await
        .map_err(|e| SongbookError::Remote {
            file_id: copy_id.to_string(),
            detail: format!("cover export failed: {e}"),
        })?;

    let output_path = cache_dir.join(format!("{copy_id}.pdf"));
    fs::write(&output_path, &pdf_bytes).map_err(|source| SongbookError::WriteError {
        path: output_path.clone(),
        source,
    })?;

    // A zero-byte or otherwise unopenable export means the template is
    // broken on the remote side; keep the file around for diagnosis.
    if lopdf::Document::load(&output_path).is_err() {
        return Err(SongbookError::CorruptArtifact { path: output_path });
    }

    info!(path = %output_path.display(), size = pdf_bytes.len(), "Saved cover PDF to cache");
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::MockSourceClient;
    use crate::pdf::test_support::minimal_pdf_bytes;

    #[test]
    fn formats_ordinal_dates() {
        let d = |y, m, d| NaiveDate::from_ymd_opt(y, m, d).unwrap();
        assert_eq!(format_cover_date(d(2026, 8, 21)), "21st August 2026");
        assert_eq!(format_cover_date(d(2026, 8, 2)), "2nd August 2026");
        assert_eq!(format_cover_date(d(2026, 8, 3)), "3rd August 2026");
        assert_eq!(format_cover_date(d(2026, 8, 11)), "11th August 2026");
        assert_eq!(format_cover_date(d(2026, 8, 12)), "12th August 2026");
        assert_eq!(format_cover_date(d(2026, 8, 4)), "4th August 2026");
    }

    #[tokio::test]
    async fn builds_and_cleans_up_cover_copy() {
        let cache = tempfile::tempdir().unwrap();
        let mut client = MockSourceClient::new();
        client
            .expect_copy_document()
            .returning(|_, _| Ok("copy-1".to_string()));
        client
            .expect_batch_replace_text()
            .returning(|_, subs| Ok(subs.len()));
        client
            .expect_export_pdf()
            .returning(|_| Ok(minimal_pdf_bytes(1)));
        client
            .expect_delete_document()
            .times(1)
            .returning(|_| Ok(()));

        let path = build_cover(
            &client,
            "template-1",
            &default_substitutions(),
            cache.path(),
        )
        .await
        .unwrap();
        assert!(path.exists());
        assert_eq!(path.file_name().unwrap(), "copy-1.pdf");
    }

    #[tokio::test]
    async fn corrupt_export_fails_but_still_deletes_copy() {
        let cache = tempfile::tempdir().unwrap();
        let mut client = MockSourceClient::new();
        client
            .expect_copy_document()
            .returning(|_, _| Ok("copy-2".to_string()));
        client.expect_batch_replace_text().returning(|_, _| Ok(0));
        client.expect_export_pdf().returning(|_| Ok(Vec::new()));
        client
            .expect_delete_document()
            .times(1)
            .returning(|_| Ok(()));

        let err = build_cover(
            &client,
            "template-1",
            &default_substitutions(),
            cache.path(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SongbookError::CorruptArtifact { .. }));
    }

    #[tokio::test]
    async fn delete_failure_does_not_fail_the_build() {
        let cache = tempfile::tempdir().unwrap();
        let mut client = MockSourceClient::new();
        client
            .expect_copy_document()
            .returning(|_, _| Ok("copy-3".to_string()));
        client.expect_batch_replace_text().returning(|_, _| Ok(1));
        client
            .expect_export_pdf()
            .returning(|_| Ok(minimal_pdf_bytes(1)));
        client
            .expect_delete_document()
            .returning(|_| Err("rate limited".into()));

        let path = build_cover(
            &client,
            "template-1",
            &default_substitutions(),
            cache.path(),
        )
        .await
        .unwrap();
        assert!(path.exists());
    }
}
