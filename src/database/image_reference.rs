//! Image reference tracker
//!
//! Uploaded files are shared freely between inspection records and
//! hazard tickets, so a file may only leave the disk once no record
//! points at it anymore. References live in the `images` child table
//! plus the legacy single-url mirror columns. Physical deletion always
//! happens after the triggering transaction has committed, and a
//! filesystem failure is logged and swallowed: the database is already
//! correct, an orphaned file is the acceptable side of that trade.

use std::path::{Component, Path, PathBuf};

use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::{info, warn};

use crate::error::EngineResult;
use crate::models::ImageOwner;

/// Url prefix the upload subsystem places files under
pub const UPLOAD_URL_PREFIX: &str = "/uploads/";

/// Tracks which records still reference an uploaded file
#[derive(Clone, Debug)]
pub struct ImageReferenceTracker {
    pool: SqlitePool,
    upload_root: PathBuf,
}

impl ImageReferenceTracker {
    pub fn new(pool: SqlitePool, upload_root: PathBuf) -> Self {
        Self { pool, upload_root }
    }

    /// Whether any inspection or issue record still references `url`.
    ///
    /// Read-only against current committed state; safe to call
    /// concurrently with writers.
    pub async fn is_referenced(&self, url: &str) -> EngineResult<bool> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM images WHERE url = ?1)
                 + (SELECT COUNT(*) FROM inspection_logs WHERE inspection_image_url = ?1)
                 + (SELECT COUNT(*) FROM issues WHERE issue_image_url = ?1)
                 + (SELECT COUNT(*) FROM issues WHERE fixed_image_url = ?1)
            "#,
        )
        .bind(url)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Physically delete the file behind `url` if nothing references it
    /// and it lives under the upload prefix. Returns whether a file was
    /// removed. Never fails: bookkeeping must not break the primary
    /// operation over a filesystem error.
    pub async fn safe_delete(&self, url: &str) -> bool {
        let Some(path) = resolve_upload_path(&self.upload_root, url) else {
            warn!("Refusing to delete file outside upload prefix: {}", url);
            return false;
        };

        match self.is_referenced(url).await {
            Ok(true) => {
                info!("File {} still referenced, keeping it", url);
                return false;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Reference check failed for {}: {}, keeping file", url, e);
                return false;
            }
        }

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted unreferenced upload {}", url);
                true
            }
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                false
            }
        }
    }

}

/// Map an upload url onto the filesystem, rejecting anything outside
/// the upload prefix or containing traversal segments.
fn resolve_upload_path(upload_root: &Path, url: &str) -> Option<PathBuf> {
    let relative = url.strip_prefix(UPLOAD_URL_PREFIX)?;
    let relative = Path::new(relative);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(upload_root.join(relative))
}

/// List the urls attached to one owner, in position order
pub(crate) async fn list_urls(
    tx: &mut Transaction<'_, Sqlite>,
    owner_type: ImageOwner,
    owner_id: i64,
) -> EngineResult<Vec<String>> {
    let urls = sqlx::query_scalar::<_, String>(
        r#"
        SELECT url FROM images
        WHERE owner_type = ? AND owner_id = ?
        ORDER BY position
        "#,
    )
    .bind(owner_type)
    .bind(owner_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(urls)
}

/// Append a url at the end of an owner's image set
pub(crate) async fn append_url(
    tx: &mut Transaction<'_, Sqlite>,
    owner_type: ImageOwner,
    owner_id: i64,
    url: &str,
) -> EngineResult<()> {
    let next_position: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM images WHERE owner_type = ? AND owner_id = ?",
    )
    .bind(owner_type)
    .bind(owner_id)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO images (owner_type, owner_id, url, position) VALUES (?, ?, ?, ?)",
    )
    .bind(owner_type)
    .bind(owner_id)
    .bind(url)
    .bind(next_position)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Remove a url from an owner's image set, re-packing positions.
/// Returns false when the url was not attached.
pub(crate) async fn remove_url(
    tx: &mut Transaction<'_, Sqlite>,
    owner_type: ImageOwner,
    owner_id: i64,
    url: &str,
) -> EngineResult<bool> {
    let result = sqlx::query(
        "DELETE FROM images WHERE owner_type = ? AND owner_id = ? AND url = ?",
    )
    .bind(owner_type)
    .bind(owner_id)
    .bind(url)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    let remaining = list_urls(tx, owner_type, owner_id).await?;
    for (position, url) in remaining.iter().enumerate() {
        sqlx::query(
            "UPDATE images SET position = ? WHERE owner_type = ? AND owner_id = ? AND url = ?",
        )
        .bind(position as i64)
        .bind(owner_type)
        .bind(owner_id)
        .bind(url)
        .execute(&mut **tx)
        .await?;
    }

    Ok(true)
}

/// Replace an owner's whole image set
pub(crate) async fn replace_urls(
    tx: &mut Transaction<'_, Sqlite>,
    owner_type: ImageOwner,
    owner_id: i64,
    urls: &[String],
) -> EngineResult<()> {
    sqlx::query("DELETE FROM images WHERE owner_type = ? AND owner_id = ?")
        .bind(owner_type)
        .bind(owner_id)
        .execute(&mut **tx)
        .await?;

    for (position, url) in urls.iter().enumerate() {
        sqlx::query(
            "INSERT INTO images (owner_type, owner_id, url, position) VALUES (?, ?, ?, ?)",
        )
        .bind(owner_type)
        .bind(owner_id)
        .bind(url)
        .bind(position as i64)
        .execute(&mut **tx)
        .await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/srv/uploads";

    #[test]
    fn test_resolves_paths_under_upload_prefix() {
        assert_eq!(
            resolve_upload_path(Path::new(ROOT), "/uploads/2026/08/a.jpg"),
            Some(PathBuf::from("/srv/uploads/2026/08/a.jpg"))
        );
    }

    #[test]
    fn test_rejects_urls_outside_prefix() {
        assert_eq!(resolve_upload_path(Path::new(ROOT), "/etc/passwd"), None);
        assert_eq!(resolve_upload_path(Path::new(ROOT), "uploads/a.jpg"), None);
    }

    #[test]
    fn test_rejects_traversal_segments() {
        assert_eq!(
            resolve_upload_path(Path::new(ROOT), "/uploads/../secret.jpg"),
            None
        );
        assert_eq!(
            resolve_upload_path(Path::new(ROOT), "/uploads/a/../../b.jpg"),
            None
        );
    }
}
