//! Issue lifecycle manager
//!
//! Drives a hazard ticket through PENDING -> PENDING_AUDIT -> CLOSED,
//! with a rejected audit rolling the ticket back to PENDING and
//! discarding all handling data. Tickets are only ever created as the
//! side effect of an abnormal inspection result, so creation lives here
//! as a crate-internal helper called by the inspection and batch
//! services inside their own transactions.
//!
//! Every transition is a guarded UPDATE against the expected current
//! status; zero rows affected means another caller got there first and
//! is reported as an invalid state.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::info;

use crate::authorization::{resolve_access, RecordScope};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    AuditRequest, Equipment, HandleRequest, ImageOwner, Issue, IssueDetail, Principal, Severity,
};

use super::equipment_status;
use super::image_reference::{self, ImageReferenceTracker};

const ISSUE_COLUMNS: &str = "id, equipment_id, inspection_id, reporter_id, description, status, \
     handler_id, handled_at, solution, auditor_id, audited_at, audit_note, \
     issue_image_url, fixed_image_url, created_at, updated_at";

/// Description keywords that mark a hazard as high severity outright
const CRITICAL_KEYWORDS: &[&str] = &[
    "火灾", "明火", "爆炸", "泄漏", "漏电", "短路", "fire", "explosion", "leak",
];

/// Open tickets older than this are high severity regardless of wording
const HIGH_SEVERITY_AGE_DAYS: i64 = 30;
const MEDIUM_SEVERITY_AGE_DAYS: i64 = 7;

/// Service owning hazard ticket transitions
#[derive(Clone, Debug)]
pub struct IssueLifecycleManager {
    pool: SqlitePool,
    tracker: ImageReferenceTracker,
}

impl IssueLifecycleManager {
    /// Create a new issue lifecycle manager
    pub fn new(pool: SqlitePool, tracker: ImageReferenceTracker) -> Self {
        Self { pool, tracker }
    }

    /// Get a hazard ticket with image lists and derived severity
    pub async fn get_issue(&self, issue_id: i64) -> EngineResult<IssueDetail> {
        let mut tx = self.pool.begin().await?;
        let issue = load_issue(&mut tx, issue_id).await?;
        let detail = load_detail(&mut tx, issue).await?;
        tx.commit().await?;
        Ok(detail)
    }

    /// List hazard tickets for one piece of equipment, newest first
    pub async fn list_issues_for_equipment(
        &self,
        equipment_id: i64,
    ) -> EngineResult<Vec<IssueDetail>> {
        let mut tx = self.pool.begin().await?;

        let issues = sqlx::query_as::<_, Issue>(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues \
             WHERE equipment_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(equipment_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut details = Vec::with_capacity(issues.len());
        for issue in issues {
            details.push(load_detail(&mut tx, issue).await?);
        }
        tx.commit().await?;

        Ok(details)
    }

    /// Record how a pending hazard was fixed and hand it to audit
    pub async fn handle(
        &self,
        issue_id: i64,
        request: &HandleRequest,
        principal: &Principal,
    ) -> EngineResult<Issue> {
        let mut tx = self.pool.begin().await?;

        let (issue, equipment) = load_scoped(&mut tx, issue_id).await?;
        authorize(principal, &issue, &equipment, "handle issue")?;

        let result = sqlx::query(
            r#"
            UPDATE issues
            SET status = 'PENDING_AUDIT', handler_id = ?, handled_at = ?, solution = ?,
                updated_at = ?
            WHERE id = ? AND status = 'PENDING'
            "#,
        )
        .bind(principal.id)
        .bind(Utc::now())
        .bind(&request.solution)
        .bind(Utc::now())
        .bind(issue_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::InvalidState {
                operation: "handle issue".to_string(),
                expected: "PENDING".to_string(),
            });
        }

        let discarded =
            image_reference::list_urls(&mut tx, ImageOwner::IssueFixed, issue_id).await?;
        image_reference::replace_urls(
            &mut tx,
            ImageOwner::IssueFixed,
            issue_id,
            &request.fixed_image_urls,
        )
        .await?;
        sqlx::query("UPDATE issues SET fixed_image_url = ? WHERE id = ?")
            .bind(request.fixed_image_urls.first().map(String::as_str))
            .bind(issue_id)
            .execute(&mut *tx)
            .await?;

        let updated = load_issue(&mut tx, issue_id).await?;
        tx.commit().await?;

        info!("Issue {} handled by {}", issue_id, principal.id);

        // Replaced fix images lost their last reference here; filesystem
        // cleanup runs outside the transaction
        for url in &discarded {
            if !request.fixed_image_urls.contains(url) {
                self.tracker.safe_delete(url).await;
            }
        }

        Ok(updated)
    }

    /// Audit a handled hazard: approve to close it, reject to send it
    /// back to handling with all handling data discarded.
    pub async fn audit(
        &self,
        issue_id: i64,
        request: &AuditRequest,
        principal: &Principal,
    ) -> EngineResult<Issue> {
        let mut tx = self.pool.begin().await?;

        let (issue, equipment) = load_scoped(&mut tx, issue_id).await?;
        authorize(principal, &issue, &equipment, "audit issue")?;

        let mut discarded: Vec<String> = Vec::new();

        if request.approved {
            let result = sqlx::query(
                r#"
                UPDATE issues
                SET status = 'CLOSED', auditor_id = ?, audited_at = ?, audit_note = ?,
                    updated_at = ?
                WHERE id = ? AND status = 'PENDING_AUDIT'
                "#,
            )
            .bind(principal.id)
            .bind(Utc::now())
            .bind(request.audit_note.as_deref())
            .bind(Utc::now())
            .bind(issue_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(EngineError::InvalidState {
                    operation: "audit issue".to_string(),
                    expected: "PENDING_AUDIT".to_string(),
                });
            }

            // Closing may have been the last open ticket for this equipment
            equipment_status::clear_if_no_open_issues(&mut tx, issue.equipment_id).await?;

            info!("Issue {} closed by auditor {}", issue_id, principal.id);
        } else {
            let result = sqlx::query(
                r#"
                UPDATE issues
                SET status = 'PENDING', handler_id = NULL, handled_at = NULL, solution = NULL,
                    auditor_id = NULL, audited_at = NULL, audit_note = NULL,
                    fixed_image_url = NULL, updated_at = ?
                WHERE id = ? AND status = 'PENDING_AUDIT'
                "#,
            )
            .bind(Utc::now())
            .bind(issue_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(EngineError::InvalidState {
                    operation: "audit issue".to_string(),
                    expected: "PENDING_AUDIT".to_string(),
                });
            }

            // Hazard must be re-handled from scratch
            discarded =
                image_reference::list_urls(&mut tx, ImageOwner::IssueFixed, issue_id).await?;
            image_reference::replace_urls(&mut tx, ImageOwner::IssueFixed, issue_id, &[]).await?;

            // Ticket is still open, equipment status is untouched

            info!(
                "Issue {} rejected by auditor {}, back to PENDING",
                issue_id, principal.id
            );
        }

        let updated = load_issue(&mut tx, issue_id).await?;
        tx.commit().await?;

        // Discarded fix images are reclaimed only once the rollback is
        // durable, and only while nothing else references them
        for url in &discarded {
            self.tracker.safe_delete(url).await;
        }

        Ok(updated)
    }
}

/// Open a PENDING hazard ticket inside the caller's transaction.
///
/// Only the inspection and batch services call this; a ticket never
/// comes into existence other than from an abnormal inspection result.
pub(crate) async fn create_issue(
    tx: &mut Transaction<'_, Sqlite>,
    equipment_id: i64,
    inspection_id: Option<i64>,
    reporter_id: i64,
    description: &str,
    image_urls: &[String],
) -> EngineResult<i64> {
    let now = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO issues
            (equipment_id, inspection_id, reporter_id, description, status,
             issue_image_url, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'PENDING', ?, ?, ?)
        "#,
    )
    .bind(equipment_id)
    .bind(inspection_id)
    .bind(reporter_id)
    .bind(description)
    .bind(image_urls.first().map(String::as_str))
    .bind(now)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    let issue_id = result.last_insert_rowid();
    image_reference::replace_urls(tx, ImageOwner::Issue, issue_id, image_urls).await?;

    info!(
        "Opened issue {} for equipment {} (reporter {})",
        issue_id, equipment_id, reporter_id
    );

    Ok(issue_id)
}

/// Load an issue row inside the caller's transaction
pub(crate) async fn load_issue(
    tx: &mut Transaction<'_, Sqlite>,
    issue_id: i64,
) -> EngineResult<Issue> {
    sqlx::query_as::<_, Issue>(&format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?"))
        .bind(issue_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(EngineError::IssueNotFound { issue_id })
}

async fn load_scoped(
    tx: &mut Transaction<'_, Sqlite>,
    issue_id: i64,
) -> EngineResult<(Issue, Equipment)> {
    let issue = load_issue(tx, issue_id).await?;
    let equipment = equipment_status::get_equipment(tx, issue.equipment_id).await?;
    Ok((issue, equipment))
}

async fn load_detail(
    tx: &mut Transaction<'_, Sqlite>,
    issue: Issue,
) -> EngineResult<IssueDetail> {
    let issue_image_urls = image_reference::list_urls(tx, ImageOwner::Issue, issue.id).await?;
    let fixed_image_urls =
        image_reference::list_urls(tx, ImageOwner::IssueFixed, issue.id).await?;
    let severity = derive_severity(&issue.description, issue.created_at, Utc::now());
    Ok(IssueDetail {
        issue,
        issue_image_urls,
        fixed_image_urls,
        severity,
    })
}

fn authorize(
    principal: &Principal,
    issue: &Issue,
    equipment: &Equipment,
    operation: &str,
) -> EngineResult<()> {
    let scope = RecordScope {
        equipment_factory_id: equipment.factory_id,
        owner_id: issue.reporter_id,
    };
    resolve_access(principal, &scope).require(operation)
}

/// Presentational severity, derived from wording and ticket age.
/// Never persisted and never part of the lifecycle invariants.
pub fn derive_severity(
    description: &str,
    created_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Severity {
    if CRITICAL_KEYWORDS.iter().any(|k| description.contains(k)) {
        return Severity::High;
    }

    let age_days = (now - created_at).num_days();
    if age_days > HIGH_SEVERITY_AGE_DAYS {
        Severity::High
    } else if age_days > MEDIUM_SEVERITY_AGE_DAYS {
        Severity::Medium
    } else {
        Severity::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_critical_keyword_is_high_regardless_of_age() {
        let now = Utc::now();
        assert_eq!(derive_severity("燃气泄漏，现场有异味", now, now), Severity::High);
        assert_eq!(derive_severity("sprinkler line leak", now, now), Severity::High);
    }

    #[test]
    fn test_age_thresholds() {
        let now = Utc::now();
        assert_eq!(derive_severity("压力不足", now, now), Severity::Low);
        assert_eq!(
            derive_severity("压力不足", now - Duration::days(10), now),
            Severity::Medium
        );
        assert_eq!(
            derive_severity("压力不足", now - Duration::days(45), now),
            Severity::High
        );
    }

    #[test]
    fn test_threshold_boundaries_are_exclusive() {
        let now = Utc::now();
        assert_eq!(
            derive_severity("标识脱落", now - Duration::days(7), now),
            Severity::Low
        );
        assert_eq!(
            derive_severity("标识脱落", now - Duration::days(30), now),
            Severity::Medium
        );
    }
}
