//! Inspection record manager
//!
//! Owns the draft -> finalize state machine of inspection records and
//! the incremental image attach/detach operations on a draft. Finalize
//! is a one-way guarded transition: the row is updated only while still
//! in DRAFT, and a zero-row update is reported as an invalid state so
//! two concurrent finalize calls can never both succeed.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::{Sqlite, Transaction};
use tracing::info;

use crate::authorization::{resolve_access, RecordScope};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Equipment, EquipmentStatus, FinalizeOutcome, FinalizeRequest, ImageOwner, InspectionDetail,
    InspectionLog, InspectionState, OverallResult, Principal,
};

use super::equipment_status;
use super::image_reference::{self, ImageReferenceTracker};
use super::issue_service;

const INSPECTION_COLUMNS: &str = "id, equipment_id, inspector_id, state, overall_result, \
     checklist_results, inspection_image_url, location, issue_id, created_at, finalized_at";

/// Service owning inspection record lifecycle operations
#[derive(Clone, Debug)]
pub struct InspectionRecordManager {
    pool: SqlitePool,
    tracker: ImageReferenceTracker,
}

impl InspectionRecordManager {
    /// Create a new inspection record manager
    pub fn new(pool: SqlitePool, tracker: ImageReferenceTracker) -> Self {
        Self { pool, tracker }
    }

    /// Create a draft inspection for one piece of equipment.
    ///
    /// The draft carries no checklist payload and no images; the
    /// creating inspector owns it from here on.
    pub async fn create_empty_inspection(
        &self,
        equipment_id: i64,
        inspector_id: i64,
    ) -> EngineResult<InspectionLog> {
        let mut tx = self.pool.begin().await?;

        equipment_status::get_equipment(&mut tx, equipment_id).await?;

        let result = sqlx::query(
            r#"
            INSERT INTO inspection_logs (equipment_id, inspector_id, state, created_at)
            VALUES (?, ?, 'DRAFT', ?)
            "#,
        )
        .bind(equipment_id)
        .bind(inspector_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        let inspection_id = result.last_insert_rowid();
        let inspection = load_inspection(&mut tx, inspection_id).await?;
        tx.commit().await?;

        info!(
            "Created draft inspection {} for equipment {} by inspector {}",
            inspection_id, equipment_id, inspector_id
        );

        Ok(inspection)
    }

    /// Get an inspection record with its image list
    pub async fn get_inspection(&self, inspection_id: i64) -> EngineResult<InspectionDetail> {
        let mut tx = self.pool.begin().await?;
        let inspection = load_inspection(&mut tx, inspection_id).await?;
        let image_urls =
            image_reference::list_urls(&mut tx, ImageOwner::Inspection, inspection_id).await?;
        tx.commit().await?;

        Ok(InspectionDetail {
            inspection,
            image_urls,
        })
    }

    /// List inspection records for one piece of equipment, newest first
    pub async fn list_inspections_for_equipment(
        &self,
        equipment_id: i64,
    ) -> EngineResult<Vec<InspectionLog>> {
        let results = sqlx::query_as::<_, InspectionLog>(&format!(
            "SELECT {INSPECTION_COLUMNS} FROM inspection_logs \
             WHERE equipment_id = ? ORDER BY created_at DESC, id DESC"
        ))
        .bind(equipment_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(results)
    }

    /// Attach an image to a draft inspection record.
    ///
    /// Finalized records are immutable; image edits on them are
    /// rejected the same way a second finalize would be.
    pub async fn append_image(
        &self,
        inspection_id: i64,
        url: &str,
        principal: &Principal,
    ) -> EngineResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let (inspection, equipment) = load_scoped(&mut tx, inspection_id).await?;
        authorize(principal, &inspection, &equipment, "append inspection image")?;
        require_draft(&inspection, "append inspection image")?;

        let existing =
            image_reference::list_urls(&mut tx, ImageOwner::Inspection, inspection_id).await?;
        if existing.iter().any(|u| u == url) {
            return Err(EngineError::ImageAlreadyExists {
                url: url.to_string(),
            });
        }

        image_reference::append_url(&mut tx, ImageOwner::Inspection, inspection_id, url).await?;
        refresh_legacy_mirror(&mut tx, inspection_id).await?;
        let urls =
            image_reference::list_urls(&mut tx, ImageOwner::Inspection, inspection_id).await?;
        tx.commit().await?;

        info!("Appended image to inspection {}: {}", inspection_id, url);

        Ok(urls)
    }

    /// Detach an image from a draft inspection record.
    ///
    /// The physical file is deleted only after the transaction has
    /// committed, and only if no other record still references it.
    pub async fn remove_image(
        &self,
        inspection_id: i64,
        url: &str,
        principal: &Principal,
    ) -> EngineResult<Vec<String>> {
        let mut tx = self.pool.begin().await?;

        let (inspection, equipment) = load_scoped(&mut tx, inspection_id).await?;
        authorize(principal, &inspection, &equipment, "remove inspection image")?;
        require_draft(&inspection, "remove inspection image")?;

        let removed =
            image_reference::remove_url(&mut tx, ImageOwner::Inspection, inspection_id, url)
                .await?;
        if !removed {
            return Err(EngineError::ImageNotFound {
                url: url.to_string(),
            });
        }

        refresh_legacy_mirror(&mut tx, inspection_id).await?;
        let urls =
            image_reference::list_urls(&mut tx, ImageOwner::Inspection, inspection_id).await?;
        tx.commit().await?;

        info!("Removed image from inspection {}: {}", inspection_id, url);

        // Filesystem cleanup runs outside the transaction by design
        self.tracker.safe_delete(url).await;

        Ok(urls)
    }

    /// One-time finalize transition.
    ///
    /// Writes the real checklist payload, opens a hazard ticket when
    /// the result is abnormal, recomputes equipment health when a
    /// previously abnormal equipment now reads normal, and stamps
    /// `last_inspected_at` in every case.
    pub async fn finalize(
        &self,
        inspection_id: i64,
        request: &FinalizeRequest,
        principal: &Principal,
    ) -> EngineResult<FinalizeOutcome> {
        if request.checklist_results.is_empty() {
            return Err(EngineError::Validation {
                details: "checklist_results must not be empty".to_string(),
            });
        }

        let mut tx = self.pool.begin().await?;

        let (inspection, equipment) = load_scoped(&mut tx, inspection_id).await?;
        authorize(principal, &inspection, &equipment, "finalize inspection")?;

        let checklist = serde_json::to_value(&request.checklist_results)?;

        // Guarded one-way transition; losing a concurrent race shows up
        // as zero rows affected, never as a duplicate finalization.
        let result = sqlx::query(
            r#"
            UPDATE inspection_logs
            SET state = 'FINALIZED', overall_result = ?, checklist_results = ?, finalized_at = ?
            WHERE id = ? AND state = 'DRAFT'
            "#,
        )
        .bind(request.overall_result)
        .bind(checklist)
        .bind(Utc::now())
        .bind(inspection_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::InvalidState {
                operation: "finalize inspection".to_string(),
                expected: "DRAFT".to_string(),
            });
        }

        let issue_id = match request.overall_result {
            OverallResult::Abnormal => {
                let description = request.issue_description.clone().unwrap_or_default();
                let issue_id = issue_service::create_issue(
                    &mut tx,
                    equipment.id,
                    Some(inspection_id),
                    principal.id,
                    &description,
                    &request.issue_image_urls,
                )
                .await?;

                sqlx::query("UPDATE inspection_logs SET issue_id = ? WHERE id = ?")
                    .bind(issue_id)
                    .bind(inspection_id)
                    .execute(&mut *tx)
                    .await?;

                equipment_status::mark_abnormal(&mut tx, equipment.id).await?;
                Some(issue_id)
            }
            OverallResult::Normal => {
                if equipment.status == EquipmentStatus::Abnormal {
                    equipment_status::clear_if_no_open_issues(&mut tx, equipment.id).await?;
                }
                None
            }
        };

        equipment_status::touch_last_inspected(&mut tx, equipment.id).await?;

        let finalized = load_inspection(&mut tx, inspection_id).await?;
        tx.commit().await?;

        info!(
            "Finalized inspection {} ({:?}), issue: {:?}",
            inspection_id, request.overall_result, issue_id
        );

        Ok(FinalizeOutcome {
            inspection: finalized,
            issue_id,
        })
    }
}

/// Load an inspection row inside the caller's transaction
pub(crate) async fn load_inspection(
    tx: &mut Transaction<'_, Sqlite>,
    inspection_id: i64,
) -> EngineResult<InspectionLog> {
    sqlx::query_as::<_, InspectionLog>(&format!(
        "SELECT {INSPECTION_COLUMNS} FROM inspection_logs WHERE id = ?"
    ))
    .bind(inspection_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::InspectionNotFound { inspection_id })
}

/// Load an inspection together with its equipment for scope checks
async fn load_scoped(
    tx: &mut Transaction<'_, Sqlite>,
    inspection_id: i64,
) -> EngineResult<(InspectionLog, Equipment)> {
    let inspection = load_inspection(tx, inspection_id).await?;
    let equipment = equipment_status::get_equipment(tx, inspection.equipment_id).await?;
    Ok((inspection, equipment))
}

fn require_draft(inspection: &InspectionLog, operation: &str) -> EngineResult<()> {
    if inspection.state != InspectionState::Draft {
        return Err(EngineError::InvalidState {
            operation: operation.to_string(),
            expected: "DRAFT".to_string(),
        });
    }
    Ok(())
}

fn authorize(
    principal: &Principal,
    inspection: &InspectionLog,
    equipment: &Equipment,
    operation: &str,
) -> EngineResult<()> {
    let scope = RecordScope {
        equipment_factory_id: equipment.factory_id,
        owner_id: inspection.inspector_id,
    };
    resolve_access(principal, &scope).require(operation)
}

/// Keep the legacy single-image column mirroring the first attached image
async fn refresh_legacy_mirror(
    tx: &mut Transaction<'_, Sqlite>,
    inspection_id: i64,
) -> EngineResult<()> {
    let urls = image_reference::list_urls(tx, ImageOwner::Inspection, inspection_id).await?;
    sqlx::query("UPDATE inspection_logs SET inspection_image_url = ? WHERE id = ?")
        .bind(urls.first().map(String::as_str))
        .bind(inspection_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
