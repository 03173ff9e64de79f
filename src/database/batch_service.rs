//! Batch inspection coordinator
//!
//! One-shot creation of several already-complete inspection records,
//! one per piece of equipment at a shared physical location. The whole
//! list runs inside a single transaction: any invalid equipment
//! reference aborts the batch and nothing is persisted. Each entry
//! branches exactly as a finalize would — abnormal results open a
//! ticket and mark the equipment, normal results recompute a previously
//! abnormal equipment.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::models::{
    BatchInspectionRequest, BatchInspectionResult, EquipmentStatus, ImageOwner, OverallResult,
};

use super::equipment_status;
use super::image_reference;
use super::inspection_service;
use super::issue_service;

/// Service owning atomic multi-equipment inspection creation
#[derive(Clone, Debug)]
pub struct BatchInspectionCoordinator {
    pool: SqlitePool,
}

impl BatchInspectionCoordinator {
    /// Create a new batch inspection coordinator
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create finalized inspection records for every equipment at one
    /// location, atomically.
    pub async fn create_for_location(
        &self,
        request: &BatchInspectionRequest,
        inspector_id: i64,
    ) -> EngineResult<BatchInspectionResult> {
        if request.equipments.is_empty() {
            return Err(EngineError::Validation {
                details: "batch must contain at least one equipment entry".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for item in &request.equipments {
            if item.checklist_results.is_empty() {
                return Err(EngineError::Validation {
                    details: format!(
                        "equipment {} carries an empty checklist",
                        item.equipment_id
                    ),
                });
            }
            // One visit produces at most one record per equipment;
            // a repeated id would open duplicate tickets.
            if !seen.insert(item.equipment_id) {
                return Err(EngineError::Validation {
                    details: format!(
                        "equipment {} appears more than once in the batch",
                        item.equipment_id
                    ),
                });
            }
        }

        let mut tx = self.pool.begin().await?;

        let mut normal_count = 0;
        let mut abnormal_count = 0;
        let mut issues_created = 0;
        let mut records = Vec::with_capacity(request.equipments.len());

        for item in &request.equipments {
            // A missing equipment row drops the transaction and with it
            // every record created so far.
            let equipment = equipment_status::get_equipment(&mut tx, item.equipment_id).await?;

            let checklist = serde_json::to_value(&item.checklist_results)?;
            let now = Utc::now();

            let result = sqlx::query(
                r#"
                INSERT INTO inspection_logs
                    (equipment_id, inspector_id, state, overall_result, checklist_results,
                     inspection_image_url, location, created_at, finalized_at)
                VALUES (?, ?, 'FINALIZED', ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(item.equipment_id)
            .bind(inspector_id)
            .bind(item.overall_result)
            .bind(checklist)
            .bind(item.inspection_image_url.as_deref())
            .bind(&request.location)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            let inspection_id = result.last_insert_rowid();

            if let Some(url) = &item.inspection_image_url {
                image_reference::append_url(&mut tx, ImageOwner::Inspection, inspection_id, url)
                    .await?;
            }

            match item.overall_result {
                OverallResult::Abnormal => {
                    let description = item.issue_description.clone().unwrap_or_default();
                    let issue_images: Vec<String> =
                        item.issue_image_url.iter().cloned().collect();
                    let issue_id = issue_service::create_issue(
                        &mut tx,
                        item.equipment_id,
                        Some(inspection_id),
                        inspector_id,
                        &description,
                        &issue_images,
                    )
                    .await?;

                    sqlx::query("UPDATE inspection_logs SET issue_id = ? WHERE id = ?")
                        .bind(issue_id)
                        .bind(inspection_id)
                        .execute(&mut *tx)
                        .await?;

                    equipment_status::mark_abnormal(&mut tx, item.equipment_id).await?;
                    issues_created += 1;
                    abnormal_count += 1;
                }
                OverallResult::Normal => {
                    if equipment.status == EquipmentStatus::Abnormal {
                        equipment_status::clear_if_no_open_issues(&mut tx, item.equipment_id)
                            .await?;
                    }
                    normal_count += 1;
                }
            }

            equipment_status::touch_last_inspected(&mut tx, item.equipment_id).await?;

            records.push(inspection_service::load_inspection(&mut tx, inspection_id).await?);
        }

        tx.commit().await?;

        info!(
            "Batch inspection at '{}': {} records ({} normal, {} abnormal, {} issues)",
            request.location,
            records.len(),
            normal_count,
            abnormal_count,
            issues_created
        );

        Ok(BatchInspectionResult {
            normal_count,
            abnormal_count,
            issues_created,
            records,
        })
    }
}
