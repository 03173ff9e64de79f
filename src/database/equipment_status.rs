//! Equipment status resolver
//!
//! Equipment health is derived state: a piece of equipment is ABNORMAL
//! exactly while at least one open hazard ticket is attached to it.
//! Both operations run on the caller's transaction so the status is
//! never stale relative to the ticket mutation that triggered them.
//! SCRAPPED equipment is outside the health machine and is never
//! written.

use chrono::Utc;
use sqlx::{Sqlite, Transaction};
use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::models::Equipment;

/// Load an equipment row inside the caller's transaction
pub(crate) async fn get_equipment(
    tx: &mut Transaction<'_, Sqlite>,
    equipment_id: i64,
) -> EngineResult<Equipment> {
    sqlx::query_as::<_, Equipment>(
        r#"
        SELECT id, name, factory_id, status, last_inspected_at, created_at
        FROM equipment
        WHERE id = ?
        "#,
    )
    .bind(equipment_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(EngineError::EquipmentNotFound { equipment_id })
}

/// Unconditionally mark equipment ABNORMAL after an abnormal report.
///
/// One abnormal report is sufficient proof; the open-ticket count is
/// not consulted.
pub(crate) async fn mark_abnormal(
    tx: &mut Transaction<'_, Sqlite>,
    equipment_id: i64,
) -> EngineResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE equipment
        SET status = 'ABNORMAL'
        WHERE id = ? AND status != 'SCRAPPED'
        "#,
    )
    .bind(equipment_id)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() > 0 {
        info!("Equipment {} marked ABNORMAL", equipment_id);
    }

    Ok(())
}

/// Recompute equipment status after a ticket cleared or a normal
/// result came in: NORMAL iff no open tickets remain.
pub(crate) async fn clear_if_no_open_issues(
    tx: &mut Transaction<'_, Sqlite>,
    equipment_id: i64,
) -> EngineResult<()> {
    let open: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM issues
        WHERE equipment_id = ?
          AND status IN ('PENDING', 'IN_PROGRESS', 'PENDING_AUDIT')
        "#,
    )
    .bind(equipment_id)
    .fetch_one(&mut **tx)
    .await?;

    if open == 0 {
        let result = sqlx::query(
            r#"
            UPDATE equipment
            SET status = 'NORMAL'
            WHERE id = ? AND status != 'SCRAPPED'
            "#,
        )
        .bind(equipment_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() > 0 {
            info!("Equipment {} recomputed to NORMAL", equipment_id);
        }
    } else {
        info!(
            "Equipment {} stays ABNORMAL ({} open issue(s))",
            equipment_id, open
        );
    }

    Ok(())
}

/// Stamp the last-inspected timestamp
pub(crate) async fn touch_last_inspected(
    tx: &mut Transaction<'_, Sqlite>,
    equipment_id: i64,
) -> EngineResult<()> {
    sqlx::query("UPDATE equipment SET last_inspected_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(equipment_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
