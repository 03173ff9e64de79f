//! Batch inspection atomicity tests
//!
//! A batch submission is all-or-nothing: one invalid equipment
//! reference anywhere in the list must leave zero rows behind.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use firesafe::database::{self, BatchInspectionCoordinator};
use firesafe::models::{
    BatchInspectionItem, BatchInspectionRequest, ChecklistItem, EquipmentStatus, InspectionState,
    OverallResult,
};
use firesafe::EngineError;

struct TestEngine {
    pool: SqlitePool,
    batches: BatchInspectionCoordinator,
}

impl TestEngine {
    async fn new() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        database::run_migrations(&pool).await?;
        let batches = BatchInspectionCoordinator::new(pool.clone());
        Ok(Self { pool, batches })
    }

    async fn add_equipment(&self, id: i64, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO equipment (id, name, factory_id, status, created_at) \
             VALUES (?, ?, 1, 'NORMAL', ?)",
        )
        .bind(id)
        .bind(name)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn equipment_status(&self, id: i64) -> Result<EquipmentStatus> {
        let status = sqlx::query_scalar("SELECT status FROM equipment WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(status)
    }
}

fn item(equipment_id: i64, result: OverallResult) -> BatchInspectionItem {
    let (check, description) = match result {
        OverallResult::Normal => ("PASS", None),
        OverallResult::Abnormal => ("FAIL", Some("外观破损".to_string())),
    };
    BatchInspectionItem {
        equipment_id,
        overall_result: result,
        checklist_results: vec![ChecklistItem {
            item: "外观检查".to_string(),
            result: check.to_string(),
            note: None,
        }],
        inspection_image_url: None,
        issue_description: description,
        issue_image_url: None,
    }
}

/// The 3rd of 5 entries references missing equipment: nothing persists
#[tokio::test]
async fn test_invalid_equipment_rolls_back_whole_batch() -> Result<()> {
    let engine = TestEngine::new().await?;
    for (id, name) in [(1, "灭火器"), (2, "消火栓"), (4, "喷淋"), (5, "烟感")] {
        engine.add_equipment(id, name).await?;
    }

    let request = BatchInspectionRequest {
        location: "三号楼二层".to_string(),
        equipments: vec![
            item(1, OverallResult::Normal),
            item(2, OverallResult::Abnormal),
            item(3, OverallResult::Normal), // does not exist
            item(4, OverallResult::Abnormal),
            item(5, OverallResult::Normal),
        ],
    };

    let result = engine.batches.create_for_location(&request, 3).await;
    assert!(matches!(
        result,
        Err(EngineError::EquipmentNotFound { equipment_id: 3 })
    ));

    assert_eq!(engine.count("inspection_logs").await?, 0);
    assert_eq!(engine.count("issues").await?, 0);
    assert_eq!(engine.count("images").await?, 0);
    // Equipment 2 was listed abnormal but the batch never committed
    assert_eq!(engine.equipment_status(2).await?, EquipmentStatus::Normal);

    Ok(())
}

#[tokio::test]
async fn test_successful_batch_reports_counts_and_marks_equipment() -> Result<()> {
    let engine = TestEngine::new().await?;
    for (id, name) in [(1, "灭火器"), (2, "消火栓"), (3, "喷淋")] {
        engine.add_equipment(id, name).await?;
    }

    let request = BatchInspectionRequest {
        location: "一号楼大厅".to_string(),
        equipments: vec![
            item(1, OverallResult::Normal),
            item(2, OverallResult::Abnormal),
            item(3, OverallResult::Normal),
        ],
    };

    let summary = engine.batches.create_for_location(&request, 3).await?;
    assert_eq!(summary.normal_count, 2);
    assert_eq!(summary.abnormal_count, 1);
    assert_eq!(summary.issues_created, 1);
    assert_eq!(summary.records.len(), 3);

    for record in &summary.records {
        assert_eq!(record.state, InspectionState::Finalized);
        assert_eq!(record.location.as_deref(), Some("一号楼大厅"));
        assert_eq!(record.inspector_id, 3);
    }

    let abnormal = summary
        .records
        .iter()
        .find(|r| r.equipment_id == 2)
        .unwrap();
    assert!(abnormal.issue_id.is_some());

    assert_eq!(engine.equipment_status(1).await?, EquipmentStatus::Normal);
    assert_eq!(engine.equipment_status(2).await?, EquipmentStatus::Abnormal);

    // Every equipment got its inspection timestamp
    let stamped: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM equipment WHERE last_inspected_at IS NOT NULL",
    )
    .fetch_one(&engine.pool)
    .await?;
    assert_eq!(stamped, 3);

    Ok(())
}

#[tokio::test]
async fn test_batch_image_urls_are_recorded() -> Result<()> {
    let engine = TestEngine::new().await?;
    engine.add_equipment(1, "灭火器").await?;

    let mut entry = item(1, OverallResult::Abnormal);
    entry.inspection_image_url = Some("/uploads/site.jpg".to_string());
    entry.issue_image_url = Some("/uploads/defect.jpg".to_string());

    let request = BatchInspectionRequest {
        location: "仓库".to_string(),
        equipments: vec![entry],
    };

    let summary = engine.batches.create_for_location(&request, 3).await?;
    let record = &summary.records[0];
    assert_eq!(record.inspection_image_url.as_deref(), Some("/uploads/site.jpg"));

    let issue_image: Option<String> =
        sqlx::query_scalar("SELECT issue_image_url FROM issues WHERE id = ?")
            .bind(record.issue_id.unwrap())
            .fetch_one(&engine.pool)
            .await?;
    assert_eq!(issue_image.as_deref(), Some("/uploads/defect.jpg"));

    Ok(())
}

#[tokio::test]
async fn test_empty_batch_is_rejected_before_any_write() -> Result<()> {
    let engine = TestEngine::new().await?;

    let request = BatchInspectionRequest {
        location: "仓库".to_string(),
        equipments: vec![],
    };
    let result = engine.batches.create_for_location(&request, 3).await;
    assert!(matches!(result, Err(EngineError::Validation { .. })));

    Ok(())
}

/// One visit means one record per equipment; a repeated id would open
/// two tickets for the same hazard
#[tokio::test]
async fn test_duplicate_equipment_is_rejected_before_any_write() -> Result<()> {
    let engine = TestEngine::new().await?;
    engine.add_equipment(1, "灭火器").await?;
    engine.add_equipment(2, "消火栓").await?;

    let request = BatchInspectionRequest {
        location: "仓库".to_string(),
        equipments: vec![
            item(1, OverallResult::Normal),
            item(2, OverallResult::Abnormal),
            item(2, OverallResult::Abnormal),
        ],
    };
    let result = engine.batches.create_for_location(&request, 3).await;
    assert!(matches!(result, Err(EngineError::Validation { .. })));

    assert_eq!(engine.count("inspection_logs").await?, 0);
    assert_eq!(engine.count("issues").await?, 0);
    assert_eq!(engine.equipment_status(2).await?, EquipmentStatus::Normal);

    Ok(())
}

#[tokio::test]
async fn test_incomplete_item_is_rejected_before_any_write() -> Result<()> {
    let engine = TestEngine::new().await?;
    engine.add_equipment(1, "灭火器").await?;

    let mut entry = item(1, OverallResult::Normal);
    entry.checklist_results.clear();

    let request = BatchInspectionRequest {
        location: "仓库".to_string(),
        equipments: vec![entry],
    };
    let result = engine.batches.create_for_location(&request, 3).await;
    assert!(matches!(result, Err(EngineError::Validation { .. })));
    assert_eq!(engine.count("inspection_logs").await?, 0);

    Ok(())
}
