//! Models module for the inspection engine
//!
//! This module contains the data structures used to represent
//! equipment, inspection records, hazard tickets and image ownership in
//! the database, plus the request/result payload types exchanged with
//! the web boundary.

pub mod lifecycle_models;

// Re-export commonly used types for convenience
pub use lifecycle_models::{
    AuditRequest, BatchInspectionItem, BatchInspectionRequest, BatchInspectionResult,
    ChecklistItem, Equipment, EquipmentStatus, FinalizeOutcome, FinalizeRequest, HandleRequest,
    ImageOwner, ImageRow, InspectionDetail, InspectionLog, InspectionState, Issue, IssueDetail,
    IssueStatus, OverallResult, Principal, Role, Severity,
};
