//! Vehicle listing claim and verification state
//!
//! The `vehicles` table is owned by the listing backend; this service reads
//! the user-declared attributes (the claim) and owns the verification
//! columns (the state).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use carvet_common::events::VerificationStatus;

/// User-declared attributes of a listing, as entered by the seller
///
/// Everything except manufacturer and model is optional; the vision report
/// can only be checked against fields the user actually filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingClaim {
    /// Listing UUID
    pub guid: Uuid,
    /// Manufacturer / brand name
    pub manufacturer: String,
    /// Model name
    pub model: String,
    /// Vehicle type (car / van / suv / motorcycle / truck / ...)
    pub vehicle_type: Option<String>,
    /// Fuel type (petrol / diesel / electric / hybrid)
    pub fuel_type: Option<String>,
    /// Model year
    pub year: Option<i64>,
    /// Registration plate number
    pub plate_number: Option<String>,
}

/// Current verification state of a listing
///
/// Mutated only by the verification engine, and only through the atomic
/// update paths in `db::attempts`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationState {
    /// Lifecycle status
    pub status: VerificationStatus,
    /// True only when status is `verified`
    pub is_verified: bool,
    /// Latest overall confidence score (0-100); never set by error attempts
    pub verification_score: Option<f64>,
    /// Number of scored verification attempts so far
    pub attempts: u32,
    /// When the last scored attempt completed
    pub last_verification_at: Option<DateTime<Utc>>,
}

/// One uploaded photo of a listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleImage {
    pub guid: Uuid,
    pub vehicle_guid: Uuid,
    /// Path relative to the root folder, or absolute
    pub path: String,
    pub is_primary: bool,
    pub uploaded_at: DateTime<Utc>,
}
