use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Difficulty, PointBucket, SectionKind, TransactionType};

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

// Catalog
#[derive(Debug, Serialize, Deserialize)]
pub struct TrackDto {
    pub id: String,
    pub name: String,
    pub description: String,
    pub is_enrolled: bool,
    pub total_sections: i64,
    pub completed_sections: i64,
    pub progress_percent: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CourseDto {
    pub id: String,
    pub track_id: String,
    pub name: String,
    pub total_sections: i64,
    pub completed_sections: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SectionDto {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub kind: SectionKind,
    pub estimated_minutes: i32,
    pub is_completed: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeDto {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub is_solved: bool,
}

// Wallet
#[derive(Debug, Serialize, Deserialize)]
pub struct WalletDto {
    pub student_id: String,
    pub learning_points: i32,
    pub challenge_points: i32,
    pub bonus_points: i32,
    pub total_points: i64,
    pub total_earnings: Decimal,
    pub pending_payout: Decimal,
    pub lifetime_earnings: Decimal,
    pub payout_threshold: Decimal,
    pub payout_email: Option<String>,
    pub can_request_payout: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletSettingsReq {
    pub payout_email: Option<String>,
    pub payout_threshold: Option<Decimal>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionDto {
    pub id: i32,
    pub transaction_type: TransactionType,
    pub points_earned: i32,
    pub cash_value: Decimal,
    pub related_section_id: Option<String>,
    pub related_challenge_id: Option<String>,
    pub related_track_id: Option<String>,
    pub description: String,
    pub created_at: String, // RFC3339 UTC
    pub is_processed: bool,
}

// Completions / solutions
#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteSectionResp {
    /// False when the section had already been completed; no new award then.
    pub created: bool,
    pub points_earned: i32,
    pub cash_value: Decimal,
    pub track_bonus: Option<TrackBonusDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackBonusDto {
    pub track_id: String,
    pub points_earned: i32,
    pub cash_value: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitSolutionReq {
    pub code: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitSolutionResp {
    pub correct: bool,
    /// True only on the first-ever correct submission for this challenge.
    pub first_solve: bool,
    pub points_earned: i32,
    pub cash_value: Decimal,
}

// Enrollment / progress
#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollResp {
    pub track_id: String,
    pub newly_enrolled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressDto {
    pub student_id: String,
    pub sections_completed: i64,
    pub current_streak: i64,
    pub overall_progress: f64,
    pub tracks: Vec<TrackProgressDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackProgressDto {
    pub track_id: String,
    pub name: String,
    pub progress_percent: f64,
}

// Payout / adjustments
#[derive(Debug, Serialize, Deserialize)]
pub struct PayoutResp {
    pub amount: Decimal,
    pub pending_payout: Decimal,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdjustmentReq {
    pub bucket: PointBucket,
    pub points: i32,
    pub cash_value: Option<Decimal>,
    pub description: String,
}

// Leaderboard
#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardDto {
    pub top_earners: Vec<LeaderboardEntryDto>,
    pub most_points: Vec<LeaderboardEntryDto>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderboardEntryDto {
    pub student_id: String,
    pub display_name: String,
    pub total_points: i64,
    pub total_earnings: Decimal,
}
