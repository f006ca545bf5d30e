use crate::storage::schema::{
    challenge_solutions, challenges, courses, enrollments, point_structures, section_completions,
    sections, sessions, students, tracks, transactions, wallets,
};
use crate::storage::{StorageError, parse_decimal};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use learnledger_shared::domain;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = students)]
pub struct Student {
    pub id: String,
    pub display_name: String,
}

#[derive(Insertable)]
#[diesel(table_name = students)]
pub struct NewStudent<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = tracks)]
pub struct Track {
    pub id: String,
    pub name: String,
    pub description: String,
    pub position: i32,
    pub is_active: bool,
}

#[derive(Insertable)]
#[diesel(table_name = tracks)]
pub struct NewTrack<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: &'a str,
    pub position: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = courses)]
#[diesel(belongs_to(Track, foreign_key = track_id))]
pub struct Course {
    pub id: String,
    pub track_id: String,
    pub name: String,
    pub position: i32,
    pub is_active: bool,
}

#[derive(Insertable)]
#[diesel(table_name = courses)]
pub struct NewCourse<'a> {
    pub id: &'a str,
    pub track_id: &'a str,
    pub name: &'a str,
    pub position: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = sections)]
#[diesel(belongs_to(Course, foreign_key = course_id))]
pub struct Section {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub kind: String,
    pub estimated_minutes: i32,
    pub position: i32,
    pub is_active: bool,
}

impl Section {
    pub fn kind(&self) -> Result<domain::SectionKind, StorageError> {
        self.kind
            .parse()
            .map_err(|e: domain::UnknownTag| StorageError::Corrupt(e.to_string()))
    }
}

#[derive(Insertable)]
#[diesel(table_name = sections)]
pub struct NewSection<'a> {
    pub id: &'a str,
    pub course_id: &'a str,
    pub title: &'a str,
    pub kind: &'a str,
    pub estimated_minutes: i32,
    pub position: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = challenges)]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: String,
    pub is_active: bool,
}

impl Challenge {
    pub fn difficulty(&self) -> Result<domain::Difficulty, StorageError> {
        self.difficulty
            .parse()
            .map_err(|e: domain::UnknownTag| StorageError::Corrupt(e.to_string()))
    }
}

#[derive(Insertable)]
#[diesel(table_name = challenges)]
pub struct NewChallenge<'a> {
    pub id: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub difficulty: &'a str,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = point_structures)]
pub struct PointStructure {
    pub id: i32,
    pub content_type: String,
    pub base_points: i32,
    pub cash_value_per_point: String,
    pub is_active: bool,
}

#[derive(Insertable)]
#[diesel(table_name = point_structures)]
pub struct NewPointStructure<'a> {
    pub content_type: &'a str,
    pub base_points: i32,
    pub cash_value_per_point: &'a str,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = wallets)]
#[diesel(primary_key(student_id))]
pub struct Wallet {
    pub student_id: String,
    pub learning_points: i32,
    pub challenge_points: i32,
    pub bonus_points: i32,
    pub total_earnings: String,
    pub pending_payout: String,
    pub lifetime_earnings: String,
    pub payout_threshold: String,
    pub payout_email: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Wallet {
    pub fn to_domain(&self) -> Result<domain::Wallet, StorageError> {
        Ok(domain::Wallet {
            student_id: domain::StudentId(self.student_id.clone()),
            learning_points: self.learning_points,
            challenge_points: self.challenge_points,
            bonus_points: self.bonus_points,
            total_earnings: parse_decimal(&self.total_earnings)?,
            pending_payout: parse_decimal(&self.pending_payout)?,
            lifetime_earnings: parse_decimal(&self.lifetime_earnings)?,
            payout_threshold: parse_decimal(&self.payout_threshold)?,
            payout_email: self.payout_email.clone(),
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = wallets)]
pub struct NewWallet<'a> {
    pub student_id: &'a str,
    pub learning_points: i32,
    pub challenge_points: i32,
    pub bonus_points: i32,
    pub total_earnings: &'a str,
    pub pending_payout: &'a str,
    pub lifetime_earnings: &'a str,
    pub payout_threshold: &'a str,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = transactions)]
pub struct Transaction {
    pub id: i32,
    pub student_id: String,
    pub transaction_type: String,
    pub points_earned: i32,
    pub cash_value: String,
    pub related_section_id: Option<String>,
    pub related_challenge_id: Option<String>,
    pub related_track_id: Option<String>,
    pub description: String,
    pub created_at: NaiveDateTime,
    pub is_processed: bool,
}

#[derive(Insertable)]
#[diesel(table_name = transactions)]
pub struct NewTransaction<'a> {
    pub student_id: &'a str,
    pub transaction_type: &'a str,
    pub points_earned: i32,
    pub cash_value: &'a str,
    pub related_section_id: Option<&'a str>,
    pub related_challenge_id: Option<&'a str>,
    pub related_track_id: Option<&'a str>,
    pub description: &'a str,
    pub created_at: NaiveDateTime,
    pub is_processed: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = section_completions)]
#[diesel(belongs_to(Student, foreign_key = student_id))]
#[diesel(belongs_to(Section, foreign_key = section_id))]
pub struct SectionCompletion {
    pub id: i32,
    pub student_id: String,
    pub section_id: String,
    pub completed_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = section_completions)]
pub struct NewSectionCompletion<'a> {
    pub student_id: &'a str,
    pub section_id: &'a str,
    pub completed_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = challenge_solutions)]
pub struct ChallengeSolution {
    pub id: i32,
    pub student_id: String,
    pub challenge_id: String,
    pub solution_code: String,
    pub is_correct: bool,
    pub submitted_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = challenge_solutions)]
pub struct NewChallengeSolution<'a> {
    pub student_id: &'a str,
    pub challenge_id: &'a str,
    pub solution_code: &'a str,
    pub is_correct: bool,
    pub submitted_at: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = enrollments)]
#[diesel(belongs_to(Track, foreign_key = track_id))]
pub struct Enrollment {
    pub id: i32,
    pub student_id: String,
    pub track_id: String,
    pub enrolled_at: NaiveDateTime,
    pub is_active: bool,
}

#[derive(Insertable)]
#[diesel(table_name = enrollments)]
pub struct NewEnrollment<'a> {
    pub student_id: &'a str,
    pub track_id: &'a str,
    pub is_active: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = sessions)]
#[diesel(primary_key(jti))]
pub struct Session {
    pub jti: String,
    pub username: String,
    pub issued_at: NaiveDateTime,
    pub last_used_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub username: &'a str,
}
