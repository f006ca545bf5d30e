pub mod models;
pub mod schema;

use chrono::{NaiveDate, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use learnledger_shared::domain::{self, Catalog, PointBucket};
use models::{
    Challenge, Course, NewChallenge, NewChallengeSolution, NewCourse, NewEnrollment,
    NewPointStructure, NewSection, NewSectionCompletion, NewSession, NewStudent, NewTrack, Section,
    Student, Track, Transaction,
};
use rust_decimal::Decimal;

use crate::rewards::{self, Award, PayoutOutcome};

/// Structured error type for all storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A Diesel ORM error (query failure, constraint violation, etc.)
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// Failed to acquire or build a connection from the pool.
    #[error("pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    /// A `spawn_blocking` task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// A database migration failed to apply.
    #[error("migration error: {0}")]
    Migration(String),

    /// The caller supplied invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be interpreted (e.g. malformed decimal).
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Parse a decimal persisted as TEXT. Failure means the row was written by
/// something other than this application.
pub(crate) fn parse_decimal(s: &str) -> Result<Decimal, StorageError> {
    s.parse::<Decimal>()
        .map_err(|e| StorageError::Corrupt(format!("bad decimal {s:?}: {e}")))
}

fn is_unique_violation(e: &DieselError) -> bool {
    matches!(
        e,
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)
    )
}

/// Result of recording a section completion.
#[derive(Debug)]
pub enum SectionCompletionOutcome {
    Created {
        award: Award,
        track_id: String,
        track_bonus: Option<Award>,
    },
    AlreadyCompleted,
}

/// Track-level progress counters for one student.
#[derive(Debug, Clone)]
pub struct TrackProgress {
    pub track: Track,
    pub total_sections: i64,
    pub completed_sections: i64,
}

#[derive(Debug, Clone)]
pub struct ProgressSummary {
    pub sections_completed: i64,
    pub current_streak: i64,
    pub tracks: Vec<TrackProgress>,
}

#[derive(Debug, Clone)]
pub struct LeaderboardRow {
    pub student: Student,
    pub total_points: i64,
    pub total_earnings: Decimal,
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    pub async fn connect_sqlite(path: &str) -> Result<Self, StorageError> {
        let url = path.to_string();
        let manager = ConnectionManager::<SqliteConnection>::new(url);
        let pool = Pool::builder().max_size(8).build(manager)?;

        // Run pending Diesel migrations on startup (auto-init empty DBs)
        {
            let pool_clone = pool.clone();
            tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
                const MIGRATIONS: EmbeddedMigrations = embed_migrations!();
                let mut conn = pool_clone.get()?;
                configure_sqlite_conn(&mut conn)?;
                conn.run_pending_migrations(MIGRATIONS)
                    .map_err(|e| StorageError::Migration(e.to_string()))?;
                Ok(())
            })
            .await??;
        }

        Ok(Store { pool })
    }

    /// Upsert the configured catalog: students, tracks, courses, sections,
    /// challenges and the point-structure table.
    pub async fn seed_from_config(&self, catalog: &Catalog) -> Result<(), StorageError> {
        use schema::{challenges, courses, point_structures, sections, students, tracks};

        let pool = self.pool.clone();
        let catalog = catalog.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;

            for s in &catalog.students {
                let row = NewStudent {
                    id: &s.id,
                    display_name: &s.display_name,
                };
                diesel::insert_into(students::table)
                    .values(&row)
                    .on_conflict(students::id)
                    .do_update()
                    .set(students::display_name.eq(row.display_name))
                    .execute(&mut conn)?;
            }

            for t in &catalog.tracks {
                let row = NewTrack {
                    id: &t.id,
                    name: &t.name,
                    description: &t.description,
                    position: t.position,
                    is_active: t.is_active,
                };
                diesel::insert_into(tracks::table)
                    .values(&row)
                    .on_conflict(tracks::id)
                    .do_update()
                    .set((
                        tracks::name.eq(row.name),
                        tracks::description.eq(row.description),
                        tracks::position.eq(row.position),
                        tracks::is_active.eq(row.is_active),
                    ))
                    .execute(&mut conn)?;
            }

            for c in &catalog.courses {
                let row = NewCourse {
                    id: &c.id,
                    track_id: &c.track_id,
                    name: &c.name,
                    position: c.position,
                    is_active: c.is_active,
                };
                diesel::insert_into(courses::table)
                    .values(&row)
                    .on_conflict(courses::id)
                    .do_update()
                    .set((
                        courses::track_id.eq(row.track_id),
                        courses::name.eq(row.name),
                        courses::position.eq(row.position),
                        courses::is_active.eq(row.is_active),
                    ))
                    .execute(&mut conn)?;
            }

            for s in &catalog.sections {
                let row = NewSection {
                    id: &s.id,
                    course_id: &s.course_id,
                    title: &s.title,
                    kind: s.kind.as_str(),
                    estimated_minutes: s.estimated_minutes,
                    position: s.position,
                    is_active: s.is_active,
                };
                diesel::insert_into(sections::table)
                    .values(&row)
                    .on_conflict(sections::id)
                    .do_update()
                    .set((
                        sections::course_id.eq(row.course_id),
                        sections::title.eq(row.title),
                        sections::kind.eq(row.kind),
                        sections::estimated_minutes.eq(row.estimated_minutes),
                        sections::position.eq(row.position),
                        sections::is_active.eq(row.is_active),
                    ))
                    .execute(&mut conn)?;
            }

            for c in &catalog.challenges {
                let row = NewChallenge {
                    id: &c.id,
                    title: &c.title,
                    description: &c.description,
                    difficulty: c.difficulty.as_str(),
                    is_active: c.is_active,
                };
                diesel::insert_into(challenges::table)
                    .values(&row)
                    .on_conflict(challenges::id)
                    .do_update()
                    .set((
                        challenges::title.eq(row.title),
                        challenges::description.eq(row.description),
                        challenges::difficulty.eq(row.difficulty),
                        challenges::is_active.eq(row.is_active),
                    ))
                    .execute(&mut conn)?;
            }

            for p in &catalog.point_structures {
                let rate = p.cash_value_per_point.to_string();
                let row = NewPointStructure {
                    content_type: p.content_type.as_str(),
                    base_points: p.base_points,
                    cash_value_per_point: &rate,
                    is_active: p.is_active,
                };
                diesel::insert_into(point_structures::table)
                    .values(&row)
                    .on_conflict(point_structures::content_type)
                    .do_update()
                    .set((
                        point_structures::base_points.eq(row.base_points),
                        point_structures::cash_value_per_point.eq(row.cash_value_per_point),
                        point_structures::is_active.eq(row.is_active),
                    ))
                    .execute(&mut conn)?;
            }

            Ok(())
        })
        .await?
    }

    pub async fn student_exists(&self, student: &str) -> Result<bool, StorageError> {
        use schema::students::dsl::*;
        let pool = self.pool.clone();
        let sid = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let count: i64 = students.filter(id.eq(&sid)).count().get_result(&mut conn)?;
            Ok(count > 0)
        })
        .await?
    }

    /// Record a section completion and apply its award plus any resulting
    /// track-completion bonus. The completion insert, wallet mutation and
    /// transaction rows are one atomic unit; a second completion of the same
    /// pair surfaces as `AlreadyCompleted`, never a double award.
    pub async fn complete_section(
        &self,
        student: &str,
        section: &str,
    ) -> Result<SectionCompletionOutcome, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        let section_id = section.to_string();
        tokio::task::spawn_blocking(move || -> Result<SectionCompletionOutcome, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                use schema::section_completions;
                use schema::sections::dsl as sec;

                let row: Option<(Section, Course)> = sec::sections
                    .inner_join(schema::courses::table)
                    .filter(sec::id.eq(&section_id))
                    .filter(sec::is_active.eq(true))
                    .select((Section::as_select(), Course::as_select()))
                    .first::<(Section, Course)>(conn)
                    .optional()?;
                let Some((section, course)) = row else {
                    return Err(StorageError::NotFound(format!(
                        "section not found: {section_id}"
                    )));
                };

                let completion = NewSectionCompletion {
                    student_id: &student,
                    section_id: &section.id,
                    completed_at: Utc::now().naive_utc(),
                };
                match diesel::insert_into(section_completions::table)
                    .values(&completion)
                    .execute(conn)
                {
                    Ok(_) => {}
                    Err(ref e) if is_unique_violation(e) => {
                        return Ok(SectionCompletionOutcome::AlreadyCompleted);
                    }
                    Err(e) => return Err(e.into()),
                }

                let award = rewards::award_for_section_completion(conn, &student, &section)?;
                let track_bonus =
                    rewards::check_and_award_track_completion(conn, &student, &course.track_id)?;
                Ok(SectionCompletionOutcome::Created {
                    award,
                    track_id: course.track_id,
                    track_bonus,
                })
            })
        })
        .await?
    }

    /// Re-evaluate track completion for one student. Awards the one-time
    /// bonus when the track is fully completed and not yet rewarded; safe to
    /// invoke any number of times.
    pub async fn check_track_completion(
        &self,
        student: &str,
        track: &str,
    ) -> Result<Option<Award>, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        let track_id = track.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Award>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                rewards::check_and_award_track_completion(conn, &student, &track_id)
            })
        })
        .await?
    }

    /// Record a challenge submission. Returns the award iff this submission
    /// is the first-ever correct solution for the (student, challenge) pair;
    /// resubmissions only update the stored solution. An earlier correct
    /// solution is never un-solved by a later incorrect one.
    pub async fn submit_solution(
        &self,
        student: &str,
        challenge: &str,
        code: &str,
        correct: bool,
    ) -> Result<Option<Award>, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        let challenge_id = challenge.to_string();
        let code = code.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Award>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                use schema::challenge_solutions::dsl as cs;
                use schema::challenges::dsl as ch;

                let row: Option<Challenge> = ch::challenges
                    .filter(ch::id.eq(&challenge_id))
                    .filter(ch::is_active.eq(true))
                    .first::<Challenge>(conn)
                    .optional()?;
                let Some(challenge) = row else {
                    return Err(StorageError::NotFound(format!(
                        "challenge not found: {challenge_id}"
                    )));
                };

                let now = Utc::now().naive_utc();
                let prior: Option<models::ChallengeSolution> = cs::challenge_solutions
                    .filter(cs::student_id.eq(&student))
                    .filter(cs::challenge_id.eq(&challenge.id))
                    .first::<models::ChallengeSolution>(conn)
                    .optional()?;

                let had_correct = match &prior {
                    Some(existing) => {
                        diesel::update(cs::challenge_solutions.filter(cs::id.eq(existing.id)))
                            .set((
                                cs::solution_code.eq(&code),
                                cs::is_correct.eq(existing.is_correct || correct),
                                cs::submitted_at.eq(now),
                            ))
                            .execute(conn)?;
                        existing.is_correct
                    }
                    None => {
                        let row = NewChallengeSolution {
                            student_id: &student,
                            challenge_id: &challenge.id,
                            solution_code: &code,
                            is_correct: correct,
                            submitted_at: now,
                        };
                        match diesel::insert_into(cs::challenge_solutions)
                            .values(&row)
                            .execute(conn)
                        {
                            Ok(_) => false,
                            // Lost a race with another submission; fold into
                            // the update path against the winner's row.
                            Err(ref e) if is_unique_violation(e) => {
                                let existing: models::ChallengeSolution = cs::challenge_solutions
                                    .filter(cs::student_id.eq(&student))
                                    .filter(cs::challenge_id.eq(&challenge.id))
                                    .first(conn)?;
                                diesel::update(
                                    cs::challenge_solutions.filter(cs::id.eq(existing.id)),
                                )
                                .set((
                                    cs::solution_code.eq(&code),
                                    cs::is_correct.eq(existing.is_correct || correct),
                                    cs::submitted_at.eq(now),
                                ))
                                .execute(conn)?;
                                existing.is_correct
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                };

                if correct && !had_correct {
                    let award = rewards::award_for_challenge_solution(conn, &student, &challenge)?;
                    Ok(Some(award))
                } else {
                    Ok(None)
                }
            })
        })
        .await?
    }

    /// Fetch the student's wallet, creating it lazily on first access.
    pub async fn get_wallet(&self, student: &str) -> Result<domain::Wallet, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<domain::Wallet, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let wallet =
                conn.immediate_transaction(|conn| rewards::ensure_wallet(conn, &student))?;
            wallet.to_domain()
        })
        .await?
    }

    pub async fn update_wallet_settings(
        &self,
        student: &str,
        payout_email: Option<String>,
        payout_threshold: Option<Decimal>,
    ) -> Result<domain::Wallet, StorageError> {
        use schema::wallets::dsl as w;
        let pool = self.pool.clone();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<domain::Wallet, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            if let Some(threshold) = payout_threshold
                && threshold < Decimal::ZERO
            {
                return Err(StorageError::InvalidInput(
                    "payout threshold cannot be negative".to_string(),
                ));
            }
            let wallet = conn.immediate_transaction(|conn| {
                rewards::ensure_wallet(conn, &student)?;
                let now = Utc::now().naive_utc();
                if let Some(email) = &payout_email {
                    diesel::update(w::wallets.find(&student))
                        .set((w::payout_email.eq(email), w::updated_at.eq(now)))
                        .execute(conn)?;
                }
                if let Some(threshold) = payout_threshold {
                    diesel::update(w::wallets.find(&student))
                        .set((
                            w::payout_threshold.eq(threshold.to_string()),
                            w::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                }
                w::wallets
                    .find(&student)
                    .first::<models::Wallet>(conn)
                    .map_err(StorageError::from)
            })?;
            wallet.to_domain()
        })
        .await?
    }

    pub async fn request_payout(&self, student: &str) -> Result<PayoutOutcome, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<PayoutOutcome, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| rewards::request_payout(conn, &student))
        })
        .await?
    }

    pub async fn manual_adjustment(
        &self,
        student: &str,
        bucket: PointBucket,
        points: i32,
        cash_value: Decimal,
        description: &str,
    ) -> Result<(), StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        let description = description.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                rewards::manual_adjustment(conn, &student, bucket, points, cash_value, &description)
            })
        })
        .await?
    }

    /// Ledger entries for one student, most recent first.
    pub async fn list_transactions(
        &self,
        student: &str,
        page: usize,
        per_page: usize,
    ) -> Result<Vec<Transaction>, StorageError> {
        use schema::transactions::dsl as t;
        let pool = self.pool.clone();
        let student = student.to_string();
        let page = page.max(1);
        let per_page = per_page.clamp(1, 1000) as i64;
        let offset = ((page as i64) - 1) * per_page;
        tokio::task::spawn_blocking(move || -> Result<Vec<Transaction>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(t::transactions
                .filter(t::student_id.eq(&student))
                .order((t::created_at.desc(), t::id.desc()))
                .offset(offset)
                .limit(per_page)
                .load::<Transaction>(&mut conn)?)
        })
        .await?
    }

    /// Enroll the student in a track. Re-enrolling reactivates rather than
    /// duplicating. Returns true when the enrollment is new.
    pub async fn enroll(&self, student: &str, track: &str) -> Result<bool, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        let track_id = track.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            use schema::enrollments::dsl as e;
            use schema::tracks::dsl as tr;
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            conn.immediate_transaction(|conn| {
                let exists: i64 = tr::tracks
                    .filter(tr::id.eq(&track_id))
                    .filter(tr::is_active.eq(true))
                    .count()
                    .get_result(conn)?;
                if exists == 0 {
                    return Err(StorageError::NotFound(format!(
                        "track not found: {track_id}"
                    )));
                }
                let row = NewEnrollment {
                    student_id: &student,
                    track_id: &track_id,
                    is_active: true,
                };
                match diesel::insert_into(e::enrollments).values(&row).execute(conn) {
                    Ok(_) => Ok(true),
                    Err(ref err) if is_unique_violation(err) => {
                        diesel::update(
                            e::enrollments
                                .filter(e::student_id.eq(&student))
                                .filter(e::track_id.eq(&track_id)),
                        )
                        .set(e::is_active.eq(true))
                        .execute(conn)?;
                        Ok(false)
                    }
                    Err(err) => Err(err.into()),
                }
            })
        })
        .await?
    }

    /// All active tracks with the student's progress and enrollment flag.
    pub async fn list_tracks_with_progress(
        &self,
        student: &str,
    ) -> Result<Vec<(TrackProgress, bool)>, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<(TrackProgress, bool)>, StorageError> {
            use schema::enrollments::dsl as e;
            use schema::tracks::dsl as tr;
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let all_tracks: Vec<Track> = tr::tracks
                .filter(tr::is_active.eq(true))
                .order((tr::position.asc(), tr::name.asc()))
                .load::<Track>(&mut conn)?;
            let enrolled_ids: Vec<String> = e::enrollments
                .filter(e::student_id.eq(&student))
                .filter(e::is_active.eq(true))
                .select(e::track_id)
                .load::<String>(&mut conn)?;
            let mut out = Vec::with_capacity(all_tracks.len());
            for track in all_tracks {
                let enrolled = enrolled_ids.contains(&track.id);
                let progress = track_progress(&mut conn, &student, track)?;
                out.push((progress, enrolled));
            }
            Ok(out)
        })
        .await?
    }

    /// Active courses of a track with the student's per-course counters.
    pub async fn list_courses_with_progress(
        &self,
        track: &str,
        student: &str,
    ) -> Result<Vec<(Course, i64, i64)>, StorageError> {
        let pool = self.pool.clone();
        let track_id = track.to_string();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<(Course, i64, i64)>, StorageError> {
            use schema::section_completions::dsl as sc;
            use schema::sections::dsl as s;
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let courses: Vec<Course> = schema::courses::table
                .filter(schema::courses::track_id.eq(&track_id))
                .filter(schema::courses::is_active.eq(true))
                .order((schema::courses::position.asc(), schema::courses::name.asc()))
                .load::<Course>(&mut conn)?;
            let mut out = Vec::with_capacity(courses.len());
            for course in courses {
                let total: i64 = s::sections
                    .filter(s::course_id.eq(&course.id))
                    .filter(s::is_active.eq(true))
                    .count()
                    .get_result(&mut conn)?;
                let completed: i64 = sc::section_completions
                    .inner_join(schema::sections::table)
                    .filter(sc::student_id.eq(&student))
                    .filter(schema::sections::course_id.eq(&course.id))
                    .filter(schema::sections::is_active.eq(true))
                    .count()
                    .get_result(&mut conn)?;
                out.push((course, total, completed));
            }
            Ok(out)
        })
        .await?
    }

    /// Active sections of a course with the student's completion flags.
    pub async fn list_sections_with_completion(
        &self,
        course: &str,
        student: &str,
    ) -> Result<Vec<(Section, bool)>, StorageError> {
        let pool = self.pool.clone();
        let course_id = course.to_string();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<(Section, bool)>, StorageError> {
            use schema::section_completions::dsl as sc;
            use schema::sections::dsl as s;
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let sections: Vec<Section> = s::sections
                .filter(s::course_id.eq(&course_id))
                .filter(s::is_active.eq(true))
                .order((s::position.asc(), s::title.asc()))
                .load::<Section>(&mut conn)?;
            let completed_ids: Vec<String> = sc::section_completions
                .filter(sc::student_id.eq(&student))
                .select(sc::section_id)
                .load::<String>(&mut conn)?;
            Ok(sections
                .into_iter()
                .map(|sec| {
                    let done = completed_ids.contains(&sec.id);
                    (sec, done)
                })
                .collect())
        })
        .await?
    }

    /// All active challenges with the student's solved flags.
    pub async fn list_challenges(
        &self,
        student: &str,
    ) -> Result<Vec<(Challenge, bool)>, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<(Challenge, bool)>, StorageError> {
            use schema::challenge_solutions::dsl as cs;
            use schema::challenges::dsl as ch;
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let challenges: Vec<Challenge> = ch::challenges
                .filter(ch::is_active.eq(true))
                .order(ch::title.asc())
                .load::<Challenge>(&mut conn)?;
            let solved_ids: Vec<String> = cs::challenge_solutions
                .filter(cs::student_id.eq(&student))
                .filter(cs::is_correct.eq(true))
                .select(cs::challenge_id)
                .load::<String>(&mut conn)?;
            Ok(challenges
                .into_iter()
                .map(|c| {
                    let solved = solved_ids.contains(&c.id);
                    (c, solved)
                })
                .collect())
        })
        .await?
    }

    pub async fn get_challenge(&self, challenge: &str) -> Result<Option<Challenge>, StorageError> {
        use schema::challenges::dsl as ch;
        let pool = self.pool.clone();
        let challenge_id = challenge.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Challenge>, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            Ok(ch::challenges
                .filter(ch::id.eq(&challenge_id))
                .filter(ch::is_active.eq(true))
                .first::<Challenge>(&mut conn)
                .optional()?)
        })
        .await?
    }

    /// Progress summary over the student's enrolled tracks, plus the current
    /// daily completion streak.
    pub async fn progress(&self, student: &str) -> Result<ProgressSummary, StorageError> {
        let pool = self.pool.clone();
        let student = student.to_string();
        tokio::task::spawn_blocking(move || -> Result<ProgressSummary, StorageError> {
            use schema::enrollments::dsl as e;
            use schema::section_completions::dsl as sc;
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;

            let sections_completed: i64 = sc::section_completions
                .filter(sc::student_id.eq(&student))
                .count()
                .get_result(&mut conn)?;

            let completion_times: Vec<chrono::NaiveDateTime> = sc::section_completions
                .filter(sc::student_id.eq(&student))
                .select(sc::completed_at)
                .order(sc::completed_at.desc())
                .load(&mut conn)?;
            let current_streak = streak_from_dates(
                completion_times.iter().map(|t| t.date()),
                Utc::now().date_naive(),
            );

            let enrolled: Vec<Track> = schema::tracks::table
                .inner_join(schema::enrollments::table)
                .filter(e::student_id.eq(&student))
                .filter(e::is_active.eq(true))
                .filter(schema::tracks::is_active.eq(true))
                .order(schema::tracks::position.asc())
                .select(Track::as_select())
                .load::<Track>(&mut conn)?;
            let mut tracks = Vec::with_capacity(enrolled.len());
            for track in enrolled {
                tracks.push(track_progress(&mut conn, &student, track)?);
            }

            Ok(ProgressSummary {
                sections_completed,
                current_streak,
                tracks,
            })
        })
        .await?
    }

    /// Students ranked by lifetime wallet value. Returns (by earnings,
    /// by points), each capped at `limit`.
    pub async fn leaderboard(
        &self,
        limit: usize,
    ) -> Result<(Vec<LeaderboardRow>, Vec<LeaderboardRow>), StorageError> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(
            move || -> Result<(Vec<LeaderboardRow>, Vec<LeaderboardRow>), StorageError> {
                use schema::students::dsl as st;
                use schema::wallets::dsl as w;
                let mut conn = pool.get()?;
                configure_sqlite_conn(&mut conn)?;
                let rows: Vec<(Student, models::Wallet)> = st::students
                    .inner_join(w::wallets)
                    .load::<(Student, models::Wallet)>(&mut conn)?;
                let mut entries = Vec::with_capacity(rows.len());
                for (student, wallet) in rows {
                    let wallet = wallet.to_domain()?;
                    entries.push(LeaderboardRow {
                        student,
                        total_points: wallet.total_points(),
                        total_earnings: wallet.total_earnings,
                    });
                }
                let mut top_earners: Vec<LeaderboardRow> = entries
                    .iter()
                    .filter(|r| r.total_earnings > Decimal::ZERO)
                    .cloned()
                    .collect();
                top_earners.sort_by(|a, b| b.total_earnings.cmp(&a.total_earnings));
                top_earners.truncate(limit);
                let mut most_points: Vec<LeaderboardRow> = entries
                    .into_iter()
                    .filter(|r| r.total_points > 0)
                    .collect();
                most_points.sort_by(|a, b| b.total_points.cmp(&a.total_points));
                most_points.truncate(limit);
                Ok((top_earners, most_points))
            },
        )
        .await?
    }

    // Session helpers for JWT inactivity windows
    pub async fn create_session(&self, jti_: &str, username_: &str) -> Result<(), StorageError> {
        use schema::sessions;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        let u = username_.to_string();
        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let new = NewSession {
                jti: &j,
                username: &u,
            };
            diesel::insert_into(sessions::table)
                .values(&new)
                .on_conflict_do_nothing()
                .execute(&mut conn)?;
            Ok(())
        })
        .await?
    }

    /// Touch session atomically, but only if it hasn't expired.
    /// Returns `true` if the session was found and updated, `false` otherwise.
    ///
    /// This combines the idle timeout check and the `last_used_at` update into
    /// a single atomic UPDATE, eliminating the race condition between checking
    /// and updating the session.
    pub async fn touch_session_with_cutoff(
        &self,
        jti_: &str,
        cutoff: chrono::NaiveDateTime,
    ) -> Result<bool, StorageError> {
        use schema::sessions::dsl::*;
        let pool = self.pool.clone();
        let j = jti_.to_string();
        tokio::task::spawn_blocking(move || -> Result<bool, StorageError> {
            let mut conn = pool.get()?;
            configure_sqlite_conn(&mut conn)?;
            let now = Utc::now().naive_utc();
            let updated =
                diesel::update(sessions.filter(jti.eq(&j)).filter(last_used_at.ge(cutoff)))
                    .set(last_used_at.eq(now))
                    .execute(&mut conn)?;
            Ok(updated > 0)
        })
        .await?
    }
}

fn track_progress(
    conn: &mut SqliteConnection,
    student: &str,
    track: Track,
) -> Result<TrackProgress, StorageError> {
    use schema::{courses, section_completions, sections};
    let total_sections: i64 = sections::table
        .inner_join(courses::table)
        .filter(courses::track_id.eq(&track.id))
        .filter(courses::is_active.eq(true))
        .filter(sections::is_active.eq(true))
        .count()
        .get_result(conn)?;
    let completed_sections: i64 = section_completions::table
        .inner_join(sections::table.inner_join(courses::table))
        .filter(section_completions::student_id.eq(student))
        .filter(courses::track_id.eq(&track.id))
        .filter(courses::is_active.eq(true))
        .filter(sections::is_active.eq(true))
        .count()
        .get_result(conn)?;
    Ok(TrackProgress {
        track,
        total_sections,
        completed_sections,
    })
}

/// Consecutive days with at least one completion, counting back from `today`.
/// `dates` must be sorted descending.
fn streak_from_dates(dates: impl IntoIterator<Item = NaiveDate>, today: NaiveDate) -> i64 {
    let mut streak = 0;
    let mut expect = today;
    for date in dates {
        if date == expect {
            streak += 1;
            expect = match expect.pred_opt() {
                Some(d) => d,
                None => break,
            };
        } else if date < expect {
            break;
        }
        // date > expect only for duplicates of an already-counted day
    }
    streak
}

fn configure_sqlite_conn(conn: &mut SqliteConnection) -> Result<(), diesel::result::Error> {
    // Enable WAL for better read/write concurrency and set a busy timeout
    // Ignore the result rows; Diesel's execute is fine for PRAGMAs
    diesel::sql_query("PRAGMA journal_mode=WAL;").execute(conn)?;
    diesel::sql_query("PRAGMA synchronous=NORMAL;").execute(conn)?;
    diesel::sql_query("PRAGMA busy_timeout=5000;").execute(conn)?;
    diesel::sql_query("PRAGMA foreign_keys=ON;").execute(conn)?;
    Ok(())
}
