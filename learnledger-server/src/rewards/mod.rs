//! The rewards core: converts completed activity into point and cash-value
//! ledger entries. Every function here runs on a connection that is already
//! inside a storage transaction, so a wallet update and its transaction row
//! commit or roll back as one unit.

use chrono::Utc;
use diesel::prelude::*;
use learnledger_shared::domain::{ContentType, Difficulty, PointBucket, TransactionType};
use rust_decimal::Decimal;

use crate::storage::models::{Challenge, NewTransaction, NewWallet, Section, Wallet};
use crate::storage::{StorageError, parse_decimal};

/// Value of a single award as applied to a wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct Award {
    pub points: i32,
    pub cash_value: Decimal,
}

/// Metadata for the transaction row an award appends.
struct LedgerEntry<'a> {
    transaction_type: TransactionType,
    related_section_id: Option<&'a str>,
    related_challenge_id: Option<&'a str>,
    related_track_id: Option<&'a str>,
    description: &'a str,
    is_processed: bool,
}

impl<'a> LedgerEntry<'a> {
    fn new(transaction_type: TransactionType, description: &'a str) -> Self {
        LedgerEntry {
            transaction_type,
            related_section_id: None,
            related_challenge_id: None,
            related_track_id: None,
            description,
            is_processed: true,
        }
    }
}

/// Active reward rate for a content type, if one is configured.
fn lookup_point_structure(
    conn: &mut SqliteConnection,
    content_type: ContentType,
) -> Result<Option<(i32, Decimal)>, StorageError> {
    use crate::storage::schema::point_structures::dsl as ps;
    let row: Option<(i32, String)> = ps::point_structures
        .filter(ps::content_type.eq(content_type.as_str()))
        .filter(ps::is_active.eq(true))
        .select((ps::base_points, ps::cash_value_per_point))
        .first::<(i32, String)>(conn)
        .optional()?;
    match row {
        Some((points, rate)) => Ok(Some((points, parse_decimal(&rate)?))),
        None => Ok(None),
    }
}

fn award_from_structure(points: i32, rate: Decimal) -> Award {
    Award {
        points,
        cash_value: Decimal::from(points) * rate,
    }
}

// Fallbacks used when no active structure exists for a tag. These are the
// in-code defaults; the configured seed table takes precedence when present.

fn section_fallback(section: &Section) -> Award {
    let points = (section.estimated_minutes / 3).max(10);
    Award {
        points,
        // $0.01 per point
        cash_value: Decimal::new(points as i64, 2),
    }
}

fn challenge_fallback(difficulty: Difficulty) -> Award {
    let (points, cents) = match difficulty {
        Difficulty::Easy => (50, 50),
        Difficulty::Medium => (150, 150),
        Difficulty::Hard => (300, 300),
    };
    Award {
        points,
        cash_value: Decimal::new(cents, 2),
    }
}

fn track_fallback() -> Award {
    Award {
        points: 1000,
        cash_value: Decimal::new(1000, 2),
    }
}

/// Fetch the student's wallet, creating it on first access.
pub fn ensure_wallet(
    conn: &mut SqliteConnection,
    student_id: &str,
) -> Result<Wallet, StorageError> {
    use crate::storage::schema::wallets::dsl as w;
    if let Some(wallet) = w::wallets
        .find(student_id)
        .first::<Wallet>(conn)
        .optional()?
    {
        return Ok(wallet);
    }
    let now = Utc::now().naive_utc();
    let new_wallet = NewWallet {
        student_id,
        learning_points: 0,
        challenge_points: 0,
        bonus_points: 0,
        total_earnings: "0.00",
        pending_payout: "0.00",
        lifetime_earnings: "0.00",
        payout_threshold: "10.00",
        created_at: now,
        updated_at: now,
    };
    Ok(diesel::insert_into(w::wallets)
        .values(&new_wallet)
        .get_result::<Wallet>(conn)?)
}

fn bump_points(current: i32, delta: i32) -> Result<i32, StorageError> {
    let next = current
        .checked_add(delta)
        .ok_or_else(|| StorageError::InvalidInput("point balance overflow".to_string()))?;
    if next < 0 {
        return Err(StorageError::InvalidInput(
            "point balance cannot go negative".to_string(),
        ));
    }
    Ok(next)
}

/// Apply `points`/`cash_value` to one wallet bucket and append the matching
/// transaction row. `points` may be negative for manual adjustments; buckets
/// and earnings are rejected rather than driven below zero.
fn apply_to_wallet(
    conn: &mut SqliteConnection,
    student_id: &str,
    bucket: PointBucket,
    points: i32,
    cash_value: Decimal,
    entry: LedgerEntry<'_>,
) -> Result<(), StorageError> {
    use crate::storage::schema::transactions::dsl as t;
    use crate::storage::schema::wallets::dsl as w;

    let wallet = ensure_wallet(conn, student_id)?;

    let (mut learning, mut challenge, mut bonus) = (
        wallet.learning_points,
        wallet.challenge_points,
        wallet.bonus_points,
    );
    match bucket {
        PointBucket::Learning => learning = bump_points(learning, points)?,
        PointBucket::Challenge => challenge = bump_points(challenge, points)?,
        PointBucket::Bonus => bonus = bump_points(bonus, points)?,
    }

    let total_earnings = parse_decimal(&wallet.total_earnings)? + cash_value;
    if total_earnings < Decimal::ZERO {
        return Err(StorageError::InvalidInput(
            "total earnings cannot go negative".to_string(),
        ));
    }
    // Lifetime earnings only ever accumulate; negative adjustments do not
    // rewrite history.
    let mut lifetime_earnings = parse_decimal(&wallet.lifetime_earnings)?;
    if cash_value > Decimal::ZERO {
        lifetime_earnings += cash_value;
    }

    let now = Utc::now().naive_utc();
    diesel::update(w::wallets.find(student_id))
        .set((
            w::learning_points.eq(learning),
            w::challenge_points.eq(challenge),
            w::bonus_points.eq(bonus),
            w::total_earnings.eq(total_earnings.to_string()),
            w::lifetime_earnings.eq(lifetime_earnings.to_string()),
            w::updated_at.eq(now),
        ))
        .execute(conn)?;

    let cash_str = cash_value.to_string();
    let record = NewTransaction {
        student_id,
        transaction_type: entry.transaction_type.as_str(),
        points_earned: points,
        cash_value: &cash_str,
        related_section_id: entry.related_section_id,
        related_challenge_id: entry.related_challenge_id,
        related_track_id: entry.related_track_id,
        description: entry.description,
        created_at: now,
        is_processed: entry.is_processed,
    };
    diesel::insert_into(t::transactions)
        .values(&record)
        .execute(conn)?;
    Ok(())
}

/// Award learning points for a freshly created section completion. The caller
/// guarantees (via the completion uniqueness constraint) that this is the
/// first completion for the (student, section) pair.
pub fn award_for_section_completion(
    conn: &mut SqliteConnection,
    student_id: &str,
    section: &Section,
) -> Result<Award, StorageError> {
    let content_type = section.kind()?.content_type();
    let award = match lookup_point_structure(conn, content_type)? {
        Some((points, rate)) => award_from_structure(points, rate),
        None => section_fallback(section),
    };

    let description = format!("Completed: {}", section.title);
    let mut entry = LedgerEntry::new(TransactionType::SectionComplete, &description);
    entry.related_section_id = Some(&section.id);
    apply_to_wallet(
        conn,
        student_id,
        PointBucket::Learning,
        award.points,
        award.cash_value,
        entry,
    )?;
    Ok(award)
}

/// Award challenge points for the first correct solution of a challenge. The
/// caller guarantees the transition: no correct solution existed for the
/// (student, challenge) pair before this call.
pub fn award_for_challenge_solution(
    conn: &mut SqliteConnection,
    student_id: &str,
    challenge: &Challenge,
) -> Result<Award, StorageError> {
    let difficulty = challenge.difficulty()?;
    let award = match lookup_point_structure(conn, difficulty.content_type())? {
        Some((points, rate)) => award_from_structure(points, rate),
        None => challenge_fallback(difficulty),
    };

    let description = format!("Solved: {} ({})", challenge.title, difficulty);
    let mut entry = LedgerEntry::new(TransactionType::ChallengeSolve, &description);
    entry.related_challenge_id = Some(&challenge.id);
    apply_to_wallet(
        conn,
        student_id,
        PointBucket::Challenge,
        award.points,
        award.cash_value,
        entry,
    )?;
    Ok(award)
}

/// Award the one-time track-completion bonus if the student has now completed
/// every active section under the track. Idempotent: the existence check on
/// prior track_complete transactions prevents a second award no matter how
/// often this runs.
pub fn check_and_award_track_completion(
    conn: &mut SqliteConnection,
    student_id: &str,
    track_id: &str,
) -> Result<Option<Award>, StorageError> {
    use crate::storage::schema::{
        courses, section_completions, sections, tracks, transactions as tx,
    };

    let total_sections: i64 = sections::table
        .inner_join(courses::table)
        .filter(courses::track_id.eq(track_id))
        .filter(courses::is_active.eq(true))
        .filter(sections::is_active.eq(true))
        .count()
        .get_result(conn)?;
    if total_sections == 0 {
        return Ok(None);
    }

    let completed_sections: i64 = section_completions::table
        .inner_join(sections::table.inner_join(courses::table))
        .filter(section_completions::student_id.eq(student_id))
        .filter(courses::track_id.eq(track_id))
        .filter(courses::is_active.eq(true))
        .filter(sections::is_active.eq(true))
        .count()
        .get_result(conn)?;
    if completed_sections < total_sections {
        return Ok(None);
    }

    let already_awarded: i64 = tx::table
        .filter(tx::student_id.eq(student_id))
        .filter(tx::transaction_type.eq(TransactionType::TrackComplete.as_str()))
        .filter(tx::related_track_id.eq(track_id))
        .count()
        .get_result(conn)?;
    if already_awarded > 0 {
        return Ok(None);
    }

    let award = match lookup_point_structure(conn, ContentType::TrackCompletion)? {
        Some((points, rate)) => award_from_structure(points, rate),
        None => track_fallback(),
    };

    let track_name: String = tracks::table
        .find(track_id)
        .select(tracks::name)
        .first(conn)?;
    let description = format!("Track completed: {}", track_name);
    let mut entry = LedgerEntry::new(TransactionType::TrackComplete, &description);
    entry.related_track_id = Some(track_id);
    apply_to_wallet(
        conn,
        student_id,
        PointBucket::Bonus,
        award.points,
        award.cash_value,
        entry,
    )?;
    Ok(Some(award))
}

/// Outcome of a payout request.
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutOutcome {
    Requested { amount: Decimal, pending: Decimal },
    BelowThreshold { total: Decimal, threshold: Decimal },
}

/// Move the full payable balance into pending payout and record the request.
/// The request transaction stays unprocessed until handled out-of-band.
pub fn request_payout(
    conn: &mut SqliteConnection,
    student_id: &str,
) -> Result<PayoutOutcome, StorageError> {
    use crate::storage::schema::transactions::dsl as t;
    use crate::storage::schema::wallets::dsl as w;

    let wallet = ensure_wallet(conn, student_id)?;
    let total = parse_decimal(&wallet.total_earnings)?;
    let threshold = parse_decimal(&wallet.payout_threshold)?;
    if total < threshold {
        return Ok(PayoutOutcome::BelowThreshold { total, threshold });
    }

    let pending = parse_decimal(&wallet.pending_payout)? + total;
    let now = Utc::now().naive_utc();
    diesel::update(w::wallets.find(student_id))
        .set((
            w::total_earnings.eq(Decimal::ZERO.to_string()),
            w::pending_payout.eq(pending.to_string()),
            w::updated_at.eq(now),
        ))
        .execute(conn)?;

    let description = format!("Payout requested: ${}", total);
    let amount_str = total.to_string();
    let record = NewTransaction {
        student_id,
        transaction_type: TransactionType::PayoutRequest.as_str(),
        points_earned: 0,
        cash_value: &amount_str,
        related_section_id: None,
        related_challenge_id: None,
        related_track_id: None,
        description: &description,
        created_at: now,
        is_processed: false,
    };
    diesel::insert_into(t::transactions)
        .values(&record)
        .execute(conn)?;

    Ok(PayoutOutcome::Requested {
        amount: total,
        pending,
    })
}

/// Signed operator adjustment against a named bucket.
pub fn manual_adjustment(
    conn: &mut SqliteConnection,
    student_id: &str,
    bucket: PointBucket,
    points: i32,
    cash_value: Decimal,
    description: &str,
) -> Result<(), StorageError> {
    let entry = LedgerEntry::new(TransactionType::ManualAdjustment, description);
    apply_to_wallet(conn, student_id, bucket, points, cash_value, entry)
}
