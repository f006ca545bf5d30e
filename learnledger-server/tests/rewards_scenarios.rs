use learnledger_server::storage::{SectionCompletionOutcome, Store, StorageError};
use learnledger_shared::domain::{
    Catalog, Challenge, ContentType, Course, Difficulty, PointBucket, PointStructureSeed, Section,
    SectionKind, Student, Track, TransactionType,
};
use rust_decimal::Decimal;

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

/// Track "basics" has one active course with three active sections (plus one
/// inactive), so the completion bonus fires on the third active completion.
/// Rates are configured for lessons and easy challenges only; everything
/// else exercises the built-in fallbacks.
fn catalog() -> Catalog {
    Catalog {
        students: vec![
            Student {
                id: "ada".into(),
                display_name: "Ada".into(),
            },
            Student {
                id: "grace".into(),
                display_name: "Grace".into(),
            },
        ],
        tracks: vec![Track {
            id: "basics".into(),
            name: "Programming Basics".into(),
            description: String::new(),
            position: 1,
            is_active: true,
        }],
        courses: vec![Course {
            id: "vars".into(),
            track_id: "basics".into(),
            name: "Variables".into(),
            position: 1,
            is_active: true,
        }],
        sections: vec![
            Section {
                id: "s-lesson".into(),
                course_id: "vars".into(),
                title: "What is a Variable?".into(),
                kind: SectionKind::Lesson,
                estimated_minutes: 20,
                position: 1,
                is_active: true,
            },
            Section {
                id: "s-exercise".into(),
                course_id: "vars".into(),
                title: "Declaring Variables".into(),
                kind: SectionKind::Exercise,
                estimated_minutes: 90,
                position: 2,
                is_active: true,
            },
            Section {
                id: "s-quiz".into(),
                course_id: "vars".into(),
                title: "Variables Quiz".into(),
                kind: SectionKind::Quiz,
                estimated_minutes: 12,
                position: 3,
                is_active: true,
            },
            Section {
                id: "s-retired".into(),
                course_id: "vars".into(),
                title: "Old Material".into(),
                kind: SectionKind::Lesson,
                estimated_minutes: 30,
                position: 4,
                is_active: false,
            },
        ],
        challenges: vec![
            Challenge {
                id: "hello".into(),
                title: "Hello World".into(),
                description: String::new(),
                difficulty: Difficulty::Easy,
                is_active: true,
            },
            Challenge {
                id: "tough".into(),
                title: "Graph Coloring".into(),
                description: String::new(),
                difficulty: Difficulty::Hard,
                is_active: true,
            },
        ],
        point_structures: vec![
            PointStructureSeed {
                content_type: ContentType::SectionLesson,
                base_points: 20,
                cash_value_per_point: dec("0.10"),
                is_active: true,
            },
            PointStructureSeed {
                content_type: ContentType::CodingChallengeEasy,
                base_points: 50,
                cash_value_per_point: dec("0.05"),
                is_active: true,
            },
        ],
    }
}

struct TestDb {
    store: Store,
    _tempdir: tempfile::TempDir,
}

async fn test_store() -> TestDb {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    let store = Store::connect_sqlite(db_path.to_str().unwrap())
        .await
        .expect("db");
    store.seed_from_config(&catalog()).await.expect("seed");
    TestDb {
        store,
        _tempdir: dir,
    }
}

async fn transactions_of_type(store: &Store, student: &str, ty: TransactionType) -> Vec<String> {
    store
        .list_transactions(student, 1, 1000)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.transaction_type == ty.as_str())
        .map(|t| t.cash_value)
        .collect()
}

#[tokio::test]
async fn section_completion_awards_configured_rate() {
    let db = test_store().await;
    let outcome = db.store.complete_section("ada", "s-lesson").await.unwrap();
    let SectionCompletionOutcome::Created {
        award, track_bonus, ..
    } = outcome
    else {
        panic!("expected a fresh completion");
    };
    assert_eq!(award.points, 20);
    assert_eq!(award.cash_value, dec("2.00"));
    assert!(track_bonus.is_none());

    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.learning_points, 20);
    assert_eq!(wallet.total_earnings, dec("2.00"));
    assert_eq!(wallet.lifetime_earnings, dec("2.00"));

    let txs = db.store.list_transactions("ada", 1, 10).await.unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].transaction_type, "section_complete");
    assert_eq!(txs[0].points_earned, 20);
    assert_eq!(txs[0].cash_value.parse::<Decimal>().unwrap(), dec("2.00"));
    assert_eq!(txs[0].related_section_id.as_deref(), Some("s-lesson"));
    assert_eq!(txs[0].description, "Completed: What is a Variable?");
}

#[tokio::test]
async fn completing_twice_awards_exactly_once() {
    let db = test_store().await;
    db.store.complete_section("ada", "s-lesson").await.unwrap();
    let second = db.store.complete_section("ada", "s-lesson").await.unwrap();
    assert!(matches!(
        second,
        SectionCompletionOutcome::AlreadyCompleted
    ));

    let completes =
        transactions_of_type(&db.store, "ada", TransactionType::SectionComplete).await;
    assert_eq!(completes.len(), 1);
    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.learning_points, 20);
}

#[tokio::test]
async fn unconfigured_section_kinds_use_estimated_minutes_fallback() {
    let db = test_store().await;

    // 90 estimated minutes -> 30 points at $0.01/pt
    let outcome = db.store.complete_section("ada", "s-exercise").await.unwrap();
    let SectionCompletionOutcome::Created { award, .. } = outcome else {
        panic!("expected a fresh completion");
    };
    assert_eq!(award.points, 30);
    assert_eq!(award.cash_value, dec("0.30"));

    // 12 estimated minutes -> floor of 10 points
    let outcome = db.store.complete_section("ada", "s-quiz").await.unwrap();
    let SectionCompletionOutcome::Created { award, .. } = outcome else {
        panic!("expected a fresh completion");
    };
    assert_eq!(award.points, 10);
    assert_eq!(award.cash_value, dec("0.10"));
}

#[tokio::test]
async fn first_correct_solution_awards_exactly_once() {
    let db = test_store().await;

    // Incorrect attempt: stored, no award
    let award = db
        .store
        .submit_solution("ada", "hello", "nope", false)
        .await
        .unwrap();
    assert!(award.is_none());
    assert!(
        transactions_of_type(&db.store, "ada", TransactionType::ChallengeSolve)
            .await
            .is_empty()
    );

    // First correct attempt: configured easy rate 50 pts * $0.05
    let award = db
        .store
        .submit_solution("ada", "hello", "print('hello world')", true)
        .await
        .unwrap()
        .expect("first correct solution awards");
    assert_eq!(award.points, 50);
    assert_eq!(award.cash_value, dec("2.50"));

    // Correct resubmission: no second award
    let award = db
        .store
        .submit_solution("ada", "hello", "print('hello world again')", true)
        .await
        .unwrap();
    assert!(award.is_none());

    // Incorrect resubmission does not un-solve and does not award
    let award = db
        .store
        .submit_solution("ada", "hello", "broken", false)
        .await
        .unwrap();
    assert!(award.is_none());

    let solves = transactions_of_type(&db.store, "ada", TransactionType::ChallengeSolve).await;
    assert_eq!(solves.len(), 1);
    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.challenge_points, 50);
}

#[tokio::test]
async fn hard_challenge_without_structure_uses_fallback() {
    let db = test_store().await;
    let award = db
        .store
        .submit_solution("ada", "tough", "a plausible solution", true)
        .await
        .unwrap()
        .expect("first correct solution awards");
    assert_eq!(award.points, 300);
    assert_eq!(award.cash_value, dec("3.00"));
    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.challenge_points, 300);
    assert_eq!(wallet.total_earnings, dec("3.00"));
}

#[tokio::test]
async fn track_bonus_fires_once_on_full_completion() {
    let db = test_store().await;

    db.store.complete_section("ada", "s-lesson").await.unwrap();
    let second = db.store.complete_section("ada", "s-exercise").await.unwrap();
    let SectionCompletionOutcome::Created { track_bonus, .. } = second else {
        panic!("expected a fresh completion");
    };
    assert!(track_bonus.is_none(), "bonus must wait for full completion");
    assert!(
        transactions_of_type(&db.store, "ada", TransactionType::TrackComplete)
            .await
            .is_empty()
    );

    // Third active section completes the track; the inactive one is ignored.
    let third = db.store.complete_section("ada", "s-quiz").await.unwrap();
    let SectionCompletionOutcome::Created { track_bonus, .. } = third else {
        panic!("expected a fresh completion");
    };
    let bonus = track_bonus.expect("track bonus on full completion");
    assert_eq!(bonus.points, 1000);
    assert_eq!(bonus.cash_value, dec("10.00"));

    // Re-running the detector never double-awards
    assert!(
        db.store
            .check_track_completion("ada", "basics")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.store
            .check_track_completion("ada", "basics")
            .await
            .unwrap()
            .is_none()
    );

    let bonuses = transactions_of_type(&db.store, "ada", TransactionType::TrackComplete).await;
    assert_eq!(bonuses.len(), 1);

    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.bonus_points, 1000);
    // 2.00 (lesson) + 0.30 (exercise) + 0.10 (quiz) + 10.00 (bonus)
    assert_eq!(wallet.total_earnings, dec("12.40"));
}

#[tokio::test]
async fn incomplete_track_never_awards_bonus_to_other_students() {
    let db = test_store().await;
    db.store.complete_section("ada", "s-lesson").await.unwrap();
    assert!(
        db.store
            .check_track_completion("grace", "basics")
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        transactions_of_type(&db.store, "grace", TransactionType::TrackComplete)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn total_points_is_sum_of_buckets() {
    let db = test_store().await;
    db.store.complete_section("ada", "s-lesson").await.unwrap();
    db.store
        .submit_solution("ada", "hello", "print('hello world')", true)
        .await
        .unwrap();
    db.store
        .manual_adjustment("ada", PointBucket::Bonus, 75, Decimal::ZERO, "spot bonus")
        .await
        .unwrap();

    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.learning_points, 20);
    assert_eq!(wallet.challenge_points, 50);
    assert_eq!(wallet.bonus_points, 75);
    assert_eq!(
        wallet.total_points(),
        (wallet.learning_points + wallet.challenge_points + wallet.bonus_points) as i64
    );
}

#[tokio::test]
async fn adjustment_cannot_drive_a_bucket_negative() {
    let db = test_store().await;
    db.store.complete_section("ada", "s-lesson").await.unwrap();
    let err = db
        .store
        .manual_adjustment(
            "ada",
            PointBucket::Learning,
            -100,
            Decimal::ZERO,
            "clawback",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidInput(_)));

    // Failed adjustment leaves neither a wallet change nor a ledger entry
    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.learning_points, 20);
    assert!(
        transactions_of_type(&db.store, "ada", TransactionType::ManualAdjustment)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn payout_request_moves_balance_to_pending() {
    let db = test_store().await;
    db.store.complete_section("ada", "s-lesson").await.unwrap();

    // Default threshold is $10.00; 2.00 is not enough
    let outcome = db.store.request_payout("ada").await.unwrap();
    assert!(matches!(
        outcome,
        learnledger_server::rewards::PayoutOutcome::BelowThreshold { .. }
    ));

    db.store
        .update_wallet_settings("ada", Some("ada@example.com".into()), Some(dec("2.00")))
        .await
        .unwrap();
    let outcome = db.store.request_payout("ada").await.unwrap();
    let learnledger_server::rewards::PayoutOutcome::Requested { amount, pending } = outcome else {
        panic!("expected payout to be accepted");
    };
    assert_eq!(amount, dec("2.00"));
    assert_eq!(pending, dec("2.00"));

    let wallet = db.store.get_wallet("ada").await.unwrap();
    assert_eq!(wallet.total_earnings, Decimal::ZERO);
    assert_eq!(wallet.pending_payout, dec("2.00"));
    // Lifetime earnings survive the payout
    assert_eq!(wallet.lifetime_earnings, dec("2.00"));
    assert_eq!(wallet.payout_email.as_deref(), Some("ada@example.com"));

    let requests = db
        .store
        .list_transactions("ada", 1, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|t| t.transaction_type == TransactionType::PayoutRequest.as_str())
        .collect::<Vec<_>>();
    assert_eq!(requests.len(), 1);
    assert!(!requests[0].is_processed);
    assert_eq!(requests[0].points_earned, 0);
}

#[tokio::test]
async fn transactions_list_newest_first() {
    let db = test_store().await;
    db.store.complete_section("ada", "s-lesson").await.unwrap();
    db.store
        .submit_solution("ada", "hello", "print('hello world')", true)
        .await
        .unwrap();

    let txs = db.store.list_transactions("ada", 1, 10).await.unwrap();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[0].transaction_type, "challenge_solve");
    assert_eq!(txs[1].transaction_type, "section_complete");
}

#[tokio::test]
async fn completing_unknown_section_is_not_found() {
    let db = test_store().await;
    let err = db
        .store
        .complete_section("ada", "no-such-section")
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound(_)));
}
