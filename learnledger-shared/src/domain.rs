use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for StudentId {
    fn from(value: &str) -> Self {
        StudentId(value.to_string())
    }
}

impl FromStr for StudentId {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StudentId(s.to_string()))
    }
}

/// Raised when a tag stored in the database (or sent by a client) does not
/// belong to the fixed vocabulary below.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {kind} tag: {value}")]
pub struct UnknownTag {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! tagged_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $tag:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $tag),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownTag;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($tag => Ok($name::$variant),)+
                    other => Err(UnknownTag {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

tagged_enum!(ContentType, "content type", {
    SectionLesson => "section_lesson",
    SectionExercise => "section_exercise",
    SectionQuiz => "section_quiz",
    SectionProject => "section_project",
    CodingChallengeEasy => "coding_challenge_easy",
    CodingChallengeMedium => "coding_challenge_medium",
    CodingChallengeHard => "coding_challenge_hard",
    TrackCompletion => "track_completion",
    DailyStreak => "daily_streak",
    ReferralBonus => "referral_bonus",
});

tagged_enum!(TransactionType, "transaction type", {
    SectionComplete => "section_complete",
    ChallengeSolve => "challenge_solve",
    TrackComplete => "track_complete",
    DailyStreak => "daily_streak",
    ReferralBonus => "referral_bonus",
    ManualAdjustment => "manual_adjustment",
    PayoutRequest => "payout_request",
    PayoutProcessed => "payout_processed",
});

tagged_enum!(SectionKind, "section kind", {
    Lesson => "lesson",
    Exercise => "exercise",
    Quiz => "quiz",
    Project => "project",
    Assignment => "assignment",
});

impl SectionKind {
    /// Reward rate lookup tag for this kind of section. Assignments share
    /// the exercise rate.
    pub fn content_type(self) -> ContentType {
        match self {
            SectionKind::Lesson => ContentType::SectionLesson,
            SectionKind::Exercise | SectionKind::Assignment => ContentType::SectionExercise,
            SectionKind::Quiz => ContentType::SectionQuiz,
            SectionKind::Project => ContentType::SectionProject,
        }
    }
}

tagged_enum!(Difficulty, "difficulty", {
    Easy => "easy",
    Medium => "medium",
    Hard => "hard",
});

impl Difficulty {
    pub fn content_type(self) -> ContentType {
        match self {
            Difficulty::Easy => ContentType::CodingChallengeEasy,
            Difficulty::Medium => ContentType::CodingChallengeMedium,
            Difficulty::Hard => ContentType::CodingChallengeHard,
        }
    }
}

// Wallet point buckets. Each award type feeds exactly one bucket.
tagged_enum!(PointBucket, "point bucket", {
    Learning => "learning",
    Challenge => "challenge",
    Bonus => "bonus",
});

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub track_id: String,
    pub name: String,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub kind: SectionKind,
    #[serde(default = "Section::default_estimated_minutes")]
    pub estimated_minutes: i32,
    #[serde(default)]
    pub position: i32,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Section {
    fn default_estimated_minutes() -> i32 {
        30
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// One row of the reward-rate table seeded from configuration. At most one
/// active structure may exist per content type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointStructureSeed {
    pub content_type: ContentType,
    pub base_points: i32,
    pub cash_value_per_point: Decimal,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Everything the server seeds into the database on startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub point_structures: Vec<PointStructureSeed>,
}

/// Per-student balance. Mutated only by the award operations; the totals
/// below are derived on read and never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Wallet {
    pub student_id: StudentId,
    pub learning_points: i32,
    pub challenge_points: i32,
    pub bonus_points: i32,
    pub total_earnings: Decimal,
    pub pending_payout: Decimal,
    pub lifetime_earnings: Decimal,
    pub payout_threshold: Decimal,
    pub payout_email: Option<String>,
}

impl Wallet {
    pub fn total_points(&self) -> i64 {
        self.learning_points as i64 + self.challenge_points as i64 + self.bonus_points as i64
    }

    pub fn can_request_payout(&self) -> bool {
        self.total_earnings >= self.payout_threshold
    }
}
