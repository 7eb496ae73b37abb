use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Base XP granted for completing a lesson, before any badge bonuses.
pub const LESSON_XP: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum BadgeCriterion {
    XpThreshold(i64),
    CoursesCompleted(i64),
    LessonsCompleted(i64),
    StreakDays(i64),
}

impl BadgeCriterion {
    pub fn from_parts(kind: &str, value: i64) -> Option<Self> {
        match kind {
            "xp_threshold" => Some(Self::XpThreshold(value)),
            "courses_completed" => Some(Self::CoursesCompleted(value)),
            "lessons_completed" => Some(Self::LessonsCompleted(value)),
            "streak_days" => Some(Self::StreakDays(value)),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::XpThreshold(_) => "xp_threshold",
            Self::CoursesCompleted(_) => "courses_completed",
            Self::LessonsCompleted(_) => "lessons_completed",
            Self::StreakDays(_) => "streak_days",
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            Self::XpThreshold(v)
            | Self::CoursesCompleted(v)
            | Self::LessonsCompleted(v)
            | Self::StreakDays(v) => *v,
        }
    }

    /// Evaluates the criterion against a stats snapshot.
    ///
    /// `StreakDays` never holds: nothing in the workspace records daily
    /// activity, so there is no streak to measure. The variant stays so
    /// catalogs that declare it remain loadable.
    pub fn is_met(&self, stats: &StudentStats) -> bool {
        match self {
            Self::XpThreshold(v) => stats.total_xp >= *v,
            Self::CoursesCompleted(v) => stats.courses_completed >= *v,
            Self::LessonsCompleted(v) => stats.lessons_completed >= *v,
            Self::StreakDays(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StudentStats {
    pub total_xp: i64,
    pub lessons_completed: i64,
    pub courses_completed: i64,
}

#[derive(Debug)]
pub enum XpError {
    Persistence(rusqlite::Error),
    StudentNotFound(String),
    LessonNotFound(String),
}

impl std::fmt::Display for XpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Persistence(e) => write!(f, "persistence error: {}", e),
            Self::StudentNotFound(id) => write!(f, "student not found: {}", id),
            Self::LessonNotFound(id) => write!(f, "lesson not found: {}", id),
        }
    }
}

impl std::error::Error for XpError {}

impl From<rusqlite::Error> for XpError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AwardedBadge {
    pub badge_id: String,
    pub name: String,
    pub xp_reward: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BadgeFailure {
    pub name: String,
    pub message: String,
}

/// Outcome of one badge-evaluation pass. Per-badge failures are collected
/// here instead of aborting the pass; the caller decides whether they are
/// fatal.
#[derive(Debug, Default, Serialize)]
pub struct BadgeEvaluation {
    pub awarded: Vec<AwardedBadge>,
    pub failures: Vec<BadgeFailure>,
}

#[derive(Debug, Serialize)]
pub struct LessonAward {
    pub already_completed: bool,
    pub xp_granted: i64,
    pub total_xp: i64,
    pub evaluation: BadgeEvaluation,
}

#[derive(Debug, Default, Serialize)]
pub struct SeedSummary {
    pub inserted: usize,
    pub existing: usize,
    pub failures: Vec<BadgeFailure>,
}

/// Fresh aggregate snapshot for one student. Never cached; callers that need
/// up-to-date numbers recompute.
pub fn student_stats(conn: &Connection, student_id: &str) -> Result<StudentStats, XpError> {
    let total_xp: i64 = conn
        .query_row(
            "SELECT xp_points FROM profiles WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )
        .optional()?
        .unwrap_or(0);

    let lessons_completed: i64 = conn.query_row(
        "SELECT COUNT(*) FROM lesson_progress WHERE student_id = ? AND completed = 1",
        [student_id],
        |r| r.get(0),
    )?;

    let mut stmt = conn.prepare("SELECT course_id FROM enrollments WHERE student_id = ?")?;
    let course_ids = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut courses_completed: i64 = 0;
    for course_id in course_ids {
        let total_lessons: i64 = conn.query_row(
            "SELECT COUNT(*)
             FROM lessons l
             JOIN sections s ON l.section_id = s.id
             WHERE s.course_id = ?",
            [&course_id],
            |r| r.get(0),
        )?;
        // A course with no lessons is never complete, no matter how vacuously
        // true the count comparison would be.
        if total_lessons == 0 {
            continue;
        }
        let completed_lessons: i64 = conn.query_row(
            "SELECT COUNT(*)
             FROM lesson_progress p
             JOIN lessons l ON p.lesson_id = l.id
             JOIN sections s ON l.section_id = s.id
             WHERE p.student_id = ? AND p.completed = 1 AND s.course_id = ?",
            (student_id, &course_id),
            |r| r.get(0),
        )?;
        if completed_lessons == total_lessons {
            courses_completed += 1;
        }
    }

    Ok(StudentStats {
        total_xp,
        lessons_completed,
        courses_completed,
    })
}

/// Marks a lesson complete and grants its XP, at most once per
/// (student, lesson) pair. The progress upsert, the XP increment, and the
/// badge pass all commit or roll back together.
pub fn award_lesson_xp(
    conn: &Connection,
    student_id: &str,
    lesson_id: &str,
) -> Result<LessonAward, XpError> {
    let tx = conn.unchecked_transaction()?;

    let student_exists = tx
        .query_row("SELECT 1 FROM profiles WHERE id = ?", [student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !student_exists {
        return Err(XpError::StudentNotFound(student_id.to_string()));
    }
    let lesson_exists = tx
        .query_row("SELECT 1 FROM lessons WHERE id = ?", [lesson_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !lesson_exists {
        return Err(XpError::LessonNotFound(lesson_id.to_string()));
    }

    let already: Option<i64> = tx
        .query_row(
            "SELECT completed FROM lesson_progress WHERE student_id = ? AND lesson_id = ?",
            (student_id, lesson_id),
            |r| r.get(0),
        )
        .optional()?;
    if already == Some(1) {
        let total_xp: i64 = tx.query_row(
            "SELECT xp_points FROM profiles WHERE id = ?",
            [student_id],
            |r| r.get(0),
        )?;
        return Ok(LessonAward {
            already_completed: true,
            xp_granted: 0,
            total_xp,
            evaluation: BadgeEvaluation::default(),
        });
    }

    let now = Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO lesson_progress(id, student_id, lesson_id, completed, completed_at)
         VALUES(?, ?, ?, 1, ?)
         ON CONFLICT(student_id, lesson_id) DO UPDATE SET
           completed = 1,
           completed_at = excluded.completed_at",
        (
            Uuid::new_v4().to_string(),
            student_id,
            lesson_id,
            &now,
        ),
    )?;
    tx.execute(
        "UPDATE profiles SET xp_points = xp_points + ? WHERE id = ?",
        (LESSON_XP, student_id),
    )?;

    let evaluation = check_and_award_badges(&tx, student_id)?;

    let total_xp: i64 = tx.query_row(
        "SELECT xp_points FROM profiles WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    tx.commit()?;

    Ok(LessonAward {
        already_completed: false,
        xp_granted: LESSON_XP,
        total_xp,
        evaluation,
    })
}

/// One evaluation pass over the whole badge catalog. Stats are snapshotted
/// once at the top: bonus XP granted mid-pass does not retrigger
/// `xp_threshold` badges until the next pass.
pub fn check_and_award_badges(
    conn: &Connection,
    student_id: &str,
) -> Result<BadgeEvaluation, XpError> {
    let stats = student_stats(conn, student_id)?;

    let mut stmt = conn.prepare(
        "SELECT id, name, xp_reward, criteria_type, criteria_value
         FROM badges
         ORDER BY name",
    )?;
    let catalog = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut evaluation = BadgeEvaluation::default();
    for (badge_id, name, xp_reward, criteria_type, criteria_value) in catalog {
        let Some(criterion) = BadgeCriterion::from_parts(&criteria_type, criteria_value) else {
            evaluation.failures.push(BadgeFailure {
                name,
                message: format!("unknown criterion type: {}", criteria_type),
            });
            continue;
        };

        let held = match conn
            .query_row(
                "SELECT 1 FROM student_badges WHERE student_id = ? AND badge_id = ?",
                (student_id, &badge_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => {
                evaluation.failures.push(BadgeFailure {
                    name,
                    message: e.to_string(),
                });
                continue;
            }
        };
        if held || !criterion.is_met(&stats) {
            continue;
        }

        // The unique pair constraint backstops concurrent passes: a loser
        // inserts zero rows and grants no bonus.
        let inserted = conn.execute(
            "INSERT INTO student_badges(id, student_id, badge_id, awarded_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, badge_id) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                student_id,
                &badge_id,
                Utc::now().to_rfc3339(),
            ),
        );
        match inserted {
            Ok(0) => continue,
            Ok(_) => {
                if let Err(e) = conn.execute(
                    "UPDATE profiles SET xp_points = xp_points + ? WHERE id = ?",
                    (xp_reward, student_id),
                ) {
                    evaluation.failures.push(BadgeFailure {
                        name: name.clone(),
                        message: e.to_string(),
                    });
                }
                evaluation.awarded.push(AwardedBadge {
                    badge_id,
                    name,
                    xp_reward,
                });
            }
            Err(e) => {
                evaluation.failures.push(BadgeFailure {
                    name,
                    message: e.to_string(),
                });
            }
        }
    }

    Ok(evaluation)
}

/// The stock badge catalog. Names are the upsert key, so edits to
/// descriptions or rewards here only affect fresh workspaces.
pub fn default_badge_catalog() -> Vec<(&'static str, &'static str, i64, BadgeCriterion)> {
    vec![
        (
            "First Steps",
            "Complete your first lesson",
            10,
            BadgeCriterion::LessonsCompleted(1),
        ),
        (
            "Quick Learner",
            "Complete 10 lessons",
            25,
            BadgeCriterion::LessonsCompleted(10),
        ),
        (
            "Lesson Master",
            "Complete 50 lessons",
            100,
            BadgeCriterion::LessonsCompleted(50),
        ),
        (
            "Course Champion",
            "Finish your first course",
            50,
            BadgeCriterion::CoursesCompleted(1),
        ),
        (
            "Scholar",
            "Finish 5 courses",
            150,
            BadgeCriterion::CoursesCompleted(5),
        ),
        (
            "XP Explorer",
            "Reach 100 XP",
            30,
            BadgeCriterion::XpThreshold(100),
        ),
        (
            "XP Legend",
            "Reach 1000 XP",
            200,
            BadgeCriterion::XpThreshold(1000),
        ),
        (
            "Streak Starter",
            "Learn 7 days in a row",
            40,
            BadgeCriterion::StreakDays(7),
        ),
    ]
}

/// Installs the stock catalog. Existing names are left untouched, so running
/// this on every workspace open is safe.
pub fn seed_default_badges(conn: &Connection) -> Result<SeedSummary, XpError> {
    let mut summary = SeedSummary::default();
    for (name, description, xp_reward, criterion) in default_badge_catalog() {
        let result = conn.execute(
            "INSERT INTO badges(id, name, description, xp_reward, criteria_type, criteria_value)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                name,
                description,
                xp_reward,
                criterion.kind(),
                criterion.value(),
            ),
        );
        match result {
            Ok(0) => summary.existing += 1,
            Ok(_) => summary.inserted += 1,
            Err(e) => summary.failures.push(BadgeFailure {
                name: name.to_string(),
                message: e.to_string(),
            }),
        }
    }
    Ok(summary)
}
