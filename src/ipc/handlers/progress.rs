use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::xp::{self, XpError};
use rusqlite::Connection;
use serde_json::json;

impl From<XpError> for HandlerErr {
    fn from(e: XpError) -> Self {
        match e {
            XpError::StudentNotFound(_) | XpError::LessonNotFound(_) => {
                HandlerErr::not_found(e.to_string())
            }
            XpError::Persistence(inner) => HandlerErr {
                code: "db_update_failed",
                message: inner.to_string(),
                details: None,
            },
        }
    }
}

fn complete_lesson(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let lesson_id = get_required_str(params, "lessonId")?;

    // Enrollment is the gate; the engine itself only assumes it was checked.
    let enrolled = row_exists(
        conn,
        "SELECT 1 FROM enrollments e
         JOIN sections s ON s.course_id = e.course_id
         JOIN lessons l ON l.section_id = s.id
         WHERE e.student_id = ? AND l.id = ?",
        (&student_id, &lesson_id),
    )?;
    if !enrolled {
        return Err(HandlerErr {
            code: "not_enrolled",
            message: "student is not enrolled in the lesson's course".to_string(),
            details: Some(json!({ "studentId": student_id, "lessonId": lesson_id })),
        });
    }

    let award = xp::award_lesson_xp(conn, &student_id, &lesson_id)?;
    let awarded: Vec<serde_json::Value> = award
        .evaluation
        .awarded
        .iter()
        .map(|b| {
            json!({
                "badgeId": b.badge_id,
                "name": b.name,
                "xpReward": b.xp_reward,
            })
        })
        .collect();
    let failures: Vec<serde_json::Value> = award
        .evaluation
        .failures
        .iter()
        .map(|f| json!({ "name": f.name, "message": f.message }))
        .collect();
    Ok(json!({
        "alreadyCompleted": award.already_completed,
        "xpGranted": award.xp_granted,
        "totalXp": award.total_xp,
        "badgesAwarded": awarded,
        "evaluationFailures": failures,
    }))
}

fn list_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_optional_str(params, "courseId");

    let sql = "SELECT p.lesson_id, l.title, s.course_id, p.completed, p.completed_at
               FROM lesson_progress p
               JOIN lessons l ON l.id = p.lesson_id
               JOIN sections s ON s.id = l.section_id
               WHERE p.student_id = ?1
                 AND (?2 IS NULL OR s.course_id = ?2)
               ORDER BY p.completed_at";
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((&student_id, &course_id), |r| {
            Ok(json!({
                "lessonId": r.get::<_, String>(0)?,
                "lessonTitle": r.get::<_, String>(1)?,
                "courseId": r.get::<_, String>(2)?,
                "completed": r.get::<_, i64>(3)? != 0,
                "completedAt": r.get::<_, Option<String>>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "progress": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("progress.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "progress.completeLesson" => complete_lesson(conn, &req.params),
        "progress.listForStudent" => list_for_student(conn, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
