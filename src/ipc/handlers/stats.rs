use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::xp;
use rusqlite::Connection;
use serde_json::json;

fn stats_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let stats = xp::student_stats(conn, &student_id)?;
    let badge_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM student_badges WHERE student_id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    Ok(json!({
        "totalXp": stats.total_xp,
        "lessonsCompleted": stats.lessons_completed,
        "coursesCompleted": stats.courses_completed,
        "badgeCount": badge_count,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if req.method != "stats.student" {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    Some(match stats_student(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
