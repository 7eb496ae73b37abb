use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const ROLES: [&str; 4] = ["admin", "teacher", "student", "parent"];

fn students_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT
               p.id,
               p.full_name,
               p.email,
               p.xp_points,
               (SELECT COUNT(*) FROM student_badges sb WHERE sb.student_id = p.id) AS badge_count,
               (SELECT COUNT(*) FROM enrollments e WHERE e.student_id = p.id) AS enrollment_count
             FROM profiles p
             WHERE p.role = 'student'
             ORDER BY p.full_name",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "fullName": r.get::<_, String>(1)?,
                "email": r.get::<_, Option<String>>(2)?,
                "xpPoints": r.get::<_, i64>(3)?,
                "badgeCount": r.get::<_, i64>(4)?,
                "enrollmentCount": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "students": students }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let full_name = get_required_str(params, "fullName")?;
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(HandlerErr::bad_params("fullName must not be blank"));
    }
    let role = get_optional_str(params, "role").unwrap_or_else(|| "student".to_string());
    if !ROLES.contains(&role.as_str()) {
        return Err(HandlerErr::bad_params(format!("unknown role: {}", role)));
    }
    let email = get_optional_str(params, "email");

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO profiles(id, role, full_name, email, xp_points, created_at)
         VALUES(?, ?, ?, ?, 0, ?)",
        (&id, &role, full_name, &email, Utc::now().to_rfc3339()),
    )
    .map_err(|e| HandlerErr::db_update(e, "profiles"))?;
    Ok(json!({ "id": id }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    if !row_exists(conn, "SELECT 1 FROM profiles WHERE id = ?", [&id])? {
        return Err(HandlerErr::not_found("profile not found"));
    }
    if let Some(full_name) = params.get("fullName").and_then(|v| v.as_str()) {
        let full_name = full_name.trim();
        if full_name.is_empty() {
            return Err(HandlerErr::bad_params("fullName must not be blank"));
        }
        conn.execute(
            "UPDATE profiles SET full_name = ? WHERE id = ?",
            (full_name, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "profiles"))?;
    }
    if let Some(v) = params.get("email") {
        conn.execute(
            "UPDATE profiles SET email = ? WHERE id = ?",
            (v.as_str(), &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "profiles"))?;
    }
    if let Some(role) = params.get("role").and_then(|v| v.as_str()) {
        if !ROLES.contains(&role) {
            return Err(HandlerErr::bad_params(format!("unknown role: {}", role)));
        }
        conn.execute("UPDATE profiles SET role = ? WHERE id = ?", (role, &id))
            .map_err(|e| HandlerErr::db_update(e, "profiles"))?;
    }
    // xp_points is deliberately not editable here; only the XP engine moves it.
    Ok(json!({ "ok": true }))
}

fn enrollments_enroll(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    if !row_exists(conn, "SELECT 1 FROM profiles WHERE id = ?", [&student_id])? {
        return Err(HandlerErr::not_found("student not found"));
    }
    if !row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", [&course_id])? {
        return Err(HandlerErr::not_found("course not found"));
    }
    let inserted = conn
        .execute(
            "INSERT INTO enrollments(id, student_id, course_id, enrolled_at)
             VALUES(?, ?, ?, ?)
             ON CONFLICT(student_id, course_id) DO NOTHING",
            (
                Uuid::new_v4().to_string(),
                &student_id,
                &course_id,
                Utc::now().to_rfc3339(),
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "enrollments"))?;
    Ok(json!({ "alreadyEnrolled": inserted == 0 }))
}

fn enrollments_withdraw(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let course_id = get_required_str(params, "courseId")?;
    let removed = conn
        .execute(
            "DELETE FROM enrollments WHERE student_id = ? AND course_id = ?",
            (&student_id, &course_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "enrollments"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("enrollment not found"));
    }
    Ok(json!({ "ok": true }))
}

fn enrollments_list_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT e.course_id, c.title, e.enrolled_at
             FROM enrollments e
             JOIN courses c ON c.id = e.course_id
             WHERE e.student_id = ?
             ORDER BY c.title",
        )
        .map_err(HandlerErr::db_query)?;
    let enrollments = stmt
        .query_map([&student_id], |r| {
            Ok(json!({
                "courseId": r.get::<_, String>(0)?,
                "courseTitle": r.get::<_, String>(1)?,
                "enrolledAt": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "enrollments": enrollments }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("students.") && !req.method.starts_with("enrollments.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "students.list" => students_list(conn),
        "students.create" => students_create(conn, &req.params),
        "students.update" => students_update(conn, &req.params),
        "enrollments.enroll" => enrollments_enroll(conn, &req.params),
        "enrollments.withdraw" => enrollments_withdraw(conn, &req.params),
        "enrollments.listForStudent" => enrollments_list_for_student(conn, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
