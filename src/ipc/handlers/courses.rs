use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_bool, get_optional_i64, get_optional_str, get_required_str, get_str_array,
    row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn courses_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Correlated subqueries keep the counts join-free so nothing is
    // double-counted.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.title,
               c.description,
               c.teacher_id,
               c.language_id,
               c.study_level_id,
               c.specialty_id,
               c.published,
               (SELECT COUNT(*) FROM sections s WHERE s.course_id = c.id) AS section_count,
               (SELECT COUNT(*) FROM lessons l JOIN sections s ON l.section_id = s.id
                  WHERE s.course_id = c.id) AS lesson_count,
               (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id) AS enrollment_count
             FROM courses c
             ORDER BY c.title",
        )
        .map_err(HandlerErr::db_query)?;
    let courses = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "teacherId": r.get::<_, Option<String>>(3)?,
                "languageId": r.get::<_, Option<String>>(4)?,
                "studyLevelId": r.get::<_, Option<String>>(5)?,
                "specialtyId": r.get::<_, Option<String>>(6)?,
                "published": r.get::<_, i64>(7)? != 0,
                "sectionCount": r.get::<_, i64>(8)?,
                "lessonCount": r.get::<_, i64>(9)?,
                "enrollmentCount": r.get::<_, i64>(10)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "courses": courses }))
}

fn require_fk(
    conn: &Connection,
    table: &str,
    id: &Option<String>,
) -> Result<(), HandlerErr> {
    let Some(id) = id else { return Ok(()) };
    if !row_exists(conn, &format!("SELECT 1 FROM {} WHERE id = ?", table), [id])? {
        return Err(HandlerErr::not_found(format!(
            "{} entry not found: {}",
            table, id
        )));
    }
    Ok(())
}

fn courses_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let title = get_required_str(params, "title")?;
    let title = title.trim();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be blank"));
    }
    let description = get_optional_str(params, "description");
    let teacher_id = get_optional_str(params, "teacherId");
    let language_id = get_optional_str(params, "languageId");
    let study_level_id = get_optional_str(params, "studyLevelId");
    let specialty_id = get_optional_str(params, "specialtyId");
    let published = get_optional_bool(params, "published").unwrap_or(false);

    require_fk(conn, "profiles", &teacher_id)?;
    require_fk(conn, "languages", &language_id)?;
    require_fk(conn, "study_levels", &study_level_id)?;
    require_fk(conn, "specialties", &specialty_id)?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO courses(id, title, description, teacher_id, language_id,
                             study_level_id, specialty_id, published, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            title,
            &description,
            &teacher_id,
            &language_id,
            &study_level_id,
            &specialty_id,
            published as i64,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "courses"))?;
    Ok(json!({ "id": id }))
}

fn courses_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    if !row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", [&id])? {
        return Err(HandlerErr::not_found("course not found"));
    }

    if let Some(title) = params.get("title").and_then(|v| v.as_str()) {
        let title = title.trim();
        if title.is_empty() {
            return Err(HandlerErr::bad_params("title must not be blank"));
        }
        conn.execute("UPDATE courses SET title = ? WHERE id = ?", (title, &id))
            .map_err(|e| HandlerErr::db_update(e, "courses"))?;
    }
    if let Some(v) = params.get("description") {
        let description = v.as_str();
        conn.execute(
            "UPDATE courses SET description = ? WHERE id = ?",
            (description, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "courses"))?;
    }
    for (key, table, column) in [
        ("teacherId", "profiles", "teacher_id"),
        ("languageId", "languages", "language_id"),
        ("studyLevelId", "study_levels", "study_level_id"),
        ("specialtyId", "specialties", "specialty_id"),
    ] {
        let Some(v) = params.get(key) else { continue };
        let fk = v.as_str().map(|s| s.to_string());
        require_fk(conn, table, &fk)?;
        conn.execute(
            &format!("UPDATE courses SET {} = ? WHERE id = ?", column),
            (&fk, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "courses"))?;
    }
    if let Some(published) = get_optional_bool(params, "published") {
        conn.execute(
            "UPDATE courses SET published = ? WHERE id = ?",
            (published as i64, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "courses"))?;
    }
    Ok(json!({ "ok": true }))
}

fn courses_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let section_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sections WHERE course_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    let enrollment_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM enrollments WHERE course_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if section_count > 0 || enrollment_count > 0 {
        return Err(HandlerErr::in_use(
            "course has sections or enrollments",
            json!({ "sectionCount": section_count, "enrollmentCount": enrollment_count }),
        ));
    }
    let removed = conn
        .execute("DELETE FROM courses WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_update(e, "courses"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("course not found"));
    }
    Ok(json!({ "ok": true }))
}

fn sections_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    if !row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", [&course_id])? {
        return Err(HandlerErr::not_found("course not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.title,
               s.sort_order,
               (SELECT COUNT(*) FROM lessons l WHERE l.section_id = s.id) AS lesson_count
             FROM sections s
             WHERE s.course_id = ?
             ORDER BY s.sort_order",
        )
        .map_err(HandlerErr::db_query)?;
    let sections = stmt
        .query_map([&course_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "sortOrder": r.get::<_, i64>(2)?,
                "lessonCount": r.get::<_, i64>(3)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "sections": sections }))
}

fn sections_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let title = get_required_str(params, "title")?;
    let title = title.trim();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be blank"));
    }
    if !row_exists(conn, "SELECT 1 FROM courses WHERE id = ?", [&course_id])? {
        return Err(HandlerErr::not_found("course not found"));
    }
    let sort_order = match get_optional_i64(params, "sortOrder") {
        Some(v) => v,
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM sections WHERE course_id = ?",
                [&course_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db_query)?,
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sections(id, course_id, title, sort_order) VALUES(?, ?, ?, ?)",
        (&id, &course_id, title, sort_order),
    )
    .map_err(|e| HandlerErr::db_update(e, "sections"))?;
    Ok(json!({ "id": id }))
}

fn sections_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    if !row_exists(conn, "SELECT 1 FROM sections WHERE id = ?", [&id])? {
        return Err(HandlerErr::not_found("section not found"));
    }
    if let Some(title) = params.get("title").and_then(|v| v.as_str()) {
        let title = title.trim();
        if title.is_empty() {
            return Err(HandlerErr::bad_params("title must not be blank"));
        }
        conn.execute("UPDATE sections SET title = ? WHERE id = ?", (title, &id))
            .map_err(|e| HandlerErr::db_update(e, "sections"))?;
    }
    if let Some(sort_order) = get_optional_i64(params, "sortOrder") {
        conn.execute(
            "UPDATE sections SET sort_order = ? WHERE id = ?",
            (sort_order, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "sections"))?;
    }
    Ok(json!({ "ok": true }))
}

fn sections_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let lesson_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM lessons WHERE section_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if lesson_count > 0 {
        return Err(HandlerErr::in_use(
            "section still has lessons",
            json!({ "lessonCount": lesson_count }),
        ));
    }
    let removed = conn
        .execute("DELETE FROM sections WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_update(e, "sections"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("section not found"));
    }
    Ok(json!({ "ok": true }))
}

fn sections_reorder(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let course_id = get_required_str(params, "courseId")?;
    let section_ids = get_str_array(params, "sectionIds")?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (i, section_id) in section_ids.iter().enumerate() {
        tx.execute(
            "UPDATE sections SET sort_order = ? WHERE id = ? AND course_id = ?",
            (i as i64, section_id, &course_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "sections"))?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("courses.") && !req.method.starts_with("sections.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "courses.list" => courses_list(conn),
        "courses.create" => courses_create(conn, &req.params),
        "courses.update" => courses_update(conn, &req.params),
        "courses.delete" => courses_delete(conn, &req.params),
        "sections.list" => sections_list(conn, &req.params),
        "sections.create" => sections_create(conn, &req.params),
        "sections.update" => sections_update(conn, &req.params),
        "sections.delete" => sections_delete(conn, &req.params),
        "sections.reorder" => sections_reorder(conn, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
