use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_i64, get_optional_str, get_required_str, get_str_array, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn lessons_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    if !row_exists(conn, "SELECT 1 FROM sections WHERE id = ?", [&section_id])? {
        return Err(HandlerErr::not_found("section not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT id, title, content, video_url, duration_minutes, sort_order
             FROM lessons
             WHERE section_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::db_query)?;
    let lessons = stmt
        .query_map([&section_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "content": r.get::<_, Option<String>>(2)?,
                "videoUrl": r.get::<_, Option<String>>(3)?,
                "durationMinutes": r.get::<_, Option<i64>>(4)?,
                "sortOrder": r.get::<_, i64>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "lessons": lessons }))
}

fn lessons_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let title = get_required_str(params, "title")?;
    let title = title.trim();
    if title.is_empty() {
        return Err(HandlerErr::bad_params("title must not be blank"));
    }
    if !row_exists(conn, "SELECT 1 FROM sections WHERE id = ?", [&section_id])? {
        return Err(HandlerErr::not_found("section not found"));
    }
    let content = get_optional_str(params, "content");
    let video_url = get_optional_str(params, "videoUrl");
    let duration_minutes = get_optional_i64(params, "durationMinutes");
    let sort_order = match get_optional_i64(params, "sortOrder") {
        Some(v) => v,
        None => conn
            .query_row(
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM lessons WHERE section_id = ?",
                [&section_id],
                |r| r.get(0),
            )
            .map_err(HandlerErr::db_query)?,
    };
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lessons(id, section_id, title, content, video_url, duration_minutes, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &section_id,
            title,
            &content,
            &video_url,
            duration_minutes,
            sort_order,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "lessons"))?;
    Ok(json!({ "id": id }))
}

fn lessons_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    if !row_exists(conn, "SELECT 1 FROM lessons WHERE id = ?", [&id])? {
        return Err(HandlerErr::not_found("lesson not found"));
    }
    if let Some(title) = params.get("title").and_then(|v| v.as_str()) {
        let title = title.trim();
        if title.is_empty() {
            return Err(HandlerErr::bad_params("title must not be blank"));
        }
        conn.execute("UPDATE lessons SET title = ? WHERE id = ?", (title, &id))
            .map_err(|e| HandlerErr::db_update(e, "lessons"))?;
    }
    for (key, column) in [("content", "content"), ("videoUrl", "video_url")] {
        let Some(v) = params.get(key) else { continue };
        conn.execute(
            &format!("UPDATE lessons SET {} = ? WHERE id = ?", column),
            (v.as_str(), &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lessons"))?;
    }
    if let Some(v) = params.get("durationMinutes") {
        conn.execute(
            "UPDATE lessons SET duration_minutes = ? WHERE id = ?",
            (v.as_i64(), &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lessons"))?;
    }
    if let Some(sort_order) = get_optional_i64(params, "sortOrder") {
        conn.execute(
            "UPDATE lessons SET sort_order = ? WHERE id = ?",
            (sort_order, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lessons"))?;
    }
    Ok(json!({ "ok": true }))
}

fn lessons_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    // Progress rows are append-only; a lesson that anyone has started stays.
    let progress_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM lesson_progress WHERE lesson_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if progress_count > 0 {
        return Err(HandlerErr::in_use(
            "lesson has recorded progress",
            json!({ "progressCount": progress_count }),
        ));
    }
    let removed = conn
        .execute("DELETE FROM lessons WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_update(e, "lessons"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("lesson not found"));
    }
    Ok(json!({ "ok": true }))
}

fn lessons_reorder(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let section_id = get_required_str(params, "sectionId")?;
    let lesson_ids = get_str_array(params, "lessonIds")?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;
    for (i, lesson_id) in lesson_ids.iter().enumerate() {
        tx.execute(
            "UPDATE lessons SET sort_order = ? WHERE id = ? AND section_id = ?",
            (i as i64, lesson_id, &section_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "lessons"))?;
    }
    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("lessons.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "lessons.list" => lessons_list(conn, &req.params),
        "lessons.create" => lessons_create(conn, &req.params),
        "lessons.update" => lessons_update(conn, &req.params),
        "lessons.delete" => lessons_delete(conn, &req.params),
        "lessons.reorder" => lessons_reorder(conn, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
