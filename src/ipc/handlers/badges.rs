use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::xp::{self, BadgeCriterion};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn badge_row_json(
    id: String,
    name: String,
    description: String,
    xp_reward: i64,
    criteria_type: String,
    criteria_value: i64,
) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "description": description,
        "xpReward": xp_reward,
        "criteria": { "type": criteria_type, "value": criteria_value },
    })
}

fn badges_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, description, xp_reward, criteria_type, criteria_value
             FROM badges
             ORDER BY name",
        )
        .map_err(HandlerErr::db_query)?;
    let badges = stmt
        .query_map([], |r| {
            Ok(badge_row_json(
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "badges": badges }))
}

fn badges_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let name = name.trim();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be blank"));
    }
    let description = get_required_str(params, "description")?;
    let xp_reward = params
        .get("xpReward")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if xp_reward < 0 {
        return Err(HandlerErr::bad_params("xpReward must be >= 0"));
    }
    let Some(criteria) = params.get("criteria") else {
        return Err(HandlerErr::bad_params("missing criteria"));
    };
    let criterion: BadgeCriterion = serde_json::from_value(criteria.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid criteria: {}", e)))?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO badges(id, name, description, xp_reward, criteria_type, criteria_value)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            name,
            &description,
            xp_reward,
            criterion.kind(),
            criterion.value(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "badges"))?;
    Ok(json!({ "id": id }))
}

fn badges_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    // Awards are never revoked, so an awarded badge definition is frozen.
    let awarded_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM student_badges WHERE badge_id = ?",
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if awarded_count > 0 {
        return Err(HandlerErr::in_use(
            "badge has been awarded to students",
            json!({ "awardedCount": awarded_count }),
        ));
    }
    let removed = conn
        .execute("DELETE FROM badges WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db_update(e, "badges"))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("badge not found"));
    }
    Ok(json!({ "ok": true }))
}

fn badges_seed_defaults(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let summary = xp::seed_default_badges(conn)?;
    let failures: Vec<serde_json::Value> = summary
        .failures
        .iter()
        .map(|f| json!({ "name": f.name, "message": f.message }))
        .collect();
    Ok(json!({
        "inserted": summary.inserted,
        "existing": summary.existing,
        "failures": failures,
    }))
}

fn badges_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let mut stmt = conn
        .prepare(
            "SELECT b.id, b.name, b.description, b.xp_reward, b.criteria_type, b.criteria_value,
                    sb.awarded_at
             FROM student_badges sb
             JOIN badges b ON b.id = sb.badge_id
             WHERE sb.student_id = ?
             ORDER BY sb.awarded_at, b.name",
        )
        .map_err(HandlerErr::db_query)?;
    let badges = stmt
        .query_map([&student_id], |r| {
            let mut v = badge_row_json(
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            );
            v["awardedAt"] = json!(r.get::<_, Option<String>>(6)?);
            Ok(v)
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "badges": badges }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("badges.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match req.method.as_str() {
        "badges.list" => badges_list(conn),
        "badges.create" => badges_create(conn, &req.params),
        "badges.delete" => badges_delete(conn, &req.params),
        "badges.seedDefaults" => badges_seed_defaults(conn),
        "badges.forStudent" => badges_for_student(conn, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
