use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_i64, get_required_str, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// The three flat lookup tables that classify courses. They share one CRUD
/// surface; only study levels carry a sort order.
#[derive(Clone, Copy)]
enum CatalogSection {
    Languages,
    StudyLevels,
    Specialties,
}

impl CatalogSection {
    fn parse(prefix: &str) -> Option<Self> {
        match prefix {
            "languages" => Some(Self::Languages),
            "studyLevels" => Some(Self::StudyLevels),
            "specialties" => Some(Self::Specialties),
            _ => None,
        }
    }

    fn table(self) -> &'static str {
        match self {
            Self::Languages => "languages",
            Self::StudyLevels => "study_levels",
            Self::Specialties => "specialties",
        }
    }

    fn course_column(self) -> &'static str {
        match self {
            Self::Languages => "language_id",
            Self::StudyLevels => "study_level_id",
            Self::Specialties => "specialty_id",
        }
    }

    fn has_sort_order(self) -> bool {
        matches!(self, Self::StudyLevels)
    }
}

fn list(conn: &Connection, section: CatalogSection) -> Result<serde_json::Value, HandlerErr> {
    let sql = if section.has_sort_order() {
        format!(
            "SELECT id, name, sort_order FROM {} ORDER BY sort_order, name",
            section.table()
        )
    } else {
        format!("SELECT id, name, NULL FROM {} ORDER BY name", section.table())
    };
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let items = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<i64>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let items_json: Vec<serde_json::Value> = items
        .into_iter()
        .map(|(id, name, sort_order)| {
            let mut v = json!({ "id": id, "name": name });
            if let Some(s) = sort_order {
                v["sortOrder"] = json!(s);
            }
            v
        })
        .collect();
    Ok(json!({ "items": items_json }))
}

fn create(
    conn: &Connection,
    section: CatalogSection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let name = name.trim();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be blank"));
    }
    let id = Uuid::new_v4().to_string();
    let result = if section.has_sort_order() {
        let sort_order = get_optional_i64(params, "sortOrder").unwrap_or(0);
        conn.execute(
            "INSERT INTO study_levels(id, name, sort_order) VALUES(?, ?, ?)",
            (&id, name, sort_order),
        )
    } else {
        conn.execute(
            &format!("INSERT INTO {}(id, name) VALUES(?, ?)", section.table()),
            (&id, name),
        )
    };
    result.map_err(|e| HandlerErr::db_update(e, section.table()))?;
    Ok(json!({ "id": id }))
}

fn update(
    conn: &Connection,
    section: CatalogSection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    if !row_exists(
        conn,
        &format!("SELECT 1 FROM {} WHERE id = ?", section.table()),
        [&id],
    )? {
        return Err(HandlerErr::not_found("catalog entry not found"));
    }
    if let Some(name) = params.get("name").and_then(|v| v.as_str()) {
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerErr::bad_params("name must not be blank"));
        }
        conn.execute(
            &format!("UPDATE {} SET name = ? WHERE id = ?", section.table()),
            (name, &id),
        )
        .map_err(|e| HandlerErr::db_update(e, section.table()))?;
    }
    if section.has_sort_order() {
        if let Some(sort_order) = get_optional_i64(params, "sortOrder") {
            conn.execute(
                "UPDATE study_levels SET sort_order = ? WHERE id = ?",
                (sort_order, &id),
            )
            .map_err(|e| HandlerErr::db_update(e, section.table()))?;
        }
    }
    Ok(json!({ "ok": true }))
}

fn delete(
    conn: &Connection,
    section: CatalogSection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let referencing: i64 = conn
        .query_row(
            &format!(
                "SELECT COUNT(*) FROM courses WHERE {} = ?",
                section.course_column()
            ),
            [&id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if referencing > 0 {
        return Err(HandlerErr::in_use(
            "catalog entry is referenced by courses",
            json!({ "courseCount": referencing }),
        ));
    }
    let removed = conn
        .execute(
            &format!("DELETE FROM {} WHERE id = ?", section.table()),
            [&id],
        )
        .map_err(|e| HandlerErr::db_update(e, section.table()))?;
    if removed == 0 {
        return Err(HandlerErr::not_found("catalog entry not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (prefix, verb) = req.method.split_once('.')?;
    let section = CatalogSection::parse(prefix)?;

    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    let result = match verb {
        "list" => list(conn, section),
        "create" => create(conn, section, &req.params),
        "update" => update(conn, section, &req.params),
        "delete" => delete(conn, section, &req.params),
        _ => return None,
    };
    Some(match result {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
