use crate::ipc::error::err;
use rusqlite::Connection;
use rusqlite::OptionalExtension;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn in_use(message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: "in_use",
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        Self {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> Self {
        Self {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

pub fn get_optional_bool(params: &serde_json::Value, key: &str) -> Option<bool> {
    params.get(key).and_then(|v| v.as_bool())
}

pub fn get_str_array(params: &serde_json::Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(items) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("missing {}", key)));
    };
    Ok(items
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect())
}

pub fn row_exists(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<bool, HandlerErr> {
    conn.query_row(sql, params, |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}
