use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

fn code_taken(conn: &Connection, code: &str, except_id: Option<&str>) -> rusqlite::Result<bool> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM programmes WHERE code = ? COLLATE NOCASE",
            [code],
            |r| r.get(0),
        )
        .optional()?;
    Ok(match existing {
        None => false,
        Some(id) => except_id.map(|e| e != id).unwrap_or(true),
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare("SELECT id, name, code FROM programmes ORDER BY code") {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let code: String = r.get(2)?;
            Ok(json!({ "id": id, "name": name, "code": code }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "programmes": rows }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match code_taken(conn, &code, None) {
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "programme code already exists",
                Some(json!({ "code": code })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO programmes(id, name, code) VALUES(?, ?, ?)",
        (&id, &name, &code),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "programmeId": id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let programme_id = match required_str(req, "programmeId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match required_str(req, "code") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match code_taken(conn, &code, Some(&programme_id)) {
        Ok(true) => {
            return err(
                &req.id,
                "conflict",
                "programme code already exists",
                Some(json!({ "code": code })),
            )
        }
        Ok(false) => {}
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let updated = match conn.execute(
        "UPDATE programmes SET name = ?, code = ? WHERE id = ?",
        (&name, &code, &programme_id),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "programme not found", None);
    }
    ok(&req.id, json!({ "programmeId": programme_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let programme_id = match required_str(req, "programmeId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let in_use: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE programme_id = ?",
        [&programme_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if in_use > 0 {
        return err(
            &req.id,
            "conflict",
            "programme is referenced by projects",
            Some(json!({ "projectCount": in_use })),
        );
    }

    let deleted = match conn.execute("DELETE FROM programmes WHERE id = ?", [&programme_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "programme not found", None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "programmes.list" => Some(handle_list(state, req)),
        "programmes.create" => Some(handle_create(state, req)),
        "programmes.update" => Some(handle_update(state, req)),
        "programmes.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
