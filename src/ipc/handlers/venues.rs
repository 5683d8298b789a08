use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
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

fn parse_capacity(req: &Request) -> Result<i64, serde_json::Value> {
    match req.params.get("capacity") {
        None => Ok(0),
        Some(v) if v.is_null() => Ok(0),
        Some(v) => match v.as_i64() {
            Some(n) if n >= 0 => Ok(n),
            _ => Err(err(
                &req.id,
                "bad_params",
                "capacity must be a non-negative integer",
                None,
            )),
        },
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT v.id, v.name, v.capacity, COUNT(p.id)
         FROM venues v
         LEFT JOIN projects p ON p.venue_id = v.id
         GROUP BY v.id
         ORDER BY v.name",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let capacity: i64 = r.get(2)?;
            let assigned: i64 = r.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "capacity": capacity,
                "assignedProjects": assigned
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "venues": rows }))
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
    let capacity = match parse_capacity(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO venues(id, name, capacity) VALUES(?, ?, ?)",
        (&id, &name, capacity),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "venueId": id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let venue_id = match required_str(req, "venueId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let capacity = match parse_capacity(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE venues SET name = ?, capacity = ? WHERE id = ?",
        (&name, capacity, &venue_id),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "venue not found", None);
    }
    ok(&req.id, json!({ "venueId": venue_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let venue_id = match required_str(req, "venueId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let in_use: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE venue_id = ?",
        [&venue_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if in_use > 0 {
        return err(
            &req.id,
            "conflict",
            "venue is referenced by projects",
            Some(json!({ "projectCount": in_use })),
        );
    }

    let deleted = match conn.execute("DELETE FROM venues WHERE id = ?", [&venue_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "venue not found", None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "venues.list" => Some(handle_list(state, req)),
        "venues.create" => Some(handle_create(state, req)),
        "venues.update" => Some(handle_update(state, req)),
        "venues.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
