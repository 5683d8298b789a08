use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value as JsonValue};
use std::time::{SystemTime, UNIX_EPOCH};
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

fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn parse_opt_date(v: Option<&JsonValue>, key: &str) -> Result<Option<String>, String> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| format!("{} must be an ISO date string or null", key))?
                .trim()
                .to_string();
            if s.is_empty() {
                return Ok(None);
            }
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|_| format!("{} must be formatted as YYYY-MM-DD", key))?;
            Ok(Some(s))
        }
    }
}

struct Timeline {
    registration_start: Option<String>,
    registration_end: Option<String>,
    grading_deadline: Option<String>,
}

fn parse_timeline(req: &Request) -> Result<Timeline, serde_json::Value> {
    let registration_start = parse_opt_date(req.params.get("registrationStart"), "registrationStart")
        .map_err(|m| err(&req.id, "bad_params", m, None))?;
    let registration_end = parse_opt_date(req.params.get("registrationEnd"), "registrationEnd")
        .map_err(|m| err(&req.id, "bad_params", m, None))?;
    let grading_deadline = parse_opt_date(req.params.get("gradingDeadline"), "gradingDeadline")
        .map_err(|m| err(&req.id, "bad_params", m, None))?;

    // ISO dates compare correctly as strings; check each adjacent pair that is set.
    if let (Some(a), Some(b)) = (&registration_start, &registration_end) {
        if a > b {
            return Err(err(
                &req.id,
                "bad_params",
                "registrationStart must not be after registrationEnd",
                None,
            ));
        }
    }
    if let (Some(a), Some(b)) = (&registration_end, &grading_deadline) {
        if a > b {
            return Err(err(
                &req.id,
                "bad_params",
                "registrationEnd must not be after gradingDeadline",
                None,
            ));
        }
    }
    if let (Some(a), Some(b)) = (&registration_start, &grading_deadline) {
        if a > b {
            return Err(err(
                &req.id,
                "bad_params",
                "registrationStart must not be after gradingDeadline",
                None,
            ));
        }
    }

    Ok(Timeline {
        registration_start,
        registration_end,
        grading_deadline,
    })
}

fn semester_json(row: (String, String, String, i64, Option<String>, Option<String>, Option<String>)) -> serde_json::Value {
    let (id, name, academic_year, active, reg_start, reg_end, deadline) = row;
    json!({
        "id": id,
        "name": name,
        "academicYear": academic_year,
        "active": active != 0,
        "registrationStart": reg_start,
        "registrationEnd": reg_end,
        "gradingDeadline": deadline
    })
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut stmt = match conn.prepare(
        "SELECT id, name, academic_year, active, registration_start, registration_end, grading_deadline
         FROM semesters
         ORDER BY academic_year DESC, name",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
                r.get(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let semesters = rows.into_iter().map(semester_json).collect::<Vec<_>>();
    ok(&req.id, json!({ "semesters": semesters }))
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
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let timeline = match parse_timeline(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO semesters(id, name, academic_year, active, registration_start, registration_end, grading_deadline, created_at)
         VALUES(?, ?, ?, 0, ?, ?, ?, ?)",
        (
            &id,
            &name,
            &academic_year,
            &timeline.registration_start,
            &timeline.registration_end,
            &timeline.grading_deadline,
            now_ts(),
        ),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "semesterId": id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year = match required_str(req, "academicYear") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let timeline = match parse_timeline(req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE semesters
         SET name = ?, academic_year = ?, registration_start = ?, registration_end = ?, grading_deadline = ?
         WHERE id = ?",
        (
            &name,
            &academic_year,
            &timeline.registration_start,
            &timeline.registration_end,
            &timeline.grading_deadline,
            &semester_id,
        ),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "semester not found", None);
    }
    ok(&req.id, json!({ "semesterId": semester_id }))
}

fn handle_activate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let exists: Option<String> = match conn
        .query_row("SELECT id FROM semesters WHERE id = ?", [&semester_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "semester not found", None);
    }

    // Single-active rule: activating one semester deactivates the rest.
    if let Err(e) = conn.execute("UPDATE semesters SET active = 0 WHERE active = 1", []) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute(
        "UPDATE semesters SET active = 1 WHERE id = ?",
        [&semester_id],
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "semesterId": semester_id, "active": true }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let project_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM projects WHERE semester_id = ?",
        [&semester_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if project_count > 0 {
        return err(
            &req.id,
            "conflict",
            "semester has registered projects",
            Some(json!({ "projectCount": project_count })),
        );
    }

    let deleted = match conn.execute("DELETE FROM semesters WHERE id = ?", [&semester_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "semester not found", None);
    }
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "semesters.list" => Some(handle_list(state, req)),
        "semesters.create" => Some(handle_create(state, req)),
        "semesters.update" => Some(handle_update(state, req)),
        "semesters.activate" => Some(handle_activate(state, req)),
        "semesters.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
