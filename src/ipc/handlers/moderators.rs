use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

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

fn handle_assign(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let moderator_name = match required_str(req, "moderatorName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let moderator_email = match required_str(req, "moderatorEmail") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let supervisor_email: Option<String> = match conn
        .query_row(
            "SELECT supervisor_email FROM projects WHERE id = ?",
            [&project_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(supervisor_email) = supervisor_email else {
        return err(&req.id, "not_found", "project not found", None);
    };
    if supervisor_email.eq_ignore_ascii_case(&moderator_email) {
        return err(
            &req.id,
            "forbidden",
            "a project's supervisor cannot moderate it",
            Some(json!({ "supervisorEmail": supervisor_email })),
        );
    }

    if let Err(e) = conn.execute(
        "UPDATE projects SET moderator_name = ?, moderator_email = ? WHERE id = ?",
        (&moderator_name, &moderator_email, &project_id),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(
        &req.id,
        json!({ "projectId": project_id, "moderatorEmail": moderator_email }),
    )
}

fn handle_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE projects SET moderator_name = NULL, moderator_email = NULL WHERE id = ?",
        [&project_id],
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "project not found", None);
    }
    ok(&req.id, json!({ "projectId": project_id }))
}

fn handle_workload(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT moderator_email, moderator_name, COUNT(*)
         FROM projects
         WHERE semester_id = ? AND moderator_email IS NOT NULL
         GROUP BY moderator_email
         ORDER BY COUNT(*) DESC, moderator_email",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map([&semester_id], |r| {
            let email: String = r.get(0)?;
            let name: Option<String> = r.get(1)?;
            let count: i64 = r.get(2)?;
            Ok(json!({
                "moderatorEmail": email,
                "moderatorName": name,
                "projectCount": count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "moderators": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "moderators.assign" => Some(handle_assign(state, req)),
        "moderators.clear" => Some(handle_clear(state, req)),
        "moderators.workload" => Some(handle_workload(state, req)),
        _ => None,
    }
}
