use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grading;
use crate::ipc::types::{AppState, Request};
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

fn optional_str(v: Option<&JsonValue>) -> Result<Option<String>, &'static str> {
    match v {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let s = v.as_str().ok_or("must be string or null")?.trim().to_string();
            if s.is_empty() {
                Ok(None)
            } else {
                Ok(Some(s))
            }
        }
    }
}

fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

fn row_exists(conn: &Connection, sql: &str, id: &str) -> rusqlite::Result<bool> {
    let found: Option<String> = conn.query_row(sql, [id], |r| r.get(0)).optional()?;
    Ok(found.is_some())
}

// Capacity 0 means unlimited.
fn venue_has_room(
    conn: &Connection,
    venue_id: &str,
    except_project: Option<&str>,
) -> rusqlite::Result<Option<bool>> {
    let capacity: Option<i64> = conn
        .query_row("SELECT capacity FROM venues WHERE id = ?", [venue_id], |r| {
            r.get(0)
        })
        .optional()?;
    let Some(capacity) = capacity else {
        return Ok(None);
    };
    if capacity <= 0 {
        return Ok(Some(true));
    }
    let assigned: i64 = match except_project {
        Some(pid) => conn.query_row(
            "SELECT COUNT(*) FROM projects WHERE venue_id = ? AND id != ?",
            [venue_id, pid],
            |r| r.get(0),
        )?,
        None => conn.query_row(
            "SELECT COUNT(*) FROM projects WHERE venue_id = ?",
            [venue_id],
            |r| r.get(0),
        )?,
    };
    Ok(Some(assigned < capacity))
}

struct VenueCheck {
    venue_id: Option<String>,
}

fn validate_refs(
    conn: &Connection,
    req: &Request,
    except_project: Option<&str>,
) -> Result<(Option<String>, VenueCheck), serde_json::Value> {
    let programme_id = optional_str(req.params.get("programmeId"))
        .map_err(|m| err(&req.id, "bad_params", format!("programmeId {}", m), None))?;
    let venue_id = optional_str(req.params.get("venueId"))
        .map_err(|m| err(&req.id, "bad_params", format!("venueId {}", m), None))?;

    if let Some(pid) = programme_id.as_deref() {
        match row_exists(conn, "SELECT id FROM programmes WHERE id = ?", pid) {
            Ok(true) => {}
            Ok(false) => return Err(err(&req.id, "not_found", "programme not found", None)),
            Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        }
    }
    if let Some(vid) = venue_id.as_deref() {
        match venue_has_room(conn, vid, except_project) {
            Ok(None) => return Err(err(&req.id, "not_found", "venue not found", None)),
            Ok(Some(true)) => {}
            Ok(Some(false)) => {
                return Err(err(
                    &req.id,
                    "conflict",
                    "venue is at capacity",
                    Some(json!({ "venueId": vid })),
                ))
            }
            Err(e) => return Err(err(&req.id, "db_query_failed", e.to_string(), None)),
        }
    }
    Ok((programme_id, VenueCheck { venue_id }))
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let supervisor_name = match required_str(req, "supervisorName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let supervisor_email = match required_str(req, "supervisorEmail") {
        Ok(v) => v,
        Err(e) => return e,
    };

    match row_exists(conn, "SELECT id FROM semesters WHERE id = ?", &semester_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "semester not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    let (programme_id, venue) = match validate_refs(conn, req, None) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO projects(id, semester_id, programme_id, venue_id, title, supervisor_name, supervisor_email, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &semester_id,
            &programme_id,
            &venue.venue_id,
            &title,
            &supervisor_name,
            &supervisor_email,
            now_ts(),
        ),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "projectId": id }))
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (programme_id, venue) = match validate_refs(conn, req, Some(&project_id)) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let updated = match conn.execute(
        "UPDATE projects SET title = ?, programme_id = ?, venue_id = ? WHERE id = ?",
        (&title, &programme_id, &venue.venue_id, &project_id),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "project not found", None);
    }
    ok(&req.id, json!({ "projectId": project_id }))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let programme_id = match optional_str(req.params.get("programmeId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("programmeId {}", m), None),
    };

    let sql = "SELECT p.id, p.title, p.programme_id, p.venue_id, p.supervisor_name, p.supervisor_email,
                      p.moderator_name, p.moderator_email,
                      (SELECT COUNT(*) FROM students s WHERE s.project_id = p.id),
                      (SELECT COUNT(*) FROM students s JOIN grades g ON g.student_id = s.id
                       WHERE s.project_id = p.id AND g.final_grade IS NOT NULL)
               FROM projects p
               WHERE p.semester_id = ?
                 AND (?2 IS NULL OR p.programme_id = ?2)
               ORDER BY p.title";
    let mut stmt = match conn.prepare(sql) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = match stmt
        .query_map((&semester_id, &programme_id), |r| {
            let id: String = r.get(0)?;
            let title: String = r.get(1)?;
            let prog: Option<String> = r.get(2)?;
            let venue: Option<String> = r.get(3)?;
            let sup_name: String = r.get(4)?;
            let sup_email: String = r.get(5)?;
            let mod_name: Option<String> = r.get(6)?;
            let mod_email: Option<String> = r.get(7)?;
            let student_count: i64 = r.get(8)?;
            let graded_count: i64 = r.get(9)?;
            Ok(json!({
                "id": id,
                "title": title,
                "programmeId": prog,
                "venueId": venue,
                "supervisorName": sup_name,
                "supervisorEmail": sup_email,
                "moderatorName": mod_name,
                "moderatorEmail": mod_email,
                "studentCount": student_count,
                "gradedCount": graded_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "projects": rows }))
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let project = match conn
        .query_row(
            "SELECT semester_id, programme_id, venue_id, title, supervisor_name, supervisor_email,
                    moderator_name, moderator_email
             FROM projects WHERE id = ?",
            [&project_id],
            |r| {
                let semester_id: String = r.get(0)?;
                let programme_id: Option<String> = r.get(1)?;
                let venue_id: Option<String> = r.get(2)?;
                let title: String = r.get(3)?;
                let sup_name: String = r.get(4)?;
                let sup_email: String = r.get(5)?;
                let mod_name: Option<String> = r.get(6)?;
                let mod_email: Option<String> = r.get(7)?;
                Ok(json!({
                    "id": project_id.clone(),
                    "semesterId": semester_id,
                    "programmeId": programme_id,
                    "venueId": venue_id,
                    "title": title,
                    "supervisorName": sup_name,
                    "supervisorEmail": sup_email,
                    "moderatorName": mod_name,
                    "moderatorEmail": mod_email
                }))
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "project not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.name, s.matriculation_number, s.email, s.sort_order,
                g.supervisor_grade, g.moderator_grade, g.peer_grade, g.final_grade, g.letter_grade
         FROM students s
         LEFT JOIN grades g ON g.student_id = s.id
         WHERE s.project_id = ?
         ORDER BY s.sort_order",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt
        .query_map([&project_id], |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let matric: String = r.get(2)?;
            let email: Option<String> = r.get(3)?;
            let sort_order: i64 = r.get(4)?;
            let supervisor_grade: Option<f64> = r.get(5)?;
            let moderator_grade: Option<f64> = r.get(6)?;
            let peer_grade: Option<f64> = r.get(7)?;
            let final_grade: Option<f64> = r.get(8)?;
            let letter_grade: Option<String> = r.get(9)?;
            Ok(json!({
                "studentId": id,
                "name": name,
                "matriculationNumber": matric,
                "email": email,
                "sortOrder": sort_order,
                "supervisorGrade": supervisor_grade,
                "moderatorGrade": moderator_grade,
                "peerGrade": peer_grade,
                "finalGrade": final_grade,
                "letterGrade": letter_grade
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "project": project, "students": students }))
}

fn handle_register_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let matric = match required_str(req, "matriculationNumber") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let email = match optional_str(req.params.get("email")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("email {}", m), None),
    };

    match row_exists(conn, "SELECT id FROM projects WHERE id = ?", &project_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "project not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let duplicate: Option<String> = match conn
        .query_row(
            "SELECT id FROM students WHERE project_id = ? AND matriculation_number = ?",
            [&project_id, &matric],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if duplicate.is_some() {
        return err(
            &req.id,
            "conflict",
            "matriculation number already registered on this project",
            Some(json!({ "matriculationNumber": matric })),
        );
    }

    let next_order: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), 0) + 1 FROM students WHERE project_id = ?",
        [&project_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, project_id, name, matriculation_number, email, sort_order)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, &project_id, &name, &matric, &email, next_order),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": id, "sortOrder": next_order }))
}

fn handle_remove_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Students whose peer grade was fed by this reviewer must be recomputed
    // once the reviews are gone.
    let mut stmt = match conn.prepare(
        "SELECT DISTINCT target_student_id FROM peer_reviews
         WHERE reviewer_student_id = ?1 AND target_student_id != ?1",
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let affected_targets: Vec<String> = match stmt
        .query_map([&student_id], |r| r.get(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    // Clean up dependents before the roster row itself.
    if let Err(e) = conn.execute(
        "DELETE FROM peer_reviews WHERE reviewer_student_id = ? OR target_student_id = ?",
        [&student_id, &student_id],
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = conn.execute("DELETE FROM grades WHERE student_id = ?", [&student_id]) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    let deleted = match conn.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_write_failed", e.to_string(), None),
    };
    if deleted == 0 {
        return err(&req.id, "not_found", "student not found", None);
    }

    for target in &affected_targets {
        if let Err(e) = grading::refresh_peer_grade(conn, target) {
            return err(&req.id, "db_write_failed", e.to_string(), None);
        }
    }
    ok(&req.id, json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "projects.create" => Some(handle_create(state, req)),
        "projects.update" => Some(handle_update(state, req)),
        "projects.list" => Some(handle_list(state, req)),
        "projects.get" => Some(handle_get(state, req)),
        "projects.registerStudent" => Some(handle_register_student(state, req)),
        "projects.removeStudent" => Some(handle_remove_student(state, req)),
        _ => None,
    }
}
