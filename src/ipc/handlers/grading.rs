use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const SETUP_KEY: &str = "setup.grading";

#[derive(Debug, Clone, Copy)]
pub struct GradingWeights {
    pub supervisor: f64,
    pub moderator: f64,
    pub peer: f64,
}

impl Default for GradingWeights {
    fn default() -> Self {
        Self {
            supervisor: 0.5,
            moderator: 0.3,
            peer: 0.2,
        }
    }
}

pub fn load_grading_weights(conn: &Connection) -> GradingWeights {
    let obj = db::settings_get_json(conn, SETUP_KEY)
        .ok()
        .flatten()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    let defaults = GradingWeights::default();
    let supervisor = obj
        .get("supervisorWeight")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(defaults.supervisor);
    let moderator = obj
        .get("moderatorWeight")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(defaults.moderator);
    let peer = obj
        .get("peerWeight")
        .and_then(|v| v.as_f64())
        .filter(|v| *v > 0.0)
        .unwrap_or(defaults.peer);
    GradingWeights {
        supervisor,
        moderator,
        peer,
    }
}

pub fn load_zero_policy(conn: &Connection) -> bool {
    db::settings_get_json(conn, SETUP_KEY)
        .ok()
        .flatten()
        .and_then(|v| v.get("treatZeroAsUngraded").and_then(|b| b.as_bool()))
        .unwrap_or(false)
}

/// Weighted combination over the components that exist, weights renormalized so
/// a partially graded student still gets a provisional final mark.
pub fn combine_final(
    weights: GradingWeights,
    supervisor: Option<f64>,
    moderator: Option<f64>,
    peer: Option<f64>,
) -> Option<f64> {
    let mut sum = 0.0;
    let mut denom = 0.0;
    if let Some(v) = supervisor {
        sum += v * weights.supervisor;
        denom += weights.supervisor;
    }
    if let Some(v) = moderator {
        sum += v * weights.moderator;
        denom += weights.moderator;
    }
    if let Some(v) = peer {
        sum += v * weights.peer;
        denom += weights.peer;
    }
    if denom > 0.0 {
        Some(stats::round2(sum / denom))
    } else {
        None
    }
}

fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

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

fn parse_grade_value(req: &Request, key: &str) -> Result<f64, serde_json::Value> {
    let Some(v) = req.params.get(key).and_then(|v| v.as_f64()) else {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be a number", key),
            None,
        ));
    };
    if !v.is_finite() || !(0.0..=100.0).contains(&v) {
        return Err(err(
            &req.id,
            "bad_params",
            format!("{} must be in [0, 100]", key),
            None,
        ));
    }
    Ok(v)
}

struct Grader {
    email: String,
    role: String,
}

fn parse_grader(req: &Request) -> Result<Grader, serde_json::Value> {
    let Some(obj) = req.params.get("grader").and_then(|v| v.as_object()) else {
        return Err(err(&req.id, "bad_params", "missing grader object", None));
    };
    let email = obj
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", "missing grader.email", None))?;
    let role = obj
        .get("role")
        .and_then(|v| v.as_str())
        .map(|s| s.to_ascii_lowercase())
        .ok_or_else(|| err(&req.id, "bad_params", "missing grader.role", None))?;
    if role != "supervisor" && role != "moderator" {
        return Err(err(
            &req.id,
            "bad_params",
            "grader.role must be one of: supervisor, moderator",
            Some(json!({ "role": role })),
        ));
    }
    Ok(Grader { email, role })
}

fn student_project(conn: &Connection, student_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT project_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
}

/// Recompute a student's `peer_grade` from the reviews currently on file
/// (NULL when none remain) and fold it back into the final mark. Used after
/// review submission and after roster removals invalidate received reviews.
pub fn refresh_peer_grade(conn: &Connection, student_id: &str) -> rusqlite::Result<()> {
    let avg: Option<f64> = conn.query_row(
        "SELECT AVG(score) FROM peer_reviews WHERE target_student_id = ?",
        [student_id],
        |r| r.get(0),
    )?;
    let peer_grade = avg.map(stats::round2);
    conn.execute(
        "INSERT INTO grades(student_id, peer_grade, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET peer_grade = excluded.peer_grade, updated_at = excluded.updated_at",
        (student_id, peer_grade, now_ts()),
    )?;
    recombine_final(conn, student_id)
}

fn recombine_final(conn: &Connection, student_id: &str) -> rusqlite::Result<()> {
    let weights = load_grading_weights(conn);
    let components: Option<(Option<f64>, Option<f64>, Option<f64>)> = conn
        .query_row(
            "SELECT supervisor_grade, moderator_grade, peer_grade FROM grades WHERE student_id = ?",
            [student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((supervisor, moderator, peer)) = components else {
        return Ok(());
    };
    let final_grade = combine_final(weights, supervisor, moderator, peer);
    let letter = final_grade.map(stats::letter_for);
    conn.execute(
        "UPDATE grades SET final_grade = ?, letter_grade = ?, updated_at = ? WHERE student_id = ?",
        (final_grade, letter, now_ts(), student_id),
    )?;
    Ok(())
}

fn handle_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grader = match parse_grader(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let grade = match parse_grade_value(req, "grade") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let assigned: Option<(String, Option<String>)> = match conn
        .query_row(
            "SELECT supervisor_email, moderator_email FROM projects WHERE id = ?",
            [&project_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((supervisor_email, moderator_email)) = assigned else {
        return err(&req.id, "not_found", "project not found", None);
    };

    let authorized = match grader.role.as_str() {
        "supervisor" => supervisor_email.eq_ignore_ascii_case(&grader.email),
        _ => moderator_email
            .as_deref()
            .map(|m| m.eq_ignore_ascii_case(&grader.email))
            .unwrap_or(false),
    };
    if !authorized {
        return err(
            &req.id,
            "forbidden",
            format!("grader is not the project's {}", grader.role),
            Some(json!({ "role": grader.role })),
        );
    }

    match student_project(conn, &student_id) {
        Ok(Some(pid)) if pid == project_id => {}
        Ok(Some(_)) | Ok(None) => {
            return err(&req.id, "not_found", "student not found on project", None)
        }
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }

    let column = if grader.role == "supervisor" {
        "supervisor_grade"
    } else {
        "moderator_grade"
    };
    let sql = format!(
        "INSERT INTO grades(student_id, {col}, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(student_id) DO UPDATE SET {col} = excluded.{col}, updated_at = excluded.updated_at",
        col = column
    );
    if let Err(e) = conn.execute(&sql, (&student_id, grade, now_ts())) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    if let Err(e) = recombine_final(conn, &student_id) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    let (final_grade, letter): (Option<f64>, Option<String>) = match conn.query_row(
        "SELECT final_grade, letter_grade FROM grades WHERE student_id = ?",
        [&student_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "role": grader.role,
            "grade": grade,
            "finalGrade": final_grade,
            "letterGrade": letter
        }),
    )
}

fn handle_peer_review_submit(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let reviewer_id = match required_str(req, "reviewerStudentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let target_id = match required_str(req, "targetStudentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let score = match parse_grade_value(req, "score") {
        Ok(v) => v,
        Err(e) => return e,
    };

    if reviewer_id == target_id {
        return err(&req.id, "bad_params", "a student cannot review themselves", None);
    }
    for id in [&reviewer_id, &target_id] {
        match student_project(conn, id) {
            Ok(Some(pid)) if pid == project_id => {}
            Ok(Some(_)) | Ok(None) => {
                return err(&req.id, "not_found", "student not found on project", None)
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    if let Err(e) = conn.execute(
        "INSERT INTO peer_reviews(id, project_id, reviewer_student_id, target_student_id, score, submitted_at)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(reviewer_student_id, target_student_id)
         DO UPDATE SET score = excluded.score, submitted_at = excluded.submitted_at",
        (
            Uuid::new_v4().to_string(),
            &project_id,
            &reviewer_id,
            &target_id,
            score,
            now_ts(),
        ),
    ) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }

    if let Err(e) = refresh_peer_grade(conn, &target_id) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    let peer_grade: f64 = match conn.query_row(
        "SELECT peer_grade FROM grades WHERE student_id = ?",
        [&target_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let review_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM peer_reviews WHERE target_student_id = ?",
        [&target_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(
        &req.id,
        json!({
            "targetStudentId": target_id,
            "peerGrade": peer_grade,
            "reviewCount": review_count
        }),
    )
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let weights = load_grading_weights(conn);
    let treat_zero = load_zero_policy(conn);
    ok(
        &req.id,
        json!({
            "supervisorWeight": weights.supervisor,
            "moderatorWeight": weights.moderator,
            "peerWeight": weights.peer,
            "treatZeroAsUngraded": treat_zero
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let current = load_grading_weights(conn);
    let mut weights = [
        ("supervisorWeight", current.supervisor),
        ("moderatorWeight", current.moderator),
        ("peerWeight", current.peer),
    ];
    for (key, slot) in weights.iter_mut() {
        match req.params.get(*key) {
            None => {}
            Some(v) if v.is_null() => {}
            Some(v) => match v.as_f64() {
                Some(w) if w > 0.0 && w.is_finite() => *slot = w,
                _ => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("{} must be a positive number", key),
                        None,
                    )
                }
            },
        }
    }
    let treat_zero = match req.params.get("treatZeroAsUngraded") {
        None => load_zero_policy(conn),
        Some(v) if v.is_null() => load_zero_policy(conn),
        Some(v) => match v.as_bool() {
            Some(b) => b,
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "treatZeroAsUngraded must be a boolean",
                    None,
                )
            }
        },
    };

    let value = json!({
        "supervisorWeight": weights[0].1,
        "moderatorWeight": weights[1].1,
        "peerWeight": weights[2].1,
        "treatZeroAsUngraded": treat_zero
    });
    if let Err(e) = db::settings_set_json(conn, SETUP_KEY, &value) {
        return err(&req.id, "db_write_failed", e.to_string(), None);
    }
    ok(&req.id, value)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grading.submit" => Some(handle_submit(state, req)),
        "grading.peerReview.submit" => Some(handle_peer_review_submit(state, req)),
        "grading.setup.get" => Some(handle_setup_get(state, req)),
        "grading.setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
