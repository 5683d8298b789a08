use crate::ipc::error::{err, ok};
use crate::ipc::handlers::grading;
use crate::ipc::types::{AppState, Request};
use crate::stats;
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

fn parse_options(conn: &Connection, req: &Request) -> Result<stats::SummaryOptions, serde_json::Value> {
    let treat_zero_as_ungraded = match req.params.get("treatZeroAsUngraded") {
        None => grading::load_zero_policy(conn),
        Some(v) if v.is_null() => grading::load_zero_policy(conn),
        Some(v) => v.as_bool().ok_or_else(|| {
            err(
                &req.id,
                "bad_params",
                "treatZeroAsUngraded must be a boolean",
                None,
            )
        })?,
    };
    Ok(stats::SummaryOptions {
        treat_zero_as_ungraded,
    })
}

fn load_project_summaries(
    conn: &Connection,
    semester_id: &str,
    only_project: Option<&str>,
) -> rusqlite::Result<Vec<stats::ProjectGradeSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, supervisor_name, moderator_name
         FROM projects
         WHERE semester_id = ? AND (?2 IS NULL OR id = ?2)
         ORDER BY title",
    )?;
    let mut projects: Vec<stats::ProjectGradeSummary> = stmt
        .query_map((semester_id, only_project), |r| {
            Ok(stats::ProjectGradeSummary {
                project_id: r.get(0)?,
                title: r.get(1)?,
                supervisor_name: r.get(2)?,
                moderator_name: r.get(3)?,
                students: Vec::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;

    let mut student_stmt = conn.prepare(
        "SELECT s.id, s.name, s.matriculation_number,
                g.final_grade, g.supervisor_grade, g.moderator_grade, g.letter_grade
         FROM students s
         LEFT JOIN grades g ON g.student_id = s.id
         WHERE s.project_id = ?
         ORDER BY s.sort_order",
    )?;
    for project in projects.iter_mut() {
        let students = student_stmt
            .query_map([&project.project_id], |r| {
                Ok(stats::StudentGradeRecord {
                    student_id: r.get(0)?,
                    name: r.get(1)?,
                    matriculation_number: r.get(2)?,
                    final_grade: r.get(3)?,
                    supervisor_grade: r.get(4)?,
                    moderator_grade: r.get(5)?,
                    letter_grade: r.get(6)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())?;
        project.students = students;
    }
    Ok(projects)
}

fn summary_payload(summary: &stats::GradeSummary) -> serde_json::Value {
    serde_json::to_value(summary).unwrap_or_else(|_| json!({}))
}

fn handle_semester_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let semester_id = match required_str(req, "semesterId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let options = match parse_options(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let semester: Option<(String, String)> = match conn
        .query_row(
            "SELECT name, academic_year FROM semesters WHERE id = ?",
            [&semester_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((semester_name, academic_year)) = semester else {
        return err(&req.id, "not_found", "semester not found", None);
    };

    let projects = match load_project_summaries(conn, &semester_id, None) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let student_count: usize = projects.iter().map(|p| p.students.len()).sum();
    let summary = stats::summarize(&projects, options);

    let mut payload = json!({
        "semester": {
            "id": semester_id,
            "name": semester_name,
            "academicYear": academic_year
        },
        "options": { "treatZeroAsUngraded": options.treat_zero_as_ungraded },
        "projectCount": projects.len(),
        "studentCount": student_count
    });
    let extra = summary_payload(&summary);
    if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    ok(&req.id, payload)
}

fn handle_project_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let project_id = match required_str(req, "projectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let options = match parse_options(conn, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let meta: Option<(String, String, String, Option<String>)> = match conn
        .query_row(
            "SELECT semester_id, title, supervisor_name, moderator_name FROM projects WHERE id = ?",
            [&project_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((semester_id, title, supervisor_name, moderator_name)) = meta else {
        return err(&req.id, "not_found", "project not found", None);
    };

    let projects = match load_project_summaries(conn, &semester_id, Some(&project_id)) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let summary = stats::summarize(&projects, options);

    let students = projects
        .first()
        .map(|p| p.students.as_slice())
        .unwrap_or(&[])
        .iter()
        .map(|s| {
            let letter = s
                .letter_grade
                .clone()
                .or_else(|| s.final_grade.map(|g| stats::letter_for(g).to_string()));
            json!({
                "studentId": s.student_id,
                "name": s.name,
                "matriculationNumber": s.matriculation_number,
                "finalGrade": s.final_grade,
                "supervisorGrade": s.supervisor_grade,
                "moderatorGrade": s.moderator_grade,
                "letterGrade": letter
            })
        })
        .collect::<Vec<_>>();

    let mut payload = json!({
        "project": {
            "id": project_id,
            "semesterId": semester_id,
            "title": title,
            "supervisorName": supervisor_name,
            "moderatorName": moderator_name
        },
        "options": { "treatZeroAsUngraded": options.treat_zero_as_ungraded },
        "students": students
    });
    let extra = summary_payload(&summary);
    if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    ok(&req.id, payload)
}

fn handle_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Summarizes caller-supplied records without touching the workspace; the
    // input must already be in the canonical schema.
    let Some(raw) = req.params.get("projects") else {
        return err(&req.id, "bad_params", "missing projects", None);
    };
    let projects: Vec<stats::ProjectGradeSummary> = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("projects does not match the canonical schema: {}", e),
                None,
            )
        }
    };
    // Same default chain as the workspace-backed dashboards: absent or null
    // falls back to the workspace policy when one is open.
    let treat_zero_as_ungraded = match req.params.get("treatZeroAsUngraded") {
        None => state
            .db
            .as_ref()
            .map(grading::load_zero_policy)
            .unwrap_or(false),
        Some(v) if v.is_null() => state
            .db
            .as_ref()
            .map(grading::load_zero_policy)
            .unwrap_or(false),
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

    let summary = stats::summarize(
        &projects,
        stats::SummaryOptions {
            treat_zero_as_ungraded,
        },
    );
    let mut payload = json!({
        "options": { "treatZeroAsUngraded": treat_zero_as_ungraded },
        "projectCount": projects.len()
    });
    let extra = summary_payload(&summary);
    if let (Some(obj), Some(extra)) = (payload.as_object_mut(), extra.as_object()) {
        for (k, v) in extra {
            obj.insert(k.clone(), v.clone());
        }
    }
    ok(&req.id, payload)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "analytics.semester.open" => Some(handle_semester_open(state, req)),
        "analytics.project.open" => Some(handle_project_open(state, req)),
        "analytics.preview" => Some(handle_preview(state, req)),
        _ => None,
    }
}
