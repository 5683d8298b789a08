mod test_support;

use serde_json::json;
use test_support::{request, request_ok, spawn_sidecar, temp_dir};

fn preview_projects() -> serde_json::Value {
    json!([
        {
            "projectId": "proj-a",
            "title": "Greenhouse Robot",
            "students": [
                { "studentId": "a1", "finalGrade": 90.0 },
                { "studentId": "a2", "finalGrade": 80.0 },
                { "studentId": "a3", "finalGrade": 40.0 }
            ]
        },
        {
            "projectId": "proj-b",
            "title": "Exam Scheduler",
            "students": [
                { "studentId": "b1", "finalGrade": 30.0 },
                { "studentId": "b2", "finalGrade": 0.0 }
            ]
        }
    ])
}

#[test]
fn preview_zero_policy_drops_exact_zeros_only_when_asked() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    // Preview works without a workspace; the policy defaults to counting zeros.
    let counted = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "analytics.preview",
        json!({ "projects": preview_projects() }),
    );
    let stats = counted.get("stats").expect("stats");
    assert_eq!(stats.get("count").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(stats.get("average").and_then(|v| v.as_str()), Some("48.00"));
    assert_eq!(
        stats.get("passingRate").and_then(|v| v.as_str()),
        Some("60.00")
    );

    let dropped = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "analytics.preview",
        json!({ "projects": preview_projects(), "treatZeroAsUngraded": true }),
    );
    let stats = dropped.get("stats").expect("stats");
    assert_eq!(stats.get("count").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(stats.get("average").and_then(|v| v.as_str()), Some("60.00"));
    assert_eq!(
        stats.get("passingRate").and_then(|v| v.as_str()),
        Some("75.00")
    );
    assert_eq!(stats.get("min").and_then(|v| v.as_f64()), Some(30.0));

    // Malformed input is rejected before any summarizing happens.
    let malformed = request(
        &mut stdin,
        &mut reader,
        "3",
        "analytics.preview",
        json!({ "projects": [{ "title": "No id" }] }),
    );
    assert_eq!(malformed.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        malformed
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str()),
        Some("bad_params")
    );

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_default_zero_policy_feeds_semester_summaries() {
    let workspace = temp_dir("projectbook-zero-policy");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let semester = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "semesters.create",
        json!({ "name": "Semester 1", "academicYear": "2025/2026" }),
    );
    let semester_id = semester
        .get("semesterId")
        .and_then(|v| v.as_str())
        .expect("semesterId")
        .to_string();
    let project = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "projects.create",
        json!({
            "semesterId": semester_id,
            "title": "Solo Project",
            "supervisorName": "Dr. Solo",
            "supervisorEmail": "solo@uni.example"
        }),
    );
    let project_id = project
        .get("projectId")
        .and_then(|v| v.as_str())
        .expect("projectId")
        .to_string();
    for (i, grade) in [60.0, 0.0].into_iter().enumerate() {
        let created = request_ok(
            &mut stdin,
            &mut reader,
            &format!("4-{}", i),
            "projects.registerStudent",
            json!({
                "projectId": project_id,
                "name": format!("Student {}", i),
                "matriculationNumber": format!("U30000{}", i)
            }),
        );
        let student_id = created
            .get("studentId")
            .and_then(|v| v.as_str())
            .expect("studentId")
            .to_string();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("5-{}", i),
            "grading.submit",
            json!({
                "projectId": project_id,
                "studentId": student_id,
                "grader": { "email": "solo@uni.example", "role": "supervisor" },
                "grade": grade
            }),
        );
    }

    let counted = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "analytics.semester.open",
        json!({ "semesterId": semester_id }),
    );
    assert_eq!(
        counted
            .get("stats")
            .and_then(|s| s.get("count"))
            .and_then(|v| v.as_u64()),
        Some(2)
    );

    // Flip the workspace default; the same request now drops the zero.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "grading.setup.update",
        json!({ "treatZeroAsUngraded": true }),
    );
    let dropped = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "analytics.semester.open",
        json!({ "semesterId": semester_id }),
    );
    assert_eq!(
        dropped
            .get("stats")
            .and_then(|s| s.get("count"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );
    assert_eq!(
        dropped
            .get("options")
            .and_then(|o| o.get("treatZeroAsUngraded"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    // A null parameter means "no opinion" and picks up the workspace default,
    // exactly like leaving it out, for preview too.
    let null_preview = request_ok(
        &mut stdin,
        &mut reader,
        "8b",
        "analytics.preview",
        json!({ "projects": preview_projects(), "treatZeroAsUngraded": null }),
    );
    assert_eq!(
        null_preview
            .get("stats")
            .and_then(|s| s.get("count"))
            .and_then(|v| v.as_u64()),
        Some(4)
    );
    let null_semester = request_ok(
        &mut stdin,
        &mut reader,
        "8c",
        "analytics.semester.open",
        json!({ "semesterId": semester_id, "treatZeroAsUngraded": null }),
    );
    assert_eq!(
        null_semester
            .get("stats")
            .and_then(|s| s.get("count"))
            .and_then(|v| v.as_u64()),
        Some(1)
    );

    // An explicit request parameter still overrides the workspace default.
    let overridden = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "analytics.semester.open",
        json!({ "semesterId": semester_id, "treatZeroAsUngraded": false }),
    );
    assert_eq!(
        overridden
            .get("stats")
            .and_then(|s| s.get("count"))
            .and_then(|v| v.as_u64()),
        Some(2)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
