mod test_support;

use serde_json::json;
use test_support::{request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn moderation_assignment_respects_the_supervisor_split() {
    let workspace = temp_dir("projectbook-moderators");
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

    let mut project_ids = Vec::new();
    for (i, email) in [
        "adeyemi@uni.example",
        "adeyemi@uni.example",
        "lim@uni.example",
    ]
    .iter()
    .enumerate()
    {
        let project = request_ok(
            &mut stdin,
            &mut reader,
            &format!("3-{}", i),
            "projects.create",
            json!({
                "semesterId": semester_id,
                "title": format!("Project {}", i),
                "supervisorName": "Supervisor",
                "supervisorEmail": email
            }),
        );
        project_ids.push(
            project
                .get("projectId")
                .and_then(|v| v.as_str())
                .expect("projectId")
                .to_string(),
        );
    }

    // A supervisor cannot moderate their own project, whatever the casing.
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "moderators.assign",
        json!({
            "projectId": project_ids[0],
            "moderatorName": "Dr. Adeyemi",
            "moderatorEmail": "ADEYEMI@uni.example"
        }),
    );
    assert_eq!(code, "forbidden");

    for (i, project_id) in project_ids.iter().take(2).enumerate() {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("5-{}", i),
            "moderators.assign",
            json!({
                "projectId": project_id,
                "moderatorName": "Dr. Lim",
                "moderatorEmail": "lim@uni.example"
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "moderators.assign",
        json!({
            "projectId": project_ids[2],
            "moderatorName": "Dr. Adeyemi",
            "moderatorEmail": "adeyemi@uni.example"
        }),
    );

    // Workload ranks moderators by how many projects they carry.
    let workload = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "moderators.workload",
        json!({ "semesterId": semester_id }),
    );
    let moderators = workload
        .get("moderators")
        .and_then(|v| v.as_array())
        .expect("moderators array");
    assert_eq!(moderators.len(), 2);
    assert_eq!(
        moderators[0].get("moderatorEmail").and_then(|v| v.as_str()),
        Some("lim@uni.example")
    );
    assert_eq!(
        moderators[0].get("projectCount").and_then(|v| v.as_i64()),
        Some(2)
    );
    assert_eq!(
        moderators[1].get("projectCount").and_then(|v| v.as_i64()),
        Some(1)
    );

    // Clearing removes the project from the workload table.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "moderators.clear",
        json!({ "projectId": project_ids[1] }),
    );
    let workload = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "moderators.workload",
        json!({ "semesterId": semester_id }),
    );
    let moderators = workload
        .get("moderators")
        .and_then(|v| v.as_array())
        .expect("moderators array");
    let lim = moderators
        .iter()
        .find(|m| m.get("moderatorEmail").and_then(|v| v.as_str()) == Some("lim@uni.example"))
        .expect("lim row");
    assert_eq!(lim.get("projectCount").and_then(|v| v.as_i64()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
