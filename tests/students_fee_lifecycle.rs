use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_rosterd");
    let mut child = Command::new(exe)
        .env_remove("ROSTERD_SYNC_URL")
        .env_remove("ROSTERD_SYNC_KEY")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn rosterd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn new_student(id: &str, name: &str, fee_amount: f64) -> serde_json::Value {
    json!({
        "id": id,
        "name": name,
        "class": "6",
        "section": "A",
        "rollNumber": "14",
        "guardianName": "R. Verma",
        "feeAmount": fee_amount,
        "feeStatus": "Pending",
        "admissionDate": "2023-04-01",
        "admissionStatus": "Confirmed"
    })
}

#[test]
fn create_collect_transfer_delete_flow() {
    let workspace = temp_dir("rosterd-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "student": new_student("s1", "Asha Verma", 500.0) }),
    );
    assert_eq!(created["student"]["feeStatus"], "Pending");
    // No remote account, so the daemon never leaves synced.
    assert_eq!(created["sync"]["status"], "synced");

    // 2024-01 paid on the 25th: flat 30 fine inside the due month.
    let collected = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.collect",
        json!({
            "studentId": "s1",
            "startMonth": "2024-01",
            "paymentDate": "2024-01-25",
            "remark": "cash"
        }),
    );
    assert_eq!(collected["quote"]["fineTotal"], 30.0);
    assert_eq!(collected["quote"]["total"], 530.0);
    assert_eq!(collected["student"]["feeStatus"], "Paid");
    let history = collected["student"]["feeHistory"]
        .as_array()
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["month"], "2024-01");
    assert_eq!(history[0]["fine"], 30.0);
    assert_eq!(history[0]["remark"], "cash");

    let issued = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "tc.issue",
        json!({
            "studentId": "s1",
            "tcNumber": "TC-0042",
            "issueDate": "2024-02-01",
            "reason": "relocation"
        }),
    );
    assert_eq!(issued["student"]["admissionStatus"], "Transferred");
    assert_eq!(issued["student"]["transferCertificate"]["tcNumber"], "TC-0042");

    let listed = request_ok(&mut stdin, &mut reader, "5", "students.list", json!({}));
    assert_eq!(listed["students"].as_array().expect("students").len(), 1);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.delete",
        json!({ "studentId": "s1" }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "7", "students.list", json!({}));
    assert!(listed["students"].as_array().expect("students").is_empty());
}

#[test]
fn students_survive_a_daemon_restart() {
    let workspace = temp_dir("rosterd-restart");
    {
        let (_child, mut stdin, mut reader) = spawn_sidecar();
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "1",
            "workspace.select",
            json!({ "path": workspace.to_string_lossy() }),
        );
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "students.create",
            json!({ "student": new_student("s1", "Asha Verma", 500.0) }),
        );
    }

    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["studentCount"], 1);
    let listed = request_ok(&mut stdin, &mut reader, "2", "students.list", json!({}));
    assert_eq!(listed["students"][0]["name"], "Asha Verma");
}

#[test]
fn duplicate_ids_and_unknown_statuses_are_rejected() {
    let workspace = temp_dir("rosterd-validation");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "student": new_student("s1", "Asha Verma", 500.0) }),
    );

    let dup = request(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "student": new_student("s1", "Someone Else", 100.0) }),
    );
    assert_eq!(dup["ok"], false);
    assert_eq!(dup["error"]["code"], "duplicate_id");

    let bad_status = request(
        &mut stdin,
        &mut reader,
        "4",
        "admission.setStatus",
        json!({ "studentId": "s1", "status": "Lapsed" }),
    );
    assert_eq!(bad_status["ok"], false);
    assert_eq!(bad_status["error"]["code"], "bad_params");

    // The workflow enum accepts the space-separated form.
    let reviewed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "admission.setStatus",
        json!({ "studentId": "s1", "status": "Under Review", "changedBy": "clerk" }),
    );
    assert_eq!(reviewed["student"]["admissionStatus"], "Under Review");
    assert_eq!(reviewed["student"]["statusChangedBy"], "clerk");
}
