use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn quote(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, "fees.quote", params);
    assert_eq!(value["ok"], true, "quote failed: {value}");
    value["result"]["quote"].clone()
}

#[test]
fn quote_scenarios_match_the_fee_rules() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    // Quoting needs no workspace; the math is pure.
    let q = quote(
        &mut stdin,
        &mut reader,
        "1",
        json!({ "startMonth": "2024-01", "feeAmount": 500.0, "paymentDate": "2024-01-25" }),
    );
    assert_eq!(q["fineTotal"], 30.0);
    assert_eq!(q["total"], 530.0);

    let q = quote(
        &mut stdin,
        &mut reader,
        "2",
        json!({ "startMonth": "2024-01", "feeAmount": 500.0, "paymentDate": "2024-03-25" }),
    );
    assert_eq!(q["fineTotal"], 100.0);
    assert_eq!(q["total"], 600.0);

    let q = quote(
        &mut stdin,
        &mut reader,
        "3",
        json!({
            "startMonth": "2024-01",
            "endMonth": "2024-03",
            "feeAmount": 500.0,
            "paymentDate": "2024-01-10"
        }),
    );
    assert_eq!(q["monthCount"], 3);
    assert_eq!(q["fineTotal"], 0.0);
    assert_eq!(q["total"], 1500.0);

    let q = quote(
        &mut stdin,
        &mut reader,
        "4",
        json!({ "startMonth": "2024-01", "feeAmount": 500.0, "paymentDate": "2024-01-20" }),
    );
    assert_eq!(q["fineTotal"], 0.0);
}

#[test]
fn reversed_ranges_and_bad_dates_are_rejected() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "fees.quote",
        json!({
            "startMonth": "2024-03",
            "endMonth": "2024-01",
            "feeAmount": 500.0,
            "paymentDate": "2024-01-10"
        }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_range");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "fees.quote",
        json!({ "startMonth": "2024-01", "feeAmount": 500.0, "paymentDate": "soon" }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "bad_date");
}
