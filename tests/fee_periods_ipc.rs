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
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

struct Roster {
    class_id: String,
    section_id: String,
    enrollment_id: String,
}

fn seed_roster(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Roster {
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "c",
        "classes.create",
        json!({ "name": "Gurmukhi 1", "classType": "gurmukhi" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let section = request_ok(
        stdin,
        reader,
        "s",
        "sections.create",
        json!({ "classId": class_id, "name": "A" }),
    );
    let section_id = section["sectionId"].as_str().expect("sectionId").to_string();
    let student = request_ok(
        stdin,
        reader,
        "st",
        "students.create",
        json!({ "lastName": "Kaur", "firstName": "Simran" }),
    );
    let student_id = student["studentId"].as_str().expect("studentId").to_string();
    let enrollment = request_ok(
        stdin,
        reader,
        "e",
        "enrollments.create",
        json!({ "studentId": student_id, "sectionId": section_id, "studentType": "paid" }),
    );
    let enrollment_id = enrollment["enrollmentId"]
        .as_str()
        .expect("enrollmentId")
        .to_string();
    Roster {
        class_id,
        section_id,
        enrollment_id,
    }
}

#[test]
fn future_period_auto_closes_open_period() {
    let workspace = temp_dir("schoold-periods-autoclose");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let roster = seed_roster(&mut stdin, &mut reader, &workspace);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "feePeriods.create",
        json!({
            "scopeType": "class",
            "scopeId": roster.class_id,
            "amount": 500,
            "effectiveFrom": "2024-01",
            "asOf": "2024-06"
        }),
    );
    let a_id = first["period"]["id"].as_str().expect("period id").to_string();
    assert!(first["autoClosed"].is_null());
    assert_eq!(first["legacyAmount"], 500);

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "feePeriods.create",
        json!({
            "scopeType": "class",
            "scopeId": roster.class_id,
            "amount": 600,
            "effectiveFrom": "2025-01-15",
            "asOf": "2024-06"
        }),
    );
    assert_eq!(second["autoClosed"]["id"], a_id.as_str());
    assert_eq!(second["autoClosed"]["effectiveTo"], "2024-12");
    assert_eq!(second["period"]["effectiveFrom"], "2025-01");
    assert!(second["period"]["effectiveTo"].is_null());
    assert_eq!(second["legacyAmount"], 500);

    let june = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.resolve",
        json!({ "enrollmentId": roster.enrollment_id, "month": "2024-06" }),
    );
    assert_eq!(june["resolution"]["amount"], 500);
    assert_eq!(june["resolution"]["source"], "class_period");

    let feb = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "fees.resolve",
        json!({ "enrollmentId": roster.enrollment_id, "month": "2025-02" }),
    );
    assert_eq!(feb["resolution"]["amount"], 600);

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "feePeriods.list",
        json!({ "scopeType": "class", "scopeId": roster.class_id, "asOf": "2025-03" }),
    );
    let periods = listed["periods"].as_array().expect("periods");
    assert_eq!(periods.len(), 2);
    assert_eq!(listed["activePeriodId"], second["period"]["id"]);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn overlapping_period_is_rejected_and_timeline_unchanged() {
    let workspace = temp_dir("schoold-periods-overlap");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let roster = seed_roster(&mut stdin, &mut reader, &workspace);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "feePeriods.create",
        json!({
            "scopeType": "section",
            "scopeId": roster.section_id,
            "amount": 500,
            "effectiveFrom": "2024-01",
            "effectiveTo": "2024-06",
            "asOf": "2024-01"
        }),
    );
    let rejected = request(
        &mut stdin,
        &mut reader,
        "2",
        "feePeriods.create",
        json!({
            "scopeType": "section",
            "scopeId": roster.section_id,
            "amount": 700,
            "effectiveFrom": "2024-04",
            "effectiveTo": "2024-12",
            "asOf": "2024-01"
        }),
    );
    assert_eq!(rejected["ok"], false);
    assert_eq!(error_code(&rejected), "period_overlap");
    let message = rejected["error"]["message"].as_str().unwrap_or("");
    assert!(message.contains("Fee periods cannot overlap for the same class/section"));
    assert_eq!(rejected["error"]["details"]["conflictingFrom"], "2024-01");
    assert_eq!(rejected["error"]["details"]["conflictingTo"], "2024-06");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "feePeriods.list",
        json!({ "scopeType": "section", "scopeId": roster.section_id, "asOf": "2024-03" }),
    );
    let periods = listed["periods"].as_array().expect("periods");
    assert_eq!(periods.len(), 1);
    assert_eq!(periods[0]["amount"], 500);

    let inverted = request(
        &mut stdin,
        &mut reader,
        "4",
        "feePeriods.create",
        json!({
            "scopeType": "section",
            "scopeId": roster.section_id,
            "amount": 700,
            "effectiveFrom": "2025-06",
            "effectiveTo": "2025-01"
        }),
    );
    assert_eq!(error_code(&inverted), "bad_params");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn collected_fee_locks_period_until_uncollected() {
    let workspace = temp_dir("schoold-periods-locked");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let roster = seed_roster(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "feePeriods.create",
        json!({
            "scopeType": "class",
            "scopeId": roster.class_id,
            "amount": 500,
            "effectiveFrom": "2024-01",
            "asOf": "2024-03"
        }),
    );
    let period_id = created["period"]["id"].as_str().expect("period id").to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "fees.generateMonthly",
        json!({ "month": "2024-03" }),
    );
    let fees = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "fees.list",
        json!({ "enrollmentId": roster.enrollment_id }),
    );
    let fee_id = fees["fees"][0]["id"].as_str().expect("fee id").to_string();
    let paid = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "payments.record",
        json!({ "feeId": fee_id, "amountPaid": 500, "paidAt": "2024-03-05" }),
    );
    let payment_id = paid["payment"]["id"].as_str().expect("payment id").to_string();

    let refused = request(
        &mut stdin,
        &mut reader,
        "5",
        "feePeriods.delete",
        json!({ "periodId": period_id, "asOf": "2024-03" }),
    );
    assert_eq!(error_code(&refused), "period_locked");
    assert_eq!(
        refused["error"]["message"],
        "This period cannot be changed because collected fees exist in its range"
    );

    let update_refused = request(
        &mut stdin,
        &mut reader,
        "6",
        "feePeriods.update",
        json!({ "periodId": period_id, "amount": 550, "effectiveFrom": "2024-01", "asOf": "2024-03" }),
    );
    assert_eq!(error_code(&update_refused), "period_locked");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "feePeriods.list",
        json!({ "scopeType": "class", "scopeId": roster.class_id, "asOf": "2024-03" }),
    );
    assert_eq!(listed["periods"][0]["id"], period_id.as_str());
    assert_eq!(listed["periods"][0]["amount"], 500);

    let uncollected = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "payments.uncollect",
        json!({ "paymentId": payment_id }),
    );
    assert_eq!(uncollected["stillCollected"], false);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "feePeriods.delete",
        json!({ "periodId": period_id, "asOf": "2024-03" }),
    );
    let classes = request_ok(&mut stdin, &mut reader, "10", "classes.list", json!({}));
    assert_eq!(classes["classes"][0]["defaultMonthlyFee"], 0);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn amount_correction_reprices_unpaid_fees() {
    let workspace = temp_dir("schoold-periods-reprice");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let roster = seed_roster(&mut stdin, &mut reader, &workspace);

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "feePeriods.create",
        json!({
            "scopeType": "section",
            "scopeId": roster.section_id,
            "amount": 400,
            "effectiveFrom": "2024-01",
            "asOf": "2024-02"
        }),
    );
    let period_id = created["period"]["id"].as_str().expect("period id").to_string();
    for (id, month) in [("2", "2024-01"), ("3", "2024-02")] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "fees.generateMonthly",
            json!({ "month": month }),
        );
    }

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "feePeriods.update",
        json!({ "periodId": period_id, "amount": 450, "effectiveFrom": "2024-01", "asOf": "2024-02" }),
    );
    assert_eq!(updated["repricedFees"], 2);
    assert_eq!(updated["legacyAmount"], 450);

    let fees = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "fees.list",
        json!({ "enrollmentId": roster.enrollment_id }),
    );
    let amounts: Vec<i64> = fees["fees"]
        .as_array()
        .expect("fees")
        .iter()
        .map(|f| f["amount"].as_i64().unwrap_or(-1))
        .collect();
    assert_eq!(amounts, vec![450, 450]);

    let sections = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "sections.list",
        json!({ "classId": roster.class_id }),
    );
    assert_eq!(sections["sections"][0]["monthlyFee"], 450);

    let _ = std::fs::remove_dir_all(workspace);
}
