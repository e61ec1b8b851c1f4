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

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
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

fn request_err_code(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value["error"]["code"].as_str().unwrap_or("").to_string()
}

fn setup_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> String {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "setup-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class = request_ok(
        stdin,
        reader,
        "setup-class",
        "classes.create",
        json!({ "name": "Grade 10" }),
    );
    let class_id = class["classId"].as_str().expect("classId").to_string();
    let student = request_ok(
        stdin,
        reader,
        "setup-student",
        "students.create",
        json!({ "classId": class_id, "firstName": "Imran", "lastName": "Hossain" }),
    );
    student["studentId"].as_str().expect("studentId").to_string()
}

fn create_fee(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    student_id: &str,
    total: f64,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        "setup-fee",
        "fees.create",
        json!({
            "studentId": student_id,
            "academicYear": "2024-2025",
            "feeType": "tuition",
            "totalAmount": total,
            "dueDate": "2099-06-30",
        }),
    );
    created["feeId"].as_str().expect("feeId").to_string()
}

fn assert_pending_invariant(fee: &serde_json::Value) {
    let total = fee["totalAmount"].as_f64().expect("total");
    let paid = fee["amountPaid"].as_f64().expect("paid");
    let late = fee["lateFeeAmount"].as_f64().expect("late");
    let discount = fee["discountAmount"].as_f64().expect("discount");
    let pending = fee["amountPending"].as_f64().expect("pending");
    assert!(
        (pending - (total - paid + late - discount)).abs() < 1e-9,
        "pending {} != {} - {} + {} - {}",
        pending,
        total,
        paid,
        late,
        discount
    );
}

#[test]
fn pending_amount_stays_consistent_across_mutations() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let student_id = setup_student(&mut stdin, &mut reader, "schoold-fee-invariant");
    let fee_id = create_fee(&mut stdin, &mut reader, &student_id, 20000.0);

    let steps: Vec<(&str, serde_json::Value)> = vec![
        (
            "fees.applyPayment",
            json!({ "feeId": fee_id, "amount": 4000.0, "method": "cash" }),
        ),
        (
            "fees.adjust",
            json!({ "feeId": fee_id, "discountAmount": 1500.0, "discountReason": "sibling concession" }),
        ),
        (
            "fees.applyPayment",
            json!({ "feeId": fee_id, "amount": 2000.0, "method": "online", "receiptNo": "R-1001" }),
        ),
        (
            "fees.adjust",
            json!({ "feeId": fee_id, "lateFeeAmount": 500.0, "lateFeeAppliedDate": "2025-05-01" }),
        ),
        (
            "fees.adjust",
            json!({ "feeId": fee_id, "totalAmount": 21000.0 }),
        ),
    ];

    for (i, (method, params)) in steps.into_iter().enumerate() {
        request_ok(&mut stdin, &mut reader, &format!("m{}", i), method, params);
        let fetched = request_ok(
            &mut stdin,
            &mut reader,
            &format!("g{}", i),
            "fees.get",
            json!({ "feeId": fee_id }),
        );
        assert_pending_invariant(&fetched["fee"]);
    }

    // 21000 - 6000 + 500 - 1500
    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "final",
        "fees.get",
        json!({ "feeId": fee_id }),
    );
    assert_eq!(fetched["fee"]["amountPending"].as_f64(), Some(14000.0));
    assert_eq!(fetched["fee"]["amountPaid"].as_f64(), Some(6000.0));
}

#[test]
fn identical_payments_are_distinct_transactions() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let student_id = setup_student(&mut stdin, &mut reader, "schoold-fee-dup-pay");
    let fee_id = create_fee(&mut stdin, &mut reader, &student_id, 9000.0);

    for i in 0..3 {
        request_ok(
            &mut stdin,
            &mut reader,
            &format!("p{}", i),
            "fees.applyPayment",
            json!({ "feeId": fee_id, "amount": 3000.0, "method": "cash", "receiptNo": "R-7" }),
        );
    }

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "fees.get",
        json!({ "feeId": fee_id }),
    );
    assert_eq!(fetched["fee"]["amountPaid"].as_f64(), Some(9000.0));
    assert_eq!(fetched["fee"]["status"].as_str(), Some("paid"));
    let payments = fetched["payments"].as_array().expect("payments");
    assert_eq!(payments.len(), 3);
}

#[test]
fn non_positive_payments_are_rejected_without_mutation() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let student_id = setup_student(&mut stdin, &mut reader, "schoold-fee-bad-pay");
    let fee_id = create_fee(&mut stdin, &mut reader, &student_id, 5000.0);

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "neg",
        "fees.applyPayment",
        json!({ "feeId": fee_id, "amount": -50.0, "method": "cash" }),
    );
    assert_eq!(code, "invalid_input");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "zero",
        "fees.applyPayment",
        json!({ "feeId": fee_id, "amount": 0.0, "method": "cash" }),
    );
    assert_eq!(code, "invalid_input");

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "fees.get",
        json!({ "feeId": fee_id }),
    );
    assert_eq!(fetched["fee"]["amountPaid"].as_f64(), Some(0.0));
    assert!(fetched["payments"].as_array().expect("payments").is_empty());
}

#[test]
fn negative_adjustments_are_rejected_and_leave_state_alone() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let student_id = setup_student(&mut stdin, &mut reader, "schoold-fee-bad-adjust");
    let fee_id = create_fee(&mut stdin, &mut reader, &student_id, 5000.0);

    for (id, params) in [
        ("t", json!({ "feeId": fee_id, "totalAmount": -1.0 })),
        ("d", json!({ "feeId": fee_id, "discountAmount": -10.0 })),
        ("l", json!({ "feeId": fee_id, "lateFeeAmount": -10.0 })),
    ] {
        let code = request_err_code(&mut stdin, &mut reader, id, "fees.adjust", params);
        assert_eq!(code, "invalid_input");
    }

    let fetched = request_ok(
        &mut stdin,
        &mut reader,
        "get",
        "fees.get",
        json!({ "feeId": fee_id }),
    );
    assert_eq!(fetched["fee"]["totalAmount"].as_f64(), Some(5000.0));
    assert_eq!(fetched["fee"]["amountPending"].as_f64(), Some(5000.0));
}

#[test]
fn status_never_regresses_as_payments_accumulate() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let student_id = setup_student(&mut stdin, &mut reader, "schoold-fee-monotonic");
    let fee_id = create_fee(&mut stdin, &mut reader, &student_id, 10000.0);

    fn rank(status: &str) -> i32 {
        match status {
            "overdue" => 0,
            "pending" => 1,
            "partial" => 2,
            "paid" => 3,
            other => panic!("unexpected status {}", other),
        }
    }

    let mut last = rank("pending");
    for (i, amount) in [2500.0, 2500.0, 2500.0, 2500.0].iter().enumerate() {
        let paid = request_ok(
            &mut stdin,
            &mut reader,
            &format!("p{}", i),
            "fees.applyPayment",
            json!({ "feeId": fee_id, "amount": amount, "method": "cash" }),
        );
        let status = paid["summary"]["status"].as_str().expect("status");
        assert!(rank(status) >= last, "status regressed to {}", status);
        last = rank(status);
    }
    assert_eq!(last, rank("paid"));
}

#[test]
fn payment_on_missing_fee_is_not_found() {
    let (_child, mut stdin, mut reader) = spawn_daemon();
    setup_student(&mut stdin, &mut reader, "schoold-fee-missing");

    let code = request_err_code(
        &mut stdin,
        &mut reader,
        "1",
        "fees.applyPayment",
        json!({ "feeId": "no-such-fee", "amount": 100.0, "method": "cash" }),
    );
    assert_eq!(code, "not_found");
}
