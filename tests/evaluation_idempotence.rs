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
    let exe = env!("CARGO_BIN_EXE_tahfizd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn tahfizd");
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
    serde_json::from_str(line.trim()).expect("parse response json")
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

#[test]
fn reevaluation_without_new_submissions_is_a_no_op_write() {
    let workspace = temp_dir("tahfiz-idempotence");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "seed",
        "chapters.seed",
        json!({ "chapters": [{ "id": 1, "name": "Al-Fatihah", "verseCount": 7 }] }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({ "fullName": "Bilal Hasan" }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "targets.create",
        json!({
            "studentId": student_id,
            "kind": "memorization",
            "startDate": "2024-01-01",
            "endDate": "2024-01-07",
            "startChapter": 1,
            "startVerse": 1,
            "endChapter": 1,
            "endVerse": 7
        }),
    );

    let rec = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "submissions.record",
        json!({
            "studentId": student_id,
            "kind": "memorization",
            "date": "2024-01-02",
            "chapter": 1,
            "startVerse": 1,
            "endVerse": 7
        }),
    );
    // The recording trigger flips the target to achieved: one write.
    assert_eq!(
        rec.get("evaluation")
            .and_then(|v| v.get("updatedCount"))
            .and_then(|v| v.as_i64()),
        Some(1)
    );

    for id in ["eval1", "eval2"] {
        let summary = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "achievement.evaluate",
            json!({
                "studentId": student_id,
                "windowStart": "2024-01-01",
                "windowEnd": "2024-01-07"
            }),
        );
        assert_eq!(
            summary.get("updatedCount").and_then(|v| v.as_i64()),
            Some(0),
            "derived state unchanged, so no write may occur"
        );
        let outcome = summary
            .get("outcomes")
            .and_then(|v| v.as_array())
            .and_then(|a| a.first())
            .cloned()
            .expect("outcome");
        assert_eq!(outcome.get("updated").and_then(|v| v.as_bool()), Some(false));
        assert_eq!(outcome.get("status").and_then(|v| v.as_str()), Some("achieved"));
    }

    let _ = child.kill();
}

#[test]
fn unresolvable_target_fails_alone_while_batch_continues() {
    let workspace = temp_dir("tahfiz-unresolvable");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "seed",
        "chapters.seed",
        json!({ "chapters": [{ "id": 1, "name": "Al-Fatihah", "verseCount": 7 }] }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({ "fullName": "Zaynab Idris" }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // Chapter 99 has no catalog row at all.
    let bad = request_ok(
        &mut stdin,
        &mut reader,
        "bad",
        "targets.create",
        json!({
            "studentId": student_id,
            "kind": "memorization",
            "startDate": "2024-01-01",
            "endDate": "2024-01-07",
            "startChapter": 99,
            "startVerse": 1,
            "endChapter": 99,
            "endVerse": 5
        }),
    );
    let bad_id = bad
        .get("targetId")
        .and_then(|v| v.as_str())
        .expect("targetId")
        .to_string();
    // The create persists; the evaluation reports the integrity failure.
    let failures = bad
        .get("evaluation")
        .and_then(|v| v.get("failures"))
        .and_then(|v| v.as_array())
        .cloned()
        .expect("failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].get("code").and_then(|v| v.as_str()),
        Some("target_not_resolvable")
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "good",
        "targets.create",
        json!({
            "studentId": student_id,
            "kind": "memorization",
            "startDate": "2024-01-01",
            "endDate": "2024-01-07",
            "startChapter": 1,
            "startVerse": 1,
            "endChapter": 1,
            "endVerse": 7
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "submissions.record",
        json!({
            "studentId": student_id,
            "kind": "memorization",
            "date": "2024-01-02",
            "chapter": 1,
            "startVerse": 1,
            "endVerse": 7
        }),
    );

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "eval",
        "achievement.evaluate",
        json!({
            "studentId": student_id,
            "windowStart": "2024-01-01",
            "windowEnd": "2024-01-07"
        }),
    );
    let failures = summary
        .get("failures")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("failures");
    assert_eq!(failures.len(), 1);
    assert_eq!(
        failures[0].get("targetId").and_then(|v| v.as_str()),
        Some(bad_id.as_str())
    );
    let outcomes = summary
        .get("outcomes")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("outcomes");
    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0].get("status").and_then(|v| v.as_str()),
        Some("achieved")
    );

    let _ = child.kill();
}

#[test]
fn incomplete_range_yields_zero_requirement_not_an_error() {
    let workspace = temp_dir("tahfiz-vacuous");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "seed",
        "chapters.seed",
        json!({ "chapters": [{ "id": 1, "name": "Al-Fatihah", "verseCount": 7 }] }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "stu",
        "students.create",
        json!({ "fullName": "Hafsa Noor" }),
    );
    let student_id = created
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    // No end bounds at all.
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "targets.create",
        json!({
            "studentId": student_id,
            "kind": "memorization",
            "startDate": "2024-01-01",
            "endDate": "2024-01-07",
            "startChapter": 1,
            "startVerse": 1
        }),
    );
    let eval = created.get("evaluation").expect("evaluation");
    assert_eq!(
        eval.get("failures").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
    let outcome = eval
        .get("outcomes")
        .and_then(|v| v.as_array())
        .and_then(|a| a.first())
        .cloned()
        .expect("outcome");
    assert_eq!(outcome.get("totalRequired").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(outcome.get("progressPercent").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        outcome.get("status").and_then(|v| v.as_str()),
        Some("not_achieved")
    );

    let _ = child.kill();
}
