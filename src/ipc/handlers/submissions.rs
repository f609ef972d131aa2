use crate::coverage;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::achievement::evaluate_to_json;
use crate::ipc::helpers::{
    db_conn, ensure_student_exists, now_ts, parse_opt_positive_i64, parse_opt_string,
    required_date, required_str,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_submissions_record(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let kind = match required_str(req, "kind") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if !coverage::validate_kind(&kind) {
        return err(
            &req.id,
            "bad_params",
            "kind must be one of: memorization, review",
            None,
        );
    }
    let date = match required_date(req, "date") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let teacher_id = match parse_opt_string(req.params.get("teacherId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("teacherId {}", m), None),
    };
    let chapter = match parse_opt_positive_i64(req.params.get("chapter")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("chapter {}", m), None),
    };
    let start_verse = match parse_opt_positive_i64(req.params.get("startVerse")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("startVerse {}", m), None),
    };
    let end_verse = match parse_opt_positive_i64(req.params.get("endVerse")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("endVerse {}", m), None),
    };
    if let (Some(a), Some(b)) = (start_verse, end_verse) {
        if a > b {
            return err(
                &req.id,
                "bad_params",
                "startVerse must not be after endVerse",
                None,
            );
        }
    }
    let note = match parse_opt_string(req.params.get("note")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("note {}", m), None),
    };

    if let Err(code) = ensure_student_exists(conn, &student_id) {
        return err(&req.id, code, "student not found", None);
    }

    let submission_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO submissions(
             id, student_id, teacher_id, kind, date,
             chapter, start_verse, end_verse, note, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            &submission_id,
            &student_id,
            &teacher_id,
            &kind,
            &date,
            &chapter,
            &start_verse,
            &end_verse,
            &note,
            now_ts(),
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }

    // The one-day window reaches every open target whose window contains
    // the submission date. Evaluation trouble never voids the recording.
    match evaluate_to_json(conn, &student_id, &date, &date) {
        Ok(summary) => ok(
            &req.id,
            json!({ "submissionId": submission_id, "evaluation": summary }),
        ),
        Err(e) => ok(
            &req.id,
            json!({
                "submissionId": submission_id,
                "warning": { "code": e.code, "message": e.message }
            }),
        ),
    }
}

fn handle_submissions_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "submissions": [] }));
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let kind_filter = match parse_opt_string(req.params.get("kind")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("kind {}", m), None),
    };

    let mut stmt = match conn.prepare(
        "SELECT id, teacher_id, kind, date, chapter, start_verse, end_verse, note
         FROM submissions
         WHERE student_id = ?1 AND (?2 IS NULL OR kind = ?2)
         ORDER BY date, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&student_id, &kind_filter), |row| {
            let id: String = row.get(0)?;
            let teacher_id: Option<String> = row.get(1)?;
            let kind: String = row.get(2)?;
            let date: String = row.get(3)?;
            let chapter: Option<i64> = row.get(4)?;
            let start_verse: Option<i64> = row.get(5)?;
            let end_verse: Option<i64> = row.get(6)?;
            let note: Option<String> = row.get(7)?;
            Ok(json!({
                "id": id,
                "teacherId": teacher_id,
                "kind": kind,
                "date": date,
                "chapter": chapter,
                "startVerse": start_verse,
                "endVerse": end_verse,
                "note": note
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(submissions) => ok(&req.id, json!({ "submissions": submissions })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "submissions.record" => Some(handle_submissions_record(state, req)),
        "submissions.list" => Some(handle_submissions_list(state, req)),
        _ => None,
    }
}
