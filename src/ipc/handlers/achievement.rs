use crate::coverage::{self, CoverageError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, ensure_student_exists, required_date, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

/// Run the evaluator and shape its summary for a response body. Used both
/// by the direct entry point and by the create/update/record triggers.
pub fn evaluate_to_json(
    conn: &Connection,
    student_id: &str,
    window_start: &str,
    window_end: &str,
) -> Result<serde_json::Value, CoverageError> {
    let summary = coverage::evaluate_achievement(conn, student_id, window_start, window_end)?;
    Ok(serde_json::to_value(summary).unwrap_or_else(|_| json!({})))
}

fn handle_achievement_evaluate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window_start = match required_date(req, "windowStart") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window_end = match required_date(req, "windowEnd") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if window_start > window_end {
        return err(
            &req.id,
            "bad_params",
            "windowStart must not be after windowEnd",
            None,
        );
    }
    if let Err(code) = ensure_student_exists(conn, &student_id) {
        return err(&req.id, code, "student not found", None);
    }

    match evaluate_to_json(conn, &student_id, &window_start, &window_end) {
        Ok(summary) => ok(&req.id, summary),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_achievement_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window_start = match required_date(req, "windowStart") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let window_end = match required_date(req, "windowEnd") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, kind, start_date, end_date,
                start_chapter, start_verse, end_chapter, end_verse,
                status, progress_percent, description
         FROM weekly_targets
         WHERE student_id = ? AND start_date <= ? AND end_date >= ?
         ORDER BY start_date, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map((&student_id, &window_end, &window_start), |row| {
            let id: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let start_date: String = row.get(2)?;
            let end_date: String = row.get(3)?;
            let start_chapter: Option<i64> = row.get(4)?;
            let start_verse: Option<i64> = row.get(5)?;
            let end_chapter: Option<i64> = row.get(6)?;
            let end_verse: Option<i64> = row.get(7)?;
            let status: String = row.get(8)?;
            let progress_percent: i64 = row.get(9)?;
            let description: Option<String> = row.get(10)?;
            Ok(json!({
                "id": id,
                "kind": kind,
                "startDate": start_date,
                "endDate": end_date,
                "startChapter": start_chapter,
                "startVerse": start_verse,
                "endChapter": end_chapter,
                "endVerse": end_verse,
                "status": status,
                "progressPercent": progress_percent,
                "description": description
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(targets) => ok(&req.id, json!({ "targets": targets })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "achievement.evaluate" => Some(handle_achievement_evaluate(state, req)),
        "achievement.open" => Some(handle_achievement_open(state, req)),
        _ => None,
    }
}
