use crate::coverage;
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::achievement::evaluate_to_json;
use crate::ipc::helpers::{
    db_conn, ensure_student_exists, parse_opt_positive_i64, parse_opt_string, required_date,
    required_str,
};
use crate::ipc::types::{AppState, Request};
use chrono::NaiveDate;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct TargetRecord {
    student_id: String,
    teacher_id: Option<String>,
    group_name: Option<String>,
    kind: String,
    start_date: String,
    end_date: String,
    start_chapter: Option<i64>,
    start_verse: Option<i64>,
    end_chapter: Option<i64>,
    end_verse: Option<i64>,
    description: Option<String>,
}

fn parse_bound(
    req: &Request,
    key: &str,
) -> Result<Option<i64>, serde_json::Value> {
    parse_opt_positive_i64(req.params.get(key))
        .map_err(|m| err(&req.id, "bad_params", format!("{} {}", key, m), None))
}

fn handle_targets_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let start_date = match required_date(req, "startDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let end_date = match required_date(req, "endDate") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    if start_date > end_date {
        return err(&req.id, "bad_params", "startDate must not be after endDate", None);
    }

    let record = TargetRecord {
        student_id,
        teacher_id: match parse_opt_string(req.params.get("teacherId")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("teacherId {}", m), None),
        },
        group_name: match parse_opt_string(req.params.get("groupName")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("groupName {}", m), None),
        },
        kind,
        start_date,
        end_date,
        start_chapter: match parse_bound(req, "startChapter") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        start_verse: match parse_bound(req, "startVerse") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        end_chapter: match parse_bound(req, "endChapter") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        end_verse: match parse_bound(req, "endVerse") {
            Ok(v) => v,
            Err(resp) => return resp,
        },
        description: match parse_opt_string(req.params.get("description")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("description {}", m), None),
        },
    };

    if let Err(code) = ensure_student_exists(conn, &record.student_id) {
        return err(&req.id, code, "student not found", None);
    }

    let target_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO weekly_targets(
             id, student_id, teacher_id, group_name, kind,
             start_date, end_date,
             start_chapter, start_verse, end_chapter, end_verse,
             description, status, progress_percent
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'not_achieved', 0)",
        rusqlite::params![
            &target_id,
            &record.student_id,
            &record.teacher_id,
            &record.group_name,
            &record.kind,
            &record.start_date,
            &record.end_date,
            &record.start_chapter,
            &record.start_verse,
            &record.end_chapter,
            &record.end_verse,
            &record.description,
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "weekly_targets" })),
        );
    }

    // The target is persisted regardless of how evaluation goes; a failed
    // evaluation comes back as a warning, not as a failed create.
    match evaluate_to_json(conn, &record.student_id, &record.start_date, &record.end_date) {
        Ok(summary) => ok(&req.id, json!({ "targetId": target_id, "evaluation": summary })),
        Err(e) => ok(
            &req.id,
            json!({
                "targetId": target_id,
                "warning": { "code": e.code, "message": e.message }
            }),
        ),
    }
}

fn handle_targets_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let target_id = match required_str(req, "targetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let existing: Option<TargetRecord> = match conn
        .query_row(
            "SELECT student_id, teacher_id, group_name, kind, start_date, end_date,
                    start_chapter, start_verse, end_chapter, end_verse, description
             FROM weekly_targets WHERE id = ?",
            [&target_id],
            |r| {
                Ok(TargetRecord {
                    student_id: r.get(0)?,
                    teacher_id: r.get(1)?,
                    group_name: r.get(2)?,
                    kind: r.get(3)?,
                    start_date: r.get(4)?,
                    end_date: r.get(5)?,
                    start_chapter: r.get(6)?,
                    start_verse: r.get(7)?,
                    end_chapter: r.get(8)?,
                    end_verse: r.get(9)?,
                    description: r.get(10)?,
                })
            },
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(mut record) = existing else {
        return err(&req.id, "not_found", "target not found", None);
    };

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };

    if let Some(v) = patch.get("kind") {
        match v.as_str().filter(|s| coverage::validate_kind(s)) {
            Some(s) => record.kind = s.to_string(),
            None => {
                return err(
                    &req.id,
                    "bad_params",
                    "patch.kind must be one of: memorization, review",
                    None,
                )
            }
        }
    }
    for (key, slot) in [
        ("startDate", &mut record.start_date),
        ("endDate", &mut record.end_date),
    ] {
        if let Some(v) = patch.get(key) {
            let parsed = v
                .as_str()
                .and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok());
            match parsed {
                Some(d) => *slot = d.format("%Y-%m-%d").to_string(),
                None => {
                    return err(
                        &req.id,
                        "bad_params",
                        format!("patch.{} must be YYYY-MM-DD", key),
                        None,
                    )
                }
            }
        }
    }
    if record.start_date > record.end_date {
        return err(&req.id, "bad_params", "startDate must not be after endDate", None);
    }
    for (key, slot) in [
        ("startChapter", &mut record.start_chapter),
        ("startVerse", &mut record.start_verse),
        ("endChapter", &mut record.end_chapter),
        ("endVerse", &mut record.end_verse),
    ] {
        if patch.contains_key(key) {
            *slot = match parse_opt_positive_i64(patch.get(key)) {
                Ok(v) => v,
                Err(m) => {
                    return err(&req.id, "bad_params", format!("patch.{} {}", key, m), None)
                }
            };
        }
    }
    if patch.contains_key("teacherId") {
        record.teacher_id = match parse_opt_string(patch.get("teacherId")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("patch.teacherId {}", m), None),
        };
    }
    if patch.contains_key("description") {
        record.description = match parse_opt_string(patch.get("description")) {
            Ok(v) => v,
            Err(m) => {
                return err(&req.id, "bad_params", format!("patch.description {}", m), None)
            }
        };
    }

    if let Err(e) = conn.execute(
        "UPDATE weekly_targets
         SET teacher_id = ?, kind = ?, start_date = ?, end_date = ?,
             start_chapter = ?, start_verse = ?, end_chapter = ?, end_verse = ?,
             description = ?
         WHERE id = ?",
        rusqlite::params![
            &record.teacher_id,
            &record.kind,
            &record.start_date,
            &record.end_date,
            &record.start_chapter,
            &record.start_verse,
            &record.end_chapter,
            &record.end_verse,
            &record.description,
            &target_id,
        ],
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    match evaluate_to_json(conn, &record.student_id, &record.start_date, &record.end_date) {
        Ok(summary) => ok(&req.id, json!({ "targetId": target_id, "evaluation": summary })),
        Err(e) => ok(
            &req.id,
            json!({
                "targetId": target_id,
                "warning": { "code": e.code, "message": e.message }
            }),
        ),
    }
}

fn handle_targets_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "targets": [] }));
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, teacher_id, group_name, kind, start_date, end_date,
                start_chapter, start_verse, end_chapter, end_verse,
                description, status, progress_percent
         FROM weekly_targets
         WHERE student_id = ?
         ORDER BY start_date, id",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&student_id], |row| {
            let id: String = row.get(0)?;
            let teacher_id: Option<String> = row.get(1)?;
            let group_name: Option<String> = row.get(2)?;
            let kind: String = row.get(3)?;
            let start_date: String = row.get(4)?;
            let end_date: String = row.get(5)?;
            let start_chapter: Option<i64> = row.get(6)?;
            let start_verse: Option<i64> = row.get(7)?;
            let end_chapter: Option<i64> = row.get(8)?;
            let end_verse: Option<i64> = row.get(9)?;
            let description: Option<String> = row.get(10)?;
            let status: String = row.get(11)?;
            let progress_percent: i64 = row.get(12)?;
            Ok(json!({
                "id": id,
                "teacherId": teacher_id,
                "groupName": group_name,
                "kind": kind,
                "startDate": start_date,
                "endDate": end_date,
                "startChapter": start_chapter,
                "startVerse": start_verse,
                "endChapter": end_chapter,
                "endVerse": end_verse,
                "description": description,
                "status": status,
                "progressPercent": progress_percent
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(targets) => ok(&req.id, json!({ "targets": targets })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_targets_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let target_id = match required_str(req, "targetId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let removed = match conn.execute("DELETE FROM weekly_targets WHERE id = ?", [&target_id]) {
        Ok(n) => n,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "weekly_targets" })),
            )
        }
    };
    if removed == 0 {
        return err(&req.id, "not_found", "target not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "targets.create" => Some(handle_targets_create(state, req)),
        "targets.update" => Some(handle_targets_update(state, req)),
        "targets.list" => Some(handle_targets_list(state, req)),
        "targets.delete" => Some(handle_targets_delete(state, req)),
        _ => None,
    }
}
