use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let full_name = match required_str(req, "fullName") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let group_name = match parse_opt_string(req.params.get("groupName")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("groupName {}", m), None),
    };

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, full_name, group_name, active, created_at)
         VALUES(?, ?, ?, 1, ?)",
        (&student_id, &full_name, &group_name, now_ts()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "fullName": full_name }),
    )
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "students": [] }));
    };

    let group_filter = match parse_opt_string(req.params.get("groupName")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("groupName {}", m), None),
    };

    // Include target counts so the roster screen can show progress at a glance.
    let sql = "SELECT
                 s.id,
                 s.full_name,
                 s.group_name,
                 s.active,
                 (SELECT COUNT(*) FROM weekly_targets t WHERE t.student_id = s.id) AS target_count,
                 (SELECT COUNT(*) FROM weekly_targets t
                  WHERE t.student_id = s.id AND t.status = 'achieved') AS achieved_count
               FROM students s
               WHERE (?1 IS NULL OR s.group_name = ?1)
               ORDER BY s.full_name";
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&group_filter], |row| {
            let id: String = row.get(0)?;
            let full_name: String = row.get(1)?;
            let group_name: Option<String> = row.get(2)?;
            let active: i64 = row.get(3)?;
            let target_count: i64 = row.get(4)?;
            let achieved_count: i64 = row.get(5)?;
            Ok(json!({
                "id": id,
                "fullName": full_name,
                "groupName": group_name,
                "active": active != 0,
                "targetCount": target_count,
                "achievedTargetCount": achieved_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let existing: Option<(String, Option<String>, i64)> = match conn
        .query_row(
            "SELECT full_name, group_name, active FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((mut full_name, mut group_name, mut active)) = existing else {
        return err(&req.id, "not_found", "student not found", None);
    };

    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch object", None);
    };
    if let Some(v) = patch.get("fullName") {
        match v.as_str().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            Some(s) => full_name = s.to_string(),
            None => return err(&req.id, "bad_params", "patch.fullName must be a non-empty string", None),
        }
    }
    if patch.contains_key("groupName") {
        group_name = match parse_opt_string(patch.get("groupName")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("patch.groupName {}", m), None),
        };
    }
    if let Some(v) = patch.get("active") {
        match v.as_bool() {
            Some(b) => active = if b { 1 } else { 0 },
            None => return err(&req.id, "bad_params", "patch.active must be boolean", None),
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE students SET full_name = ?, group_name = ?, active = ? WHERE id = ?",
        (&full_name, &group_name, active, &student_id),
    ) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Delete dependents first; no ON DELETE CASCADE in the schema.
    if let Err(e) = tx.execute("DELETE FROM submissions WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "submissions" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM weekly_targets WHERE student_id = ?",
        [&student_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "weekly_targets" })),
        );
    }
    let removed = match tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "students" })),
            );
        }
    };
    if removed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
