use crate::ipc::error::{err, ok};
use crate::ipc::helpers::db_conn;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_chapters_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };

    let Some(entries) = req.params.get("chapters").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing chapters array", None);
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let mut seeded = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        let Some(id) = entry.get("id").and_then(|v| v.as_i64()).filter(|n| *n >= 1) else {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                format!("chapters[{}].id must be a positive integer", i),
                None,
            );
        };
        let Some(name) = entry
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        else {
            let _ = tx.rollback();
            return err(
                &req.id,
                "bad_params",
                format!("chapters[{}].name must be a non-empty string", i),
                None,
            );
        };
        let verse_count = match entry.get("verseCount") {
            None => None,
            Some(v) if v.is_null() => None,
            Some(v) => match v.as_i64().filter(|n| *n >= 1) {
                Some(n) => Some(n),
                None => {
                    let _ = tx.rollback();
                    return err(
                        &req.id,
                        "bad_params",
                        format!("chapters[{}].verseCount must be a positive integer or null", i),
                        None,
                    );
                }
            },
        };

        if let Err(e) = tx.execute(
            "INSERT INTO chapters(id, name, verse_count) VALUES(?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, verse_count = excluded.verse_count",
            (id, name, verse_count),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "chapters" })),
            );
        }
        seeded += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "seeded": seeded }))
}

fn handle_chapters_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "chapters": [] }));
    };

    let mut stmt = match conn.prepare("SELECT id, name, verse_count FROM chapters ORDER BY id") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: i64 = row.get(0)?;
            let name: String = row.get(1)?;
            let verse_count: Option<i64> = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "verseCount": verse_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(chapters) => ok(&req.id, json!({ "chapters": chapters })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chapters.seed" => Some(handle_chapters_seed(state, req)),
        "chapters.list" => Some(handle_chapters_list(state, req)),
        _ => None,
    }
}
