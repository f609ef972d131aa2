use rusqlite::Connection;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

pub const STATUS_ACHIEVED: &str = "achieved";
pub const STATUS_NOT_ACHIEVED: &str = "not_achieved";

pub const KIND_MEMORIZATION: &str = "memorization";
pub const KIND_REVIEW: &str = "review";

pub fn validate_kind(kind: &str) -> bool {
    matches!(kind, KIND_MEMORIZATION | KIND_REVIEW)
}

/// Atomic unit of coverage. Exists only in memory; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerseRef {
    pub chapter: i64,
    pub verse: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CoverageError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CoverageError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }
}

/// Per-evaluation snapshot of the chapter catalog.
///
/// Built once per `evaluate_achievement` call and never mutated afterward,
/// so concurrent evaluations for different students cannot observe each
/// other's loads. A chapter id with no entry is unknown to the catalog;
/// an entry with no recorded length counts as zero verses.
pub struct ChapterLengths {
    lengths: HashMap<i64, Option<i64>>,
}

impl ChapterLengths {
    pub fn load(conn: &Connection) -> Result<Self, CoverageError> {
        let mut stmt = conn
            .prepare("SELECT id, verse_count FROM chapters")
            .map_err(|e| CoverageError::new("db_query_failed", e.to_string()))?;
        let lengths = stmt
            .query_map([], |r| {
                let id: i64 = r.get(0)?;
                let count: Option<i64> = r.get(1)?;
                Ok((id, count))
            })
            .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
            .map_err(|e| CoverageError::new("db_query_failed", e.to_string()))?;
        Ok(Self { lengths })
    }

    pub fn verse_count(&self, chapter: i64) -> i64 {
        self.lengths.get(&chapter).copied().flatten().unwrap_or(0)
    }

    pub fn is_known(&self, chapter: i64) -> bool {
        self.lengths.contains_key(&chapter)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TargetBounds {
    pub start_chapter: Option<i64>,
    pub start_verse: Option<i64>,
    pub end_chapter: Option<i64>,
    pub end_verse: Option<i64>,
}

/// Expand a target's boundary description into the ordered set of verse
/// units it requires. A target missing any bound requires nothing; a
/// chapter without a recorded length contributes nothing for that chapter.
pub fn expand_target_range(lengths: &ChapterLengths, bounds: &TargetBounds) -> Vec<VerseRef> {
    let (Some(start_chapter), Some(start_verse), Some(end_chapter), Some(end_verse)) = (
        bounds.start_chapter,
        bounds.start_verse,
        bounds.end_chapter,
        bounds.end_verse,
    ) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for chapter in start_chapter..=end_chapter {
        let lo = if chapter == start_chapter {
            start_verse
        } else {
            1
        };
        let hi = if chapter == end_chapter {
            end_verse
        } else {
            lengths.verse_count(chapter)
        };
        for verse in lo..=hi {
            out.push(VerseRef { chapter, verse });
        }
    }
    out
}

pub fn progress_percent(achieved_count: usize, total_required: usize) -> i64 {
    if total_required == 0 {
        return 0;
    }
    ((achieved_count as f64) * 100.0 / (total_required as f64)).round() as i64
}

pub fn status_for_progress(progress: i64) -> &'static str {
    if progress == 100 {
        STATUS_ACHIEVED
    } else {
        STATUS_NOT_ACHIEVED
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutcome {
    pub target_id: String,
    pub total_required: usize,
    pub achieved_count: usize,
    pub progress_percent: i64,
    pub status: String,
    pub updated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFailure {
    pub target_id: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationSummary {
    pub evaluated_count: usize,
    pub updated_count: usize,
    pub outcomes: Vec<TargetOutcome>,
    pub failures: Vec<TargetFailure>,
}

#[derive(Debug, Clone)]
struct TargetRow {
    id: String,
    kind: String,
    start_date: String,
    end_date: String,
    bounds: TargetBounds,
    status: String,
    progress_percent: i64,
}

#[derive(Debug, Clone, Copy)]
struct SubmissionRange {
    chapter: Option<i64>,
    start_verse: Option<i64>,
    end_verse: Option<i64>,
}

/// Re-derive status and progress for every target of the student whose
/// window intersects `[window_start, window_end]` (dates inclusive, ISO
/// strings). Each target is evaluated independently; a target whose bounds
/// reference a chapter absent from the catalog is reported as a failure
/// while the rest of the batch continues. Rows are only written when the
/// derived status or progress differs from the stored value.
pub fn evaluate_achievement(
    conn: &Connection,
    student_id: &str,
    window_start: &str,
    window_end: &str,
) -> Result<EvaluationSummary, CoverageError> {
    let lengths = ChapterLengths::load(conn)?;
    let targets = load_overlapping_targets(conn, student_id, window_start, window_end)?;

    let mut outcomes: Vec<TargetOutcome> = Vec::new();
    let mut failures: Vec<TargetFailure> = Vec::new();
    let mut updated_count = 0usize;

    for target in &targets {
        if let Some(chapter) = unresolvable_chapter(&lengths, &target.bounds) {
            failures.push(TargetFailure {
                target_id: target.id.clone(),
                code: "target_not_resolvable".to_string(),
                message: format!("target references unknown chapter {}", chapter),
            });
            continue;
        }

        let required = expand_target_range(&lengths, &target.bounds);
        let total_required = required.len();

        let submissions = load_submissions(
            conn,
            student_id,
            &target.kind,
            &target.start_date,
            &target.end_date,
        )?;
        let mut achieved: HashSet<VerseRef> = HashSet::new();
        for sub in &submissions {
            accumulate_submission(&mut achieved, sub.chapter, sub.start_verse, sub.end_verse);
        }

        // Intersection with the requirement, not the raw achieved size, so
        // recitation beyond the target range never inflates progress.
        let achieved_count = required.iter().filter(|u| achieved.contains(u)).count();
        let progress = progress_percent(achieved_count, total_required);
        let status = status_for_progress(progress);

        let changed = status != target.status || progress != target.progress_percent;
        if changed {
            conn.execute(
                "UPDATE weekly_targets
                 SET status = ?, progress_percent = ?, updated_at = ?
                 WHERE id = ?",
                (status, progress, now_ts(), &target.id),
            )
            .map_err(|e| CoverageError::new("db_update_failed", e.to_string()))?;
            updated_count += 1;
        }

        outcomes.push(TargetOutcome {
            target_id: target.id.clone(),
            total_required,
            achieved_count,
            progress_percent: progress,
            status: status.to_string(),
            updated: changed,
        });
    }

    Ok(EvaluationSummary {
        evaluated_count: outcomes.len(),
        updated_count,
        outcomes,
        failures,
    })
}

fn unresolvable_chapter(lengths: &ChapterLengths, bounds: &TargetBounds) -> Option<i64> {
    for chapter in [bounds.start_chapter, bounds.end_chapter].into_iter().flatten() {
        if !lengths.is_known(chapter) {
            return Some(chapter);
        }
    }
    None
}

fn accumulate_submission(
    achieved: &mut HashSet<VerseRef>,
    chapter: Option<i64>,
    start_verse: Option<i64>,
    end_verse: Option<i64>,
) {
    // A submission missing its chapter or either verse bound contributes
    // nothing.
    let (Some(chapter), Some(start_verse), Some(end_verse)) = (chapter, start_verse, end_verse)
    else {
        return;
    };
    for verse in start_verse..=end_verse {
        achieved.insert(VerseRef { chapter, verse });
    }
}

fn load_overlapping_targets(
    conn: &Connection,
    student_id: &str,
    window_start: &str,
    window_end: &str,
) -> Result<Vec<TargetRow>, CoverageError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, kind, start_date, end_date,
                    start_chapter, start_verse, end_chapter, end_verse,
                    status, progress_percent
             FROM weekly_targets
             WHERE student_id = ? AND start_date <= ? AND end_date >= ?
             ORDER BY start_date, id",
        )
        .map_err(|e| CoverageError::new("db_query_failed", e.to_string()))?;
    stmt.query_map((student_id, window_end, window_start), |r| {
        Ok(TargetRow {
            id: r.get(0)?,
            kind: r.get(1)?,
            start_date: r.get(2)?,
            end_date: r.get(3)?,
            bounds: TargetBounds {
                start_chapter: r.get(4)?,
                start_verse: r.get(5)?,
                end_chapter: r.get(6)?,
                end_verse: r.get(7)?,
            },
            status: r.get(8)?,
            progress_percent: r.get(9)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CoverageError::new("db_query_failed", e.to_string()))
}

fn load_submissions(
    conn: &Connection,
    student_id: &str,
    kind: &str,
    date_start: &str,
    date_end: &str,
) -> Result<Vec<SubmissionRange>, CoverageError> {
    let mut stmt = conn
        .prepare(
            "SELECT chapter, start_verse, end_verse
             FROM submissions
             WHERE student_id = ? AND kind = ? AND date >= ? AND date <= ?",
        )
        .map_err(|e| CoverageError::new("db_query_failed", e.to_string()))?;
    stmt.query_map((student_id, kind, date_start, date_end), |r| {
        Ok(SubmissionRange {
            chapter: r.get(0)?,
            start_verse: r.get(1)?,
            end_verse: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| CoverageError::new("db_query_failed", e.to_string()))
}

fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
