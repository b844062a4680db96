use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

/// Letter-grade to grade-point mapping. The table is closed: anything not
/// listed (including blanks and absence codes) scores 0.
pub fn grade_point(grade: &str) -> f64 {
    match grade.trim() {
        "O" => 10.0,
        "A+" => 9.0,
        "A" => 8.0,
        "B+" => 7.0,
        "B" => 6.0,
        "C" => 5.0,
        "U" => 0.0,
        _ => 0.0,
    }
}

/// Half-up 2-decimal rounding: `floor(100*x + 0.5) / 100`.
/// Applied uniformly to every GPA/CGPA value this daemon reports.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SemesterTotals {
    pub total_score: f64,
    pub total_credits: f64,
}

impl SemesterTotals {
    pub fn add(&mut self, points: f64, credits: f64) {
        self.total_score += points * credits;
        self.total_credits += credits;
    }

    /// Credit-weighted average; None when no credits were accumulated.
    pub fn gpa(&self) -> Option<f64> {
        if self.total_credits > 0.0 {
            Some(self.total_score / self.total_credits)
        } else {
            None
        }
    }
}

/// Accumulate one student's semester totals from (subjectCode, grade) pairs
/// and the semester's subject-credit map. Unknown subject codes contribute
/// nothing; a 0-credit subject adds 0 to both totals.
pub fn semester_totals<'a, I>(pairs: I, credits: &HashMap<String, u32>) -> SemesterTotals
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut totals = SemesterTotals::default();
    for (code, grade) in pairs {
        let Some(credit) = credits.get(code) else {
            continue;
        };
        totals.add(grade_point(grade), f64::from(*credit));
    }
    totals
}

/// Rounded GPA/CGPA value for the wire, or the "N/A" sentinel when the
/// denominator is empty.
pub fn gpa_to_json(value: Option<f64>) -> serde_json::Value {
    match value {
        Some(v) => json!(round_off_2_decimals(v)),
        None => json!("N/A"),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: &str, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: Some(details),
        }
    }
}

// Sheet layout: row 0 subject codes, row 1 subject names, row 2 credits,
// subjects starting at column 3; rows 3+ are [rollNo, registerNumber,
// studentName, grade...] aligned with the code row.
pub const SHEET_HEADER_ROWS: usize = 3;
pub const SHEET_SUBJECT_START_COL: usize = 3;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSubject {
    pub subject_code: String,
    pub subject_name: String,
    pub credits: u32,
}

#[derive(Debug, Clone)]
pub struct SheetStudentRow {
    pub roll_no: String,
    pub register_number: String,
    pub student_name: String,
    pub grades: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct SheetModel {
    pub subjects: Vec<SheetSubject>,
    pub students: Vec<SheetStudentRow>,
    pub skipped: Vec<SkippedRow>,
}

impl SheetModel {
    pub fn credit_map(&self) -> HashMap<String, u32> {
        self.subjects
            .iter()
            .map(|s| (s.subject_code.clone(), s.credits))
            .collect()
    }
}

/// Parse an uploaded row grid into subjects and per-student grade rows.
/// Malformed student rows (missing identity fields) are collected in
/// `skipped`, not fatal; malformed headers are.
pub fn parse_sheet(rows: &[Vec<String>]) -> Result<SheetModel, CalcError> {
    if rows.len() < SHEET_HEADER_ROWS {
        return Err(CalcError::with_details(
            "bad_sheet",
            "sheet must have 3 header rows (codes, names, credits)",
            json!({ "rows": rows.len() }),
        ));
    }

    let code_row = &rows[0];
    let name_row = &rows[1];
    let credit_row = &rows[2];

    if code_row.len() <= SHEET_SUBJECT_START_COL {
        return Err(CalcError::new(
            "bad_sheet",
            "sheet has no subject columns after the identity columns",
        ));
    }
    if name_row.len() != code_row.len() || credit_row.len() != code_row.len() {
        return Err(CalcError::with_details(
            "bad_sheet",
            "header rows have inconsistent lengths",
            json!({
                "codeCols": code_row.len(),
                "nameCols": name_row.len(),
                "creditCols": credit_row.len()
            }),
        ));
    }

    let mut subjects: Vec<SheetSubject> = Vec::new();
    for col in SHEET_SUBJECT_START_COL..code_row.len() {
        let code = code_row[col].trim();
        let name = name_row[col].trim();
        if code.is_empty() || name.is_empty() {
            return Err(CalcError::with_details(
                "bad_sheet",
                "subject code and name must be non-empty",
                json!({ "col": col }),
            ));
        }
        let credits: u32 = match credit_row[col].trim().parse() {
            Ok(v) => v,
            Err(_) => {
                return Err(CalcError::with_details(
                    "bad_sheet",
                    "credits must be a non-negative integer",
                    json!({ "col": col, "value": credit_row[col] }),
                ));
            }
        };
        subjects.push(SheetSubject {
            subject_code: code.to_string(),
            subject_name: name.to_string(),
            credits,
        });
    }

    let mut students: Vec<SheetStudentRow> = Vec::new();
    let mut skipped: Vec<SkippedRow> = Vec::new();
    for (i, row) in rows.iter().enumerate().skip(SHEET_HEADER_ROWS) {
        let roll_no = row.first().map(|s| s.trim()).unwrap_or("");
        let register_number = row.get(1).map(|s| s.trim()).unwrap_or("");
        let student_name = row.get(2).map(|s| s.trim()).unwrap_or("");
        if roll_no.is_empty() || register_number.is_empty() || student_name.is_empty() {
            skipped.push(SkippedRow {
                row: i,
                reason: "missing rollNo/registerNumber/studentName".to_string(),
            });
            continue;
        }
        let grades = row
            .iter()
            .skip(SHEET_SUBJECT_START_COL)
            .take(subjects.len())
            .map(|g| g.trim().to_string())
            .collect();
        students.push(SheetStudentRow {
            roll_no: roll_no.to_string(),
            register_number: register_number.to_string(),
            student_name: student_name.to_string(),
            grades,
        });
    }

    Ok(SheetModel {
        subjects,
        students,
        skipped,
    })
}

/// Student rows per store round-trip during uploads.
pub const UPLOAD_CHUNK_SIZE: usize = 10;

#[derive(Debug)]
pub struct ChunkFailure<E> {
    pub chunk_index: usize,
    pub committed_chunks: usize,
    pub error: E,
}

/// Run `f` over fixed-size chunks of `items`, sequentially and in order.
/// The first failing chunk aborts the rest; earlier chunks stay applied.
/// Returns the number of chunks processed.
pub fn process_chunks<T, E>(
    items: &[T],
    chunk_size: usize,
    mut f: impl FnMut(usize, &[T]) -> Result<(), E>,
) -> Result<usize, ChunkFailure<E>> {
    let mut committed = 0usize;
    for (chunk_index, chunk) in items.chunks(chunk_size).enumerate() {
        match f(chunk_index, chunk) {
            Ok(()) => committed += 1,
            Err(error) => {
                return Err(ChunkFailure {
                    chunk_index,
                    committed_chunks: committed,
                    error,
                })
            }
        }
    }
    Ok(committed)
}
