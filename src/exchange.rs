use crate::model::Student;
use anyhow::{bail, Context};
use serde_json::Value;
use std::collections::HashSet;

/// Renders the collection as CSV. The header row is the key set of the
/// first record; structured fields (arrays, objects) are JSON-stringified
/// inline. String cells that would otherwise read back as a number, bool or
/// null are quoted so the round trip preserves their type.
pub fn to_csv(students: &[Student]) -> anyhow::Result<String> {
    let rows: Vec<Value> = students
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<_, _>>()
        .context("failed to serialize students")?;
    let Some(Value::Object(first)) = rows.first() else {
        return Ok(String::new());
    };

    let headers: Vec<String> = first.keys().cloned().collect();
    let mut out = String::new();
    out.push_str(
        &headers
            .iter()
            .map(|h| escape_cell(h, false))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for row in &rows {
        let line = headers
            .iter()
            .map(|h| render_cell(row.get(h).unwrap_or(&Value::Null)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

fn render_cell(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => escape_cell(s, parses_as_scalar(s)),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        // Embedded arrays/objects travel as JSON text, always quoted.
        other => escape_cell(&other.to_string(), true),
    }
}

fn parses_as_scalar(s: &str) -> bool {
    matches!(
        serde_json::from_str::<Value>(s),
        Ok(Value::Number(_) | Value::Bool(_) | Value::Null)
    )
}

fn escape_cell(raw: &str, force_quote: bool) -> String {
    if force_quote
        || raw.contains(',')
        || raw.contains('"')
        || raw.contains('\n')
        || raw.contains('\r')
    {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

#[derive(Debug, Clone)]
struct CsvCell {
    text: String,
    quoted: bool,
}

fn parse_rows(text: &str) -> Vec<Vec<CsvCell>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut cell = String::new();
    let mut quoted = false;
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        cell.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' => {
                in_quotes = true;
                quoted = true;
            }
            ',' => {
                row.push(CsvCell {
                    text: std::mem::take(&mut cell),
                    quoted: std::mem::take(&mut quoted),
                });
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(CsvCell {
                    text: std::mem::take(&mut cell),
                    quoted: std::mem::take(&mut quoted),
                });
                rows.push(std::mem::take(&mut row));
            }
            '\n' => {
                row.push(CsvCell {
                    text: std::mem::take(&mut cell),
                    quoted: std::mem::take(&mut quoted),
                });
                rows.push(std::mem::take(&mut row));
            }
            _ => cell.push(c),
        }
    }
    if !cell.is_empty() || quoted || !row.is_empty() {
        row.push(CsvCell { text: cell, quoted });
        rows.push(row);
    }
    rows
}

fn restore_cell(cell: &CsvCell) -> Option<Value> {
    if cell.quoted {
        if cell.text.starts_with('{') || cell.text.starts_with('[') {
            // Structured field; an unparsable payload degrades to plain text.
            return Some(
                serde_json::from_str(&cell.text)
                    .unwrap_or_else(|_| Value::String(cell.text.clone())),
            );
        }
        return Some(Value::String(cell.text.clone()));
    }
    if cell.text.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(&cell.text) {
        Ok(v @ (Value::Number(_) | Value::Bool(_) | Value::Null)) => Some(v),
        _ => Some(Value::String(cell.text.clone())),
    }
}

/// Parses an exported CSV back into students. The header must carry `id`
/// and `name` columns; anything else is a structure error and nothing is
/// imported.
pub fn from_csv(text: &str) -> anyhow::Result<Vec<Student>> {
    let rows = parse_rows(text);
    let Some(header) = rows.first() else {
        bail!("csv file is empty");
    };
    let headers: Vec<&str> = header.iter().map(|c| c.text.as_str()).collect();
    for required in ["id", "name"] {
        if !headers.contains(&required) {
            bail!("csv is missing required column: {required}");
        }
    }

    let mut students = Vec::new();
    for (line, row) in rows.iter().enumerate().skip(1) {
        if row.len() == 1 && row[0].text.is_empty() && !row[0].quoted {
            continue;
        }
        let mut obj = serde_json::Map::new();
        for (i, cell) in row.iter().enumerate() {
            let Some(key) = headers.get(i) else {
                continue;
            };
            if let Some(v) = restore_cell(cell) {
                obj.insert((*key).to_string(), v);
            }
        }
        let student: Student = serde_json::from_value(Value::Object(obj))
            .with_context(|| format!("csv row {} is not a valid student", line + 1))?;
        students.push(student);
    }
    ensure_unique_ids(&students)?;
    Ok(students)
}

/// JSON import: must be a non-empty array whose first element carries at
/// minimum `id` and `name`.
pub fn from_json(text: &str) -> anyhow::Result<Vec<Student>> {
    let value: Value = serde_json::from_str(text).context("file is not valid JSON")?;
    let Value::Array(items) = &value else {
        bail!("json import must be an array of students");
    };
    let Some(first) = items.first() else {
        bail!("json import is empty");
    };
    if first.get("id").is_none() || first.get("name").is_none() {
        bail!("json import records must have id and name fields");
    }
    let students: Vec<Student> =
        serde_json::from_value(value).context("json records are not valid students")?;
    ensure_unique_ids(&students)?;
    Ok(students)
}

fn ensure_unique_ids(students: &[Student]) -> anyhow::Result<()> {
    let mut seen = HashSet::new();
    for s in students {
        if !seen.insert(s.id.as_str()) {
            bail!("duplicate student id in import: {}", s.id);
        }
    }
    Ok(())
}
