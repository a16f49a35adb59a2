//! Tabular chunker (C4): one chunk per non-empty spreadsheet row
//! ("row-as-document"), used instead of the text chunker whenever the
//! extractor is a spreadsheet format.

use crate::types::{Chunk, ChunkType, MetadataValue};
use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use uuid::Uuid;

const MIN_ROW_CHUNK_LEN: usize = 10;

/// Reads every sheet of `path` and emits one chunk per data row, in the
/// `"Sheet: '{sheet}'. Row: {n}. 'col': 'val', ..."` format. Headers are the
/// first row whose values are more than 70% non-numeric strings; if no row
/// qualifies, synthetic column labels (`Column 1`, `Column 2`, ...) are used
/// and every row is treated as data. `row_number` is spreadsheet-line
/// numbering (a consumed header row is line 1, so the first data row is 2);
/// `row_count` (the sheet's total data-row count) is stamped on every row
/// from that sheet so the re-ranker can weigh a chunk by how large its
/// parent sheet is, not just its own content. `max_rows_per_sheet`/
/// `max_columns_per_sheet` cap both dimensions per sheet.
pub fn chunk_spreadsheet_rows(
    path: &Path,
    max_rows_per_sheet: usize,
    max_columns_per_sheet: usize,
) -> Result<Vec<Chunk>> {
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("opening spreadsheet for row chunking: {}", path.display()))?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut chunks = Vec::new();

    for sheet_name in &sheet_names {
        let range = match workbook.worksheet_range(sheet_name) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if range.is_empty() {
            continue;
        }

        let all_rows: Vec<Vec<String>> = range
            .rows()
            .take(max_rows_per_sheet + 1)
            .map(|row| {
                row.iter()
                    .take(max_columns_per_sheet)
                    .map(cell_to_string)
                    .collect()
            })
            .filter(|row: &Vec<String>| !row.iter().all(|c| c.is_empty()))
            .collect();
        if all_rows.is_empty() {
            continue;
        }

        chunks.extend(sheet_rows_to_chunks(sheet_name, &all_rows, max_rows_per_sheet));
    }

    Ok(chunks)
}

/// Builds the row chunks for a single sheet already read into memory.
/// Split out from `chunk_spreadsheet_rows` so the row-numbering and
/// metadata logic can be exercised directly, without a spreadsheet file
/// on disk.
fn sheet_rows_to_chunks(sheet_name: &str, all_rows: &[Vec<String>], max_rows_per_sheet: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    if all_rows.is_empty() {
        return chunks;
    }

    let (headers, data_rows, header_consumed): (Vec<String>, &[Vec<String>], bool) =
        if looks_like_header(&all_rows[0]) {
            (all_rows[0].clone(), &all_rows[1..], true)
        } else {
            let synthetic = (1..=all_rows[0].len()).map(|i| format!("Column {i}")).collect();
            (synthetic, &all_rows[..], false)
        };
    let header_offset = if header_consumed { 1 } else { 0 };
    let row_count = data_rows.len().min(max_rows_per_sheet);

    for (row_idx, row) in data_rows.iter().take(max_rows_per_sheet).enumerate() {
        let row_number = row_idx + 1 + header_offset;
        let original_row_index = row_idx + header_offset;
        let total_fields = row.len();
        let fields: Vec<String> = headers
            .iter()
            .zip(row.iter())
            .filter(|(_, value)| !value.is_empty())
            .map(|(col, value)| format!("'{col}': '{value}'"))
            .collect();
        if fields.is_empty() {
            continue;
        }
        let non_empty_fields = fields.len();

        let content = format!("Sheet: '{sheet_name}'. Row: {row_number}. {}", fields.join(", "));
        if content.len() < MIN_ROW_CHUNK_LEN {
            continue;
        }

        let fill_ratio = if total_fields == 0 {
            0.0
        } else {
            non_empty_fields as f64 / total_fields as f64
        };

        let mut metadata = crate::types::ChunkMetadata::new();
        metadata.insert("sheet_name".to_string(), MetadataValue::Str(sheet_name.to_string()));
        metadata.insert("row_number".to_string(), MetadataValue::Int(row_number as i64));
        metadata.insert(
            "original_row_index".to_string(),
            MetadataValue::Int(original_row_index as i64),
        );
        metadata.insert(
            "non_empty_fields".to_string(),
            MetadataValue::Int(non_empty_fields as i64),
        );
        metadata.insert("total_fields".to_string(), MetadataValue::Int(total_fields as i64));
        metadata.insert("fill_ratio".to_string(), MetadataValue::Float(fill_ratio));
        metadata.insert("row_count".to_string(), MetadataValue::Int(row_count as i64));

        chunks.push(Chunk {
            chunk_id: Uuid::new_v4().to_string(),
            content,
            chunk_type: ChunkType::SpreadsheetRow,
            heading: Some(sheet_name.to_string()),
            metadata,
        });
    }

    chunks
}

/// A row "looks like" a header when more than 70% of its non-empty cells
/// fail to parse as a number.
fn looks_like_header(row: &[String]) -> bool {
    let non_empty: Vec<&String> = row.iter().filter(|c| !c.is_empty()).collect();
    if non_empty.is_empty() {
        return false;
    }
    let non_numeric = non_empty.iter().filter(|c| c.parse::<f64>().is_err()).count();
    non_numeric as f64 / non_empty.len() as f64 > 0.7
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                (*f as i64).to_string()
            } else {
                format!("{:.4}", f).trim_end_matches('0').trim_end_matches('.').to_string()
            }
        }
        Data::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Data::Error(e) => format!("#ERR:{:?}", e),
        Data::DateTime(dt) => dt.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_detection_requires_mostly_non_numeric_cells() {
        assert!(looks_like_header(&["Name".into(), "City".into(), "Notes".into()]));
        assert!(!looks_like_header(&["1".into(), "2".into(), "3.5".into()]));
    }

    #[test]
    fn header_detection_handles_all_empty_row() {
        assert!(!looks_like_header(&["".into(), "".into()]));
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn first_data_row_after_a_header_is_numbered_two() {
        let rows = vec![
            row(&["Name", "City"]),
            row(&["Alice", "Austin"]),
            row(&["Bob", "Boston"]),
        ];
        let chunks = sheet_rows_to_chunks("Sheet1", &rows, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(
            chunks[0].metadata.get("row_number").and_then(MetadataValue::as_i64),
            Some(2)
        );
        assert_eq!(
            chunks[1].metadata.get("row_number").and_then(MetadataValue::as_i64),
            Some(3)
        );
        assert!(chunks[0].content.contains("Row: 2."));
    }

    #[test]
    fn first_data_row_without_a_header_is_numbered_one() {
        let rows = vec![row(&["1", "2"]), row(&["3", "4"])];
        let chunks = sheet_rows_to_chunks("Sheet1", &rows, 100);
        assert_eq!(
            chunks[0].metadata.get("row_number").and_then(MetadataValue::as_i64),
            Some(1)
        );
    }

    #[test]
    fn row_metadata_carries_field_counts_and_fill_ratio() {
        let rows = vec![row(&["Name", "City", "Notes"]), row(&["Alice", "Austin", ""])];
        let chunks = sheet_rows_to_chunks("Sheet1", &rows, 100);
        let metadata = &chunks[0].metadata;
        assert_eq!(metadata.get("original_row_index").and_then(MetadataValue::as_i64), Some(1));
        assert_eq!(metadata.get("non_empty_fields").and_then(MetadataValue::as_i64), Some(2));
        assert_eq!(metadata.get("total_fields").and_then(MetadataValue::as_i64), Some(3));
        assert_eq!(metadata.get("row_count").and_then(MetadataValue::as_i64), Some(1));
        match metadata.get("fill_ratio") {
            Some(MetadataValue::Float(ratio)) => assert!((ratio - (2.0 / 3.0)).abs() < 1e-9),
            other => panic!("expected fill_ratio float, got {other:?}"),
        }
    }
}
