use crate::error::IngestError;
use crate::models::Sheet;
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use std::io::Cursor;
use std::path::Path;

pub const SPREADSHEET_EXTENSIONS: [&str; 5] = ["xlsx", "xlsm", "xlsb", "xls", "ods"];

pub trait SheetExtractor {
    fn extract_from_bytes(&self, bytes: &[u8]) -> Result<Vec<Sheet>, IngestError>;

    fn extract_sheets(&self, path: &Path) -> Result<Vec<Sheet>, IngestError> {
        let bytes = std::fs::read(path)?;
        self.extract_from_bytes(&bytes)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CalamineExtractor;

impl SheetExtractor for CalamineExtractor {
    fn extract_from_bytes(&self, bytes: &[u8]) -> Result<Vec<Sheet>, IngestError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|error| IngestError::SheetParse(error.to_string()))?;

        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|error| IngestError::SheetParse(format!("{name}: {error}")))?;
            sheets.push(Sheet::new(name, grid_from_range(&range)));
        }

        Ok(sheets)
    }
}

pub fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SPREADSHEET_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

fn grid_from_range(range: &Range<Data>) -> Vec<Vec<Option<String>>> {
    let Some((start_row, start_column)) = range.start() else {
        return Vec::new();
    };

    let mut grid: Vec<Vec<Option<String>>> = vec![Vec::new(); start_row as usize];
    for row in range.rows() {
        let mut cells = vec![None; start_column as usize];
        cells.extend(row.iter().map(cell_text));
        grid.push(cells);
    }
    grid
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::Empty | Data::Error(_) => return None,
        Data::String(value) => value.clone(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        Data::Float(value) => value.to_string(),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    };

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}
