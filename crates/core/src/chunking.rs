use crate::models::{file_stem, ChunkKind, DetectedSection, IngestionOptions, SheetChunk};
use std::collections::BTreeMap;

pub const SECTION_TYPE_LABEL: &str = "Requirements/responses table";
pub const METADATA_MARKER: &str = "--- METADATA ---";
pub const RESPONSE_SEPARATOR: &str = " - ";

const IGNORED_RESPONSE_VALUES: [&str; 2] = ["nan", "0"];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub min_requirement_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_requirement_chars: 10,
        }
    }
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            min_requirement_chars: value.min_requirement_chars,
        }
    }
}

pub fn make_chunk_id(file_stem: &str, sheet_name: &str, row_number: u32) -> String {
    format!("{file_stem}_{sheet_name}_L{row_number}")
}

pub fn build_chunks(
    section: &DetectedSection<'_>,
    filename: &str,
    config: ChunkingConfig,
) -> Vec<SheetChunk> {
    let stem = file_stem(filename);
    let sheet = section.sheet;
    let requirement_column = section.requirement.column;
    let response_columns = section.response_columns();

    let mut chunks = Vec::new();

    for (row_index, row) in sheet.rows.iter().enumerate().skip(section.header_row + 1) {
        let row_number = (row_index + 1) as u32;

        let Some(requirement) = clean_cell(sheet.cell(row_index, requirement_column)) else {
            continue;
        };
        if requirement.chars().count() < config.min_requirement_chars {
            continue;
        }

        let response = response_columns
            .iter()
            .filter_map(|column| clean_cell(sheet.cell(row_index, *column)))
            .filter(|value| {
                !IGNORED_RESPONSE_VALUES
                    .iter()
                    .any(|ignored| value.eq_ignore_ascii_case(ignored))
            })
            .collect::<Vec<_>>()
            .join(RESPONSE_SEPARATOR);
        if response.is_empty() {
            continue;
        }

        let leftover: Vec<(usize, String)> = (0..row.len())
            .filter(|column| *column != requirement_column && !response_columns.contains(column))
            .filter_map(|column| {
                clean_cell(sheet.cell(row_index, column)).map(|value| (column, value))
            })
            .collect();

        let text = render_text(section, stem, row_number, &requirement, &response, &leftover);
        let metadata: BTreeMap<String, String> = leftover
            .into_iter()
            .map(|(column, value)| (metadata_key(column), value))
            .collect();

        chunks.push(SheetChunk {
            chunk_id: make_chunk_id(stem, &sheet.name, row_number),
            source: filename.to_string(),
            sheet_name: sheet.name.clone(),
            start_row: row_number,
            end_row: row_number,
            kind: ChunkKind::SmartBusiness,
            requirement,
            response,
            text,
            metadata,
        });
    }

    chunks
}

fn metadata_key(column: usize) -> String {
    format!("meta_col_{column}")
}

fn clean_cell(value: Option<&str>) -> Option<String> {
    let trimmed = value?.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn render_text(
    section: &DetectedSection<'_>,
    stem: &str,
    row_number: u32,
    requirement: &str,
    response: &str,
    leftover: &[(usize, String)],
) -> String {
    let sources = section
        .responses
        .iter()
        .map(|column| column.content.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut lines = vec![
        "=== CONTEXT ===".to_string(),
        format!("File: {stem}"),
        format!("Sheet: {}", section.sheet_name()),
        format!("Rows: {row_number}"),
        format!("Type: {SECTION_TYPE_LABEL}"),
        String::new(),
        "=== BUSINESS CONTENT ===".to_string(),
        "--- CLIENT REQUIREMENT ---".to_string(),
        format!("Category: {}", section.requirement.content),
        format!("Content: {requirement}"),
        String::new(),
        "--- SUPPLIER RESPONSES ---".to_string(),
        format!("Sources: {sources}"),
        format!("Content: {response}"),
    ];

    if !leftover.is_empty() {
        lines.push(String::new());
        lines.push(METADATA_MARKER.to_string());
        lines.extend(
            leftover
                .iter()
                .map(|(column, value)| format!("{}: {value}", metadata_key(*column))),
        );
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::SectionDetector;
    use crate::keywords::KeywordSet;
    use crate::models::Sheet;

    fn chunks_for(sheet: Sheet, filename: &str) -> Vec<SheetChunk> {
        let sheets = vec![sheet];
        let sections = SectionDetector::default().detect(
            &sheets,
            &KeywordSet::default_requirement(),
            &KeywordSet::default_response(),
        );
        sections
            .iter()
            .flat_map(|section| build_chunks(section, filename, ChunkingConfig::default()))
            .collect()
    }

    #[test]
    fn single_row_becomes_single_chunk() {
        let sheet = Sheet::from_text_rows(
            "Fonctionnel",
            &[
                &["Exigence", "Réponse"],
                &[
                    "Le système doit permettre la recherche avancée",
                    "Oui, fonctionnalité supportée",
                ],
            ],
        );

        let chunks = chunks_for(sheet, "client_rfi.xlsx");
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.requirement, "Le système doit permettre la recherche avancée");
        assert_eq!(chunk.response, "Oui, fonctionnalité supportée");
        assert_eq!(chunk.chunk_id, "client_rfi_Fonctionnel_L2");
        assert_eq!((chunk.start_row, chunk.end_row), (2, 2));
        assert_eq!(chunk.kind, ChunkKind::SmartBusiness);
        assert!(chunk.text.contains("Category: Exigence"));
        assert!(chunk.text.contains("Sources: Réponse"));
        assert!(!chunk.text.contains(METADATA_MARKER));
    }

    #[test]
    fn short_requirement_is_dropped() {
        let sheet = Sheet::from_text_rows("S", &[&["Exigence", "Réponse"], &["ok", "Oui"]]);
        assert!(chunks_for(sheet, "f.xlsx").is_empty());
    }

    #[test]
    fn placeholder_responses_are_discarded() {
        let sheet = Sheet::from_text_rows(
            "S",
            &[
                &["Exigence", "Réponse", "Commentaire"],
                &["Le système doit exporter en PDF", "NaN", "0"],
                &["Le système doit exporter en CSV", " Oui ", "Via API"],
            ],
        );

        let chunks = chunks_for(sheet, "f.xlsx");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].response, "Oui - Via API");
        assert_eq!(chunks[0].chunk_id, "f_S_L3");
    }

    #[test]
    fn leftover_columns_become_metadata() {
        let sheet = Sheet::from_text_rows(
            "S",
            &[
                &["Ref", "Exigence", "Réponse", "Priorité"],
                &["NC-04", "Gestion des non-conformités", "Standard", "nan"],
            ],
        );

        let chunks = chunks_for(sheet, "f.xlsx");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.len(), 1);
        assert_eq!(chunks[0].metadata.get("meta_col_0").map(String::as_str), Some("NC-04"));
        assert!(chunks[0].text.contains("--- METADATA ---\nmeta_col_0: NC-04"));
    }

    #[test]
    fn metadata_block_follows_column_order() {
        let header: Vec<String> = ["Exigence", "Réponse"]
            .into_iter()
            .map(str::to_string)
            .chain((2..=11).map(|column| format!("Info {column}")))
            .collect();
        let data: Vec<String> = ["Traçabilité des lots de fabrication", "Oui"]
            .into_iter()
            .map(str::to_string)
            .chain((2..=11).map(|column| format!("v{column}")))
            .collect();
        let header: Vec<&str> = header.iter().map(String::as_str).collect();
        let data: Vec<&str> = data.iter().map(String::as_str).collect();
        let sheet = Sheet::from_text_rows("S", &[header.as_slice(), data.as_slice()]);

        let chunks = chunks_for(sheet, "f.xlsx");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.len(), 10);

        let block = chunks[0]
            .text
            .split_once(METADATA_MARKER)
            .map(|(_, block)| block.trim())
            .unwrap_or_default();
        let expected: Vec<String> = (2..=11)
            .map(|column| format!("meta_col_{column}: v{column}"))
            .collect();
        assert_eq!(block.lines().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn synthesis_is_deterministic() {
        let sheet = Sheet::from_text_rows(
            "S",
            &[
                &["Besoin", "Answer"],
                &["Audit trail on every record", "Yes"],
                &["Electronic signatures", "Yes, Part 11"],
            ],
        );

        let first = chunks_for(sheet.clone(), "f.xlsx");
        let second = chunks_for(sheet, "f.xlsx");
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        for chunk in &first {
            assert!(chunk.requirement.chars().count() >= 10);
            assert!(!chunk.response.is_empty());
        }
    }
}
