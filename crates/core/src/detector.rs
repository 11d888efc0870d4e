use crate::keywords::{KeywordMatcher, KeywordSet, SubstringMatcher};
use crate::models::{ColumnMatch, DetectedSection, Sheet};
use tracing::debug;

pub const DEFAULT_HEADER_SCAN_ROWS: usize = 20;

#[derive(Debug, Clone)]
pub struct SectionDetector<M = SubstringMatcher> {
    matcher: M,
    scan_rows: usize,
}

impl Default for SectionDetector<SubstringMatcher> {
    fn default() -> Self {
        Self::new(SubstringMatcher, DEFAULT_HEADER_SCAN_ROWS)
    }
}

impl<M: KeywordMatcher> SectionDetector<M> {
    pub fn new(matcher: M, scan_rows: usize) -> Self {
        Self { matcher, scan_rows }
    }

    pub fn detect<'a>(
        &self,
        sheets: &'a [Sheet],
        requirement: &KeywordSet,
        response: &KeywordSet,
    ) -> Vec<DetectedSection<'a>> {
        sheets
            .iter()
            .filter_map(|sheet| self.detect_in_sheet(sheet, requirement, response))
            .collect()
    }

    pub fn detect_in_sheet<'a>(
        &self,
        sheet: &'a Sheet,
        requirement: &KeywordSet,
        response: &KeywordSet,
    ) -> Option<DetectedSection<'a>> {
        for (row_index, row) in sheet.rows.iter().take(self.scan_rows).enumerate() {
            let Some(requirement_match) = self.first_match(row, requirement) else {
                continue;
            };

            let responses: Vec<ColumnMatch> = row
                .iter()
                .enumerate()
                .filter(|(column, _)| *column != requirement_match.column)
                .filter_map(|(column, cell)| {
                    let content = cell.as_deref()?;
                    let keyword = self.matcher.find_match(content, response)?;
                    Some(ColumnMatch {
                        column,
                        content: content.to_string(),
                        keyword: keyword.to_string(),
                    })
                })
                .collect();

            if responses.is_empty() {
                continue;
            }

            debug!(
                sheet = %sheet.name,
                header_row = row_index,
                requirement_column = requirement_match.column,
                response_columns = responses.len(),
                "section detected"
            );

            return Some(DetectedSection {
                sheet,
                header_row: row_index,
                requirement: requirement_match,
                responses,
            });
        }

        None
    }

    fn first_match(&self, row: &[Option<String>], keywords: &KeywordSet) -> Option<ColumnMatch> {
        row.iter().enumerate().find_map(|(column, cell)| {
            let content = cell.as_deref()?;
            let keyword = self.matcher.find_match(content, keywords)?;
            Some(ColumnMatch {
                column,
                content: content.to_string(),
                keyword: keyword.to_string(),
            })
        })
    }
}
