use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::error::PixelError;

pub const VALUE_COLUMN: &str = "Value";
pub const QUALITY_SCORE_COLUMN: &str = "Quality_score";

/// Tokens read as a missing value.
pub const NA_VALUES: [&str; 19] = [
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

#[derive(Debug, Clone, PartialEq)]
pub struct PixelRow {
    pub identifier: String,
    pub value: Option<f64>,
    pub quality_score: Option<f64>,
    pub extra: Vec<Option<String>>,
}

impl PixelRow {
    pub fn has_missing(&self) -> bool {
        self.value.is_none()
            || self.quality_score.is_none()
            || self.extra.iter().any(Option::is_none)
    }

    pub fn is_fuzzy(&self) -> bool {
        self.identifier.contains(';')
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelTable {
    /// Data column names, index column excluded.
    pub columns: Vec<String>,
    pub rows: Vec<PixelRow>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PixelFilter {
    pub clean: Vec<PixelRow>,
    pub na: Vec<PixelRow>,
    pub fuzzy: Vec<PixelRow>,
}

#[derive(Debug)]
pub struct PixelSetParser {
    path: PathBuf,
    table: Option<Arc<PixelTable>>,
}

impl PixelSetParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table(&self) -> Option<&Arc<PixelTable>> {
        self.table.as_ref()
    }

    pub fn parse(&mut self, force: bool) -> Result<Arc<PixelTable>, PixelError> {
        if let Some(table) = &self.table
            && !force
        {
            debug!("{} already parsed, reusing table", self.path.display());
            return Ok(Arc::clone(table));
        }

        let content = fs::read_to_string(&self.path).map_err(|err| {
            PixelError::PixelSetParse(format!("{}: {err}", self.path.display()))
        })?;
        let table = Arc::new(parse_table(&content).map_err(|err| match err {
            PixelError::PixelSetParse(message) => {
                PixelError::PixelSetParse(format!("{}: {message}", self.path.display()))
            }
            other => other,
        })?);
        debug!(
            "parsed {} rows from {}",
            table.rows.len(),
            self.path.display()
        );
        self.table = Some(Arc::clone(&table));
        Ok(table)
    }

    pub fn filter(&self, na_filter: bool, fuzzy_filter: bool) -> Option<PixelFilter> {
        let table = self.table.as_ref()?;
        let na: Vec<PixelRow> = table
            .rows
            .iter()
            .filter(|row| row.has_missing())
            .cloned()
            .collect();
        let fuzzy: Vec<PixelRow> = table
            .rows
            .iter()
            .filter(|row| row.is_fuzzy())
            .cloned()
            .collect();
        let clean = table
            .rows
            .iter()
            .filter(|row| !(na_filter && row.has_missing()))
            .filter(|row| !(fuzzy_filter && row.is_fuzzy()))
            .cloned()
            .collect();
        Some(PixelFilter { clean, na, fuzzy })
    }
}

fn is_na(token: &str) -> bool {
    NA_VALUES.contains(&token)
}

fn parse_number(token: Option<&str>, column: &str, line: usize) -> Result<Option<f64>, PixelError> {
    match token {
        None => Ok(None),
        Some(token) if is_na(token) => Ok(None),
        Some(token) => token.parse::<f64>().map(Some).map_err(|_| {
            PixelError::PixelSetParse(format!(
                "line {line}: {column} is not a number ({token})"
            ))
        }),
    }
}

/// Parses whitespace-delimited text whose first column is the row identifier.
pub fn parse_table(content: &str) -> Result<PixelTable, PixelError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| !line.trim().is_empty());

    let Some((_, header)) = lines.next() else {
        return Err(PixelError::PixelSetParse("empty file".to_string()));
    };
    let header: Vec<&str> = header.split_whitespace().collect();
    let data: Vec<(usize, Vec<&str>)> = lines
        .map(|(number, line)| (number, line.split_whitespace().collect()))
        .collect();

    // The header names the index column unless data rows are one token wider.
    let columns: Vec<String> = match data.first() {
        Some((_, first)) if first.len() == header.len() + 1 => {
            header.iter().map(|name| name.to_string()).collect()
        }
        _ => header.iter().skip(1).map(|name| name.to_string()).collect(),
    };

    let value_index = columns
        .iter()
        .position(|name| name == VALUE_COLUMN)
        .ok_or_else(|| PixelError::PixelSetParse(format!("missing {VALUE_COLUMN} column")))?;
    let quality_index = columns
        .iter()
        .position(|name| name == QUALITY_SCORE_COLUMN)
        .ok_or_else(|| {
            PixelError::PixelSetParse(format!("missing {QUALITY_SCORE_COLUMN} column"))
        })?;

    let mut rows = Vec::with_capacity(data.len());
    for (number, tokens) in data {
        if tokens.len() > columns.len() + 1 {
            return Err(PixelError::PixelSetParse(format!(
                "line {number}: expected {} fields, found {}",
                columns.len() + 1,
                tokens.len()
            )));
        }
        let identifier = tokens[0].to_string();
        let cell = |index: usize| tokens.get(index + 1).copied();

        let value = parse_number(cell(value_index), VALUE_COLUMN, number)?;
        let quality_score = parse_number(cell(quality_index), QUALITY_SCORE_COLUMN, number)?;
        let extra = (0..columns.len())
            .filter(|index| *index != value_index && *index != quality_index)
            .map(|index| {
                cell(index)
                    .filter(|token| !is_na(token))
                    .map(str::to_string)
            })
            .collect();

        rows.push(PixelRow {
            identifier,
            value,
            quality_score,
            extra,
        });
    }

    Ok(PixelTable { columns, rows })
}
