use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::db::Database;
use crate::domain::{Entry, EntryId};
use crate::error::PixelError;

pub const CGD_REPOSITORY: &str = "CGD";
pub const CGD_LOCUS_URL: &str = "http://www.candidagenome.org/cgi-bin/locus.pl?dbid=";
const SKIPPED_LINES: usize = 8;
const COLUMNS: usize = 18;

/// One row of a CGD chromosomal features table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChrFeature {
    pub name: String,
    pub locus: String,
    pub aliases: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    pub chromosome: String,
    pub start: String,
    pub stop: String,
    pub strand: String,
    pub cgdid: String,
    pub cgdid_2: String,
    pub description: String,
    pub created: String,
    pub crd_versionned: String,
    pub blank_1: String,
    pub blank_2: String,
    pub reserved: String,
    pub is_standard: String,
    pub orthologs: String,
}

impl ChrFeature {
    pub fn url(&self) -> String {
        format!("{CGD_LOCUS_URL}{}", self.cgdid)
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.aliases
            .split('|')
            .map(str::trim)
            .filter(|alias| !alias.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntriesSummary {
    pub created: usize,
    pub updated: usize,
}

pub struct ChrFeatureParser {
    path: PathBuf,
    features: Option<Vec<ChrFeature>>,
}

impl ChrFeatureParser {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            features: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn features(&self) -> Option<&[ChrFeature]> {
        self.features.as_deref()
    }

    pub fn parse(&mut self) -> Result<&[ChrFeature], PixelError> {
        let content = fs::read_to_string(&self.path)
            .map_err(|err| PixelError::EntriesParse(format!("{}: {err}", self.path.display())))?;
        let features = parse_features(&content)?;
        debug!("parsed {} features from {}", features.len(), self.path.display());
        Ok(self.features.insert(features))
    }

    pub fn save(&self, db: &Database, ignore_aliases: bool) -> Result<EntriesSummary, PixelError> {
        let features = self
            .features
            .as_ref()
            .ok_or_else(|| PixelError::EntriesParse("features were not parsed".to_string()))?;

        let summary = db.transaction(|tables| {
            let repository = tables.get_or_create_repository(CGD_REPOSITORY);
            let mut summary = EntriesSummary::default();
            for feature in features {
                let url = feature.url();
                let aliases: Vec<&str> = if ignore_aliases {
                    Vec::new()
                } else {
                    feature.aliases().collect()
                };
                for identifier in std::iter::once(feature.name.as_str()).chain(aliases) {
                    match tables.entries.iter_mut().find(|entry| {
                        entry.identifier == identifier && entry.repository == repository.id
                    }) {
                        Some(entry) => {
                            entry.description = feature.description.clone();
                            entry.url = url.clone();
                            summary.updated += 1;
                        }
                        None => {
                            tables.entries.push(Entry {
                                id: EntryId::new(),
                                identifier: identifier.to_string(),
                                description: feature.description.clone(),
                                url: url.clone(),
                                repository: repository.id,
                            });
                            summary.created += 1;
                        }
                    }
                }
            }
            Ok(summary)
        })?;

        info!(
            "loaded {} entries ({} created, {} updated)",
            summary.created + summary.updated,
            summary.created,
            summary.updated
        );
        Ok(summary)
    }
}

pub fn parse_features(content: &str) -> Result<Vec<ChrFeature>, PixelError> {
    let body: String = content
        .lines()
        .skip(SKIPPED_LINES)
        .filter(|line| !line.trim().is_empty())
        .map(|line| format!("{line}\n"))
        .collect();

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_reader(body.as_bytes());

    let mut features = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let line = index + SKIPPED_LINES + 1;
        let mut record =
            record.map_err(|err| PixelError::EntriesParse(format!("line {line}: {err}")))?;
        if record.len() > COLUMNS {
            return Err(PixelError::EntriesParse(format!(
                "line {line}: expected {COLUMNS} columns, found {}",
                record.len()
            )));
        }
        while record.len() < COLUMNS {
            record.push_field("");
        }
        let feature: ChrFeature = record
            .deserialize(None)
            .map_err(|err| PixelError::EntriesParse(format!("line {line}: {err}")))?;
        if feature.name.is_empty() {
            return Err(PixelError::EntriesParse(format!(
                "line {line}: feature name is required"
            )));
        }
        features.push(feature);
    }
    Ok(features)
}
