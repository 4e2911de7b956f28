use std::fmt;
use std::str::FromStr;

use camino::Utf8PathBuf;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PixelError;

macro_rules! record_id {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(Uuid);

            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                pub fn as_uuid(&self) -> &Uuid {
                    &self.0
                }

                pub fn short(&self) -> String {
                    self.0.to_string()[..7].to_string()
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }

            impl FromStr for $name {
                type Err = PixelError;

                fn from_str(value: &str) -> Result<Self, Self::Err> {
                    Uuid::parse_str(value.trim())
                        .map(Self)
                        .map_err(|_| PixelError::InvalidId(value.to_string()))
                }
            }
        )+
    };
}

record_id!(
    SpeciesId,
    StrainId,
    OmicsUnitTypeId,
    OmicsAreaId,
    TagId,
    RepositoryId,
    EntryId,
    OmicsUnitId,
    PixelerId,
    ExperimentId,
    AnalysisId,
    PixelSetId,
    PixelId,
    ProcessId,
);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Species {
    pub id: SpeciesId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strain {
    pub id: StrainId,
    pub name: String,
    pub species: SpeciesId,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmicsUnitType {
    pub id: OmicsUnitTypeId,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmicsArea {
    pub id: OmicsAreaId,
    pub name: String,
    pub parent: Option<OmicsAreaId>,
    pub level: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub name: String,
    pub parent: Option<TagId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepositoryId,
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub identifier: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    pub repository: RepositoryId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OmicsUnitStatus {
    #[default]
    Dubious,
    Exists,
    Invalid,
    Validated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OmicsUnit {
    pub id: OmicsUnitId,
    pub reference: EntryId,
    pub strain: StrainId,
    #[serde(rename = "type")]
    pub unit_type: OmicsUnitTypeId,
    #[serde(default)]
    pub status: OmicsUnitStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pixeler {
    pub id: PixelerId,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: ExperimentId,
    pub description: String,
    pub omics_area: OmicsAreaId,
    pub completed_at: NaiveDate,
    pub released_at: NaiveDate,
    #[serde(default)]
    pub entries: Vec<EntryId>,
    #[serde(default)]
    pub tags: Vec<TagId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub id: AnalysisId,
    pub description: String,
    pub pixeler: PixelerId,
    pub completed_at: NaiveDate,
    #[serde(default)]
    pub experiments: Vec<ExperimentId>,
    pub secondary_data: Utf8PathBuf,
    pub notebook: Option<Utf8PathBuf>,
    #[serde(default)]
    pub tags: Vec<TagId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PixelSet {
    pub id: PixelSetId,
    pub description: String,
    pub analysis: AnalysisId,
    pub pixels_file: Utf8PathBuf,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pixel {
    pub id: PixelId,
    pub value: f64,
    pub quality_score: Option<f64>,
    pub omics_unit: OmicsUnitId,
    pub pixel_set: PixelSetId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Published,
    Unpublished,
}

impl DataSource {
    pub const CHOICES: [&'static str; 2] = ["Published", "Unpublished"];

    pub fn repository_name(self) -> &'static str {
        match self {
            DataSource::Published => "DOI",
            DataSource::Unpublished => "PARTNERS",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Published => write!(f, "Published"),
            DataSource::Unpublished => write!(f, "Unpublished"),
        }
    }
}

impl FromStr for DataSource {
    type Err = PixelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "published" => Ok(DataSource::Published),
            "unpublished" => Ok(DataSource::Unpublished),
            _ => Err(PixelError::MetaFileParsing(format!(
                "unknown data source: {value}"
            ))),
        }
    }
}

/// Dropdown label for an omics area: one em-dash per tree level.
pub fn omics_area_label(area: &OmicsArea) -> String {
    let prefix = "—".repeat(area.level as usize);
    if area.level > 0 {
        format!("{prefix} {}", area.name)
    } else {
        area.name.clone()
    }
}

pub fn strain_label(strain: &Strain, species: &Species) -> String {
    format!("{} ({})", strain.name, species.name)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_record_id_roundtrip() {
        let id = ExperimentId::new();
        let parsed: ExperimentId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.short().len(), 7);
    }

    #[test]
    fn parse_record_id_invalid() {
        let err = "not-a-uuid".parse::<PixelSetId>().unwrap_err();
        assert_matches!(err, PixelError::InvalidId(_));
    }

    #[test]
    fn data_source_repository() {
        let source: DataSource = " unpublished ".parse().unwrap();
        assert_eq!(source, DataSource::Unpublished);
        assert_eq!(source.repository_name(), "PARTNERS");
        assert_matches!(
            "Preprint".parse::<DataSource>(),
            Err(PixelError::MetaFileParsing(_))
        );
    }

    #[test]
    fn omics_area_labels_follow_depth() {
        let root = OmicsArea {
            id: OmicsAreaId::new(),
            name: "Proteomics".to_string(),
            parent: None,
            level: 0,
        };
        let child = OmicsArea {
            id: OmicsAreaId::new(),
            name: "Label free".to_string(),
            parent: Some(root.id),
            level: 2,
        };
        assert_eq!(omics_area_label(&root), "Proteomics");
        assert_eq!(omics_area_label(&child), "—— Label free");
    }
}
