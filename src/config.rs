use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::PixelError;
use crate::store::DEFAULT_ROOT;
use crate::template::MAX_DATASET_ROWS;

pub const DEFAULT_TEMPLATE_ROWS: u32 = 11;
pub const DEFAULT_WORKERS: usize = 2;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub root: Option<String>,
    #[serde(default)]
    pub debug: Option<bool>,
    #[serde(default)]
    pub template_rows: Option<u32>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub reference: ReferenceConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReferenceConfig {
    #[serde(default)]
    pub species: Vec<SpeciesEntry>,
    #[serde(default)]
    pub omics_unit_types: Vec<NamedEntry>,
    #[serde(default)]
    pub omics_areas: Vec<OmicsAreaEntry>,
    #[serde(default)]
    pub repositories: Vec<NamedEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SpeciesEntry {
    Shorthand(String),
    Detailed(SpeciesEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SpeciesEntryObject {
    pub name: String,
    #[serde(default)]
    pub strains: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum NamedEntry {
    Shorthand(String),
    Detailed(NamedEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct NamedEntryObject {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OmicsAreaEntry {
    Shorthand(String),
    Detailed(OmicsAreaEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OmicsAreaEntryObject {
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeciesRequest {
    pub name: String,
    pub strains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedRequest {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OmicsAreaRequest {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceData {
    pub species: Vec<SpeciesRequest>,
    pub omics_unit_types: Vec<NamedRequest>,
    pub omics_areas: Vec<OmicsAreaRequest>,
    pub repositories: Vec<NamedRequest>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub root: Utf8PathBuf,
    pub debug: bool,
    pub template_rows: u32,
    pub workers: usize,
    pub reference: ReferenceData,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, PixelError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("pixel.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| PixelError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| PixelError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, PixelError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(PixelError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let template_rows = config.template_rows.unwrap_or(DEFAULT_TEMPLATE_ROWS);
        if !(1..=MAX_DATASET_ROWS).contains(&template_rows) {
            return Err(PixelError::ConfigParse(format!(
                "template_rows must be between 1 and {MAX_DATASET_ROWS}"
            )));
        }

        let reference = config.reference;
        let species = reference
            .species
            .into_iter()
            .map(|entry| match entry {
                SpeciesEntry::Shorthand(name) => SpeciesRequest {
                    name,
                    strains: Vec::new(),
                },
                SpeciesEntry::Detailed(obj) => SpeciesRequest {
                    name: obj.name,
                    strains: obj.strains,
                },
            })
            .collect();

        let omics_areas = reference
            .omics_areas
            .into_iter()
            .map(|entry| match entry {
                OmicsAreaEntry::Shorthand(name) => OmicsAreaRequest { name, parent: None },
                OmicsAreaEntry::Detailed(obj) => OmicsAreaRequest {
                    name: obj.name,
                    parent: obj.parent,
                },
            })
            .collect();

        Ok(ResolvedConfig {
            schema_version,
            root: Utf8PathBuf::from(config.root.unwrap_or_else(|| DEFAULT_ROOT.to_string())),
            debug: config.debug.unwrap_or(false),
            template_rows,
            workers: config.workers.unwrap_or(DEFAULT_WORKERS).max(1),
            reference: ReferenceData {
                species,
                omics_unit_types: resolve_named(reference.omics_unit_types),
                omics_areas,
                repositories: resolve_named(reference.repositories),
            },
        })
    }
}

fn resolve_named(entries: Vec<NamedEntry>) -> Vec<NamedRequest> {
    entries
        .into_iter()
        .map(|entry| match entry {
            NamedEntry::Shorthand(name) => NamedRequest {
                name,
                description: String::new(),
            },
            NamedEntry::Detailed(obj) => NamedRequest {
                name: obj.name,
                description: obj.description.unwrap_or_default(),
            },
        })
        .collect()
}
