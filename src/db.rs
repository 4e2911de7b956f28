use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
    Analysis, AnalysisId, Entry, EntryId, Experiment, ExperimentId, OmicsArea, OmicsAreaId,
    OmicsUnit, OmicsUnitId, OmicsUnitStatus, OmicsUnitType, OmicsUnitTypeId, Pixel, PixelSet,
    PixelSetId, Pixeler, PixelerId, Repository, RepositoryId, Species, SpeciesId, Strain,
    StrainId, Tag, TagId,
};
use crate::error::PixelError;
use crate::store::Store;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub species: Vec<Species>,
    #[serde(default)]
    pub strains: Vec<Strain>,
    #[serde(default)]
    pub omics_unit_types: Vec<OmicsUnitType>,
    #[serde(default)]
    pub omics_areas: Vec<OmicsArea>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub entries: Vec<Entry>,
    #[serde(default)]
    pub omics_units: Vec<OmicsUnit>,
    #[serde(default)]
    pub pixelers: Vec<Pixeler>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
    #[serde(default)]
    pub analyses: Vec<Analysis>,
    #[serde(default)]
    pub pixel_sets: Vec<PixelSet>,
    #[serde(default)]
    pub pixels: Vec<Pixel>,
}

/// Natural key of an experiment.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentKey<'a> {
    pub description: &'a str,
    pub omics_area: OmicsAreaId,
    pub completed_at: NaiveDate,
    pub released_at: NaiveDate,
}

/// Natural key of an analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisKey<'a> {
    pub description: &'a str,
    pub experiment: ExperimentId,
    pub pixeler: PixelerId,
    pub completed_at: NaiveDate,
}

impl Tables {
    pub fn get_or_create_species(&mut self, name: &str) -> Species {
        if let Some(found) = self.species.iter().find(|item| item.name == name) {
            return found.clone();
        }
        let species = Species {
            id: SpeciesId::new(),
            name: name.to_string(),
            description: String::new(),
        };
        self.species.push(species.clone());
        species
    }

    pub fn get_or_create_strain(&mut self, name: &str, species: SpeciesId) -> Strain {
        if let Some(found) = self
            .strains
            .iter()
            .find(|item| item.name == name && item.species == species)
        {
            return found.clone();
        }
        let strain = Strain {
            id: StrainId::new(),
            name: name.to_string(),
            species,
            description: String::new(),
        };
        self.strains.push(strain.clone());
        strain
    }

    pub fn get_or_create_omics_unit_type(&mut self, name: &str) -> OmicsUnitType {
        if let Some(found) = self.omics_unit_types.iter().find(|item| item.name == name) {
            return found.clone();
        }
        let unit_type = OmicsUnitType {
            id: OmicsUnitTypeId::new(),
            name: name.to_string(),
            description: String::new(),
        };
        self.omics_unit_types.push(unit_type.clone());
        unit_type
    }

    pub fn get_or_create_omics_area(
        &mut self,
        name: &str,
        parent: Option<OmicsAreaId>,
    ) -> Result<OmicsArea, PixelError> {
        if let Some(found) = self.omics_areas.iter().find(|item| item.name == name) {
            return Ok(found.clone());
        }
        let level = match parent {
            Some(parent) => {
                self.omics_areas
                    .iter()
                    .find(|item| item.id == parent)
                    .ok_or_else(|| PixelError::RecordNotFound(format!("omics area {parent}")))?
                    .level
                    + 1
            }
            None => 0,
        };
        let area = OmicsArea {
            id: OmicsAreaId::new(),
            name: name.to_string(),
            parent,
            level,
        };
        self.omics_areas.push(area.clone());
        Ok(area)
    }

    pub fn get_or_create_tag(&mut self, name: &str, parent: Option<TagId>) -> Tag {
        if let Some(found) = self
            .tags
            .iter()
            .find(|item| item.name == name && item.parent == parent)
        {
            return found.clone();
        }
        let tag = Tag {
            id: TagId::new(),
            name: name.to_string(),
            parent,
        };
        self.tags.push(tag.clone());
        tag
    }

    /// Resolves a `/` separated tag path, creating missing ancestors.
    pub fn get_or_create_tag_path(&mut self, path: &str) -> Option<Tag> {
        let mut parent = None;
        let mut last = None;
        for segment in path.split('/').map(str::trim).filter(|s| !s.is_empty()) {
            let tag = self.get_or_create_tag(segment, parent);
            parent = Some(tag.id);
            last = Some(tag);
        }
        last
    }

    pub fn get_or_create_repository(&mut self, name: &str) -> Repository {
        if let Some(found) = self.repositories.iter().find(|item| item.name == name) {
            return found.clone();
        }
        let repository = Repository {
            id: RepositoryId::new(),
            name: name.to_string(),
            url: String::new(),
        };
        self.repositories.push(repository.clone());
        repository
    }

    pub fn get_or_create_entry(&mut self, identifier: &str, repository: RepositoryId) -> Entry {
        if let Some(found) = self
            .entries
            .iter()
            .find(|item| item.identifier == identifier && item.repository == repository)
        {
            return found.clone();
        }
        let entry = Entry {
            id: EntryId::new(),
            identifier: identifier.to_string(),
            description: String::new(),
            url: String::new(),
            repository,
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn get_or_create_pixeler(&mut self, username: &str) -> Pixeler {
        if let Some(found) = self.pixelers.iter().find(|item| item.username == username) {
            return found.clone();
        }
        let pixeler = Pixeler {
            id: PixelerId::new(),
            username: username.to_string(),
        };
        self.pixelers.push(pixeler.clone());
        pixeler
    }

    pub fn get_or_create_experiment(&mut self, key: &ExperimentKey<'_>) -> (Experiment, bool) {
        if let Some(found) = self.experiments.iter().find(|item| {
            item.description == key.description
                && item.omics_area == key.omics_area
                && item.completed_at == key.completed_at
                && item.released_at == key.released_at
        }) {
            return (found.clone(), false);
        }
        let experiment = Experiment {
            id: ExperimentId::new(),
            description: key.description.to_string(),
            omics_area: key.omics_area,
            completed_at: key.completed_at,
            released_at: key.released_at,
            entries: Vec::new(),
            tags: Vec::new(),
            created_at: Utc::now(),
        };
        self.experiments.push(experiment.clone());
        (experiment, true)
    }

    pub fn get_or_create_analysis(&mut self, key: &AnalysisKey<'_>) -> (Analysis, bool) {
        if let Some(found) = self.analyses.iter().find(|item| {
            item.description == key.description
                && item.experiments.contains(&key.experiment)
                && item.pixeler == key.pixeler
                && item.completed_at == key.completed_at
        }) {
            return (found.clone(), false);
        }
        let analysis = Analysis {
            id: AnalysisId::new(),
            description: key.description.to_string(),
            pixeler: key.pixeler,
            completed_at: key.completed_at,
            experiments: vec![key.experiment],
            secondary_data: Utf8PathBuf::new(),
            notebook: None,
            tags: Vec::new(),
            created_at: Utc::now(),
        };
        self.analyses.push(analysis.clone());
        (analysis, true)
    }

    pub fn get_or_create_omics_unit(
        &mut self,
        reference: EntryId,
        strain: StrainId,
        unit_type: OmicsUnitTypeId,
    ) -> OmicsUnit {
        if let Some(found) = self.omics_units.iter().find(|item| {
            item.reference == reference && item.strain == strain && item.unit_type == unit_type
        }) {
            return found.clone();
        }
        let unit = OmicsUnit {
            id: OmicsUnitId::new(),
            reference,
            strain,
            unit_type,
            status: OmicsUnitStatus::default(),
        };
        self.omics_units.push(unit.clone());
        unit
    }

    pub fn experiment_mut(&mut self, id: ExperimentId) -> Result<&mut Experiment, PixelError> {
        self.experiments
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| PixelError::RecordNotFound(format!("experiment {id}")))
    }

    pub fn analysis_mut(&mut self, id: AnalysisId) -> Result<&mut Analysis, PixelError> {
        self.analyses
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| PixelError::RecordNotFound(format!("analysis {id}")))
    }

    pub fn experiment(&self, id: ExperimentId) -> Option<&Experiment> {
        self.experiments.iter().find(|item| item.id == id)
    }

    pub fn analysis(&self, id: AnalysisId) -> Option<&Analysis> {
        self.analyses.iter().find(|item| item.id == id)
    }

    pub fn pixel_set(&self, id: PixelSetId) -> Option<&PixelSet> {
        self.pixel_sets.iter().find(|item| item.id == id)
    }

    pub fn species_by_id(&self, id: SpeciesId) -> Option<&Species> {
        self.species.iter().find(|item| item.id == id)
    }

    pub fn strain(&self, id: StrainId) -> Option<&Strain> {
        self.strains.iter().find(|item| item.id == id)
    }

    pub fn omics_unit_type(&self, id: OmicsUnitTypeId) -> Option<&OmicsUnitType> {
        self.omics_unit_types.iter().find(|item| item.id == id)
    }

    pub fn omics_area(&self, id: OmicsAreaId) -> Option<&OmicsArea> {
        self.omics_areas.iter().find(|item| item.id == id)
    }

    pub fn repository(&self, id: RepositoryId) -> Option<&Repository> {
        self.repositories.iter().find(|item| item.id == id)
    }

    pub fn pixeler(&self, id: PixelerId) -> Option<&Pixeler> {
        self.pixelers.iter().find(|item| item.id == id)
    }

    /// Omics areas in tree order: each parent followed by its children, siblings by name.
    pub fn omics_areas_tree(&self) -> Vec<&OmicsArea> {
        fn visit<'a>(
            areas: &'a [OmicsArea],
            parent: Option<OmicsAreaId>,
            out: &mut Vec<&'a OmicsArea>,
        ) {
            let mut children: Vec<&OmicsArea> =
                areas.iter().filter(|area| area.parent == parent).collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            for child in children {
                out.push(child);
                visit(areas, Some(child.id), out);
            }
        }
        let mut out = Vec::with_capacity(self.omics_areas.len());
        visit(&self.omics_areas, None, &mut out);
        out
    }

    /// Identifier -> entry for every known entry; the first repository wins on clashes.
    pub fn entries_by_identifier(&self) -> HashMap<&str, &Entry> {
        let mut map = HashMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            map.entry(entry.identifier.as_str()).or_insert(entry);
        }
        map
    }

    pub fn reference_identifier(&self, unit: OmicsUnitId) -> Option<&str> {
        let unit = self.omics_units.iter().find(|item| item.id == unit)?;
        self.entries
            .iter()
            .find(|entry| entry.id == unit.reference)
            .map(|entry| entry.identifier.as_str())
    }
}

#[derive(Debug)]
pub struct Database {
    path: Option<Utf8PathBuf>,
    tables: Mutex<Tables>,
}

impl Database {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn open(path: &Utf8Path) -> Result<Self, PixelError> {
        let tables = if path.as_std_path().exists() {
            Store::read_json(path)?
        } else {
            Tables::default()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            tables: Mutex::new(tables),
        })
    }

    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> T {
        let guard = self.lock();
        f(&guard)
    }

    /// Runs `f` on a working copy of the tables under the lock. The copy
    /// replaces the tables only once `f` succeeded and was persisted, so an
    /// error or a panic inside `f` leaves them untouched.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&mut Tables) -> Result<T, PixelError>,
    ) -> Result<T, PixelError> {
        let mut guard = self.lock();
        let mut working = guard.clone();
        match f(&mut working) {
            Ok(value) => {
                self.persist(&working)?;
                *guard = working;
                Ok(value)
            }
            Err(err) => {
                debug!("rolling back transaction: {err}");
                Err(err)
            }
        }
    }

    fn persist(&self, tables: &Tables) -> Result<(), PixelError> {
        match &self.path {
            Some(path) => Store::write_json(path, tables),
            None => Ok(()),
        }
    }
}
