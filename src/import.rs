use std::collections::{HashMap, HashSet};
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use tracing::{debug, info};

use crate::db::{AnalysisKey, Database, ExperimentKey, Tables};
use crate::domain::{
    Analysis, EntryId, Experiment, OmicsUnitId, Pixel, PixelId, PixelSet, PixelSetId, PixelerId,
    TagId,
};
use crate::error::PixelError;
use crate::meta::{DatasetMeta, ParsedMeta};
use crate::pixelset::{PixelRow, PixelSetParser};
use crate::store::{FileRole, Store};

/// Event emitted once an archive has been imported.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportationDone {
    pub experiment: Experiment,
    pub analysis: Analysis,
    pub pixel_sets: Vec<PixelSet>,
}

pub trait ImportSink: Send + Sync {
    fn importation_done(&self, event: &ImportationDone);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ImportSink for LogSink {
    fn importation_done(&self, event: &ImportationDone) {
        info!(
            "imported analysis {} with {} pixel sets",
            event.analysis.id.short(),
            event.pixel_sets.len()
        );
    }
}

/// Tag paths attached to the imported records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportTags {
    pub experiment: Vec<String>,
    pub analysis: Vec<String>,
}

pub struct Importer<'a> {
    db: &'a Database,
    store: &'a Store,
}

impl<'a> Importer<'a> {
    pub fn new(db: &'a Database, store: &'a Store) -> Self {
        Self { db, store }
    }

    pub fn save(
        &self,
        meta: &ParsedMeta,
        pixeler: PixelerId,
        tags: &ImportTags,
        sink: &dyn ImportSink,
    ) -> Result<ImportationDone, PixelError> {
        let event = self
            .db
            .transaction(|tables| self.save_in(tables, meta, pixeler, tags))?;
        sink.importation_done(&event);
        Ok(event)
    }

    fn save_in(
        &self,
        tables: &mut Tables,
        meta: &ParsedMeta,
        pixeler: PixelerId,
        tags: &ImportTags,
    ) -> Result<ImportationDone, PixelError> {
        if tables.pixeler(pixeler).is_none() {
            return Err(PixelError::RecordNotFound(format!("pixeler {pixeler}")));
        }

        let (experiment, created) = tables.get_or_create_experiment(&ExperimentKey {
            description: &meta.experiment.summary,
            omics_area: meta.experiment.omics_area.id,
            completed_at: meta.experiment.completion_date,
            released_at: meta.experiment.release_date,
        });
        debug!("experiment {} (created: {created})", experiment.id.short());

        let repository = tables.get_or_create_repository(&meta.experiment.repository);
        let entry = tables.get_or_create_entry(&meta.experiment.entry, repository.id);
        let experiment_tags = resolve_tags(tables, &tags.experiment);
        {
            let record = tables.experiment_mut(experiment.id)?;
            if !record.entries.contains(&entry.id) {
                record.entries.push(entry.id);
            }
            attach(&mut record.tags, &experiment_tags);
        }

        let (analysis, created) = tables.get_or_create_analysis(&AnalysisKey {
            description: &meta.analysis.description,
            experiment: experiment.id,
            pixeler,
            completed_at: meta.analysis.date,
        });
        debug!("analysis {} (created: {created})", analysis.id.short());

        let secondary_data = self.copy_analysis_file(
            &meta.analysis.secondary_data_path,
            pixeler,
            &analysis,
            FileRole::SecondaryData,
        )?;
        let notebook = meta
            .analysis
            .notebook_path
            .as_deref()
            .map(|path| self.copy_analysis_file(path, pixeler, &analysis, FileRole::Notebook))
            .transpose()?;
        let analysis_tags = resolve_tags(tables, &tags.analysis);
        {
            let record = tables.analysis_mut(analysis.id)?;
            record.secondary_data = secondary_data;
            record.notebook = notebook;
            if !record.experiments.contains(&experiment.id) {
                record.experiments.push(experiment.id);
            }
            attach(&mut record.tags, &analysis_tags);
        }

        let mut pixel_sets = Vec::with_capacity(meta.datasets.len());
        for dataset in &meta.datasets {
            pixel_sets.push(self.save_pixel_set(tables, dataset, pixeler, &analysis)?);
        }

        let experiment = tables
            .experiment(experiment.id)
            .cloned()
            .ok_or_else(|| PixelError::RecordNotFound(format!("experiment {}", experiment.id)))?;
        let analysis = tables
            .analysis(analysis.id)
            .cloned()
            .ok_or_else(|| PixelError::RecordNotFound(format!("analysis {}", analysis.id)))?;
        info!(
            "saved experiment {} / analysis {} with {} pixel sets",
            experiment.id.short(),
            analysis.id.short(),
            pixel_sets.len()
        );

        Ok(ImportationDone {
            experiment,
            analysis,
            pixel_sets,
        })
    }

    fn copy_analysis_file(
        &self,
        source: &Path,
        pixeler: PixelerId,
        analysis: &Analysis,
        role: FileRole,
    ) -> Result<Utf8PathBuf, PixelError> {
        let source = utf8(source)?;
        let dest = self.store.analysis_file_path(
            &pixeler,
            &analysis.id,
            role,
            file_name(source)?,
        );
        Store::copy_file_atomic(source, &dest)?;
        Ok(dest)
    }

    fn save_pixel_set(
        &self,
        tables: &mut Tables,
        dataset: &DatasetMeta,
        pixeler: PixelerId,
        analysis: &Analysis,
    ) -> Result<PixelSet, PixelError> {
        let mut parser = PixelSetParser::new(&dataset.path);
        parser.parse(false)?;
        let filtered = parser
            .filter(true, true)
            .ok_or_else(|| PixelError::PixelSetSave("dataset was not parsed".to_string()))?;

        let source = utf8(&dataset.path)?;
        let id = PixelSetId::new();
        let pixels_file =
            self.store
                .pixelset_file_path(&pixeler, &analysis.id, &id, file_name(source)?);
        Store::copy_file_atomic(source, &pixels_file)?;

        let pixel_set = PixelSet {
            id,
            description: dataset.comment.clone(),
            analysis: analysis.id,
            pixels_file,
            created_at: Utc::now(),
        };
        tables.pixel_sets.push(pixel_set.clone());

        let units = omics_units(tables, dataset, &filtered.clean)?;
        let mut created = 0usize;
        for row in &filtered.clean {
            let (Some(value), Some(unit)) = (row.value, units.get(row.identifier.as_str())) else {
                continue;
            };
            tables.pixels.push(Pixel {
                id: PixelId::new(),
                value,
                quality_score: row.quality_score,
                omics_unit: *unit,
                pixel_set: pixel_set.id,
            });
            created += 1;
        }
        debug!(
            "pixel set {}: {created} pixels, {} missing, {} ambiguous",
            pixel_set.id.short(),
            filtered.na.len(),
            filtered.fuzzy.len()
        );

        Ok(pixel_set)
    }
}

/// Identifier -> omics unit for every clean row. Units missing for the
/// dataset strain and type are created from existing entries.
fn omics_units(
    tables: &mut Tables,
    dataset: &DatasetMeta,
    rows: &[PixelRow],
) -> Result<HashMap<String, OmicsUnitId>, PixelError> {
    let strain = dataset.strain.id;
    let unit_type = dataset.omics_unit_type.id;

    let identifiers: HashMap<EntryId, &str> = tables
        .entries
        .iter()
        .map(|entry| (entry.id, entry.identifier.as_str()))
        .collect();
    let mut units: HashMap<String, OmicsUnitId> = tables
        .omics_units
        .iter()
        .filter(|unit| unit.strain == strain && unit.unit_type == unit_type)
        .filter_map(|unit| {
            identifiers
                .get(&unit.reference)
                .map(|identifier| (identifier.to_string(), unit.id))
        })
        .collect();

    let to_create: HashSet<&str> = rows
        .iter()
        .map(|row| row.identifier.as_str())
        .filter(|identifier| !units.contains_key(*identifier))
        .collect();
    let entries = tables.entries_by_identifier();
    let related: Vec<(String, EntryId)> = to_create
        .iter()
        .filter_map(|identifier| {
            entries
                .get(identifier)
                .map(|entry| (identifier.to_string(), entry.id))
        })
        .collect();
    if related.len() != to_create.len() {
        return Err(PixelError::PixelSetSave(format!(
            "Required entries partially exists ({} vs {}). Please load entries first with `pixel entries load`.",
            related.len(),
            to_create.len()
        )));
    }

    for (identifier, entry) in related {
        let unit = tables.get_or_create_omics_unit(entry, strain, unit_type);
        units.insert(identifier, unit.id);
    }
    Ok(units)
}

fn resolve_tags(tables: &mut Tables, paths: &[String]) -> Vec<TagId> {
    paths
        .iter()
        .filter_map(|path| tables.get_or_create_tag_path(path))
        .map(|tag| tag.id)
        .collect()
}

fn attach(tags: &mut Vec<TagId>, new: &[TagId]) {
    for tag in new {
        if !tags.contains(tag) {
            tags.push(*tag);
        }
    }
}

fn utf8(path: &Path) -> Result<&Utf8Path, PixelError> {
    Utf8Path::from_path(path)
        .ok_or_else(|| PixelError::Filesystem(format!("non-utf8 path {}", path.display())))
}

fn file_name(path: &Utf8Path) -> Result<&str, PixelError> {
    path.file_name()
        .ok_or_else(|| PixelError::Filesystem(format!("{path} has no file name")))
}
