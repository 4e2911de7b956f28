use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::cgd::{ChrFeatureParser, EntriesSummary};
use crate::config::ResolvedConfig;
use crate::db::Database;
use crate::domain::{DataSource, PixelSetId, ProcessId};
use crate::error::PixelError;
use crate::executor::Executor;
use crate::export::{export_pixels, export_pixelsets};
use crate::fixtures::{FixtureOptions, FixtureSummary, make_development_fixtures};
use crate::import::ImportSink;
use crate::store::Store;
use crate::template::META_FILENAME;
use crate::workflow::{
    ProcessStatus, SubmissionFlow, SubmissionProcess, SubmissionTags, TaskStatus, hide_traceback,
};

#[derive(Debug, Clone, Serialize)]
pub struct SeedResult {
    pub species: usize,
    pub strains: usize,
    pub omics_unit_types: usize,
    pub omics_areas: usize,
    pub repositories: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntriesResult {
    pub file: String,
    pub database: String,
    #[serde(flatten)]
    pub summary: EntriesSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub id: String,
    pub label: String,
    pub owner: String,
    pub status: ProcessStatus,
    pub current_step: Option<String>,
    pub downloaded: bool,
    pub uploaded: bool,
    pub validated: bool,
    pub imported: bool,
    pub has_failed: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskView {
    pub step: String,
    pub status: TaskStatus,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessDetail {
    #[serde(flatten)]
    pub summary: ProcessSummary,
    pub archive: Option<String>,
    pub template_checksum: String,
    pub template_version: String,
    pub experiment_tags: String,
    pub analysis_tags: String,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessListResult {
    pub processes: Vec<ProcessSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TemplateResult {
    pub process: ProcessSummary,
    pub path: String,
    pub checksum: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub path: String,
    pub pixel_sets: Vec<String>,
}

/// Reference entry sources accepted by `entries load`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntriesDatabase {
    Cgd,
}

impl FromStr for EntriesDatabase {
    type Err = PixelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "cgd" => Ok(EntriesDatabase::Cgd),
            other => Err(PixelError::EntriesParse(format!(
                "unsupported database {other}"
            ))),
        }
    }
}

pub struct App {
    config: ResolvedConfig,
    store: Store,
    db: Arc<Database>,
    flow: SubmissionFlow,
}

impl App {
    pub fn open(
        config: ResolvedConfig,
        executor: Arc<dyn Executor>,
        sink: Arc<dyn ImportSink>,
    ) -> Result<Self, PixelError> {
        let store = Store::new_with_root(config.root.clone());
        store.ensure_root()?;
        let db = Arc::new(Database::open(&store.database_path())?);
        let flow = SubmissionFlow::new(
            Arc::clone(&db),
            store.clone(),
            executor,
            sink,
            config.template_rows,
        );
        Ok(Self {
            config,
            store,
            db,
            flow,
        })
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn flow(&self) -> &SubmissionFlow {
        &self.flow
    }

    /// Loads the configured reference data, plus the repositories the data
    /// sources point to.
    pub fn seed_reference(&self) -> Result<SeedResult, PixelError> {
        let reference = &self.config.reference;
        let result = self.db.transaction(|tables| {
            for request in &reference.species {
                let species = tables.get_or_create_species(&request.name);
                for strain in &request.strains {
                    tables.get_or_create_strain(strain, species.id);
                }
            }
            for request in &reference.omics_unit_types {
                let unit_type = tables.get_or_create_omics_unit_type(&request.name);
                if !request.description.is_empty()
                    && let Some(record) = tables
                        .omics_unit_types
                        .iter_mut()
                        .find(|item| item.id == unit_type.id)
                {
                    record.description = request.description.clone();
                }
            }
            for request in &reference.omics_areas {
                let parent = match &request.parent {
                    Some(parent) => Some(tables.get_or_create_omics_area(parent, None)?.id),
                    None => None,
                };
                tables.get_or_create_omics_area(&request.name, parent)?;
            }
            let repositories = reference
                .repositories
                .iter()
                .map(|request| request.name.as_str())
                .chain(
                    [DataSource::Published, DataSource::Unpublished]
                        .into_iter()
                        .map(|source| source.repository_name()),
                );
            for name in repositories {
                tables.get_or_create_repository(name);
            }

            Ok(SeedResult {
                species: tables.species.len(),
                strains: tables.strains.len(),
                omics_unit_types: tables.omics_unit_types.len(),
                omics_areas: tables.omics_areas.len(),
                repositories: tables.repositories.len(),
            })
        })?;
        info!("reference data seeded");
        Ok(result)
    }

    pub fn load_entries(
        &self,
        path: &Path,
        database: EntriesDatabase,
        ignore_aliases: bool,
    ) -> Result<EntriesResult, PixelError> {
        let summary = match database {
            EntriesDatabase::Cgd => {
                let mut parser = ChrFeatureParser::new(path);
                parser.parse()?;
                parser.save(&self.db, ignore_aliases)?
            }
        };
        Ok(EntriesResult {
            file: path.display().to_string(),
            database: "CGD".to_string(),
            summary,
        })
    }

    pub fn start_submission(&self, label: &str, user: &str) -> Result<ProcessSummary, PixelError> {
        let process = self.flow.start(label, user)?;
        Ok(self.summary(&process))
    }

    pub fn download_template(
        &self,
        id: ProcessId,
        out: Option<&Utf8Path>,
    ) -> Result<TemplateResult, PixelError> {
        let dir = match out {
            Some(dir) => dir.to_path_buf(),
            None => self.store.templates_dir().join(id.to_string()),
        };
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| PixelError::Filesystem(err.to_string()))?;
        let (process, template) = self.flow.submit_download(id, &dir)?;
        Ok(TemplateResult {
            process: self.summary(&process),
            path: dir.join(META_FILENAME).to_string(),
            checksum: template.checksum,
            version: template.version,
        })
    }

    pub fn upload_archive(&self, id: ProcessId, archive: &Path) -> Result<ProcessDetail, PixelError> {
        let process = self.flow.submit_upload(id, archive)?;
        Ok(self.detail(&process))
    }

    /// Records the validation decision; an accepted submission is imported
    /// before this returns.
    pub fn validate(
        &self,
        id: ProcessId,
        validated: bool,
        experiment_tags: &str,
        analysis_tags: &str,
    ) -> Result<ProcessDetail, PixelError> {
        self.flow.submit_validation(
            id,
            validated,
            SubmissionTags {
                experiment: experiment_tags.to_string(),
                analysis: analysis_tags.to_string(),
            },
        )?;
        self.flow.wait_imports();
        let process = self.flow.process(id)?;
        Ok(self.detail(&process))
    }

    pub fn finish(&self, id: ProcessId) -> Result<ProcessSummary, PixelError> {
        let process = self.flow.finish_current(id)?;
        Ok(self.summary(&process))
    }

    pub fn status(&self, id: ProcessId) -> Result<ProcessDetail, PixelError> {
        let process = self.flow.process(id)?;
        Ok(self.detail(&process))
    }

    pub fn list(&self) -> Result<ProcessListResult, PixelError> {
        let processes = self.flow.processes()?;
        Ok(ProcessListResult {
            processes: processes
                .iter()
                .map(|process| self.summary(process))
                .collect(),
        })
    }

    pub fn export_pixelsets(
        &self,
        ids: &[PixelSetId],
        out: &Utf8Path,
    ) -> Result<ExportResult, PixelError> {
        let bytes = export_pixelsets(&self.db, ids)?;
        Store::write_bytes_atomic(out, &bytes)?;
        Ok(ExportResult {
            path: out.to_string(),
            pixel_sets: ids.iter().map(|id| id.to_string()).collect(),
        })
    }

    pub fn export_pixels(
        &self,
        id: PixelSetId,
        omics_units: &[String],
        out: &Utf8Path,
    ) -> Result<ExportResult, PixelError> {
        let mut content = Vec::new();
        export_pixels(&self.db, id, omics_units, &mut content)?;
        Store::write_bytes_atomic(out, &content)?;
        Ok(ExportResult {
            path: out.to_string(),
            pixel_sets: vec![id.to_string()],
        })
    }

    pub fn fixtures(&self, options: FixtureOptions) -> Result<FixtureSummary, PixelError> {
        make_development_fixtures(&self.db, self.config.debug, options)
    }

    fn summary(&self, process: &SubmissionProcess) -> ProcessSummary {
        let owner = self
            .db
            .read(|tables| tables.pixeler(process.owner).map(|p| p.username.clone()))
            .unwrap_or_else(|| process.owner.to_string());
        ProcessSummary {
            id: process.id.to_string(),
            label: process.label.clone(),
            owner,
            status: process.status,
            current_step: process.current_step().map(|step| step.to_string()),
            downloaded: process.downloaded,
            uploaded: process.uploaded,
            validated: process.validated,
            imported: process.imported,
            has_failed: process.has_failed(),
            created_at: process.created_at,
            finished_at: process.finished_at,
        }
    }

    fn detail(&self, process: &SubmissionProcess) -> ProcessDetail {
        ProcessDetail {
            summary: self.summary(process),
            archive: process.archive.as_ref().map(Utf8PathBuf::to_string),
            template_checksum: process.template_checksum.clone(),
            template_version: process.template_version.clone(),
            experiment_tags: process.tags.experiment.clone(),
            analysis_tags: process.tags.analysis.clone(),
            tasks: process
                .visible_tasks()
                .map(|task| TaskView {
                    step: task.step.to_string(),
                    status: task.status,
                    comment: task.comment.as_deref().map(hide_traceback),
                    created_at: task.created_at,
                    finished_at: task.finished_at,
                })
                .collect(),
        }
    }
}
