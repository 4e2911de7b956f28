use std::collections::BTreeSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::archive::PixelArchive;
use crate::db::Database;
use crate::domain::{PixelerId, ProcessId};
use crate::error::PixelError;
use crate::executor::{Executor, JobHandle};
use crate::import::{ImportSink, ImportTags, ImportationDone};
use crate::meta::SerializedMeta;
use crate::store::Store;
use crate::template::{META_FILENAME, TemplateInfo, generate_template};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Start,
    Download,
    CheckDownload,
    Upload,
    CheckUpload,
    Meta,
    CheckMeta,
    Validation,
    CheckValidation,
    Import,
    CheckImport,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Start,
    Human,
    Gate,
    Handler,
    AsyncHandler,
    End,
}

impl Step {
    pub const ALL: [Step; 12] = [
        Step::Start,
        Step::Download,
        Step::CheckDownload,
        Step::Upload,
        Step::CheckUpload,
        Step::Meta,
        Step::CheckMeta,
        Step::Validation,
        Step::CheckValidation,
        Step::Import,
        Step::CheckImport,
        Step::End,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::Start => "start",
            Step::Download => "download",
            Step::CheckDownload => "check_download",
            Step::Upload => "upload",
            Step::CheckUpload => "check_upload",
            Step::Meta => "meta",
            Step::CheckMeta => "check_meta",
            Step::Validation => "validation",
            Step::CheckValidation => "check_validation",
            Step::Import => "import",
            Step::CheckImport => "check_import",
            Step::End => "end",
        }
    }

    pub fn kind(self) -> StepKind {
        match self {
            Step::Start => StepKind::Start,
            Step::Download | Step::Upload | Step::Validation => StepKind::Human,
            Step::CheckDownload
            | Step::CheckUpload
            | Step::CheckMeta
            | Step::CheckValidation
            | Step::CheckImport => StepKind::Gate,
            Step::Meta => StepKind::Handler,
            Step::Import => StepKind::AsyncHandler,
            Step::End => StepKind::End,
        }
    }

    /// Step following `self` given the current process flags.
    pub fn next(self, process: &SubmissionProcess) -> Option<Step> {
        let next = match self {
            Step::Start => Step::Download,
            Step::Download => Step::CheckDownload,
            Step::CheckDownload if process.downloaded => Step::Upload,
            Step::CheckDownload => Step::Download,
            Step::Upload => Step::CheckUpload,
            Step::CheckUpload if process.uploaded => Step::Meta,
            Step::CheckUpload => Step::Upload,
            Step::Meta => Step::CheckMeta,
            Step::CheckMeta if process.meta.is_some() => Step::Validation,
            Step::CheckMeta => Step::Upload,
            Step::Validation => Step::CheckValidation,
            Step::CheckValidation if process.validated => Step::Import,
            Step::CheckValidation => Step::Validation,
            Step::Import => Step::CheckImport,
            Step::CheckImport if process.imported => Step::End,
            Step::CheckImport => Step::Validation,
            Step::End => return None,
        };
        Some(next)
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = PixelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.name() == value)
            .ok_or_else(|| PixelError::InvalidId(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    New,
    Scheduled,
    Started,
    Done,
    Error,
}

impl TaskStatus {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TaskStatus::New | TaskStatus::Scheduled | TaskStatus::Started
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessStatus {
    New,
    Started,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub step: Step,
    pub status: TaskStatus,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    fn new(step: Step, status: TaskStatus) -> Self {
        let now = Utc::now();
        Self {
            step,
            status,
            comment: None,
            created_at: now,
            finished_at: (!status.is_active()).then_some(now),
        }
    }

    fn finish(&mut self, status: TaskStatus, comment: Option<String>) {
        self.status = status;
        self.comment = comment;
        self.finished_at = Some(Utc::now());
    }
}

/// Cleaned, comma-joined tag paths chosen at validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionTags {
    #[serde(default)]
    pub experiment: String,
    #[serde(default)]
    pub analysis: String,
}

impl SubmissionTags {
    pub fn new(experiment: &str, analysis: &str) -> Self {
        Self {
            experiment: clean_tags(experiment),
            analysis: clean_tags(analysis),
        }
    }

    pub fn to_import_tags(&self) -> ImportTags {
        let split = |tags: &str| {
            tags.split(',')
                .filter(|tag| !tag.is_empty())
                .map(str::to_string)
                .collect()
        };
        ImportTags {
            experiment: split(&self.experiment),
            analysis: split(&self.analysis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionProcess {
    pub id: ProcessId,
    pub label: String,
    pub owner: PixelerId,
    #[serde(default)]
    pub archive: Option<Utf8PathBuf>,
    #[serde(default)]
    pub template_checksum: String,
    #[serde(default)]
    pub template_version: String,
    #[serde(default)]
    pub meta: Option<SerializedMeta>,
    pub downloaded: bool,
    pub uploaded: bool,
    pub validated: bool,
    pub imported: bool,
    #[serde(default)]
    pub tags: SubmissionTags,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl SubmissionProcess {
    fn new(label: &str, owner: PixelerId) -> Self {
        Self {
            id: ProcessId::new(),
            label: label.to_string(),
            owner,
            archive: None,
            template_checksum: String::new(),
            template_version: String::new(),
            meta: None,
            downloaded: false,
            uploaded: false,
            validated: false,
            imported: false,
            tags: SubmissionTags::default(),
            status: ProcessStatus::New,
            created_at: Utc::now(),
            finished_at: None,
            tasks: Vec::new(),
        }
    }

    pub fn has_failed(&self) -> bool {
        self.tasks
            .iter()
            .any(|task| task.status == TaskStatus::Error)
    }

    pub fn is_done(&self) -> bool {
        self.status == ProcessStatus::Done
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.tasks.iter().rev().find(|task| task.status.is_active())
    }

    pub fn current_step(&self) -> Option<Step> {
        self.current_task().map(|task| task.step)
    }

    fn current_task_mut(&mut self, step: Step) -> Option<&mut Task> {
        self.tasks
            .iter_mut()
            .rev()
            .find(|task| task.step == step && task.status.is_active())
    }

    /// Tasks shown to users: start, end and gate steps are left out.
    pub fn visible_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks
            .iter()
            .filter(|task| !is_hidden_task(task.step.name()))
    }
}

/// Sorted, lowercased, deduplicated comma-separated tags.
pub fn clean_tags(tags: &str) -> String {
    tags.split(',')
        .map(|tag| tag.trim().to_lowercase())
        .filter(|tag| !tag.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(",")
}

pub fn is_hidden_task(name: &str) -> bool {
    static HIDDEN: OnceLock<Option<Regex>> = OnceLock::new();
    HIDDEN
        .get_or_init(|| Regex::new(r"^(start|end|check)").ok())
        .as_ref()
        .map(|regex| regex.is_match(name))
        .unwrap_or(false)
}

const TRACEBACK_MARKER: &str = "Traceback (most recent call last):";

/// Lines of `comment` before a traceback block, or `comment` unchanged.
pub fn hide_traceback(comment: &str) -> String {
    let lines: Vec<&str> = comment.split('\n').collect();
    match lines.iter().position(|line| *line == TRACEBACK_MARKER) {
        Some(index) => lines[..index].join("\n"),
        None => comment.to_string(),
    }
}

struct FlowInner {
    db: Arc<Database>,
    store: Store,
    executor: Arc<dyn Executor>,
    sink: Arc<dyn ImportSink>,
    template_rows: u32,
    lock: Mutex<()>,
    pending: Mutex<Vec<JobHandle>>,
}

/// Submission workflow engine. Process state lives in one JSON file per
/// process; transitions are serialized by the flow lock.
#[derive(Clone)]
pub struct SubmissionFlow {
    inner: Arc<FlowInner>,
}

impl SubmissionFlow {
    pub fn new(
        db: Arc<Database>,
        store: Store,
        executor: Arc<dyn Executor>,
        sink: Arc<dyn ImportSink>,
        template_rows: u32,
    ) -> Self {
        Self {
            inner: Arc::new(FlowInner {
                db,
                store,
                executor,
                sink,
                template_rows,
                lock: Mutex::new(()),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn start(&self, label: &str, owner: &str) -> Result<SubmissionProcess, PixelError> {
        let pixeler = self
            .inner
            .db
            .transaction(|tables| Ok(tables.get_or_create_pixeler(owner)))?;

        let _guard = self.inner.lock();
        let mut process = SubmissionProcess::new(label, pixeler.id);
        process.status = ProcessStatus::Started;
        process.tasks.push(Task::new(Step::Start, TaskStatus::Done));
        self.inner.advance(&mut process, Step::Start)?;
        self.inner.save(&process)?;
        info!("started submission {} for {owner}", process.id.short());
        Ok(process)
    }

    /// Writes the template into `dir` and completes the download step.
    pub fn submit_download(
        &self,
        id: ProcessId,
        dir: &Utf8Path,
    ) -> Result<(SubmissionProcess, TemplateInfo), PixelError> {
        let _guard = self.inner.lock();
        let mut process = self.inner.load(id)?;
        expect_step(&process, Step::Download, "download template")?;

        let path = dir.join(META_FILENAME);
        let template = generate_template(&self.inner.db, &path, self.inner.template_rows)?;
        process.template_checksum = template.checksum.clone();
        process.template_version = template.version.clone();
        process.downloaded = true;
        self.inner.complete(&mut process, Step::Download)?;
        self.inner.save(&process)?;
        info!("submission {}: template written to {path}", process.id.short());
        Ok((process, template))
    }

    pub fn submit_upload(
        &self,
        id: ProcessId,
        archive: &Path,
    ) -> Result<SubmissionProcess, PixelError> {
        if !archive.exists() {
            return Err(PixelError::ArchiveNotFound(archive.to_path_buf()));
        }
        let source = Utf8Path::from_path(archive).ok_or_else(|| {
            PixelError::Filesystem(format!("non-utf8 path {}", archive.display()))
        })?;
        let file_name = source
            .file_name()
            .ok_or_else(|| PixelError::Filesystem(format!("{source} has no file name")))?;

        let _guard = self.inner.lock();
        let mut process = self.inner.load(id)?;
        expect_step(&process, Step::Upload, "upload archive")?;

        let dest = self.inner.store.submission_archive_path(
            &process.owner,
            &process.id.to_string(),
            file_name,
        );
        Store::copy_file_atomic(source, &dest)?;
        process.archive = Some(dest);
        process.uploaded = true;
        process.meta = None;
        self.inner.complete(&mut process, Step::Upload)?;
        self.inner.save(&process)?;
        Ok(process)
    }

    pub fn submit_validation(
        &self,
        id: ProcessId,
        validated: bool,
        tags: SubmissionTags,
    ) -> Result<SubmissionProcess, PixelError> {
        let process = {
            let _guard = self.inner.lock();
            let mut process = self.inner.load(id)?;
            expect_step(&process, Step::Validation, "validate")?;
            process.validated = validated;
            process.tags = SubmissionTags::new(&tags.experiment, &tags.analysis);
            self.inner.complete(&mut process, Step::Validation)?;
            self.inner.save(&process)?;
            process
        };

        if process.current_step() == Some(Step::Import) {
            self.dispatch_import(process.id)?;
        }
        Ok(process)
    }

    /// Completes the active human step without setting its flag.
    pub fn finish_current(&self, id: ProcessId) -> Result<SubmissionProcess, PixelError> {
        let process = {
            let _guard = self.inner.lock();
            let mut process = self.inner.load(id)?;
            let step = match process.current_step() {
                Some(step) if step.kind() == StepKind::Human => step,
                current => {
                    return Err(PixelError::InvalidTransition {
                        action: "finish current step".to_string(),
                        current: current.map(Step::name).unwrap_or("none").to_string(),
                    });
                }
            };
            self.inner.complete(&mut process, step)?;
            self.inner.save(&process)?;
            process
        };

        if process.current_step() == Some(Step::Import) {
            self.dispatch_import(process.id)?;
        }
        Ok(process)
    }

    pub fn process(&self, id: ProcessId) -> Result<SubmissionProcess, PixelError> {
        let _guard = self.inner.lock();
        self.inner.load(id)
    }

    pub fn processes(&self) -> Result<Vec<SubmissionProcess>, PixelError> {
        let _guard = self.inner.lock();
        let mut processes: Vec<SubmissionProcess> =
            Store::list_json(&self.inner.store.processes_dir())?;
        processes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(processes)
    }

    /// Blocks until every dispatched import has completed.
    pub fn wait_imports(&self) {
        let handles: Vec<JobHandle> = {
            let mut pending = self
                .inner
                .pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            pending.drain(..).collect()
        };
        for handle in handles {
            handle.wait();
        }
    }

    fn dispatch_import(&self, id: ProcessId) -> Result<(), PixelError> {
        let inner = Arc::clone(&self.inner);
        debug!("dispatching import of {}", id.short());
        let handle = self
            .inner
            .executor
            .spawn(Box::new(move || inner.run_import(id)))?;
        self.inner
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
        Ok(())
    }
}

fn expect_step(process: &SubmissionProcess, step: Step, action: &str) -> Result<(), PixelError> {
    match process.current_step() {
        Some(current) if current == step => Ok(()),
        current => Err(PixelError::InvalidTransition {
            action: action.to_string(),
            current: current.map(Step::name).unwrap_or("none").to_string(),
        }),
    }
}

impl FlowInner {
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn load(&self, id: ProcessId) -> Result<SubmissionProcess, PixelError> {
        let path = self.store.process_path(&id.to_string());
        if !path.as_std_path().exists() {
            return Err(PixelError::ProcessNotFound(id.to_string()));
        }
        Store::read_json(&path)
    }

    fn save(&self, process: &SubmissionProcess) -> Result<(), PixelError> {
        Store::write_json(&self.store.process_path(&process.id.to_string()), process)
    }

    /// Marks the active task of `step` done and moves forward.
    fn complete(&self, process: &mut SubmissionProcess, step: Step) -> Result<(), PixelError> {
        let task = process
            .current_task_mut(step)
            .ok_or_else(|| PixelError::InvalidTransition {
                action: format!("complete {step}"),
                current: step.to_string(),
            })?;
        task.finish(TaskStatus::Done, None);
        self.advance(process, step)
    }

    /// Activates the steps after `from` until one waits for input.
    fn advance(&self, process: &mut SubmissionProcess, from: Step) -> Result<(), PixelError> {
        let mut step = from;
        while let Some(next) = step.next(process) {
            debug!("submission {}: {step} -> {next}", process.id.short());
            match next.kind() {
                StepKind::Human => {
                    process.tasks.push(Task::new(next, TaskStatus::New));
                    return Ok(());
                }
                StepKind::AsyncHandler => {
                    process.tasks.push(Task::new(next, TaskStatus::Scheduled));
                    return Ok(());
                }
                StepKind::Gate | StepKind::Start => {
                    process.tasks.push(Task::new(next, TaskStatus::Done));
                }
                StepKind::Handler => {
                    let mut task = Task::new(next, TaskStatus::Started);
                    match self.parse_meta(process) {
                        Ok(meta) => {
                            process.meta = Some(meta);
                            task.finish(TaskStatus::Done, None);
                        }
                        Err(err) => {
                            warn!("submission {}: meta parsing failed: {err}", process.id.short());
                            process.meta = None;
                            task.finish(TaskStatus::Error, Some(err.to_string()));
                        }
                    }
                    process.tasks.push(task);
                }
                StepKind::End => {
                    process.tasks.push(Task::new(next, TaskStatus::Done));
                    process.status = ProcessStatus::Done;
                    process.finished_at = Some(Utc::now());
                    info!("submission {} is done", process.id.short());
                    return Ok(());
                }
            }
            step = next;
        }
        Ok(())
    }

    fn parse_meta(&self, process: &SubmissionProcess) -> Result<SerializedMeta, PixelError> {
        let path = process
            .archive
            .as_ref()
            .ok_or_else(|| PixelError::ArchiveNotFound("<none>".into()))?;
        let mut archive = PixelArchive::open(path.as_std_path())?;
        archive.parse(&self.db)?;
        archive.serialized_meta()
    }

    fn import(&self, process: &SubmissionProcess) -> Result<ImportationDone, PixelError> {
        let path = process
            .archive
            .as_ref()
            .ok_or_else(|| PixelError::ArchiveNotFound("<none>".into()))?;
        let meta = process
            .meta
            .as_ref()
            .ok_or_else(|| PixelError::ImportFailed("process has no parsed meta".to_string()))?;
        let mut archive = PixelArchive::open(path.as_std_path())?;
        archive.load_meta(meta, &self.db)?;
        archive.save(
            &self.db,
            &self.store,
            process.owner,
            &process.tags.to_import_tags(),
            self.sink.as_ref(),
        )
    }

    /// Body of the dispatched import job.
    fn run_import(&self, id: ProcessId) {
        let started = {
            let _guard = self.lock();
            self.load(id).and_then(|mut process| {
                if let Some(task) = process.current_task_mut(Step::Import) {
                    task.status = TaskStatus::Started;
                }
                self.save(&process)?;
                Ok(process)
            })
        };
        let process = match started {
            Ok(process) => process,
            Err(err) => {
                error!("cannot start import of {}: {err}", id.short());
                return;
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| self.import(&process))).unwrap_or_else(
            |panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|message| message.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "import panicked".to_string());
                Err(PixelError::ImportFailed(message))
            },
        );

        if let Err(err) = self.finish_import(id, result) {
            error!("cannot record import result of {}: {err}", id.short());
        }
    }

    fn finish_import(
        &self,
        id: ProcessId,
        result: Result<ImportationDone, PixelError>,
    ) -> Result<(), PixelError> {
        let _guard = self.lock();
        let mut process = self.load(id)?;
        let task = process
            .current_task_mut(Step::Import)
            .ok_or_else(|| PixelError::InvalidTransition {
                action: "finish import".to_string(),
                current: "none".to_string(),
            })?;
        match result {
            Ok(done) => {
                task.finish(TaskStatus::Done, None);
                process.imported = true;
                info!(
                    "submission {}: imported {} pixel sets",
                    id.short(),
                    done.pixel_sets.len()
                );
            }
            Err(err) => {
                error!("submission {}: import failed: {err}", id.short());
                task.finish(TaskStatus::Error, Some(err.to_string()));
                process.validated = false;
            }
        }
        self.advance(&mut process, Step::Import)?;
        self.save(&process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process() -> SubmissionProcess {
        SubmissionProcess::new("test", PixelerId::new())
    }

    #[test]
    fn gates_follow_flags() {
        let mut process = process();
        assert_eq!(Step::CheckDownload.next(&process), Some(Step::Download));
        process.downloaded = true;
        assert_eq!(Step::CheckDownload.next(&process), Some(Step::Upload));
        assert_eq!(Step::CheckImport.next(&process), Some(Step::Validation));
        process.imported = true;
        assert_eq!(Step::CheckImport.next(&process), Some(Step::End));
        assert_eq!(Step::End.next(&process), None);
    }

    #[test]
    fn step_names_round_trip() {
        for step in Step::ALL {
            assert_eq!(step.name().parse::<Step>().unwrap(), step);
        }
    }

    #[test]
    fn hidden_tasks() {
        assert!(is_hidden_task("start"));
        assert!(is_hidden_task("end"));
        assert!(is_hidden_task("check_download"));
        assert!(!is_hidden_task("download"));
        assert!(!is_hidden_task("validation"));
    }

    #[test]
    fn traceback_is_stripped() {
        let comment = "Import failed\nTraceback (most recent call last):\n  File x";
        assert_eq!(hide_traceback(comment), "Import failed");
        assert_eq!(hide_traceback("plain message"), "plain message");
    }

    #[test]
    fn tags_are_cleaned() {
        assert_eq!(clean_tags(" RNA-seq, proteomics ,rna-seq,,"), "proteomics,rna-seq");
        assert_eq!(clean_tags(""), "");

        let tags = SubmissionTags::new("B, a/Child", "");
        assert_eq!(tags.experiment, "a/child,b");
        assert_eq!(tags.to_import_tags().experiment, vec!["a/child", "b"]);
        assert!(tags.to_import_tags().analysis.is_empty());
    }

    #[test]
    fn failed_tasks_mark_process() {
        let mut process = process();
        assert!(!process.has_failed());
        let mut task = Task::new(Step::Meta, TaskStatus::Started);
        task.finish(TaskStatus::Error, Some("boom".to_string()));
        process.tasks.push(task);
        assert!(process.has_failed());
        assert!(!process.is_done());
    }
}
