mod common;

use std::path::PathBuf;
use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use pixel::db::Database;
use pixel::error::PixelError;
use pixel::executor::{Executor, InlineExecutor, WorkerPool};
use pixel::import::LogSink;
use pixel::store::Store;
use pixel::template::META_FILENAME;
use pixel::workflow::{
    ProcessStatus, Step, SubmissionFlow, SubmissionProcess, SubmissionTags, TaskStatus,
};
use tempfile::TempDir;

use common::{MetaSheet, build_archive, generate_pixels, load_entries, seed_reference};

struct Harness {
    temp: TempDir,
    db: Arc<Database>,
    flow: SubmissionFlow,
}

impl Harness {
    fn new(executor: Arc<dyn Executor>) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().join("store")).unwrap();
        let store = Store::new_with_root(root);
        let db = Arc::new(Database::in_memory());
        seed_reference(&db);
        let flow = SubmissionFlow::new(
            Arc::clone(&db),
            store,
            executor,
            Arc::new(LogSink),
            11,
        );
        Self { temp, db, flow }
    }

    fn archive(&self, name: &str, sheet: &MetaSheet, pixels: &str) -> PathBuf {
        build_archive(self.temp.path(), name, sheet, pixels)
    }

    fn store(&self) -> Store {
        Store::new_with_root(Utf8PathBuf::from_path_buf(self.temp.path().join("store")).unwrap())
    }

    fn download(&self, process: &SubmissionProcess) -> SubmissionProcess {
        let dir = Utf8PathBuf::from_path_buf(self.temp.path().join("download")).unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        let (process, template) = self.flow.submit_download(process.id, &dir).unwrap();
        assert!(dir.join(META_FILENAME).as_std_path().is_file());
        assert_eq!(process.template_checksum, template.checksum);
        process
    }
}

fn steps(process: &SubmissionProcess) -> Vec<Step> {
    process.tasks.iter().map(|task| task.step).collect()
}

fn last_task(process: &SubmissionProcess, step: Step) -> &pixel::workflow::Task {
    process
        .tasks
        .iter()
        .rev()
        .find(|task| task.step == step)
        .unwrap()
}

#[test]
fn fresh_process_waits_for_download() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let process = harness.flow.start("label free", "alice").unwrap();

    assert!(!process.downloaded);
    assert!(!process.uploaded);
    assert!(!process.validated);
    assert!(!process.imported);
    assert_eq!(process.status, ProcessStatus::Started);
    assert_eq!(process.current_step(), Some(Step::Download));
    assert_eq!(process.visible_tasks().count(), 1);

    let process = harness.download(&process);
    assert!(process.downloaded);
    assert!(!process.template_checksum.is_empty());
    assert_eq!(process.current_step(), Some(Step::Upload));
    assert_eq!(
        steps(&process),
        vec![Step::Start, Step::Download, Step::CheckDownload, Step::Upload]
    );
    assert_eq!(harness.flow.process(process.id).unwrap(), process);
}

#[test]
fn happy_path_with_inline_executor() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let generated = generate_pixels(20, 2, 1);
    load_entries(&harness.db, &generated.clean);
    let archive = harness.archive("happy", &MetaSheet::default(), &generated.content);

    let process = harness.flow.start("label free", "alice").unwrap();
    let process = harness.download(&process);
    let process = harness.flow.submit_upload(process.id, &archive).unwrap();
    assert!(process.uploaded);
    assert!(process.meta.is_some());
    assert!(process.archive.as_ref().unwrap().as_std_path().is_file());
    assert_eq!(process.current_step(), Some(Step::Validation));

    harness
        .flow
        .submit_validation(
            process.id,
            true,
            SubmissionTags::new("Proteomics, label-free", "fluconazole"),
        )
        .unwrap();
    harness.flow.wait_imports();

    let process = harness.flow.process(process.id).unwrap();
    assert!(process.validated);
    assert!(process.imported);
    assert!(process.is_done());
    assert!(!process.has_failed());
    assert!(process.finished_at.is_some());
    assert_eq!(process.tags.experiment, "label-free,proteomics");
    assert_eq!(process.tasks.last().unwrap().step, Step::End);
    assert_eq!(last_task(&process, Step::Import).status, TaskStatus::Done);

    harness.db.read(|tables| {
        assert_eq!(tables.pixel_sets.len(), 1);
        assert_eq!(tables.pixels.len(), 20);
    });
}

#[test]
fn happy_path_with_worker_pool() {
    let harness = Harness::new(Arc::new(WorkerPool::new(2).unwrap()));
    let generated = generate_pixels(8, 0, 0);
    load_entries(&harness.db, &generated.clean);
    let archive = harness.archive("pool", &MetaSheet::default(), &generated.content);

    let process = harness.flow.start("pooled", "bob").unwrap();
    let process = harness.download(&process);
    let process = harness.flow.submit_upload(process.id, &archive).unwrap();
    harness
        .flow
        .submit_validation(process.id, true, SubmissionTags::default())
        .unwrap();
    harness.flow.wait_imports();

    let process = harness.flow.process(process.id).unwrap();
    assert_eq!(process.status, ProcessStatus::Done);
    assert_eq!(harness.flow.processes().unwrap().len(), 1);
}

#[test]
fn meta_failure_routes_back_to_upload() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let sheet = MetaSheet {
        entry: String::new(),
        ..MetaSheet::default()
    };
    let archive = harness.archive("broken", &sheet, "Gene Value Quality_score\n");

    let process = harness.flow.start("broken", "alice").unwrap();
    let process = harness.download(&process);
    let process = harness.flow.submit_upload(process.id, &archive).unwrap();

    assert!(process.uploaded);
    assert!(process.meta.is_none());
    assert!(process.has_failed());
    assert_eq!(process.current_step(), Some(Step::Upload));
    let meta = last_task(&process, Step::Meta);
    assert_eq!(meta.status, TaskStatus::Error);
    assert!(meta.comment.as_deref().unwrap().contains("B8"));

    // a fixed archive goes through
    let fixed = harness.archive("fixed", &MetaSheet::default(), "Gene Value Quality_score\n");
    let process = harness.flow.submit_upload(process.id, &fixed).unwrap();
    assert!(process.meta.is_some());
    assert_eq!(process.current_step(), Some(Step::Validation));
}

#[test]
fn import_failure_routes_back_to_validation() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let generated = generate_pixels(6, 0, 0);
    let archive = harness.archive("no-entries", &MetaSheet::default(), &generated.content);

    let process = harness.flow.start("no entries", "alice").unwrap();
    let process = harness.download(&process);
    let process = harness.flow.submit_upload(process.id, &archive).unwrap();
    harness
        .flow
        .submit_validation(process.id, true, SubmissionTags::default())
        .unwrap();
    harness.flow.wait_imports();

    let process = harness.flow.process(process.id).unwrap();
    assert!(!process.imported);
    assert!(!process.validated);
    assert!(!process.is_done());
    assert_eq!(process.current_step(), Some(Step::Validation));
    let import = last_task(&process, Step::Import);
    assert_eq!(import.status, TaskStatus::Error);
    assert!(import.comment.as_deref().unwrap().contains("0 vs 6"));
    harness.db.read(|tables| assert!(tables.pixel_sets.is_empty()));

    // once entries exist the same archive imports
    load_entries(&harness.db, &generated.clean);
    harness
        .flow
        .submit_validation(process.id, true, SubmissionTags::default())
        .unwrap();
    harness.flow.wait_imports();
    assert!(harness.flow.process(process.id).unwrap().is_done());
}

#[test]
fn rejected_validation_waits_for_another_review() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let archive = harness.archive("rejected", &MetaSheet::default(), "Gene Value Quality_score\n");

    let process = harness.flow.start("rejected", "alice").unwrap();
    let process = harness.download(&process);
    let process = harness.flow.submit_upload(process.id, &archive).unwrap();
    let process = harness
        .flow
        .submit_validation(process.id, false, SubmissionTags::default())
        .unwrap();

    assert!(!process.validated);
    assert_eq!(process.current_step(), Some(Step::Validation));
}

#[test]
fn actions_on_the_wrong_step_are_rejected() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let archive = harness.archive("early", &MetaSheet::default(), "Gene Value Quality_score\n");
    let process = harness.flow.start("early", "alice").unwrap();

    assert_matches!(
        harness.flow.submit_upload(process.id, &archive),
        Err(PixelError::InvalidTransition { current, .. }) if current == "download"
    );
    assert_matches!(
        harness
            .flow
            .submit_validation(process.id, true, SubmissionTags::default()),
        Err(PixelError::InvalidTransition { .. })
    );
    assert_matches!(
        harness.flow.process(pixel::domain::ProcessId::new()),
        Err(PixelError::ProcessNotFound(_))
    );
    assert_matches!(
        harness
            .flow
            .submit_upload(process.id, &harness.temp.path().join("missing.zip")),
        Err(PixelError::ArchiveNotFound(_))
    );
}

#[test]
fn finishing_a_step_without_its_flag_loops_back() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let process = harness.flow.start("skip", "alice").unwrap();

    let process = harness.flow.finish_current(process.id).unwrap();
    assert!(!process.downloaded);
    assert_eq!(process.current_step(), Some(Step::Download));
    assert_eq!(
        steps(&process),
        vec![
            Step::Start,
            Step::Download,
            Step::CheckDownload,
            Step::Download
        ]
    );

    let process = harness.download(&process);
    let process = harness.flow.finish_current(process.id).unwrap();
    assert_eq!(process.current_step(), Some(Step::Upload));
}

#[test]
fn finishing_validation_after_failed_import_does_not_stall() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let generated = generate_pixels(6, 0, 0);
    let archive = harness.archive("retry", &MetaSheet::default(), &generated.content);

    let process = harness.flow.start("retry", "alice").unwrap();
    let process = harness.download(&process);
    let process = harness.flow.submit_upload(process.id, &archive).unwrap();
    harness
        .flow
        .submit_validation(process.id, true, SubmissionTags::default())
        .unwrap();
    harness.flow.wait_imports();

    load_entries(&harness.db, &generated.clean);
    let process = harness.flow.finish_current(process.id).unwrap();
    harness.flow.wait_imports();

    let process = harness.flow.process(process.id).unwrap();
    assert!(!process.validated);
    assert!(!process.imported);
    assert_eq!(process.current_step(), Some(Step::Validation));
    assert_eq!(last_task(&process, Step::Validation).status, TaskStatus::New);
    assert!(
        process
            .tasks
            .iter()
            .all(|task| task.step != Step::Import || task.status != TaskStatus::Scheduled)
    );
}

#[test]
fn finishing_a_validated_step_dispatches_the_import() {
    let harness = Harness::new(Arc::new(InlineExecutor));
    let generated = generate_pixels(5, 0, 0);
    load_entries(&harness.db, &generated.clean);
    let archive = harness.archive("finish", &MetaSheet::default(), &generated.content);

    let process = harness.flow.start("finish", "alice").unwrap();
    let process = harness.download(&process);
    let mut process = harness.flow.submit_upload(process.id, &archive).unwrap();

    // process file already carrying an approved validation
    process.validated = true;
    let store = harness.store();
    Store::write_json(&store.process_path(&process.id.to_string()), &process).unwrap();

    let process = harness.flow.finish_current(process.id).unwrap();
    assert_eq!(process.current_step(), Some(Step::Import));
    harness.flow.wait_imports();

    let process = harness.flow.process(process.id).unwrap();
    assert!(process.imported);
    assert!(process.is_done());
    assert_eq!(last_task(&process, Step::Import).status, TaskStatus::Done);
    harness.db.read(|tables| assert_eq!(tables.pixels.len(), 5));
}
