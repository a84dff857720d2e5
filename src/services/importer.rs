//! Import Orchestrator.
//!
//! Walks a source tree depth-first, turning directories into categories and
//! accepted files into uploaded, registered resources. Categories are
//! resolved one at a time on the walking task, so a child is never resolved
//! before its parent; sibling files inside one directory fan out up to
//! `concurrency` at a time.
//!
//! Only a missing operator or an unreadable source root aborts a run. Every
//! per-file problem is logged, recorded in the [`ImportSummary`], and the
//! walk moves on.

use crate::{
    models::{admin::Admin, category::Category},
    services::{
        category_service::CategoryService,
        classify::{self, AssetFormat},
        content_store::{ContentStore, ContentStoreError, PutOptions, PutResult},
        operator::{OperatorError, OperatorService},
        registrar::{Classification, Registrar, ResourceDescriptor},
    },
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use serde::Serialize;
use serde_json::{Map, Value, json};
use std::{
    fs::FileType,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Asset class segment of every animation key.
const ANIMATION_CLASS: &str = "animations";

/// Errors that abort a whole run before any side effect.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Operator(#[from] OperatorError),
    #[error("source `{path}` is unreadable: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("source `{0}` is not a directory")]
    NotADirectory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// Owning project tag, prefix of every derived key.
    pub project: String,
    /// Max sibling files in flight.
    pub concurrency: usize,
    /// Stop starting new work after this long.
    pub deadline: Option<Duration>,
    /// Reuse objects already stored under a file's key. When off, the
    /// store's conflict policy decides between overwriting and refusing.
    pub reuse_existing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// File sits directly under the import root, outside any category.
    NoCategory,
    /// The run was interrupted before the file was started.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    ListDirectory,
    /// Entry name is not valid UTF-8 and cannot become a category or key.
    InvalidName,
    Category,
    Read,
    Upload,
    Register,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub path: PathBuf,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub path: PathBuf,
    pub stage: FailureStage,
    pub error: String,
}

/// An uploaded object with no resource record, left for reconciliation.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanRecord {
    pub path: PathBuf,
    pub storage_key: String,
    pub error: String,
}

/// What one run did.
#[derive(Debug, Clone, Serialize)]
pub struct ImportSummary {
    pub source: PathBuf,
    pub operator_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories_created: usize,
    pub categories_existing: usize,
    /// Resources registered by this run.
    pub created: usize,
    /// Files whose resource record already existed.
    pub already_present: usize,
    /// Files with an unsupported extension, or symlinks.
    pub ignored: usize,
    pub skipped: Vec<SkippedItem>,
    pub failed: Vec<ItemFailure>,
    pub orphans: Vec<OrphanRecord>,
    pub interrupted: bool,
}

impl ImportSummary {
    fn new(source: &Path, operator: &Admin) -> Self {
        let now = Utc::now();
        Self {
            source: source.to_path_buf(),
            operator_id: operator.id,
            started_at: now,
            finished_at: now,
            categories_created: 0,
            categories_existing: 0,
            created: 0,
            already_present: 0,
            ignored: 0,
            skipped: Vec::new(),
            failed: Vec::new(),
            orphans: Vec::new(),
            interrupted: false,
        }
    }

    fn record(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Created => self.created += 1,
            FileOutcome::AlreadyPresent => self.already_present += 1,
            FileOutcome::Skipped(item) => self.skipped.push(item),
            FileOutcome::Failed { failure, orphan } => {
                self.failed.push(failure);
                if let Some(orphan) = orphan {
                    self.orphans.push(orphan);
                }
            }
        }
    }

    fn fail(&mut self, path: &Path, stage: FailureStage, err: impl ToString) {
        self.failed.push(ItemFailure {
            path: path.to_path_buf(),
            stage,
            error: err.to_string(),
        });
    }

    fn reject_undecodable(&mut self, paths: Vec<PathBuf>) {
        for path in paths {
            error!(path = %path.display(), "entry name is not valid UTF-8");
            self.fail(&path, FailureStage::InvalidName, "name is not valid UTF-8");
        }
    }

    fn finish(&mut self) {
        self.finished_at = Utc::now();
        info!(
            source = %self.source.display(),
            categories_created = self.categories_created,
            categories_existing = self.categories_existing,
            created = self.created,
            already_present = self.already_present,
            ignored = self.ignored,
            skipped = self.skipped.len(),
            failed = self.failed.len(),
            orphans = self.orphans.len(),
            interrupted = self.interrupted,
            "import finished"
        );
    }
}

enum FileOutcome {
    Created,
    AlreadyPresent,
    Skipped(SkippedItem),
    Failed {
        failure: ItemFailure,
        orphan: Option<OrphanRecord>,
    },
}

impl FileOutcome {
    fn failed(path: &Path, stage: FailureStage, err: impl ToString) -> Self {
        FileOutcome::Failed {
            failure: ItemFailure {
                path: path.to_path_buf(),
                stage,
                error: err.to_string(),
            },
            orphan: None,
        }
    }
}

/// One accepted file, fully classified and ready to upload.
struct FileJob {
    path: PathBuf,
    file_name: String,
    format: AssetFormat,
    owner_tag: String,
    specific_key: Option<String>,
    classification: Classification,
    description: Option<String>,
    metadata: Map<String, Value>,
}

/// A directory waiting on the walk stack.
struct DirFrame {
    path: PathBuf,
    parent_id: Option<Uuid>,
    level: i64,
    /// Path segments relative to the import root; empty for the root itself.
    segments: Vec<String>,
}

struct DirEntry {
    name: String,
    path: PathBuf,
    file_type: FileType,
}

pub struct Importer {
    store: Arc<dyn ContentStore>,
    categories: CategoryService,
    registrar: Arc<dyn Registrar>,
    operators: OperatorService,
    settings: ImportSettings,
    cancel: CancellationToken,
}

impl Importer {
    pub fn new(
        store: Arc<dyn ContentStore>,
        categories: CategoryService,
        registrar: Arc<dyn Registrar>,
        operators: OperatorService,
        settings: ImportSettings,
    ) -> Self {
        Self {
            store,
            categories,
            registrar,
            operators,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Share a token with whoever may interrupt the run (e.g. a Ctrl-C handler).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Import `root` as a category tree attributed to `requested_operator`
    /// (or the first registered operator).
    pub async fn import_tree(
        &self,
        root: &Path,
        requested_operator: Option<Uuid>,
    ) -> Result<ImportSummary, ImportError> {
        let operator = self.operators.resolve(requested_operator).await?;
        check_source(root).await?;

        info!(source = %root.display(), operator = %operator.email, "starting tree import");
        let mut summary = ImportSummary::new(root, &operator);
        let _deadline = self.arm_deadline();

        let mut stack = vec![DirFrame {
            path: root.to_path_buf(),
            parent_id: None,
            level: 0,
            segments: Vec::new(),
        }];

        while let Some(frame) = stack.pop() {
            if self.cancel.is_cancelled() {
                summary.interrupted = true;
                stack.push(frame);
                skip_unvisited(stack, &mut summary).await;
                break;
            }

            let category = match frame.segments.last() {
                None => None,
                Some(name) => {
                    let full_path = frame.segments.join("/");
                    match self
                        .categories
                        .ensure(name, frame.parent_id, frame.level, &full_path)
                        .await
                    {
                        Ok(resolved) => {
                            if resolved.created {
                                summary.categories_created += 1;
                            } else {
                                summary.categories_existing += 1;
                            }
                            Some(resolved.category)
                        }
                        Err(err) => {
                            error!(path = %frame.path.display(), error = %err, "category resolution failed, skipping subtree");
                            summary.fail(&frame.path, FailureStage::Category, err);
                            continue;
                        }
                    }
                }
            };

            let listing = match read_sorted(&frame.path).await {
                Ok(listing) => listing,
                Err(source) if frame.segments.is_empty() => {
                    return Err(ImportError::SourceUnreadable {
                        path: frame.path,
                        source,
                    });
                }
                Err(err) => {
                    error!(path = %frame.path.display(), error = %err, "cannot read directory");
                    summary.fail(&frame.path, FailureStage::ListDirectory, err);
                    continue;
                }
            };

            summary.reject_undecodable(listing.undecodable);

            let mut jobs = Vec::new();
            let mut subdirs = Vec::new();
            for entry in listing.entries {
                if entry.file_type.is_symlink() {
                    debug!(path = %entry.path.display(), "not following symlink");
                    summary.ignored += 1;
                } else if entry.file_type.is_dir() {
                    subdirs.push(entry);
                } else if let Some(format) = AssetFormat::from_path(&entry.path) {
                    match &category {
                        Some(category) => {
                            jobs.push(self.resource_job(entry, format, category, &operator))
                        }
                        None => {
                            warn!(path = %entry.path.display(), "file outside any category, skipping");
                            summary.skipped.push(SkippedItem {
                                path: entry.path,
                                reason: SkipReason::NoCategory,
                            });
                        }
                    }
                } else {
                    debug!(path = %entry.path.display(), "unsupported extension, ignoring");
                    summary.ignored += 1;
                }
            }

            for outcome in self.run_jobs(jobs, operator.id).await {
                summary.record(outcome);
            }

            let parent_id = category.as_ref().map(|c| c.id);
            let level = if category.is_some() { frame.level + 1 } else { 0 };
            for dir in subdirs.into_iter().rev() {
                let mut segments = frame.segments.clone();
                segments.push(dir.name);
                stack.push(DirFrame {
                    path: dir.path,
                    parent_id,
                    level,
                    segments,
                });
            }
        }

        if summary
            .skipped
            .iter()
            .any(|s| s.reason == SkipReason::Cancelled)
        {
            summary.interrupted = true;
        }
        summary.finish();
        Ok(summary)
    }

    /// Import a flat directory of animations. No categories are created;
    /// each file is classified by gender and motion inferred from its name
    /// and stored under `animations/{gender}/{file_name}`.
    pub async fn import_animations(
        &self,
        root: &Path,
        requested_operator: Option<Uuid>,
    ) -> Result<ImportSummary, ImportError> {
        let operator = self.operators.resolve(requested_operator).await?;
        check_source(root).await?;

        info!(source = %root.display(), operator = %operator.email, "starting animation import");
        let mut summary = ImportSummary::new(root, &operator);
        let _deadline = self.arm_deadline();

        let listing = read_sorted(root)
            .await
            .map_err(|source| ImportError::SourceUnreadable {
                path: root.to_path_buf(),
                source,
            })?;
        summary.reject_undecodable(listing.undecodable);

        let mut jobs = Vec::new();
        for entry in listing.entries {
            if !entry.file_type.is_file() {
                debug!(path = %entry.path.display(), "not a regular file, ignoring");
                summary.ignored += 1;
                continue;
            }
            match AssetFormat::from_path(&entry.path) {
                Some(format) if format.is_model() => {
                    jobs.push(animation_job(entry, format, &operator))
                }
                _ => {
                    debug!(path = %entry.path.display(), "not an animation format, ignoring");
                    summary.ignored += 1;
                }
            }
        }

        for outcome in self.run_jobs(jobs, operator.id).await {
            summary.record(outcome);
        }
        summary.interrupted = self.cancel.is_cancelled();

        summary.finish();
        Ok(summary)
    }

    /// Cancel the run once the configured deadline passes. Dropping the
    /// returned guard disarms it.
    fn arm_deadline(&self) -> Option<tokio_util::sync::DropGuard> {
        let deadline = self.settings.deadline?;
        let disarm = CancellationToken::new();
        let cancel = self.cancel.clone();
        let stop = disarm.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(deadline) => {
                    warn!(?deadline, "import deadline reached, draining in-flight uploads");
                    cancel.cancel();
                }
                _ = stop.cancelled() => {}
            }
        });
        Some(disarm.drop_guard())
    }

    fn resource_job(
        &self,
        entry: DirEntry,
        format: AssetFormat,
        category: &Category,
        operator: &Admin,
    ) -> FileJob {
        let mut metadata = base_metadata(&entry, operator);
        metadata.insert("category_path".into(), json!(category.path));
        FileJob {
            owner_tag: format!("{}/{}", self.settings.project, category.path),
            specific_key: None,
            classification: Classification::Category(category.id),
            description: Some(format!("Imported from {}", category.path)),
            metadata,
            path: entry.path,
            file_name: entry.name,
            format,
        }
    }

    /// Run jobs with bounded parallelism. Jobs not yet started when the run
    /// is cancelled come back as skipped.
    async fn run_jobs(&self, jobs: Vec<FileJob>, operator_id: Uuid) -> Vec<FileOutcome> {
        stream::iter(jobs)
            .map(|job| self.upload_and_register(job, operator_id))
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await
    }

    async fn upload_and_register(&self, job: FileJob, operator_id: Uuid) -> FileOutcome {
        if self.cancel.is_cancelled() {
            return FileOutcome::Skipped(SkippedItem {
                path: job.path,
                reason: SkipReason::Cancelled,
            });
        }

        let bytes = match fs::read(&job.path).await {
            Ok(bytes) => Bytes::from(bytes),
            Err(err) => {
                error!(path = %job.path.display(), error = %err, "cannot read file");
                return FileOutcome::failed(&job.path, FailureStage::Read, err);
            }
        };

        let options = PutOptions {
            content_type: Some(job.format.mime_type().to_string()),
            metadata: job.metadata.clone(),
            specific_key: job.specific_key.clone(),
            ignore_if_exists: self.settings.reuse_existing,
        };
        let stored = match self
            .store
            .put(bytes, &job.file_name, &job.owner_tag, options)
            .await
        {
            Ok(stored) => stored,
            Err(ContentStoreError::AlreadyExists {
                key,
                url,
                etag,
                size,
            }) => {
                debug!(path = %job.path.display(), key = %key, "object exists, keeping stored payload");
                PutResult {
                    url,
                    key,
                    reused: true,
                    etag,
                    size,
                }
            }
            Err(err) => {
                error!(path = %job.path.display(), error = %err, "upload failed");
                return FileOutcome::failed(&job.path, FailureStage::Upload, err);
            }
        };

        let descriptor = ResourceDescriptor {
            name: classify::display_name(&job.file_name),
            description: job.description,
            storage_url: stored.url.clone(),
            storage_key: stored.key.clone(),
            file_size: stored.size,
            file_type: job.format.extension().to_string(),
            mime_type: job.format.mime_type().to_string(),
            checksum: stored.etag.clone(),
            classification: job.classification,
            resource_id: classify::resource_slug(&job.file_name),
            metadata: job.metadata,
            uploaded_by_admin_id: operator_id,
        };

        match self.registrar.register(descriptor).await {
            Ok(registered) if registered.created => {
                info!(path = %job.path.display(), key = %stored.key, reused_object = stored.reused, "imported");
                FileOutcome::Created
            }
            Ok(_) => {
                debug!(path = %job.path.display(), key = %stored.key, "already registered");
                FileOutcome::AlreadyPresent
            }
            Err(err) => {
                error!(
                    path = %job.path.display(),
                    key = %stored.key,
                    error = %err,
                    "registration failed, uploaded object is orphaned"
                );
                FileOutcome::Failed {
                    failure: ItemFailure {
                        path: job.path.clone(),
                        stage: FailureStage::Register,
                        error: err.to_string(),
                    },
                    orphan: Some(OrphanRecord {
                        path: job.path,
                        storage_key: stored.key,
                        error: err.to_string(),
                    }),
                }
            }
        }
    }
}

fn animation_job(entry: DirEntry, format: AssetFormat, operator: &Admin) -> FileJob {
    let gender = classify::infer_gender(&entry.name);
    let animation_type = classify::infer_animation_type(&entry.name);
    let mut metadata = base_metadata(&entry, operator);
    metadata.insert("gender".into(), json!(gender));
    FileJob {
        owner_tag: ANIMATION_CLASS.to_string(),
        specific_key: Some(format!(
            "{}/{}/{}",
            ANIMATION_CLASS,
            gender.key_segment(),
            entry.name
        )),
        classification: Classification::Animation {
            gender,
            animation_type: animation_type.to_string(),
            version: classify::infer_version(&entry.name),
        },
        description: Some(format!("{} {} animation", gender, animation_type)),
        metadata,
        path: entry.path,
        file_name: entry.name,
        format,
    }
}

fn base_metadata(entry: &DirEntry, operator: &Admin) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("original_file_name".into(), json!(entry.name));
    metadata.insert("source_path".into(), json!(entry.path.display().to_string()));
    metadata.insert("imported_at".into(), json!(Utc::now().to_rfc3339()));
    metadata.insert("imported_by".into(), json!(operator.email));
    metadata
}

async fn check_source(root: &Path) -> Result<(), ImportError> {
    let meta = fs::metadata(root)
        .await
        .map_err(|source| ImportError::SourceUnreadable {
            path: root.to_path_buf(),
            source,
        })?;
    if !meta.is_dir() {
        return Err(ImportError::NotADirectory(root.to_path_buf()));
    }
    Ok(())
}

/// Record every accepted file below the unvisited directories as cancelled.
/// Nothing is created; the directories are only listed.
async fn skip_unvisited(mut stack: Vec<DirFrame>, summary: &mut ImportSummary) {
    while let Some(frame) = stack.pop() {
        let listing = match read_sorted(&frame.path).await {
            Ok(listing) => listing,
            Err(err) => {
                summary.fail(&frame.path, FailureStage::ListDirectory, err);
                continue;
            }
        };
        let reason = if frame.segments.is_empty() {
            SkipReason::NoCategory
        } else {
            SkipReason::Cancelled
        };
        for entry in listing.entries.into_iter().rev() {
            if entry.file_type.is_symlink() {
                continue;
            }
            if entry.file_type.is_dir() {
                let mut segments = frame.segments.clone();
                segments.push(entry.name);
                stack.push(DirFrame {
                    path: entry.path,
                    parent_id: None,
                    level: 0,
                    segments,
                });
            } else if AssetFormat::from_path(&entry.path).is_some() {
                summary.skipped.push(SkippedItem {
                    path: entry.path,
                    reason,
                });
            }
        }
    }
}

/// One directory's contents.
struct Listing {
    /// Entries sorted by name.
    entries: Vec<DirEntry>,
    /// Entries whose names are not valid UTF-8.
    undecodable: Vec<PathBuf>,
}

/// List `dir` without following symlinks.
async fn read_sorted(dir: &Path) -> io::Result<Listing> {
    let mut reader = fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    let mut undecodable = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        match entry.file_name().into_string() {
            Ok(name) => entries.push(DirEntry {
                name,
                path: entry.path(),
                file_type: entry.file_type().await?,
            }),
            Err(_) => undecodable.push(entry.path()),
        }
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    undecodable.sort();
    Ok(Listing {
        entries,
        undecodable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory_pool,
        models::resource::{Gender, Resource},
        services::{
            content_store::{ConflictPolicy, ContentStoreResult, LocalContentStore},
            registrar::{Registered, RegistrarError, RegistrarResult, SqliteRegistrar},
        },
    };
    use async_trait::async_trait;
    use sqlx::SqlitePool;
    use tempfile::TempDir;

    struct Harness {
        db: Arc<SqlitePool>,
        store: LocalContentStore,
        registrar: SqliteRegistrar,
        source: TempDir,
        _storage: TempDir,
        admin: Admin,
    }

    impl Harness {
        async fn new() -> Self {
            let harness = Self::without_operator().await;
            let admin = OperatorService::new(harness.db.clone())
                .create("ops@example.com", "Ops")
                .await
                .unwrap();
            Self { admin, ..harness }
        }

        async fn without_operator() -> Self {
            let db = memory_pool().await;
            let storage = TempDir::new().unwrap();
            let store = LocalContentStore::new(
                db.clone(),
                storage.path(),
                "http://assets.local",
                ConflictPolicy::Overwrite,
            );
            Self {
                registrar: SqliteRegistrar::new(db.clone()),
                store,
                db,
                source: TempDir::new().unwrap(),
                _storage: storage,
                admin: Admin {
                    id: Uuid::nil(),
                    email: String::new(),
                    display_name: String::new(),
                    created_at: Utc::now(),
                },
            }
        }

        fn write(&self, rel: &str, bytes: &[u8]) {
            let path = self.source.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, bytes).unwrap();
        }

        fn importer(&self) -> Importer {
            self.importer_with(
                Arc::new(self.store.clone()),
                Arc::new(self.registrar.clone()),
            )
        }

        fn importer_with(
            &self,
            store: Arc<dyn ContentStore>,
            registrar: Arc<dyn Registrar>,
        ) -> Importer {
            Importer::new(
                store,
                CategoryService::new(self.db.clone()),
                registrar,
                OperatorService::new(self.db.clone()),
                ImportSettings {
                    project: "proj".into(),
                    concurrency: 3,
                    deadline: None,
                    reuse_existing: true,
                },
            )
        }

        async fn resources(&self) -> Vec<Resource> {
            self.registrar.list(None, None, 1000).await.unwrap()
        }

        async fn category_count(&self) -> i64 {
            CategoryService::new(self.db.clone()).count().await.unwrap()
        }

        async fn object_count(&self) -> i64 {
            sqlx::query_scalar("SELECT COUNT(*) FROM objects")
                .fetch_one(&*self.db)
                .await
                .unwrap()
        }
    }

    /// Store double that fails for one file name and delegates the rest.
    struct FaultyStore {
        inner: LocalContentStore,
        fail_on: &'static str,
    }

    #[async_trait]
    impl ContentStore for FaultyStore {
        async fn put(
            &self,
            bytes: Bytes,
            original_file_name: &str,
            owner_tag: &str,
            options: PutOptions,
        ) -> ContentStoreResult<PutResult> {
            if original_file_name == self.fail_on {
                return Err(ContentStoreError::StorageUnavailable(
                    "simulated outage".into(),
                ));
            }
            self.inner
                .put(bytes, original_file_name, owner_tag, options)
                .await
        }
    }

    /// Store double that refuses every put as already existing.
    struct ExistingStore;

    #[async_trait]
    impl ContentStore for ExistingStore {
        async fn put(
            &self,
            _bytes: Bytes,
            original_file_name: &str,
            owner_tag: &str,
            _options: PutOptions,
        ) -> ContentStoreResult<PutResult> {
            let key = format!("{}/{}", owner_tag, original_file_name);
            Err(ContentStoreError::AlreadyExists {
                url: format!("http://assets.local/objects/{}", key),
                key,
                etag: "feedface".into(),
                size: 99,
            })
        }
    }

    struct RejectingRegistrar;

    #[async_trait]
    impl Registrar for RejectingRegistrar {
        async fn register(&self, _descriptor: ResourceDescriptor) -> RegistrarResult<Registered> {
            Err(RegistrarError::Invalid("schema constraint violated".into()))
        }
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"chair");
        h.write("props/furniture/table.fbx", b"table");
        h.write("textures/wood.png", b"wood");

        let first = h.importer().import_tree(h.source.path(), None).await.unwrap();
        assert_eq!(first.created, 3);
        assert_eq!(first.categories_created, 3);
        assert!(first.failed.is_empty());

        let categories = h.category_count().await;
        let before: Vec<Uuid> = h.resources().await.iter().map(|r| r.id).collect();

        let second = h.importer().import_tree(h.source.path(), None).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.already_present, 3);
        assert_eq!(second.categories_created, 0);
        assert_eq!(second.categories_existing, 3);

        let after: Vec<Uuid> = h.resources().await.iter().map(|r| r.id).collect();
        assert_eq!(h.category_count().await, categories);
        assert_eq!(before, after);
        assert_eq!(h.object_count().await, 3);
    }

    #[tokio::test]
    async fn nested_file_links_to_category_chain() {
        let h = Harness::new().await;
        h.write("a/b/c/file.glb", b"payload");

        let summary = h.importer().import_tree(h.source.path(), None).await.unwrap();
        assert_eq!(summary.created, 1);

        let resources = h.resources().await;
        let resource = &resources[0];
        assert_eq!(resource.storage_key, "proj/a/b/c/file.glb");
        assert_eq!(resource.name, "file");
        assert_eq!(resource.resource_id, "file");
        assert_eq!(resource.file_size, 7);
        assert_eq!(resource.mime_type, "model/gltf-binary");
        assert_eq!(resource.uploaded_by_admin_id, h.admin.id);
        assert_eq!(resource.metadata.0["original_file_name"], "file.glb");

        let mut chain = Vec::new();
        let mut next = resource.category_id;
        while let Some(id) = next {
            let category: Category = sqlx::query_as(
                "SELECT id, name, path, parent_id, level, is_premium, metadata, created_at
                 FROM categories WHERE id = ?",
            )
            .bind(id)
            .fetch_one(&*h.db)
            .await
            .unwrap();
            next = category.parent_id;
            chain.push((category.path, category.level));
        }
        chain.reverse();

        assert_eq!(
            chain,
            vec![("a".to_string(), 0), ("a/b".to_string(), 1), ("a/b/c".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn one_storage_fault_does_not_stop_the_batch() {
        let h = Harness::new().await;
        for name in ["1.glb", "2.glb", "3.glb", "4.glb", "5.glb"] {
            h.write(&format!("batch/{}", name), name.as_bytes());
        }
        let store = FaultyStore {
            inner: h.store.clone(),
            fail_on: "3.glb",
        };

        let summary = h
            .importer_with(Arc::new(store), Arc::new(h.registrar.clone()))
            .import_tree(h.source.path(), None)
            .await
            .unwrap();

        assert_eq!(summary.created, 4);
        assert_eq!(summary.failed.len(), 1);
        assert!(summary.failed[0].path.ends_with("batch/3.glb"));
        assert_eq!(summary.failed[0].stage, FailureStage::Upload);
        assert!(summary.orphans.is_empty());

        let mut names: Vec<String> = h.resources().await.into_iter().map(|r| r.name).collect();
        names.sort();
        assert_eq!(names, vec!["1", "2", "4", "5"]);
    }

    #[tokio::test]
    async fn unsupported_extension_has_no_side_effects() {
        let h = Harness::new().await;
        h.write("props/notes.txt", b"hello");
        h.write("props/chair.glb", b"chair");

        let summary = h.importer().import_tree(h.source.path(), None).await.unwrap();

        assert_eq!(summary.ignored, 1);
        assert!(summary.failed.is_empty());
        assert!(summary.skipped.is_empty());
        assert_eq!(summary.created, 1);
        assert_eq!(h.category_count().await, 1);
        assert_eq!(h.resources().await.len(), 1);
    }

    #[tokio::test]
    async fn root_level_file_is_skipped() {
        let h = Harness::new().await;
        h.write("loose.glb", b"loose");

        let summary = h.importer().import_tree(h.source.path(), None).await.unwrap();

        assert_eq!(summary.skipped.len(), 1);
        assert_eq!(summary.skipped[0].reason, SkipReason::NoCategory);
        assert!(summary.failed.is_empty());
        assert!(h.resources().await.is_empty());
        assert_eq!(h.object_count().await, 0);
    }

    #[tokio::test]
    async fn missing_operator_fails_before_side_effects() {
        let h = Harness::without_operator().await;
        h.write("props/chair.glb", b"chair");

        let err = h
            .importer()
            .import_tree(h.source.path(), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ImportError::Operator(OperatorError::NoneRegistered)
        ));
        assert_eq!(h.category_count().await, 0);
        assert_eq!(h.object_count().await, 0);
    }

    #[tokio::test]
    async fn missing_source_is_fatal() {
        let h = Harness::new().await;
        let missing = h.source.path().join("nope");

        let err = h.importer().import_tree(&missing, None).await.unwrap_err();
        assert!(matches!(err, ImportError::SourceUnreadable { .. }));

        h.write("file.glb", b"x");
        let err = h
            .importer()
            .import_tree(&h.source.path().join("file.glb"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ImportError::NotADirectory(_)));
    }

    #[tokio::test]
    async fn registration_failure_records_orphan() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"chair");

        let summary = h
            .importer_with(Arc::new(h.store.clone()), Arc::new(RejectingRegistrar))
            .import_tree(h.source.path(), None)
            .await
            .unwrap();

        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].stage, FailureStage::Register);
        assert_eq!(summary.orphans.len(), 1);
        assert_eq!(summary.orphans[0].storage_key, "proj/props/chair.glb");
        assert_eq!(h.object_count().await, 1);
    }

    #[tokio::test]
    async fn existing_object_conflict_still_registers() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"chair");

        let summary = h
            .importer_with(Arc::new(ExistingStore), Arc::new(h.registrar.clone()))
            .import_tree(h.source.path(), None)
            .await
            .unwrap();

        assert_eq!(summary.created, 1);
        let resources = h.resources().await;
        assert_eq!(resources[0].storage_key, "proj/props/chair.glb");
        assert_eq!(resources[0].checksum, "feedface");
        assert_eq!(resources[0].file_size, 99);
    }

    #[tokio::test]
    async fn animations_are_keyed_by_gender() {
        let h = Harness::new().await;
        h.write("walk_female_01.glb", b"a");
        h.write("idle_male.glb", b"b");
        h.write("wave.glb", b"c");
        h.write("female_vs_male.fbx", b"d");
        h.write("skin.png", b"e");
        h.write("notes.txt", b"f");
        h.write("nested/run_male.glb", b"g");

        let summary = h
            .importer()
            .import_animations(h.source.path(), Some(h.admin.id))
            .await
            .unwrap();

        assert_eq!(summary.created, 4);
        assert_eq!(summary.ignored, 3);
        assert_eq!(h.category_count().await, 0);

        let mut by_key: Vec<(String, Option<Gender>)> = h
            .resources()
            .await
            .into_iter()
            .map(|r| (r.storage_key, r.gender))
            .collect();
        by_key.sort();
        assert_eq!(
            by_key,
            vec![
                ("animations/female/female_vs_male.fbx".to_string(), Some(Gender::Female)),
                ("animations/female/walk_female_01.glb".to_string(), Some(Gender::Female)),
                ("animations/male/idle_male.glb".to_string(), Some(Gender::Male)),
                ("animations/unisex/wave.glb".to_string(), Some(Gender::Unisex)),
            ]
        );

        let walk = h
            .registrar
            .find_existing("animations/female/walk_female_01.glb", "walk-female-01")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(walk.animation_type.as_deref(), Some("walk"));
        assert_eq!(walk.version, Some(1));
        assert_eq!(walk.description.as_deref(), Some("FEMALE walk animation"));
    }

    #[tokio::test]
    async fn cancelled_run_records_unstarted_files() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"chair");
        h.write("props/table.glb", b"table");
        h.write("props/lights/lamp.obj", b"lamp");
        h.write("props/notes.txt", b"notes");
        h.write("loose.glb", b"loose");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = h
            .importer()
            .with_cancellation(cancel)
            .import_tree(h.source.path(), None)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.created, 0);
        assert!(summary.failed.is_empty());

        let mut cancelled: Vec<String> = summary
            .skipped
            .iter()
            .filter(|s| s.reason == SkipReason::Cancelled)
            .map(|s| {
                s.path
                    .strip_prefix(h.source.path())
                    .unwrap()
                    .display()
                    .to_string()
            })
            .collect();
        cancelled.sort();
        assert_eq!(
            cancelled,
            vec!["props/chair.glb", "props/lights/lamp.obj", "props/table.glb"]
        );
        assert_eq!(summary.skipped.len(), 4);
        assert!(
            summary
                .skipped
                .iter()
                .any(|s| s.reason == SkipReason::NoCategory && s.path.ends_with("loose.glb"))
        );

        assert_eq!(h.category_count().await, 0);
        assert_eq!(h.object_count().await, 0);
    }

    #[tokio::test]
    async fn whitespace_variant_directories_keep_separate_keys() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"plain");
        h.write(" props/chair.glb", b"padded");
        h.write("props/ chair.glb", b"padded file");

        let summary = h.importer().import_tree(h.source.path(), None).await.unwrap();

        assert_eq!(summary.created, 3);
        assert_eq!(summary.already_present, 0);
        assert!(summary.failed.is_empty());
        assert_eq!(h.category_count().await, 2);
        assert_eq!(h.object_count().await, 3);

        let resources = h.resources().await;
        let mut keys: Vec<&str> = resources.iter().map(|r| r.storage_key.as_str()).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "proj/ props/chair.glb",
                "proj/props/ chair.glb",
                "proj/props/chair.glb"
            ]
        );

        let padded = resources
            .iter()
            .find(|r| r.storage_key == "proj/ props/chair.glb")
            .unwrap();
        let plain = resources
            .iter()
            .find(|r| r.storage_key == "proj/props/chair.glb")
            .unwrap();
        assert_ne!(padded.category_id, plain.category_id);
        assert_eq!(padded.file_size, 6);
    }

    #[tokio::test]
    async fn refresh_overwrites_stored_payload() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"v1");
        h.importer().import_tree(h.source.path(), None).await.unwrap();

        h.write("props/chair.glb", b"version two");
        let mut importer = h.importer();
        importer.settings.reuse_existing = false;
        let summary = importer.import_tree(h.source.path(), None).await.unwrap();

        assert_eq!(summary.already_present, 1);
        assert!(summary.failed.is_empty());
        let object = h.store.find_object("proj/props/chair.glb").await.unwrap().unwrap();
        assert_eq!(object.etag, format!("{:x}", md5::compute(b"version two")));
        assert_eq!(object.size_bytes, 11);
        assert_eq!(h.resources().await.len(), 1);
    }

    #[tokio::test]
    async fn refresh_under_fail_policy_keeps_stored_payload() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"v1");
        h.importer().import_tree(h.source.path(), None).await.unwrap();

        h.write("props/chair.glb", b"version two");
        let strict = LocalContentStore::new(
            h.db.clone(),
            h.store.base_path.clone(),
            "http://assets.local",
            ConflictPolicy::Fail,
        );
        let mut importer =
            h.importer_with(Arc::new(strict), Arc::new(h.registrar.clone()));
        importer.settings.reuse_existing = false;
        let summary = importer.import_tree(h.source.path(), None).await.unwrap();

        assert_eq!(summary.already_present, 1);
        assert!(summary.failed.is_empty());
        let object = h.store.find_object("proj/props/chair.glb").await.unwrap().unwrap();
        assert_eq!(object.etag, format!("{:x}", md5::compute(b"v1")));
    }

    #[tokio::test]
    async fn reused_object_reports_stored_size() {
        let h = Harness::new().await;
        h.write("props/chair.glb", b"v1");
        h.importer()
            .import_tree(h.source.path(), None)
            .await
            .unwrap();

        // Drop the registration but keep the stored object.
        sqlx::query("DELETE FROM resources")
            .execute(&*h.db)
            .await
            .unwrap();
        h.write("props/chair.glb", b"much longer payload");
        let summary = h.importer().import_tree(h.source.path(), None).await.unwrap();

        assert_eq!(summary.created, 1);
        let resources = h.resources().await;
        assert_eq!(resources[0].file_size, 2);
        assert_eq!(resources[0].checksum, format!("{:x}", md5::compute(b"v1")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_names_are_reported() {
        use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

        let h = Harness::new().await;
        h.write("props/chair.glb", b"chair");
        let bad = h
            .source
            .path()
            .join("props")
            .join(OsStr::from_bytes(b"caf\xe9.glb"));
        std::fs::write(&bad, b"bad").unwrap();

        let summary = h.importer().import_tree(h.source.path(), None).await.unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].stage, FailureStage::InvalidName);
        assert_eq!(summary.failed[0].path, bad);
        assert_eq!(h.resources().await.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_animation_run_skips_files() {
        let h = Harness::new().await;
        h.write("walk_female.glb", b"a");
        h.write("idle_male.glb", b"b");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = h
            .importer()
            .with_cancellation(cancel)
            .import_animations(h.source.path(), None)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.skipped.len(), 2);
        assert!(
            summary
                .skipped
                .iter()
                .all(|s| s.reason == SkipReason::Cancelled)
        );
        assert!(h.resources().await.is_empty());
    }

    #[tokio::test]
    async fn sequential_and_parallel_runs_agree() {
        let h = Harness::new().await;
        for i in 0..10 {
            h.write(&format!("set/item_{:02}.obj", i), format!("obj {}", i).as_bytes());
        }

        let mut importer = h.importer();
        importer.settings.concurrency = 1;
        let sequential = importer.import_tree(h.source.path(), None).await.unwrap();
        assert_eq!(sequential.created, 10);

        let mut importer = h.importer();
        importer.settings.concurrency = 8;
        let parallel = importer.import_tree(h.source.path(), None).await.unwrap();
        assert_eq!(parallel.already_present, 10);
        assert_eq!(h.resources().await.len(), 10);
    }

    #[tokio::test]
    async fn deadline_cancels_until_disarmed() {
        let h = Harness::new().await;
        let mut importer = h.importer();
        importer.settings.deadline = Some(Duration::from_millis(10));

        let guard = importer.arm_deadline();
        assert!(guard.is_some());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(importer.cancel.is_cancelled());

        let mut importer = h.importer();
        importer.settings.deadline = Some(Duration::from_millis(50));
        drop(importer.arm_deadline());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!importer.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn summary_serializes_for_reports() {
        let h = Harness::new().await;
        h.write("loose.glb", b"x");
        let summary = h.importer().import_tree(h.source.path(), None).await.unwrap();

        let report = serde_json::to_value(&summary).unwrap();
        assert_eq!(report["skipped"][0]["reason"], "no_category");
        assert_eq!(report["operator_id"], json!(h.admin.id));
    }
}
