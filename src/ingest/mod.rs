pub mod pdf;
pub mod reader;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

use crate::config::AppConfig;
use crate::index::VectorIndex;
use crate::models::{IngestReport, IngestStage, IngestStatus, UploadedFile};

pub const NO_FILE_WARNING: &str = "Please select the pdf document";
pub const SUCCESS_MESSAGE: &str = "File processed";

#[derive(Clone)]
pub struct Ingestor {
    data_folder: PathBuf,
    vector_folder: PathBuf,
    index: VectorIndex,
}

#[derive(Debug, Default)]
struct IngestCounts {
    documents: usize,
    nodes: usize,
    notices: Vec<String>,
}

impl Ingestor {
    pub fn new(config: &AppConfig, index: VectorIndex) -> Self {
        Self::with_folders(
            config.data_folder.clone(),
            config.vector_folder.clone(),
            index,
        )
    }

    pub fn with_folders(data_folder: PathBuf, vector_folder: PathBuf, index: VectorIndex) -> Self {
        Self {
            data_folder,
            vector_folder,
            index,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.index.store().name()
    }

    pub async fn ingest<F>(&self, upload: Option<UploadedFile>, mut progress: F) -> IngestReport
    where
        F: FnMut(IngestStage) + Send,
    {
        let started_at = Utc::now();
        let backend = self.backend().to_string();

        let Some(upload) = upload.filter(|file| !file.file_name.trim().is_empty()) else {
            tracing::warn!("ingest requested without a file");
            return IngestReport {
                status: IngestStatus::Warning,
                message: NO_FILE_WARNING.to_string(),
                backend,
                file_name: None,
                document_count: 0,
                node_count: 0,
                notices: vec![],
                started_at,
                finished_at: Utc::now(),
            };
        };

        let file_name = upload.file_name.clone();
        let result = self.run(upload, &mut progress).await;
        let finished_at = Utc::now();

        match result {
            Ok(counts) => {
                progress(IngestStage::Done);
                tracing::info!(
                    backend = %backend,
                    file = %file_name,
                    documents = counts.documents,
                    nodes = counts.nodes,
                    "ingest completed"
                );
                IngestReport {
                    status: IngestStatus::Success,
                    message: SUCCESS_MESSAGE.to_string(),
                    backend,
                    file_name: Some(file_name),
                    document_count: counts.documents,
                    node_count: counts.nodes,
                    notices: counts.notices,
                    started_at,
                    finished_at,
                }
            }
            Err(err) => {
                tracing::error!(backend = %backend, file = %file_name, "ingest failed: {err:#}");
                IngestReport {
                    status: IngestStatus::Error,
                    message: format!("An error occurred: {err}"),
                    backend,
                    file_name: Some(file_name),
                    document_count: 0,
                    node_count: 0,
                    notices: vec![],
                    started_at,
                    finished_at,
                }
            }
        }
    }

    async fn run<F>(&self, upload: UploadedFile, progress: &mut F) -> Result<IngestCounts>
    where
        F: FnMut(IngestStage) + Send,
    {
        let mut counts = IngestCounts::default();

        stage(progress, IngestStage::Clearing);
        clear_files(&self.data_folder).await?;
        clear_files(&self.vector_folder).await?;
        self.index.store().discard_local_state().await;

        stage(progress, IngestStage::Uploading);
        let target = self.data_folder.join(safe_file_name(&upload.file_name)?);
        tokio::fs::write(&target, &upload.bytes)
            .await
            .with_context(|| format!("failed writing {}", target.display()))?;

        stage(progress, IngestStage::Loading);
        let documents = reader::load_documents(&self.data_folder).await?;
        counts.documents = documents.len();

        stage(progress, IngestStage::PreparingIndex);
        if let Some(notice) = self.index.store().prepare_ingest().await? {
            counts.notices.push(notice);
        }

        stage(progress, IngestStage::EmbeddingAndIndexing);
        counts.nodes = self.index.build(&documents).await?;

        Ok(counts)
    }
}

fn stage<F: FnMut(IngestStage)>(progress: &mut F, stage: IngestStage) {
    tracing::info!(stage = stage.as_str(), "ingest stage");
    progress(stage);
}

/// Removes the files directly inside `folder`, leaving subdirectories alone.
pub async fn clear_files(folder: &Path) -> Result<()> {
    tokio::fs::create_dir_all(folder)
        .await
        .with_context(|| format!("failed creating {}", folder.display()))?;

    let mut entries = tokio::fs::read_dir(folder)
        .await
        .with_context(|| format!("failed listing {}", folder.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            tokio::fs::remove_file(entry.path())
                .await
                .with_context(|| format!("failed removing {}", entry.path().display()))?;
        }
    }
    Ok(())
}

fn safe_file_name(name: &str) -> Result<&str> {
    Path::new(name.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("invalid upload file name: {name}"))
}

pub(crate) fn normalize_text(text: &str) -> String {
    text.replace('\u{00A0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::RetrievalConfig;
    use crate::index::tests::LetterEmbedding;
    use crate::local_store::LocalStore;
    use crate::store::VectorStore;

    struct Fixture {
        _root: tempfile::TempDir,
        data: PathBuf,
        vector: PathBuf,
        ingestor: Ingestor,
    }

    fn fixture() -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let data = root.path().join("data");
        let vector = root.path().join("vector");
        let store: Arc<dyn VectorStore> = Arc::new(LocalStore::new(vector.clone()));
        let index = VectorIndex::new(
            store,
            Arc::new(LetterEmbedding::new()),
            RetrievalConfig {
                chunk_size: 1024,
                chunk_overlap: 200,
                similarity_top_k: 2,
            },
        );
        Fixture {
            ingestor: Ingestor::with_folders(data.clone(), vector.clone(), index),
            _root: root,
            data,
            vector,
        }
    }

    fn upload(name: &str, body: &str) -> UploadedFile {
        UploadedFile {
            file_name: name.to_string(),
            bytes: body.as_bytes().to_vec(),
        }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn missing_file_warns_without_touching_folders() {
        let fx = fixture();
        let mut stages = vec![];

        let report = fx.ingestor.ingest(None, |s| stages.push(s)).await;
        assert_eq!(report.status, IngestStatus::Warning);
        assert_eq!(report.message, NO_FILE_WARNING);

        let report = fx
            .ingestor
            .ingest(Some(upload("  ", "text")), |s| stages.push(s))
            .await;
        assert_eq!(report.status, IngestStatus::Warning);

        assert!(stages.is_empty());
        assert!(!fx.data.exists());
        assert!(!fx.vector.exists());
    }

    #[tokio::test]
    async fn success_replaces_previous_files_and_persists_index() {
        let fx = fixture();
        std::fs::create_dir_all(fx.data.join("keep")).unwrap();
        std::fs::create_dir_all(&fx.vector).unwrap();
        std::fs::write(fx.data.join("old.txt"), "stale document").unwrap();
        std::fs::write(fx.vector.join("stale.json"), "{}").unwrap();

        let mut stages = vec![];
        let report = fx
            .ingestor
            .ingest(
                Some(upload("../notes.txt", "The director is Ada and the theme is trains")),
                |s| stages.push(s),
            )
            .await;

        assert_eq!(report.status, IngestStatus::Success, "{}", report.message);
        assert_eq!(report.message, SUCCESS_MESSAGE);
        assert_eq!(report.backend, "local");
        assert_eq!(report.document_count, 1);
        assert_eq!(report.node_count, 1);
        assert_eq!(
            stages,
            [
                IngestStage::Clearing,
                IngestStage::Uploading,
                IngestStage::Loading,
                IngestStage::PreparingIndex,
                IngestStage::EmbeddingAndIndexing,
                IngestStage::Done,
            ]
        );

        assert_eq!(file_names(&fx.data), ["keep", "notes.txt"]);
        assert_eq!(
            file_names(&fx.vector),
            ["default__vector_store.json", "docstore.json"]
        );
    }

    #[tokio::test]
    async fn failures_are_reported_after_clearing() {
        let fx = fixture();
        std::fs::create_dir_all(&fx.vector).unwrap();
        std::fs::write(fx.vector.join("docstore.json"), "{}").unwrap();

        let report = fx
            .ingestor
            .ingest(Some(upload("blank.txt", "   \n  ")), |_| {})
            .await;

        assert_eq!(report.status, IngestStatus::Error);
        assert!(report
            .message
            .starts_with("An error occurred: no text could be extracted"));
        assert!(file_names(&fx.vector).is_empty());
        assert_eq!(file_names(&fx.data), ["blank.txt"]);
    }

    #[tokio::test]
    async fn failed_reingest_leaves_no_searchable_nodes() {
        let fx = fixture();
        let report = fx
            .ingestor
            .ingest(Some(upload("notes.txt", "Ada drives the trains")), |_| {})
            .await;
        assert_eq!(report.status, IngestStatus::Success, "{}", report.message);
        let store = fx.ingestor.index.store();
        assert_eq!(store.search(&[1.0; 26], 5).await.unwrap().len(), 1);

        let report = fx
            .ingestor
            .ingest(Some(upload("blank.txt", " ")), |_| {})
            .await;
        assert_eq!(report.status, IngestStatus::Error);

        assert!(store.search(&[1.0; 26], 5).await.unwrap().is_empty());
        assert!(store.open().await.is_err());
    }

    #[tokio::test]
    async fn pdf_upload_indexes_every_page() {
        let fx = fixture();
        let scratch = tempfile::tempdir().unwrap();
        let pdf = scratch.path().join("manual.pdf");
        crate::ingest::pdf::tests::write_text_pdf(&pdf, &["Setup steps", "Maintenance steps"]);

        let report = fx
            .ingestor
            .ingest(
                Some(UploadedFile {
                    file_name: "manual.pdf".to_string(),
                    bytes: std::fs::read(&pdf).unwrap(),
                }),
                |_| {},
            )
            .await;

        assert_eq!(report.status, IngestStatus::Success, "{}", report.message);
        assert_eq!(report.document_count, 2);
        assert_eq!(report.node_count, 2);
    }

    #[test]
    fn upload_names_keep_only_the_file_component() {
        assert_eq!(safe_file_name("/tmp/x/report.pdf").unwrap(), "report.pdf");
        assert_eq!(safe_file_name("report.pdf").unwrap(), "report.pdf");
        assert!(safe_file_name("..").is_err());
    }

    #[test]
    fn normalize_collapses_whitespace() {
        assert_eq!(normalize_text(" a\u{00A0}b \n\t c "), "a b c");
    }
}
