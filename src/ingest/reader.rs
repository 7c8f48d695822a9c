use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use super::normalize_text;
use super::pdf::{extract_pdf_pages, page_metadata};
use crate::models::{Document, Metadata};

pub async fn load_documents(folder: &Path) -> Result<Vec<Document>> {
    let files = list_files(folder)?;
    let mut documents = Vec::new();

    for path in files {
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed reading {}", path.display()))?;
        let file_hash = sha256_hex(&bytes);
        let is_pdf = has_pdf_extension(&path);
        let base = base_metadata(&path, &file_hash, bytes.len(), is_pdf);

        if is_pdf {
            let pages = extract_pdf_pages(&path).await?;
            for (index, page) in pages.iter().enumerate() {
                documents.push(Document {
                    id: format!("{}-{}", &file_hash[..16], index),
                    text: page.text.clone(),
                    metadata: page_metadata(&base, page),
                });
            }
        } else {
            let text = normalize_text(&String::from_utf8_lossy(&bytes));
            if text.is_empty() {
                continue;
            }
            documents.push(Document {
                id: file_hash[..16].to_string(),
                text,
                metadata: base,
            });
        }
    }

    if documents.is_empty() {
        anyhow::bail!(
            "no text could be extracted from files in {}",
            folder.display()
        );
    }

    tracing::info!(
        folder = %folder.display(),
        documents = documents.len(),
        "loaded documents"
    );
    Ok(documents)
}

fn list_files(folder: &Path) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        anyhow::bail!("data folder does not exist: {}", folder.display());
    }

    let mut files: Vec<PathBuf> = WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| !entry.file_name().to_string_lossy().starts_with('.'))
        .map(|entry| entry.path().to_path_buf())
        .collect();

    files.sort();
    Ok(files)
}

fn base_metadata(path: &Path, file_hash: &str, size: usize, is_pdf: bool) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "file_name".to_string(),
        path.file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default(),
    );
    metadata.insert("file_path".to_string(), path.display().to_string());
    metadata.insert(
        "file_type".to_string(),
        if is_pdf { "application/pdf" } else { "text/plain" }.to_string(),
    );
    metadata.insert("file_size".to_string(), size.to_string());
    metadata.insert("file_hash".to_string(), file_hash.to_string());
    metadata
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
