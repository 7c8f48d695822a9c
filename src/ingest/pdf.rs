use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;

use super::normalize_text;
use crate::models::Metadata;

#[derive(Debug, Clone, PartialEq)]
pub struct PdfPage {
    pub page_label: Option<String>,
    pub text: String,
}

pub async fn extract_pdf_pages(pdf_path: &Path) -> Result<Vec<PdfPage>> {
    let mut pages = Vec::new();

    if has_command("pdftotext").await {
        let page_count = get_pdf_page_count(pdf_path).await.unwrap_or(0);
        for page in 1..=page_count {
            let output = Command::new("pdftotext")
                .arg("-f")
                .arg(page.to_string())
                .arg("-l")
                .arg(page.to_string())
                .arg("-layout")
                .arg("-nopgbrk")
                .arg(pdf_path)
                .arg("-")
                .output()
                .await
                .with_context(|| format!("failed to run pdftotext for page {}", page))?;

            if !output.status.success() {
                continue;
            }

            let text = normalize_text(&String::from_utf8_lossy(&output.stdout));
            if text.is_empty() {
                continue;
            }

            pages.push(PdfPage {
                page_label: Some(page.to_string()),
                text,
            });
        }
    }

    if pages.is_empty() {
        pages = extract_with_pdf_extract(pdf_path).await?;
    }

    Ok(pages)
}

pub fn page_metadata(base: &Metadata, page: &PdfPage) -> Metadata {
    let mut metadata = base.clone();
    if let Some(label) = &page.page_label {
        metadata.insert("page_label".to_string(), label.clone());
    }
    metadata
}

async fn extract_with_pdf_extract(pdf_path: &Path) -> Result<Vec<PdfPage>> {
    let pdf_path = pdf_path.to_path_buf();
    let raw_pages =
        tokio::task::spawn_blocking(move || pdf_extract::extract_text_by_pages(&pdf_path))
            .await
            .context("PDF extraction task panicked")?
            .context("failed to extract text from PDF")?;

    Ok(label_pages(raw_pages))
}

fn label_pages(raw_pages: Vec<String>) -> Vec<PdfPage> {
    raw_pages
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let text = normalize_text(&raw);
            (!text.is_empty()).then(|| PdfPage {
                page_label: Some((index + 1).to_string()),
                text,
            })
        })
        .collect()
}

async fn get_pdf_page_count(pdf_path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo")
        .arg(pdf_path)
        .output()
        .await
        .context("failed to run pdfinfo")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("pdfinfo exited with non-zero status"));
    }

    parse_page_count(&String::from_utf8_lossy(&output.stdout))
}

fn parse_page_count(pdfinfo_output: &str) -> Result<usize> {
    let regex = Regex::new(r"(?m)^Pages:\s+(\d+)\s*$")?;
    regex
        .captures(pdfinfo_output)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .ok_or_else(|| anyhow::anyhow!("unable to parse page count from pdfinfo"))
}

async fn has_command(binary: &str) -> bool {
    // poppler tools exit non-zero for --version, so probe PATH with `which`.
    Command::new("which")
        .arg(binary)
        .output()
        .await
        .map(|out| out.status.success() && !out.stdout.is_empty())
        .unwrap_or(false)
}
