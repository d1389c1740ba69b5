// ABOUTME: ExtractFromFiles extractor: downloads linked PDF and DOCX documents and checks for text.
// ABOUTME: Parsing runs on the worker pool; failed or oversize downloads count as not extractable.

use std::io::{Cursor, Read};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use serde_json::json;
use tracing::{debug, warn};

use crate::content::Content;
use crate::error::MetaError;
use crate::extractors::links::file_extension;
use crate::extractors::{Extractor, ExtractorContext};
use crate::pool::WorkerPool;
use crate::resource::{fetch, FetchOptions};
use crate::result::ExtractorResult;

/// Fraction of linked documents that must yield text for the top rating.
const EXTRACTABLE_THRESHOLD: f64 = 0.5;

/// Document formats text extraction is attempted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Docx,
}

impl DocumentKind {
    pub fn from_url(url: &str) -> Option<Self> {
        match file_extension(url)?.as_str() {
            "pdf" => Some(DocumentKind::Pdf),
            "docx" => Some(DocumentKind::Docx),
            _ => None,
        }
    }
}

/// Extract the text of a document.
pub fn extract_text(kind: DocumentKind, bytes: &[u8]) -> anyhow::Result<String> {
    match kind {
        DocumentKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| anyhow::anyhow!("unreadable PDF: {}", e)),
        DocumentKind::Docx => docx_text(bytes),
    }
}

fn docx_text(bytes: &[u8]) -> anyhow::Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut xml = Vec::new();
    archive.by_name("word/document.xml")?.read_to_end(&mut xml)?;

    let mut reader = Reader::from_reader(xml.as_slice());
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut parts = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Text(ref e) => parts.push(e.decode()?.into_owned()),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(parts.join(" "))
}

/// Rates whether text can be recovered from the documents a page links to.
#[derive(Debug, Clone)]
pub struct ExtractFromFiles {
    client: reqwest::Client,
    pool: WorkerPool,
    max_file_size: usize,
    download_timeout: Duration,
    concurrency: usize,
    allow_private_networks: bool,
}

impl ExtractFromFiles {
    pub fn new(ctx: &ExtractorContext) -> Self {
        Self {
            client: ctx.client.clone(),
            pool: ctx.pool.clone(),
            max_file_size: ctx.settings.max_file_size,
            download_timeout: ctx.settings.file_download_timeout,
            concurrency: ctx.settings.file_download_concurrency.max(1),
            allow_private_networks: ctx.settings.allow_private_networks,
        }
    }

    /// Whether text could be recovered from one document. Failures are logged, not raised.
    async fn is_extractable(&self, url: &str, kind: DocumentKind) -> bool {
        let opts = FetchOptions {
            allow_private_networks: self.allow_private_networks,
            max_body: self.max_file_size,
            ..Default::default()
        };
        let body = match tokio::time::timeout(self.download_timeout, fetch(&self.client, url, &opts)).await {
            Ok(Ok(result)) => result.body,
            Ok(Err(e)) => {
                warn!(url, error = %e, "linked file download failed");
                return false;
            }
            Err(_) => {
                warn!(url, "linked file download timed out");
                return false;
            }
        };

        match self.pool.run("ExtractFromFiles", move || extract_text(kind, &body)).await {
            Ok(Ok(text)) => !text.trim().is_empty(),
            Ok(Err(e)) => {
                debug!(url, error = %e, "no text in linked file");
                false
            }
            Err(e) => {
                warn!(url, error = %e, "linked file parser crashed");
                false
            }
        }
    }
}

#[async_trait]
impl Extractor for ExtractFromFiles {
    fn key(&self) -> &str {
        "extract_from_files"
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let files: Vec<(String, DocumentKind)> = content
            .outline()
            .await?
            .links
            .iter()
            .filter_map(|url| DocumentKind::from_url(url).map(|kind| (url.clone(), kind)))
            .collect();

        if files.is_empty() {
            return Ok(ExtractorResult::new(5, "No linked documents to extract text from")
                .with_extra(json!({"extractable": [], "not_extractable": []})));
        }

        let outcomes: Vec<(String, bool)> = stream::iter(files)
            .map(|(url, kind)| async move {
                let ok = self.is_extractable(&url, kind).await;
                (url, ok)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        let (mut extractable, mut not_extractable) = (Vec::new(), Vec::new());
        for (url, ok) in outcomes {
            if ok {
                extractable.push(url);
            } else {
                not_extractable.push(url);
            }
        }

        let total = extractable.len() + not_extractable.len();
        let fraction = extractable.len() as f64 / total as f64;
        let explanation = format!(
            "Text extracted from {} of {} linked documents",
            extractable.len(),
            total
        );
        let rating = if fraction >= EXTRACTABLE_THRESHOLD { 5 } else { 0 };
        Ok(ExtractorResult::new(rating, explanation).with_extra(json!({
            "extractable": extractable,
            "not_extractable": not_extractable,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Payload;
    use crate::options::Settings;
    use httpmock::prelude::*;
    use std::io::Write;

    fn docx(text: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/document.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>"#,
            text
        );
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn extractor(max_file_size: usize) -> ExtractFromFiles {
        extractor_with(
            Settings::builder()
                .allow_private_networks(true)
                .max_file_size(max_file_size)
                .file_download_timeout(Duration::from_secs(5))
                .build(),
        )
    }

    fn extractor_with(settings: Settings) -> ExtractFromFiles {
        ExtractFromFiles::new(&ExtractorContext {
            settings,
            client: reqwest::Client::new(),
            pool: WorkerPool::new(2),
        })
    }

    fn page(base: &str, links: &[&str]) -> Content {
        let anchors: String = links
            .iter()
            .map(|l| format!("<a href=\"{}\">doc</a>", l))
            .collect();
        Content::from_payload(
            base,
            Payload {
                html: format!("<html><body>{}</body></html>", anchors),
                ..Default::default()
            },
        )
    }

    #[test]
    fn reads_docx_text() {
        let text = extract_text(DocumentKind::Docx, &docx("Hello world")).unwrap();
        assert_eq!(text, "Hello world");
        assert!(extract_text(DocumentKind::Docx, b"not a zip").is_err());
    }

    #[tokio::test]
    async fn no_documents_rates_five() {
        let result = extractor(1024)
            .extract(&page("https://example.com/", &["/about.html"]))
            .await
            .unwrap();
        assert_eq!(result.rating, 5);
        assert!(result.explanation.starts_with("No linked documents"));
    }

    #[tokio::test]
    async fn half_extractable_rates_five() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/good.docx");
            then.status(200).body(docx("Annual report"));
        });
        server.mock(|when, then| {
            when.method(GET).path("/broken.pdf");
            then.status(200).body("definitely not a pdf");
        });

        let result = extractor(1024 * 1024)
            .extract(&page(&server.url("/"), &["/good.docx", "/broken.pdf"]))
            .await
            .unwrap();
        assert_eq!(result.rating, 5);
        let extra = result.extra.unwrap();
        assert_eq!(extra["extractable"].as_array().unwrap().len(), 1);
        assert_eq!(extra["not_extractable"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_and_oversize_downloads_are_not_extractable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing.pdf");
            then.status(404);
        });
        server.mock(|when, then| {
            when.method(GET).path("/huge.docx");
            then.status(200).body(vec![0u8; 4096]);
        });
        server.mock(|when, then| {
            when.method(GET).path("/ok.docx");
            then.status(200).body(docx("x"));
        });

        let result = extractor(2048)
            .extract(&page(
                &server.url("/"),
                &["/missing.pdf", "/huge.docx", "/ok.docx"],
            ))
            .await
            .unwrap();
        assert_eq!(result.rating, 0);
        assert!(result.explanation.contains("1 of 3"));
    }

    #[tokio::test]
    async fn downloads_respect_the_concurrency_limit() {
        let server = MockServer::start();
        let links = ["/a.docx", "/b.docx", "/c.docx"];
        for path in links {
            server.mock(|when, then| {
                when.method(GET).path(path);
                then.status(200)
                    .delay(Duration::from_millis(400))
                    .body(docx("text"));
            });
        }

        let sequential = extractor_with(
            Settings::builder()
                .allow_private_networks(true)
                .file_download_timeout(Duration::from_secs(5))
                .file_download_concurrency(1)
                .build(),
        );
        let started = std::time::Instant::now();
        let result = sequential
            .extract(&page(&server.url("/"), &links))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1150));
        assert_eq!(result.rating, 5);
        assert!(result.explanation.contains("3 of 3"));
    }
}
