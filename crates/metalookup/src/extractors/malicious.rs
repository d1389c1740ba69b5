// ABOUTME: MaliciousExtensions extractor: classifies the file extensions of linked resources.
// ABOUTME: Executable formats rate 0, document and archive formats rate 4, anything else 5.

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::content::Content;
use crate::error::MetaError;
use crate::extractors::links::file_extension;
use crate::extractors::Extractor;
use crate::result::ExtractorResult;

const MALICIOUS_EXTENSIONS: &[&str] = &[
    "exe", "bat", "cmd", "com", "scr", "pif", "vbs", "vbe", "msi", "jar", "ps1", "dll", "hta",
    "cpl", "msc", "wsf", "lnk", "reg", "sh", "apk",
];

const DANGEROUS_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "docm", "xls", "xlsx", "xlsm", "ppt", "pptx", "pptm", "rtf", "zip",
    "rar", "7z", "gz", "tar", "iso", "dmg", "swf",
];

/// Rating for a set of distinct extensions.
pub fn classify<'a>(extensions: impl IntoIterator<Item = &'a str>) -> (u8, Vec<String>) {
    let (mut malicious, mut dangerous) = (Vec::new(), Vec::new());
    for ext in extensions {
        if MALICIOUS_EXTENSIONS.contains(&ext) {
            malicious.push(ext.to_string());
        } else if DANGEROUS_EXTENSIONS.contains(&ext) {
            dangerous.push(ext.to_string());
        }
    }
    if !malicious.is_empty() {
        (0, malicious)
    } else if !dangerous.is_empty() {
        (4, dangerous)
    } else {
        (5, Vec::new())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MaliciousExtensions;

#[async_trait]
impl Extractor for MaliciousExtensions {
    fn key(&self) -> &str {
        "malicious_extensions"
    }

    async fn extract(&self, content: &Content) -> Result<ExtractorResult, MetaError> {
        let page = content.page().await?;
        let mut urls = content.outline().await?.links.clone();
        urls.extend(page.requests.iter().map(|r| r.url.clone()));

        let extensions: BTreeSet<String> = urls.iter().filter_map(|u| file_extension(u)).collect();
        let (rating, flagged) = classify(extensions.iter().map(String::as_str));
        let explanation = match rating {
            0 => format!("Links to potentially malicious files: {}", flagged.join(", ")),
            4 => format!("Links to potentially dangerous files: {}", flagged.join(", ")),
            _ => "No malicious or dangerous file extensions found".to_string(),
        };
        Ok(ExtractorResult::new(rating, explanation).with_extra_set(extensions))
    }
}
