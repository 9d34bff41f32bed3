use super::{ContentSource, RawContentUnit, SourceError, SourceKind, SourceScan, split_front_matter};
use crate::indexer::document::UnitParseError;
use crate::model::types::ContentType;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

const EXTENSIONS: &[&str] = &["md", "mdx", "markdown"];

/// A directory of markdown/MDX files, all of one content type.
#[derive(Debug, Clone)]
pub struct MarkdownTreeSource {
    name: String,
    root: PathBuf,
    content_type: ContentType,
    url_prefix: String,
    category: String,
}

impl MarkdownTreeSource {
    pub fn new(root: impl Into<PathBuf>, content_type: ContentType) -> Self {
        let root = root.into();
        Self {
            name: format!("{}:{}", content_type, root.display()),
            root,
            content_type,
            url_prefix: content_type.default_url_prefix().to_string(),
            category: default_category(content_type).to_string(),
        }
    }

    pub fn with_url_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.url_prefix = prefix.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_unit(&self, path: &Path) -> Result<RawContentUnit, UnitParseError> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        let location = relative.to_string_lossy().replace('\\', "/");
        let identifier = identifier_for(relative);

        let text = fs::read_to_string(path).map_err(|e| UnitParseError::Unreadable {
            unit: location.clone(),
            reason: e.to_string(),
        })?;
        let (metadata, body) =
            split_front_matter(&text).map_err(|e| UnitParseError::FrontMatter {
                unit: location.clone(),
                reason: e.to_string(),
            })?;

        Ok(RawContentUnit {
            identifier,
            raw_text: body.to_string(),
            metadata,
            source_type: self.content_type,
            location,
            url_prefix: self.url_prefix.clone(),
            default_category: self.category.clone(),
        })
    }
}

impl ContentSource for MarkdownTreeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Files
    }

    fn scan(&self) -> Result<SourceScan, SourceError> {
        if !self.root.is_dir() {
            return Err(SourceError::Unavailable {
                name: self.name.clone(),
                reason: format!("{} is not a directory", self.root.display()),
            });
        }

        let mut scan = SourceScan::default();
        for entry in WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(source = %self.name, error = %e, "walk_entry_skipped");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_content_extension(entry.path()) {
                continue;
            }
            match self.read_unit(entry.path()) {
                Ok(unit) => scan.units.push(unit),
                Err(e) => scan.failures.push(e),
            }
        }

        tracing::debug!(
            source = %self.name,
            units = scan.units.len(),
            failures = scan.failures.len(),
            "markdown_scan"
        );
        Ok(scan)
    }
}

pub fn default_category(content_type: ContentType) -> &'static str {
    match content_type {
        ContentType::Blog => "Blog",
        ContentType::Documentation => "Documentation",
        ContentType::Product => "Products",
        ContentType::Page => "Pages",
        ContentType::Feature => "Features",
    }
}

/// `guides/setup.mdx` → `guides/setup`; `guides/index.md` → `guides`.
fn identifier_for(relative: &Path) -> String {
    let without_ext = relative.with_extension("");
    let mut parts: Vec<String> = without_ext
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.len() > 1 && parts.last().is_some_and(|p| p == "index") {
        parts.pop();
    }
    parts.join("/")
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|s| s.starts_with('.') || s.starts_with('_'))
}

fn has_content_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
}
