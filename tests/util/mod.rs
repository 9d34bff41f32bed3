use content_search::config::{ContentRootConfig, SearchConfig};
use content_search::model::types::ContentType;
use content_search::service::SearchService;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

type LogBuffer = Arc<Mutex<Vec<u8>>>;

/// Collects formatted log lines emitted while its guard is installed.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: LogBuffer,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: LogBuffer::default(),
        }
    }

    /// Thread-local subscriber; events from other threads are not captured.
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let buffer = self.buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(move || BufferWriter(buffer.clone()))
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

#[allow(dead_code)]
struct BufferWriter(LogBuffer);

impl Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[macro_export]
macro_rules! assert_logs_contain {
    ($tracing:expr, $needle:expr) => {{
        let out = $tracing.output();
        assert!(
            out.contains($needle),
            "expected logs to contain `{}` but were:\n{}",
            $needle,
            out
        );
    }};
}

// -------- Content tree fixtures --------

/// A temporary site: markdown roots per content type plus an optional catalog.
#[allow(dead_code)]
pub struct ContentFixture {
    pub dir: TempDir,
    roots: Vec<ContentRootConfig>,
    catalog: Option<PathBuf>,
}

#[allow(dead_code)]
impl ContentFixture {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
            roots: Vec::new(),
            catalog: None,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Register `<tmp>/<name>` as a content root of `content_type`.
    pub fn root(mut self, name: &str, content_type: ContentType) -> Self {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).expect("create root");
        self.roots.push(ContentRootConfig {
            path,
            content_type,
            url_prefix: None,
            category: None,
        });
        self
    }

    /// Write a markdown file with optional YAML front matter.
    pub fn page(self, relative: &str, front_matter: &str, body: &str) -> Self {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        let text = if front_matter.trim().is_empty() {
            body.to_string()
        } else {
            format!("---\n{}\n---\n{}", front_matter.trim(), body)
        };
        std::fs::write(&path, text).expect("write page");
        self
    }

    /// Write `catalog.json` with the given entries and register it.
    pub fn catalog(mut self, entries: Vec<Value>) -> Self {
        let path = self.dir.path().join("catalog.json");
        std::fs::write(&path, serde_json::to_string_pretty(&entries).expect("json"))
            .expect("write catalog");
        self.catalog = Some(path);
        self
    }

    pub fn config(&self) -> SearchConfig {
        SearchConfig {
            content_roots: self.roots.clone(),
            catalog_path: self.catalog.clone(),
            ..SearchConfig::default()
        }
    }

    pub fn service(&self) -> SearchService {
        SearchService::from_config(&self.config())
    }

    /// Write a search.toml describing this fixture and return its path.
    pub fn write_config_file(&self) -> PathBuf {
        let mut text = String::from("ttl_secs = 600\n");
        if let Some(catalog) = &self.catalog {
            text.push_str(&format!("catalog_path = {:?}\n", catalog.display().to_string()));
        }
        for root in &self.roots {
            text.push_str(&format!(
                "\n[[content_roots]]\npath = {:?}\ntype = \"{}\"\n",
                root.path.display().to_string(),
                root.content_type
            ));
        }
        let path = self.dir.path().join("search.toml");
        std::fs::write(&path, text).expect("write config");
        path
    }
}

/// Front matter for a dated blog post.
#[allow(dead_code)]
pub fn post_front_matter(title: &str, date: &str) -> String {
    format!("title: \"{title}\"\ndate: {date}\ntags: [news]")
}

/// Catalog entry with the four required fields.
#[allow(dead_code)]
pub fn catalog_entry(id: &str, title: &str, description: &str) -> Value {
    serde_json::json!({
        "id": id,
        "title": title,
        "description": description,
        "url": format!("/products/{id}"),
    })
}
