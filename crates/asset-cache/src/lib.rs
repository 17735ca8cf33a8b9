//! # asset-cache
//!
//! Download-once, on-disk cache of the third-party assets (scripts, style
//! sheets, fonts) that rendered HTML pages pull from public CDNs, so a batch
//! renderer can serve them locally instead of hitting the network for every
//! document.
//!
//! ## How it works
//!
//! On [`DependencyCache::populate`]:
//!
//! 1. Every [`AssetEntry`] of the [`AssetManifest`] maps one remote URL to a
//!    plain file name inside the cache directory.
//! 2. Entries whose file already exists are left untouched. Entries are
//!    keyed by source URL, not by content, so a stale file is never
//!    refreshed automatically; delete it to force a re-download.
//! 3. Missing entries are downloaded and written via temp-file + rename.
//!    The first failure aborts population: a batch should not start with a
//!    half-filled cache.
//! 4. All entries are loaded into memory; the returned cache is read-only.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use asset_cache::{asset_cache_dir, AssetManifest, DependencyCache};
//!
//! let cache = DependencyCache::populate(
//!     &asset_cache_dir(),
//!     &AssetManifest::default(),
//!     Some(&|url, downloaded, total| {
//!         if let Some(t) = total {
//!             eprint!("\r{url}: {downloaded}/{t} bytes");
//!         }
//!     }),
//! )
//! .expect("asset download failed");
//!
//! if let Some(asset) = cache.lookup("https://cdn.jsdelivr.net/npm/mermaid@10.9.1/dist/mermaid.min.js") {
//!     println!("{} bytes of {}", asset.bytes.len(), asset.mime);
//! }
//! ```
//!
//! ## Environment variable overrides
//!
//! - `HTML2PDF_ASSET_CACHE_DIR` — override the default cache directory.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Assets pre-fetched when no manifest is supplied.
///
/// Pinned versions: an unpinned CDN URL would silently change under a cache
/// that never revalidates.
pub const DEFAULT_ASSETS: &[(&str, &str)] = &[
    (
        "https://cdn.jsdelivr.net/npm/mermaid@10.9.1/dist/mermaid.min.js",
        "mermaid-10.9.1.min.js",
    ),
    (
        "https://cdn.jsdelivr.net/npm/mathjax@3.2.2/es5/tex-mml-chtml.js",
        "mathjax-3.2.2-tex-mml-chtml.js",
    ),
    (
        "https://cdnjs.cloudflare.com/ajax/libs/highlight.js/11.9.0/highlight.min.js",
        "highlight-11.9.0.min.js",
    ),
    (
        "https://cdn.jsdelivr.net/npm/chart.js@4.4.1/dist/chart.umd.min.js",
        "chart-4.4.1.umd.min.js",
    ),
];

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by asset-cache operations.
#[derive(Error, Debug)]
pub enum AssetCacheError {
    /// Could not create or navigate the local cache directory.
    #[error("Cache directory error: {0}")]
    CacheDir(#[source] std::io::Error),

    /// Network download failed.
    #[error("Download of '{url}' failed: {reason}")]
    Download { url: String, reason: String },

    /// The downloaded bytes could not be persisted.
    #[error("Failed to write cached asset '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cached file exists in the manifest but could not be read back.
    #[error("Failed to read cached asset '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A manifest entry is malformed (bad `URL=FILE` pair, path separators…).
    #[error("Invalid asset entry: {0}")]
    InvalidEntry(String),
}

// ── Manifest ─────────────────────────────────────────────────────────────────

/// One remote URL and the file name it is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    pub url: String,
    pub file_name: String,
}

impl AssetEntry {
    /// Validate and build an entry.
    ///
    /// The file name must be a bare name: it is joined onto the cache
    /// directory and must never escape it.
    pub fn new(url: impl Into<String>, file_name: impl Into<String>) -> Result<Self, AssetCacheError> {
        let url = url.into();
        let file_name = file_name.into();

        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(AssetCacheError::InvalidEntry(format!(
                "'{url}' is not an HTTP/HTTPS URL"
            )));
        }
        if file_name.is_empty()
            || file_name == "."
            || file_name == ".."
            || file_name.contains(['/', '\\'])
        {
            return Err(AssetCacheError::InvalidEntry(format!(
                "'{file_name}' is not a plain file name"
            )));
        }

        Ok(Self { url, file_name })
    }

    /// Parse a `URL=FILE` pair as given on the command line.
    pub fn parse(raw: &str) -> Result<Self, AssetCacheError> {
        // URLs may contain '=' in their query string; the file name never does.
        let (url, file) = raw.rsplit_once('=').ok_or_else(|| {
            AssetCacheError::InvalidEntry(format!("expected URL=FILE, got '{raw}'"))
        })?;
        Self::new(url.trim(), file.trim())
    }
}

/// Static mapping from remote asset URLs to local file names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetManifest {
    entries: Vec<AssetEntry>,
}

impl Default for AssetManifest {
    fn default() -> Self {
        Self {
            entries: DEFAULT_ASSETS
                .iter()
                .map(|(url, file)| AssetEntry {
                    url: (*url).to_string(),
                    file_name: (*file).to_string(),
                })
                .collect(),
        }
    }
}

impl AssetManifest {
    /// A manifest with no entries.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add an entry, replacing any existing entry for the same URL.
    pub fn with_entry(mut self, entry: AssetEntry) -> Self {
        let key = canonical_url(&entry.url);
        self.entries.retain(|e| canonical_url(&e.url) != key);
        self.entries.push(entry);
        self
    }

    pub fn entries(&self) -> &[AssetEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Cache directory resolution ───────────────────────────────────────────────

/// Returns the directory cached assets are stored in.
///
/// Default locations:
/// - **macOS**: `~/Library/Caches/html2pdf/assets/`
/// - **Linux**: `~/.cache/html2pdf/assets/`
/// - **Windows**: `%LOCALAPPDATA%\html2pdf\assets\`
///
/// Override by setting `HTML2PDF_ASSET_CACHE_DIR`.
pub fn asset_cache_dir() -> PathBuf {
    if let Ok(override_dir) = std::env::var("HTML2PDF_ASSET_CACHE_DIR") {
        return PathBuf::from(override_dir);
    }

    let base = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".cache")))
        .unwrap_or_else(std::env::temp_dir);

    base.join("html2pdf").join("assets")
}

/// Canonical lookup key for a request URL: the fragment never reaches the
/// server, so `lib.js#x` and `lib.js` are the same asset.
pub fn canonical_url(url: &str) -> &str {
    let url = url.trim();
    match url.split_once('#') {
        Some((head, _)) => head,
        None => url,
    }
}

/// Guess a `Content-Type` from the cached file's extension.
pub fn mime_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "js" | "mjs" => "application/javascript",
        "css" => "text/css",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

// ── Cache ────────────────────────────────────────────────────────────────────

/// One asset held in memory, ready to be served.
#[derive(Debug, Clone)]
pub struct CachedAsset {
    pub bytes: Arc<[u8]>,
    pub mime: &'static str,
}

/// Read-only, in-memory view of a fully populated cache directory.
#[derive(Debug, Clone, Default)]
pub struct DependencyCache {
    dir: PathBuf,
    assets: HashMap<String, CachedAsset>,
}

impl DependencyCache {
    /// Download every missing manifest entry into `dir`, then load all of
    /// them into memory.
    ///
    /// `on_progress` receives `(url, bytes_downloaded, total_size_option)`
    /// during each download. Pass `None` to suppress progress callbacks.
    pub fn populate(
        dir: &Path,
        manifest: &AssetManifest,
        on_progress: Option<&dyn Fn(&str, u64, Option<u64>)>,
    ) -> Result<Self, AssetCacheError> {
        std::fs::create_dir_all(dir).map_err(AssetCacheError::CacheDir)?;

        let missing: Vec<&AssetEntry> = manifest
            .entries()
            .iter()
            .filter(|e| !dir.join(&e.file_name).exists())
            .collect();

        if !missing.is_empty() {
            let client = reqwest::blocking::Client::builder()
                .user_agent(concat!("asset-cache/", env!("CARGO_PKG_VERSION")))
                .redirect(reqwest::redirect::Policy::limited(5))
                .build()
                .map_err(|e| AssetCacheError::Download {
                    url: String::new(),
                    reason: e.to_string(),
                })?;

            for entry in missing {
                let bytes = download_bytes(&client, &entry.url, on_progress)?;
                write_atomic(&dir.join(&entry.file_name), &bytes)?;
            }
        }

        Self::open(dir, manifest)
    }

    /// Load an already-populated cache without touching the network.
    ///
    /// Every manifest entry must be present on disk.
    pub fn open(dir: &Path, manifest: &AssetManifest) -> Result<Self, AssetCacheError> {
        let mut assets = HashMap::with_capacity(manifest.len());

        for entry in manifest.entries() {
            let path = dir.join(&entry.file_name);
            let bytes = std::fs::read(&path).map_err(|source| AssetCacheError::Read {
                path: path.clone(),
                source,
            })?;
            assets.insert(
                canonical_url(&entry.url).to_string(),
                CachedAsset {
                    bytes: Arc::from(bytes),
                    mime: mime_for(&entry.file_name),
                },
            );
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            assets,
        })
    }

    /// Find the cached copy of `url`, if any.
    pub fn lookup(&self, url: &str) -> Option<&CachedAsset> {
        self.assets.get(canonical_url(url))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

/// Streams a URL into a `Vec<u8>`, calling `on_progress` every 64 KiB.
fn download_bytes(
    client: &reqwest::blocking::Client,
    url: &str,
    on_progress: Option<&dyn Fn(&str, u64, Option<u64>)>,
) -> Result<Vec<u8>, AssetCacheError> {
    let download_err = |reason: String| AssetCacheError::Download {
        url: url.to_string(),
        reason,
    };

    let mut response = client
        .get(url)
        .send()
        .map_err(|e| download_err(e.to_string()))?;

    if !response.status().is_success() {
        return Err(download_err(format!("HTTP {}", response.status())));
    }

    let total = response.content_length();
    let mut buf = Vec::with_capacity(total.unwrap_or(256 * 1024) as usize);
    let mut chunk = vec![0u8; 64 * 1024]; // 64 KiB
    let mut downloaded: u64 = 0;

    loop {
        match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                downloaded += n as u64;
                if let Some(cb) = on_progress {
                    cb(url, downloaded, total);
                }
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(download_err(format!("Read error: {e}"))),
        }
    }

    Ok(buf)
}

/// Write `bytes` next to `dest` and rename into place, so an interrupted
/// download never leaves a truncated file that would count as cached.
fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), AssetCacheError> {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{file_name}.part"));

    let write = || -> std::io::Result<()> {
        let mut f = std::fs::File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        std::fs::rename(&tmp, dest)
    };

    write().map_err(|source| {
        let _ = std::fs::remove_file(&tmp);
        AssetCacheError::Write {
            path: dest.to_path_buf(),
            source,
        }
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
