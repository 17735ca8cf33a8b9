//! Input discovery: find the documents of a batch and derive their outputs.
//!
//! Discovery is non-recursive and sorted, so two runs over the same
//! directory see the documents in the same order (workers may still finish
//! in any order).

use crate::error::{BatchError, DocumentError};
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

/// One HTML file of the batch and the PDF it converts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDocument {
    pub path: PathBuf,
    pub output: PathBuf,
}

impl InputDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let output = output_path_for(&path);
        Self { path, output }
    }

    /// File name for console attribution.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    /// `file://` URL of the absolute input path.
    pub fn file_url(&self) -> Result<String, DocumentError> {
        let absolute = std::path::absolute(&self.path).map_err(|e| {
            DocumentError::Navigation(format!("cannot resolve '{}': {e}", self.path.display()))
        })?;
        Url::from_file_path(&absolute)
            .map(|u| u.to_string())
            .map_err(|_| {
                DocumentError::Navigation(format!(
                    "cannot build a file URL for '{}'",
                    absolute.display()
                ))
            })
    }
}

/// `<dir>/<name>.<ext>` → `<dir>/<name>.pdf`.
pub fn output_path_for(input: &Path) -> PathBuf {
    input.with_extension("pdf")
}

/// Does `path` end in `.<extension>`, ignoring ASCII case?
pub fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(extension))
}

/// Validate `dir` and list its matching files (non-recursive, sorted).
pub fn discover_documents(dir: &Path, extension: &str) -> Result<Vec<InputDocument>, BatchError> {
    if !dir.exists() {
        return Err(BatchError::InputDirNotFound {
            path: dir.to_path_buf(),
        });
    }
    if !dir.is_dir() {
        return Err(BatchError::NotADirectory {
            path: dir.to_path_buf(),
        });
    }

    let read_err = |source| BatchError::ReadDirFailed {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let entry = entry.map_err(read_err)?;
        let path = entry.path();
        if path.is_file() && has_extension(&path, extension) {
            paths.push(path);
        }
    }
    paths.sort();

    debug!("Discovered {} .{} files in {}", paths.len(), extension, dir.display());
    Ok(paths.into_iter().map(InputDocument::new).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_replaces_extension() {
        assert_eq!(
            output_path_for(Path::new("/docs/report.html")),
            PathBuf::from("/docs/report.pdf")
        );
        assert_eq!(
            output_path_for(Path::new("/docs/Report.HTML")),
            PathBuf::from("/docs/Report.pdf")
        );
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert!(has_extension(Path::new("a.html"), "html"));
        assert!(has_extension(Path::new("a.HTML"), "html"));
        assert!(!has_extension(Path::new("a.htm"), "html"));
        assert!(!has_extension(Path::new("html"), "html"));
    }

    #[test]
    fn discovery_is_sorted_non_recursive_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.html", "a.HTML", "notes.txt", "c.pdf"] {
            std::fs::write(dir.path().join(name), "<p>x</p>").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("nested/d.html"), "<p>x</p>").unwrap();
        std::fs::create_dir(dir.path().join("dir.html")).unwrap();

        let docs = discover_documents(dir.path(), "html").unwrap();
        let names: Vec<String> = docs.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["a.HTML", "b.html"]);
        assert_eq!(docs[1].output, dir.path().join("b.pdf"));
    }

    #[test]
    fn missing_dir_is_fatal() {
        let err = discover_documents(Path::new("/definitely/not/here"), "html").unwrap_err();
        assert!(matches!(err, BatchError::InputDirNotFound { .. }));
    }

    #[test]
    fn file_instead_of_dir_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("x.html");
        std::fs::write(&file, "").unwrap();
        let err = discover_documents(&file, "html").unwrap_err();
        assert!(matches!(err, BatchError::NotADirectory { .. }));
    }

    #[test]
    fn file_url_is_absolute() {
        let doc = InputDocument::new("relative/page.html");
        let url = doc.file_url().unwrap();
        assert!(url.starts_with("file:///"), "got: {url}");
        assert!(url.ends_with("relative/page.html"));
    }
}
