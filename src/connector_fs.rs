use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A PDF found under the corpus root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfFile {
    pub path: PathBuf,
    /// Path relative to the scanned root, used as the document's `source`.
    pub relative: String,
    pub filename: String,
}

/// Recursively discover every file with a `.pdf` extension (any case).
pub fn scan_pdfs(root: &Path) -> Result<Vec<PdfFile>> {
    if !root.exists() {
        bail!("PDF folder does not exist: {}", root.display());
    }

    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_pdf(path) {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        files.push(PdfFile {
            path: path.to_path_buf(),
            relative: relative.to_string_lossy().to_string(),
            filename,
        });
    }

    files.sort_by(|a, b| a.relative.cmp(&b.relative));

    Ok(files)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn finds_pdfs_recursively_case_insensitive() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("class9/physics")).unwrap();
        fs::write(root.join("top.pdf"), b"x").unwrap();
        fs::write(root.join("class9/physics/motion.PDF"), b"x").unwrap();
        fs::write(root.join("class9/notes.txt"), b"x").unwrap();
        fs::write(root.join("class9/pdf"), b"x").unwrap();

        let files = scan_pdfs(root).unwrap();
        let rels: Vec<_> = files.iter().map(|f| f.relative.replace('\\', "/")).collect();
        assert_eq!(rels, vec!["class9/physics/motion.PDF", "top.pdf"]);
        assert_eq!(files[0].filename, "motion.PDF");
    }

    #[test]
    fn missing_root_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_pdfs(&tmp.path().join("absent")).is_err());
    }

    #[test]
    fn empty_root_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        assert!(scan_pdfs(tmp.path()).unwrap().is_empty());
    }
}
