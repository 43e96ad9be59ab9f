//! Workbook persistence as a JSON document, replaced atomically on save.

use std::path::{Path, PathBuf};

use anyhow::Context;
use leadsync_core::Workbook;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct WorkbookFile {
    path: PathBuf,
}

impl WorkbookFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> anyhow::Result<Workbook> {
        let bytes = fs::read(&self.path)
            .await
            .with_context(|| format!("reading workbook {}", self.path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing workbook {}", self.path.display()))
    }

    pub async fn save(&self, workbook: &Workbook) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(workbook).context("serializing workbook")?;
        write_atomic(&self.path, &bytes).await
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
///
/// Readers observe either the previous content or the new content, never a torn file.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating directory {}", parent.display()))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    drop(file);

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadsync_core::RowStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_then_load_preserves_cells() {
        let dir = tempdir().expect("tempdir");
        let file = WorkbookFile::new(dir.path().join("nested").join("workbook.json"));
        let mut workbook = Workbook::new().with_sheet("GM - RAW", &[&["name"], &["Acme"]]);
        workbook.set_cell("GM - RAW", 3, 0, "Globex").expect("set");

        file.save(&workbook).await.expect("save");
        let loaded = file.load().await.expect("load");

        assert_eq!(loaded, workbook);
    }

    #[tokio::test]
    async fn save_replaces_previous_content_without_leftovers() {
        let dir = tempdir().expect("tempdir");
        let file = WorkbookFile::new(dir.path().join("workbook.json"));
        file.save(&Workbook::new().with_sheet("A", &[&["name"]]))
            .await
            .expect("first save");
        file.save(&Workbook::new().with_sheet("B", &[&["name"]]))
            .await
            .expect("second save");

        let loaded = file.load().await.expect("load");
        assert_eq!(loaded.sheet_names(), vec!["B".to_string()]);

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|e| e.ok())
            .collect();
        assert_eq!(entries.len(), 1, "temp files must not be left behind");
    }

    #[tokio::test]
    async fn missing_file_reports_path() {
        let dir = tempdir().expect("tempdir");
        let file = WorkbookFile::new(dir.path().join("absent.json"));
        let err = file.load().await.expect_err("missing file");
        assert!(format!("{err:#}").contains("absent.json"));
    }
}
