use crate::repair::{RepairEngine, RepairReport, SplitPolicy};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Summary of a batch repair, written as `manifest.json` in the output root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairManifest {
    pub export_id: String,
    pub timestamp_utc: u128,
    pub input_root: PathBuf,
    pub output_root: PathBuf,
    pub totals: RepairReport,
    pub files: Vec<CleanedFileInfo>,
    pub failed: Vec<FailedFileInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedFileInfo {
    pub input: PathBuf,
    pub output: PathBuf,
    pub sha256: String,
    pub report: RepairReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedFileInfo {
    pub input: PathBuf,
    pub error: String,
}

/// Map a session file under `input_root` to the same relative location under
/// `output_root`.
pub fn mirror_path(input_root: &Path, output_root: &Path, file: &Path) -> Result<PathBuf> {
    let relative = file.strip_prefix(input_root).with_context(|| {
        format!("{} is not under {}", file.display(), input_root.display())
    })?;
    Ok(output_root.join(relative))
}

/// Resolve where a single repaired session file is written.
///
/// An explicitly requested output that is not an existing directory is the
/// file path itself. Otherwise `output` is treated as a directory and the
/// cleaned file keeps the input's file name inside it.
pub async fn single_file_output(input: &Path, output: &Path, explicit: bool) -> Result<PathBuf> {
    let output_is_dir = tokio::fs::metadata(output)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false);
    let resolved = if explicit && !output_is_dir {
        output.to_path_buf()
    } else {
        let name = input
            .file_name()
            .with_context(|| format!("{} has no file name", input.display()))?;
        output.join(name)
    };

    if resolved == input {
        bail!("refusing to repair {} in place", input.display());
    }
    Ok(resolved)
}

/// List the session files of a capture tree: every `.csv` file inside each
/// per-device subdirectory of `root`, sorted.
pub async fn collect_session_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for device_dir in list_dir(root).await? {
        if !tokio::fs::metadata(&device_dir).await?.is_dir() {
            continue;
        }
        for path in list_dir(&device_dir).await? {
            if is_session_file(&path) && tokio::fs::metadata(&path).await?.is_file() {
                out.push(path);
            }
        }
    }
    out.sort();
    Ok(out)
}

async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("listing {}", dir.display()))?;
    let mut out = Vec::new();
    while let Some(ent) = entries.next_entry().await? {
        out.push(ent.path());
    }
    Ok(out)
}

fn is_session_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

pub async fn file_checksum(path: &Path) -> Result<String> {
    let data = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&data);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Repair every session file in a capture tree into a mirrored tree.
///
/// A file that cannot be read or written is recorded in the manifest and the
/// batch moves on to the next one.
pub async fn repair_tree<P: SplitPolicy>(
    engine: &RepairEngine<P>,
    input_root: &Path,
    output_root: &Path,
) -> Result<RepairManifest> {
    tracing::info!(
        "repairing capture tree {} into {}",
        input_root.display(),
        output_root.display()
    );

    let sessions = collect_session_files(input_root).await?;
    tokio::fs::create_dir_all(output_root)
        .await
        .with_context(|| format!("creating {}", output_root.display()))?;

    let mut totals = RepairReport::default();
    let mut files = Vec::new();
    let mut failed = Vec::new();

    for input in sessions {
        let output = mirror_path(input_root, output_root, &input)?;
        match engine.repair_file(&input, &output).await {
            Ok(report) => {
                totals.merge(&report);
                let sha256 = file_checksum(&output).await?;
                files.push(CleanedFileInfo { input, output, sha256, report });
            }
            Err(e) => {
                tracing::error!("failed to repair {}: {:#}", input.display(), e);
                failed.push(FailedFileInfo { input, error: format!("{:#}", e) });
            }
        }
    }

    let timestamp_utc = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_millis();
    let manifest = RepairManifest {
        export_id: format!("repair-{}", timestamp_utc),
        timestamp_utc,
        input_root: input_root.to_path_buf(),
        output_root: output_root.to_path_buf(),
        totals,
        files,
        failed,
    };

    let manifest_path = output_root.join("manifest.json");
    let manifest_json = serde_json::to_string_pretty(&manifest)?;
    tokio::fs::write(&manifest_path, manifest_json).await?;

    tracing::info!(
        "repair complete: {} files, {} failed, {} of {} rows kept ({})",
        manifest.files.len(),
        manifest.failed.len(),
        manifest.totals.rows_accepted,
        manifest.totals.rows_read,
        manifest_path.display()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::header_line;
    use tempfile::TempDir;

    const ROW: &str = "1714790400.123456512,700,300,150,200,0.10,0.20,0.30,0.90";

    #[test]
    fn test_mirror_path() -> Result<()> {
        let mirrored = mirror_path(
            Path::new("/data/raw"),
            Path::new("/data/clean"),
            Path::new("/data/raw/left/waveCOM6_1.5.csv"),
        )?;
        assert_eq!(mirrored, PathBuf::from("/data/clean/left/waveCOM6_1.5.csv"));

        let outside = Path::new("/elsewhere/a.csv");
        assert!(mirror_path(Path::new("/data/raw"), Path::new("/out"), outside).is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_single_file_output_resolution() -> Result<()> {
        let tmpdir = TempDir::new()?;
        let input = tmpdir.path().join("raw").join("waveCOM6_1.5.csv");
        let cleaned = tmpdir.path().join("cleaned");

        // Configured default: a directory, created on demand.
        let resolved = single_file_output(&input, &cleaned, false).await?;
        assert_eq!(resolved, cleaned.join("waveCOM6_1.5.csv"));

        // Explicit path that does not exist yet is the file itself.
        let named = tmpdir.path().join("fixed.csv");
        assert_eq!(single_file_output(&input, &named, true).await?, named);

        // Explicit path naming an existing directory goes inside it.
        tokio::fs::create_dir_all(&cleaned).await?;
        let resolved = single_file_output(&input, &cleaned, true).await?;
        assert_eq!(resolved, cleaned.join("waveCOM6_1.5.csv"));

        assert!(single_file_output(&input, &input, true).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_single_file_repair_into_existing_directory() -> Result<()> {
        let tmpdir = TempDir::new()?;
        let input = tmpdir.path().join("session.csv");
        let cleaned = tmpdir.path().join("cleaned");
        tokio::fs::create_dir_all(&cleaned).await?;
        tokio::fs::write(&input, format!("{}\n{ROW}\n", header_line())).await?;

        let output = single_file_output(&input, &cleaned, false).await?;
        let report = RepairEngine::standard().repair_file(&input, &output).await?;

        assert_eq!(report.rows_accepted, 1);
        assert!(tokio::fs::metadata(&cleaned).await?.is_dir());
        let text = tokio::fs::read_to_string(cleaned.join("session.csv")).await?;
        assert_eq!(text.lines().count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_repair_tree_mirrors_device_dirs() -> Result<()> {
        let tmpdir = TempDir::new()?;
        let raw = tmpdir.path().join("raw");
        let clean = tmpdir.path().join("clean");
        for device in ["left", "right"] {
            tokio::fs::create_dir_all(raw.join(device)).await?;
            tokio::fs::write(
                raw.join(device).join("session.csv"),
                format!("{}\n{ROW}\n{ROW}\n1714790400.1,2\n", header_line()),
            )
            .await?;
        }
        tokio::fs::write(raw.join("left").join("notes.txt"), "not a session").await?;
        tokio::fs::write(raw.join("stray.csv"), "h\n").await?;

        let manifest = repair_tree(&RepairEngine::standard(), &raw, &clean).await?;

        assert_eq!(manifest.files.len(), 2);
        assert!(manifest.failed.is_empty());
        assert_eq!(manifest.totals.rows_read, 6);
        assert_eq!(manifest.totals.rows_accepted, 4);
        assert_eq!(manifest.totals.rows_rejected, 2);

        let left = clean.join("left").join("session.csv");
        assert!(left.exists());
        assert!(clean.join("right").join("session.csv").exists());
        assert!(!clean.join("left").join("notes.txt").exists());
        assert!(!clean.join("stray.csv").exists());
        assert!(clean.join("manifest.json").exists());

        let left_info = manifest
            .files
            .iter()
            .find(|f| f.output == left)
            .expect("left file in manifest");
        assert_eq!(left_info.sha256, file_checksum(&left).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreadable_file_does_not_abort_batch() -> Result<()> {
        let tmpdir = TempDir::new()?;
        let raw = tmpdir.path().join("raw");
        let clean = tmpdir.path().join("clean");
        tokio::fs::create_dir_all(raw.join("glove")).await?;
        tokio::fs::write(raw.join("glove").join("a.csv"), b"h\n\xff\xfe\n".to_vec()).await?;
        tokio::fs::write(raw.join("glove").join("b.csv"), format!("h\n{ROW}\n")).await?;

        let manifest = repair_tree(&RepairEngine::standard(), &raw, &clean).await?;

        assert_eq!(manifest.failed.len(), 1);
        assert!(manifest.failed[0].input.ends_with("a.csv"));
        assert_eq!(manifest.files.len(), 1);
        assert_eq!(manifest.totals.rows_accepted, 1);

        let saved: RepairManifest =
            serde_json::from_str(&tokio::fs::read_to_string(clean.join("manifest.json")).await?)?;
        assert_eq!(saved.totals, manifest.totals);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_input_root_is_an_error() {
        let tmpdir = TempDir::new().unwrap();
        let result = collect_session_files(&tmpdir.path().join("absent")).await;
        assert!(result.is_err());
    }
}
