//! Evidence bundle assembly.
//!
//! Packs an audit's screenshots and artifact directory into an in-memory
//! zip for download. The PDF report is rendered on demand by its own
//! endpoint and is intentionally not bundled here.

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use tracing::warn;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build the evidence zip: screenshots under `screenshots/`, then every
/// remaining file in the artifact directory at its relative path.
pub fn create_evidence_zip(
    artifacts_dir: &Path,
    screenshots: &[PathBuf],
) -> Result<Vec<u8>, std::io::Error> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut added: Vec<String> = Vec::new();

    for screenshot in screenshots {
        let Some(name) = screenshot.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Ok(bytes) = std::fs::read(screenshot) else {
            warn!(path = %screenshot.display(), "Screenshot missing from disk, skipping");
            continue;
        };
        let arcname = format!("screenshots/{name}");
        zip.start_file(&arcname, options)?;
        zip.write_all(&bytes)?;
        added.push(arcname);
    }

    let mut files = Vec::new();
    collect_files(artifacts_dir, &mut files);
    for file in files {
        let Ok(relative) = file.strip_prefix(artifacts_dir) else {
            continue;
        };
        let arcname = relative.to_string_lossy().replace('\\', "/");
        if added.iter().any(|existing| *existing == arcname) {
            continue;
        }
        let Ok(bytes) = std::fs::read(&file) else {
            continue;
        };
        zip.start_file(&arcname, options)?;
        zip.write_all(&bytes)?;
        added.push(arcname);
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_files(&path, out);
        } else {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn zip_names(bytes: &[u8]) -> Vec<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect()
    }

    #[test]
    fn bundles_screenshots_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("screenshot_0.png");
        std::fs::write(&shot, b"png-bytes").unwrap();
        std::fs::write(dir.path().join("preview_latest.jpg"), b"jpg-bytes").unwrap();

        let bytes = create_evidence_zip(dir.path(), &[shot.clone()]).unwrap();
        let names = zip_names(&bytes);
        assert!(names.contains(&"screenshots/screenshot_0.png".to_string()));
        assert!(names.contains(&"preview_latest.jpg".to_string()));
        // The screenshot is not duplicated at its bare artifact path twice
        // under screenshots/.
        assert_eq!(
            names
                .iter()
                .filter(|n| n.contains("screenshot_0.png"))
                .count(),
            2
        );

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut content = String::new();
        archive
            .by_name("screenshots/screenshot_0.png")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "png-bytes");
    }

    #[test]
    fn missing_screenshots_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let bytes =
            create_evidence_zip(dir.path(), &[dir.path().join("nope.png")]).unwrap();
        assert!(zip_names(&bytes).is_empty());
    }
}
