use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::error::{ProvisionError, ProvisionResult};

/// What an extraction wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub files: Vec<PathBuf>,
    pub directories: usize,
}

/// Extract every entry of `zip_path` into `dest`, replacing files that
/// already exist. Entries that would escape `dest` abort the extraction.
pub fn extract_zip_overwrite(zip_path: &Path, dest: &Path) -> ProvisionResult<ExtractSummary> {
    let zip_file = std::fs::File::open(zip_path).map_err(ProvisionError::io(zip_path))?;
    let mut archive = zip::ZipArchive::new(zip_file)?;

    std::fs::create_dir_all(dest).map_err(ProvisionError::io(dest))?;

    let mut summary = ExtractSummary::default();
    for index in 0..archive.len() {
        let mut zipped = archive.by_index(index)?;
        let enclosed = zipped.enclosed_name().ok_or_else(|| {
            ProvisionError::Extraction(format!(
                "Entry {:?} in {:?} escapes the destination",
                zipped.name(),
                zip_path
            ))
        })?;
        if enclosed.as_os_str().is_empty() {
            continue;
        }

        let out_path = dest.join(enclosed);
        if zipped.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(ProvisionError::io(&out_path))?;
            summary.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(ProvisionError::io(parent))?;
        }

        let mut out = std::fs::File::create(&out_path).map_err(ProvisionError::io(&out_path))?;
        std::io::copy(&mut zipped, &mut out).map_err(ProvisionError::io(&out_path))?;
        debug!("Extracted {:?}", out_path);
        summary.files.push(out_path);
    }

    Ok(summary)
}

/// Test helper: build a zip from `(name, contents)` pairs.
#[cfg(test)]
pub(crate) fn write_test_zip(path: &Path, entries: &[(&str, &[u8])]) {
    use std::io::Write;

    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, contents) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(contents).unwrap();
        }
    }
    writer.finish().unwrap();
}
