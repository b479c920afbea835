//! Zip archiving of a finished export subtree, split into fixed-size parts
//! when the archive grows past a threshold.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{error, info};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

use crate::output::ensure_dir;
use crate::settings::ArchiveSettings;
use crate::{AppError, Result};

const SPLIT_FOLDER_SUFFIX: &str = "_split_zipfiles";
const PART_INFIX: &str = "_part_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitPolicy {
    pub threshold_bytes: u64,
    pub chunk_bytes: u64,
}

impl SplitPolicy {
    pub fn from_settings(settings: &ArchiveSettings) -> Self {
        Self {
            threshold_bytes: settings.split_threshold_bytes(),
            chunk_bytes: settings.split_chunk_bytes().max(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveOutcome {
    pub zip_path: PathBuf,
    pub zip_size: u64,
    pub entries: usize,
    pub parts: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct Archiver {
    split: SplitPolicy,
}

impl Archiver {
    pub fn new(split: SplitPolicy) -> Self {
        Self { split }
    }

    /// Compresses `source` into `output_zip` and splits it into
    /// `<label>_part_NNN` files next to the zip when it exceeds the threshold.
    pub async fn archive(
        &self,
        source: &Path,
        output_zip: &Path,
        label: &str,
    ) -> Result<ArchiveOutcome> {
        let source = source.to_path_buf();
        let output_zip = output_zip.to_path_buf();
        let label = label.to_string();
        let split = self.split;

        tokio::task::spawn_blocking(move || archive_blocking(&source, &output_zip, &label, split))
            .await
            .map_err(|e| AppError::Zip(format!("archive task failed: {}", e)))?
    }

    /// Archiving runs after the data is already on disk, so failures are
    /// logged and swallowed.
    pub async fn archive_best_effort(
        &self,
        source: &Path,
        output_zip: &Path,
        label: &str,
    ) -> Option<ArchiveOutcome> {
        match self.archive(source, output_zip, label).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(
                    source = %source.display(),
                    zip = %output_zip.display(),
                    error = %e,
                    "archiving failed, uncompressed data left in place"
                );
                None
            }
        }
    }
}

fn archive_blocking(
    source: &Path,
    output_zip: &Path,
    label: &str,
    split: SplitPolicy,
) -> Result<ArchiveOutcome> {
    info!(source = %source.display(), zip = %output_zip.display(), "compressing folder");
    let entries = compress_folder(source, output_zip)?;

    let zip_size = fs::metadata(output_zip)
        .map_err(|e| AppError::ReadFile {
            path: output_zip.display().to_string(),
            source: e,
        })?
        .len();
    info!(zip = %output_zip.display(), zip_size, entries, "compression done");

    let parts = if zip_size > split.threshold_bytes {
        let split_dir = split_dir_for(output_zip, label);
        info!(split_dir = %split_dir.display(), "archive exceeds threshold, splitting");
        split_file(output_zip, &split_dir, label, split.chunk_bytes)?
    } else {
        Vec::new()
    };

    Ok(ArchiveOutcome {
        zip_path: output_zip.to_path_buf(),
        zip_size,
        entries,
        parts,
    })
}

pub fn split_dir_for(output_zip: &Path, label: &str) -> PathBuf {
    output_zip.with_file_name(format!("{}{}", label, SPLIT_FOLDER_SUFFIX))
}

/// Writes every file and folder under `source` into a zip at `output`, with
/// paths relative to `source` (no enclosing root folder), at maximum
/// deflate level. Entries are sorted so identical trees give identical zips.
///
/// Returns the number of entries written.
pub fn compress_folder(source: &Path, output: &Path) -> Result<usize> {
    if !source.is_dir() {
        return Err(AppError::ReadFile {
            path: source.display().to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "archive source is not a directory"),
        });
    }
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }

    let file = File::create(output).map_err(|e| AppError::WriteFile {
        path: output.display().to_string(),
        source: e,
    })?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(9));

    let mut entries = 0;
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| AppError::Io(io::Error::other(e.to_string())))?;
        let path = entry.path();
        if path == output {
            continue;
        }

        let Some(name) = entry_name(source, path) else {
            continue;
        };

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut reader = BufReader::new(File::open(path).map_err(|e| AppError::ReadFile {
                path: path.display().to_string(),
                source: e,
            })?);
            io::copy(&mut reader, &mut zip)?;
        }
        entries += 1;
    }

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(entries)
}

fn entry_name(source: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(source).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<_>>()?;
    Some(parts.join("/"))
}

/// Cuts `path` into consecutive `<prefix>_part_NNN` files of at most
/// `chunk_bytes` each. Stale parts from a previous run are removed first.
pub fn split_file(
    path: &Path,
    out_dir: &Path,
    prefix: &str,
    chunk_bytes: u64,
) -> Result<Vec<PathBuf>> {
    ensure_dir(out_dir)?;
    remove_stale_parts(out_dir, prefix)?;

    let mut reader = BufReader::new(File::open(path).map_err(|e| AppError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?);

    let chunk_bytes = chunk_bytes.max(1);
    let mut parts = Vec::new();
    loop {
        let part_path = out_dir.join(format!("{}{}{:03}", prefix, PART_INFIX, parts.len() + 1));
        let part_file = File::create(&part_path).map_err(|e| AppError::WriteFile {
            path: part_path.display().to_string(),
            source: e,
        })?;
        let mut writer = BufWriter::new(part_file);
        let copied = io::copy(&mut (&mut reader).take(chunk_bytes), &mut writer)?;
        writer.flush()?;

        if copied == 0 {
            drop(writer);
            fs::remove_file(&part_path)?;
            break;
        }

        info!(part = %part_path.display(), bytes = copied, "wrote archive part");
        parts.push(part_path);
        if copied < chunk_bytes {
            break;
        }
    }

    Ok(parts)
}

fn remove_stale_parts(out_dir: &Path, prefix: &str) -> Result<()> {
    let stale_prefix = format!("{}{}", prefix, PART_INFIX);
    for entry in fs::read_dir(out_dir)? {
        let entry = entry?;
        let is_stale = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&stale_prefix));
        if is_stale && entry.file_type()?.is_file() {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
