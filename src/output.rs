use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tempfile::NamedTempFile;

use crate::{AppError, Result};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    ensure_parent(path)?;
    let file = File::create(path).map_err(|e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .map_err(|e| AppError::JsonSerialize(e.to_string()))?;
    writer.flush().map_err(|e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| AppError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| AppError::JsonParse(format!("{}: {}", path.display(), e)))
}

/// Reads a JSON array, treating a missing file as empty.
pub fn read_json_array_or_empty(path: &Path) -> Result<Vec<serde_json::Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_json(path)
}

/// Removes `path`, treating a missing file as already removed.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(AppError::WriteFile {
            path: path.display().to_string(),
            source: e,
        }),
    }
}

/// A set of CSV rows with a fixed header, written in one go.
#[derive(Debug, Clone)]
pub struct CsvTable {
    headers: Vec<&'static str>,
    rows: Vec<Vec<String>>,
}

impl CsvTable {
    pub fn new(headers: &[&'static str]) -> Self {
        Self {
            headers: headers.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn write_to<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.headers)?;
        for row in &self.rows {
            csv_writer.write_record(row)?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        let file = File::create(path).map_err(|e| AppError::WriteFile {
            path: path.display().to_string(),
            source: e,
        })?;
        self.write_to(BufWriter::new(file))
    }

    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        persist(stage(path, |file| self.write_to(BufWriter::new(file)))?, path)
    }
}

/// Writes JSON to a sibling temp file and renames it over `path`, so readers
/// never observe a half-written list.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, data: &T) -> Result<()> {
    persist(stage(path, |file| write_json_to(file, data))?, path)
}

fn write_json_to<T: Serialize + ?Sized>(file: &mut File, data: &T) -> Result<()> {
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .map_err(|e| AppError::JsonSerialize(e.to_string()))?;
    writer.flush()?;
    Ok(())
}

/// A group of file replacements that land together.
///
/// Every file is fully written to a sibling temp file before `commit` touches
/// any target, so an encoding or disk error leaves all targets as they were.
/// Dropping an uncommitted set deletes its temp files.
#[derive(Debug, Default)]
pub struct StagedFiles {
    staged: Vec<(NamedTempFile, PathBuf)>,
    removals: Vec<PathBuf>,
}

impl StagedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, path: &Path, data: &T) -> Result<()> {
        let temp = stage(path, |file| write_json_to(file, data))?;
        self.staged.push((temp, path.to_path_buf()));
        Ok(())
    }

    pub fn csv(&mut self, path: &Path, table: &CsvTable) -> Result<()> {
        let temp = stage(path, |file| table.write_to(BufWriter::new(file)))?;
        self.staged.push((temp, path.to_path_buf()));
        Ok(())
    }

    /// Marks `path` for removal at commit time.
    pub fn remove(&mut self, path: &Path) {
        self.removals.push(path.to_path_buf());
    }

    /// Renames every staged file over its target, then applies removals.
    pub fn commit(self) -> Result<()> {
        if let Some((_, path)) = self.staged.iter().find(|(_, path)| path.is_dir()) {
            return Err(AppError::WriteFile {
                path: path.display().to_string(),
                source: io::Error::other("target is a directory"),
            });
        }
        for (temp, path) in self.staged {
            persist(temp, &path)?;
        }
        for path in &self.removals {
            remove_if_exists(path)?;
        }
        Ok(())
    }
}

fn stage<F>(path: &Path, write: F) -> Result<NamedTempFile>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    ensure_parent(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(|e| AppError::WriteFile {
        path: dir.display().to_string(),
        source: e,
    })?;
    write(temp.as_file_mut())?;
    Ok(temp)
}

fn persist(temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.persist(path).map_err(|e| AppError::WriteFile {
        path: path.display().to_string(),
        source: e.error,
    })?;
    Ok(())
}
