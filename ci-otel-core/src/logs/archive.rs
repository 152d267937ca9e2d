//! Log archive indexing
//!
//! GitHub Actions has shipped two archive layouts:
//!
//! ```text
//! legacy                         current
//! build/                         0_build.txt          (ignored, no '/')
//! build/1_Set up job.txt         build/1_Set up job.txt
//! build/2_Run tests.txt          build/2_Run tests.txt
//!                                build/system.txt     (skipped)
//! ```
//!
//! Both are handled by keying on the path segment before the first `/`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek};
use tracing::{debug, error};

use crate::error::{ArchiveError, StepFileError};

/// Companion file GitHub started adding next to step logs
pub const SYSTEM_FILE_NAME: &str = "system.txt";

/// One step log file inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFile {
    /// Position in the zip central directory
    pub index: usize,
    /// Full entry name, e.g. `build/2_Run tests.txt`
    pub name: String,
    pub step_number: i64,
}

/// Jobs in lexicographic order, each with its step files ordered by step number
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveIndex {
    pub jobs: BTreeMap<String, Vec<StepFile>>,
}

impl ArchiveIndex {
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn step_file_count(&self) -> usize {
        self.jobs.values().map(Vec::len).sum()
    }
}

/// An opened log archive
pub struct LogArchive<R = File> {
    zip: zip::ZipArchive<R>,
}

impl<R: Read + Seek> LogArchive<R> {
    /// Open an archive; fails only if the central directory is unreadable
    pub fn open(reader: R) -> Result<Self, ArchiveError> {
        let zip = zip::ZipArchive::new(reader).map_err(ArchiveError::Open)?;
        Ok(Self { zip })
    }

    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.len() == 0
    }

    /// Partition entries into jobs.
    ///
    /// Unreadable entries, system files and badly named files are logged and
    /// left out; they never fail the whole archive.
    pub fn index(&mut self) -> ArchiveIndex {
        let mut index = ArchiveIndex::default();
        debug!(file_count = self.zip.len(), "Indexing log archive");

        for i in 0..self.zip.len() {
            let (name, is_dir) = match self.zip.by_index(i) {
                Ok(entry) => (entry.name().to_string(), entry.is_dir()),
                Err(err) => {
                    error!(entry_index = i, "Failed to read zip entry: {}", err);
                    continue;
                }
            };

            if is_dir {
                let job_name = name.trim_end_matches('/');
                if !job_name.is_empty() {
                    index.jobs.entry(job_name.to_string()).or_default();
                }
                continue;
            }

            let Some((job_name, _)) = name.split_once('/') else {
                debug!(file_name = %name, "File contains no '/', skipping job extraction");
                continue;
            };
            let job_name = job_name.to_string();

            match step_number_from_file_name(&name, &job_name) {
                Ok(step_number) => {
                    index.jobs.entry(job_name).or_default().push(StepFile {
                        index: i,
                        name,
                        step_number,
                    });
                }
                Err(StepFileError::SystemFile { .. }) => {
                    debug!(file_name = %name, "Skipping system file");
                    index.jobs.entry(job_name).or_default();
                }
                Err(err) => {
                    error!(file_name = %name, "Invalid step number in filename: {}", err);
                    index.jobs.entry(job_name).or_default();
                }
            }
        }

        for files in index.jobs.values_mut() {
            files.sort_by(|a, b| {
                a.step_number
                    .cmp(&b.step_number)
                    .then_with(|| a.name.cmp(&b.name))
            });
        }

        debug!(
            job_count = index.jobs.len(),
            step_files = index.step_file_count(),
            "Indexed log archive"
        );
        index
    }

    /// Open a step file for streaming
    pub fn open_step(&mut self, file: &StepFile) -> Result<impl Read + '_, ArchiveError> {
        self.zip
            .by_index(file.index)
            .map_err(|source| ArchiveError::Entry {
                index: file.index,
                source,
            })
    }
}

/// Step number encoded in `<job>/<N>_<title>.txt` or `<job>/<N>.txt`
pub fn step_number_from_file_name(file_name: &str, job_name: &str) -> Result<i64, StepFileError> {
    let base_name = file_name
        .strip_prefix(job_name)
        .and_then(|rest| rest.strip_prefix('/'))
        .filter(|rest| !rest.is_empty())
        .ok_or_else(|| StepFileError::MissingJobPrefix {
            file_name: file_name.to_string(),
            job_name: job_name.to_string(),
        })?;

    if base_name == SYSTEM_FILE_NAME {
        return Err(StepFileError::SystemFile {
            file_name: file_name.to_string(),
        });
    }

    let digits = match base_name.split_once('_') {
        Some((number, _)) => number,
        None => base_name.strip_suffix(".txt").unwrap_or(base_name),
    };
    digits
        .parse::<i64>()
        .map_err(|_| StepFileError::InvalidNumber {
            file_name: file_name.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn build_zip(dirs: &[&str], files: &[(&str, &str)]) -> Cursor<Vec<u8>> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Deflated);
            for dir in dirs {
                writer.add_directory(*dir, options).unwrap();
            }
            for (name, content) in files {
                writer.start_file(*name, options).unwrap();
                writer.write_all(content.as_bytes()).unwrap();
            }
            writer.finish().unwrap();
        }
        Cursor::new(buf)
    }

    #[test]
    fn test_step_number_parsing() {
        assert_eq!(step_number_from_file_name("test/2_Run tests.txt", "test"), Ok(2));
        assert_eq!(
            step_number_from_file_name("Build and Test/1_Setup.txt", "Build and Test"),
            Ok(1)
        );
        assert_eq!(step_number_from_file_name("build/7.txt", "build"), Ok(7));
    }

    #[test]
    fn test_step_number_errors() {
        assert!(matches!(
            step_number_from_file_name("Shellcheck scripts/system.txt", "Shellcheck scripts"),
            Err(StepFileError::SystemFile { .. })
        ));
        assert!(matches!(
            step_number_from_file_name("build/abc_Invalid.txt", "build"),
            Err(StepFileError::InvalidNumber { .. })
        ));
        assert!(matches!(
            step_number_from_file_name("build/", "build"),
            Err(StepFileError::MissingJobPrefix { .. })
        ));
    }

    #[test]
    fn test_current_layout_index() {
        let cursor = build_zip(
            &[],
            &[
                ("0_test.txt", "whole job log"),
                ("test/2_Run tests.txt", "b"),
                ("test/1_Set up job.txt", "a"),
                ("test/system.txt", "sys"),
                ("build/1_Set up job.txt", "c"),
            ],
        );
        let mut archive = LogArchive::open(cursor).unwrap();
        let index = archive.index();

        let jobs: Vec<&str> = index.job_names().collect();
        assert_eq!(jobs, vec!["build", "test"]);

        let steps: Vec<i64> = index.jobs["test"].iter().map(|f| f.step_number).collect();
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(index.step_file_count(), 3);
    }

    #[test]
    fn test_legacy_layout_registers_empty_jobs() {
        let cursor = build_zip(&["lint/", "build/"], &[("build/1_Checkout.txt", "x")]);
        let mut archive = LogArchive::open(cursor).unwrap();
        let index = archive.index();

        assert_eq!(index.jobs.len(), 2);
        assert!(index.jobs["lint"].is_empty());
        assert_eq!(index.jobs["build"].len(), 1);
    }

    #[test]
    fn test_open_step_streams_content() {
        let cursor = build_zip(&[], &[("build/1_Checkout.txt", "hello")]);
        let mut archive = LogArchive::open(cursor).unwrap();
        let index = archive.index();
        let file = index.jobs["build"][0].clone();

        let mut content = String::new();
        archive.open_step(&file).unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");
    }

    #[test]
    fn test_corrupt_archive_is_decode_error() {
        let result = LogArchive::open(Cursor::new(b"not a zip".to_vec()));
        assert!(matches!(result, Err(ArchiveError::Open(_))));
    }
}
