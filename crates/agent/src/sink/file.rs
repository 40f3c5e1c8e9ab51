//! File sink: one file per sample under the profiles directory.
//!
//! Profiles are stored as their raw payload in `{service}_{time}_{pid}.{kind}`;
//! metrics as indented JSON in `{service}_{time}_{pid}.json`. Nothing else in
//! the directory belongs to the agent, and [`FileNamePattern`] is how the
//! retention sweeper tells the two apart.

use std::fs;
use std::path::{Path, PathBuf};

use crate::envelope::{MetricsSample, ProfileMeta, SampleHeader};
use crate::error::PublishError;
use crate::handoff::ProfileHandoff;
use crate::kind::ProfileKind;

const METRICS_EXTENSION: &str = "json";

/// Names a [`FileWriter`] gives the files of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNamePattern {
    service: String,
}

impl FileNamePattern {
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Whether `file_name` is `{service}_{digits}_{digits}.{kind|json}`.
    ///
    /// Files of earlier runs of the same service match too, whatever their pid.
    #[must_use]
    pub fn matches(&self, file_name: &str) -> bool {
        let Some((stem, extension)) = file_name.rsplit_once('.') else {
            return false;
        };
        let known_extension = extension == METRICS_EXTENSION
            || ProfileKind::ALL.iter().any(|kind| kind.as_str() == extension);
        if !known_extension {
            return false;
        }

        let Some(rest) = stem
            .strip_prefix(self.service.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
        else {
            return false;
        };
        rest.split_once('_')
            .is_some_and(|(time, pid)| is_digits(time) && is_digits(pid))
    }

    fn file_name(header: &SampleHeader, extension: &str) -> String {
        format!(
            "{}_{}_{}.{extension}",
            header.identity.service, header.timestamp_ms, header.identity.pid
        )
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Writes samples under one directory.
#[derive(Debug, Clone)]
pub struct FileWriter {
    dir: PathBuf,
}

impl FileWriter {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the directory if it is missing. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::FileWrite`] if the directory cannot be created.
    pub fn activate(&self) -> Result<(), PublishError> {
        fs::create_dir_all(&self.dir).map_err(|source| PublishError::FileWrite {
            path: self.dir.clone(),
            source,
        })
    }

    #[must_use]
    pub fn profile_path(&self, meta: &ProfileMeta) -> PathBuf {
        self.dir
            .join(FileNamePattern::file_name(&meta.header, meta.kind.as_str()))
    }

    #[must_use]
    pub fn metrics_path(&self, header: &SampleHeader) -> PathBuf {
        self.dir
            .join(FileNamePattern::file_name(header, METRICS_EXTENSION))
    }

    /// Write the leased payload in place on the blocking pool, releasing the
    /// lease once the write has finished.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::FileWrite`] on I/O failure.
    pub async fn write_profile(&self, handoff: ProfileHandoff) -> Result<PathBuf, PublishError> {
        let path = self.profile_path(&handoff.meta);
        let target = path.clone();
        let written = tokio::task::spawn_blocking(move || {
            handoff
                .lease
                .read_and_release(|payload| fs::write(&target, payload))
        })
        .await
        .unwrap_or_else(|e| Err(std::io::Error::other(e)));

        written.map_err(|source| PublishError::FileWrite {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// # Errors
    ///
    /// Serialization or I/O failure.
    pub async fn write_metrics(&self, sample: &MetricsSample) -> Result<PathBuf, PublishError> {
        let path = self.metrics_path(&sample.header);
        let body = sample.to_json_pretty()?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| PublishError::FileWrite {
                path: path.clone(),
                source,
            })?;
        Ok(path)
    }
}
