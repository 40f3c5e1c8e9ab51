//! Age-based cleanup of the file sink directory.
//!
//! Only files named the way the file sink names them are ever considered. The
//! directory is user supplied and may hold anything else.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collector::ticker;
use crate::sink::FileNamePattern;

/// What gets removed, and how often the directory is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    dir: PathBuf,
    owned: FileNamePattern,
    max_age: Duration,
    sweep_period: Duration,
}

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub kept: usize,
    /// Entries the file sink did not write. Never touched.
    pub ignored: usize,
    /// Entries that could not be inspected or removed.
    pub failures: usize,
}

impl RetentionPolicy {
    #[must_use]
    pub const fn new(
        dir: PathBuf,
        owned: FileNamePattern,
        max_age: Duration,
        sweep_period: Duration,
    ) -> Self {
        Self {
            dir,
            owned,
            max_age,
            sweep_period,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of the files this policy may remove.
    #[must_use]
    pub const fn owned(&self) -> &FileNamePattern {
        &self.owned
    }

    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }

    #[must_use]
    pub const fn sweep_period(&self) -> Duration {
        self.sweep_period
    }

    /// Whether a file last modified at `modified` is past the retention age.
    ///
    /// Modification times in the future are never expired.
    #[must_use]
    pub fn is_expired(&self, modified: SystemTime, now: SystemTime) -> bool {
        now.duration_since(modified)
            .is_ok_and(|age| age > self.max_age)
    }

    /// Remove every file written by the file sink that is older than the
    /// retention age.
    ///
    /// Errors are logged and counted; the sweep goes on with the next entry.
    pub fn sweep_once(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to read profiles directory");
                report.failures = report.failures.saturating_add(1);
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "failed to read directory entry");
                    report.failures = report.failures.saturating_add(1);
                    continue;
                }
            };

            let owned = entry
                .file_name()
                .to_str()
                .is_some_and(|name| self.owned.matches(name));
            if !owned {
                report.ignored = report.ignored.saturating_add(1);
                continue;
            }
            let path = entry.path();

            let modified = match entry.metadata().and_then(|m| {
                if m.is_file() {
                    m.modified().map(Some)
                } else {
                    Ok(None)
                }
            }) {
                Ok(Some(modified)) => modified,
                Ok(None) => {
                    report.ignored = report.ignored.saturating_add(1);
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to stat file");
                    report.failures = report.failures.saturating_add(1);
                    continue;
                }
            };

            if !self.is_expired(modified, now) {
                report.kept = report.kept.saturating_add(1);
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed expired file");
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove file");
                    report.failures = report.failures.saturating_add(1);
                }
            }
        }

        report
    }

    /// Sweep once per period until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            dir = %self.dir.display(),
            service = self.owned.service(),
            max_age_secs = self.max_age.as_secs(),
            period_secs = self.sweep_period.as_secs(),
            "retention sweeper started"
        );
        let mut ticker = ticker(self.sweep_period);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let report = self.sweep_once(SystemTime::now());
            if !report.removed.is_empty() || report.failures > 0 {
                info!(
                    removed = report.removed.len(),
                    kept = report.kept,
                    ignored = report.ignored,
                    failures = report.failures,
                    "retention sweep finished"
                );
            }
        }

        info!("retention sweeper stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::fs::File;

    use super::*;

    const AGE: Duration = Duration::from_secs(900);

    fn policy(dir: &Path, max_age: Duration) -> RetentionPolicy {
        RetentionPolicy::new(
            dir.to_path_buf(),
            FileNamePattern::new("svc"),
            max_age,
            Duration::from_secs(60),
        )
    }

    fn touch(dir: &Path, name: &str, age: Duration) -> Result<PathBuf, Box<dyn Error>> {
        let path = dir.join(name);
        let file = File::create(&path)?;
        let modified = SystemTime::now()
            .checked_sub(age)
            .ok_or("clock underflow")?;
        file.set_modified(modified)?;
        Ok(path)
    }

    #[test]
    fn test_expired_files_removed_fresh_files_kept() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let old = touch(dir.path(), "svc_1_1.heap", Duration::from_secs(1_000))?;
        let fresh = touch(dir.path(), "svc_2_1.json", Duration::from_secs(10))?;

        let report = policy(dir.path(), AGE).sweep_once(SystemTime::now());

        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.kept, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
        Ok(())
    }

    #[test]
    fn test_foreign_files_never_removed() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let hour = Duration::from_secs(3_600);
        let notes = touch(dir.path(), "notes.txt", hour)?;
        let manifest = touch(dir.path(), "Cargo.toml", hour)?;
        let other_service = touch(dir.path(), "orders_1_1.heap", hour)?;
        let ours = touch(dir.path(), "svc_1_1.cpu", hour)?;

        let report = policy(dir.path(), AGE).sweep_once(SystemTime::now());

        assert_eq!(report.removed, vec![ours.clone()]);
        assert_eq!(report.ignored, 3);
        assert!(notes.exists());
        assert!(manifest.exists());
        assert!(other_service.exists());
        assert!(!ours.exists());
        Ok(())
    }

    #[test]
    fn test_subdirectories_left_alone() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        fs::create_dir(dir.path().join("nested"))?;
        fs::create_dir(dir.path().join("svc_1_1.heap"))?;
        let later = SystemTime::now()
            .checked_add(Duration::from_secs(3_600))
            .ok_or("clock overflow")?;

        let report = policy(dir.path(), Duration::from_secs(1)).sweep_once(later);

        assert!(report.removed.is_empty());
        assert!(dir.path().join("nested").is_dir());
        assert!(dir.path().join("svc_1_1.heap").is_dir());
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_not_fatal() {
        let policy = policy(Path::new("/nonexistent/profiles"), AGE);

        let first = policy.sweep_once(SystemTime::now());
        let second = policy.sweep_once(SystemTime::now());

        assert_eq!(first.failures, 1);
        assert_eq!(second.failures, 1);
    }

    #[test]
    fn test_future_mtime_not_expired() -> Result<(), Box<dyn Error>> {
        let policy = policy(Path::new("."), AGE);
        let now = SystemTime::now();
        let ahead = now.checked_add(Duration::from_secs(5)).ok_or("overflow")?;
        let at_limit = now.checked_sub(AGE).ok_or("underflow")?;
        let past_limit = at_limit
            .checked_sub(Duration::from_secs(1))
            .ok_or("underflow")?;

        assert!(!policy.is_expired(ahead, now));
        assert!(!policy.is_expired(at_limit, now));
        assert!(policy.is_expired(past_limit, now));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_its_period() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let old = touch(dir.path(), "svc_1_1.cpu", Duration::from_secs(2_000))?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(policy(dir.path(), AGE).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(old.exists(), "no sweep before the first period");

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert!(!old.exists());

        cancel.cancel();
        task.await?;
        Ok(())
    }
}
