use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};

use crate::data_capture::CapturedExchange;
use crate::error_handling::types::RepositoryError;
use crate::storage::storage_trait::ExchangeRepository;
use crate::storage::types::ExchangeFilter;

/// Environment variable naming the default capture directory.
pub const CAPTURE_DIR_ENV: &str = "APISCOPE_CAPTURE_DIR";

/// Reads exchanges from every `*.jsonl` file of a directory, one JSON
/// `CapturedExchange` per line. Malformed lines are skipped with a warning.
pub struct JsonlRepository {
    base_path: PathBuf,
}

impl JsonlRepository {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, RepositoryError> {
        let base_path = base_path.as_ref().to_path_buf();
        if !base_path.is_dir() {
            error!("Capture directory {} is not available", base_path.display());
            return Err(RepositoryError::Unavailable(format!(
                "{} is not a directory",
                base_path.display()
            )));
        }
        info!("JsonlRepository initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    /// Construct a repository from APISCOPE_CAPTURE_DIR if set, otherwise the current directory.
    pub fn new_default() -> Result<Self, RepositoryError> {
        if let Ok(dir) = std::env::var(CAPTURE_DIR_ENV) {
            info!("Using captures from {}: {}", CAPTURE_DIR_ENV, dir);
            return Self::new(PathBuf::from(dir));
        }
        let cwd = std::env::current_dir().map_err(|e| {
            error!("Failed to get current dir: {}", e);
            RepositoryError::Unavailable(e.to_string())
        })?;
        info!("Using captures in current directory: {}", cwd.display());
        Self::new(cwd)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Capture files in name order.
    fn capture_files(&self) -> Result<Vec<PathBuf>, RepositoryError> {
        let entries = fs::read_dir(&self.base_path).map_err(|e| {
            error!("Failed to read capture dir {}: {}", self.base_path.display(), e);
            RepositoryError::Unavailable(format!("{}: {}", self.base_path.display(), e))
        })?;
        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| RepositoryError::ReadFailed(format!("dir entry error: {}", e)))?
                .path();
            if path.extension().and_then(|s| s.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    fn read_file(&self, path: &Path, filter: Option<&ExchangeFilter>) -> Result<Vec<CapturedExchange>, RepositoryError> {
        let file = File::open(path).map_err(|e| {
            error!("Failed to open {}: {}", path.display(), e);
            RepositoryError::ReadFailed(format!("{}: {}", path.display(), e))
        })?;
        let mut exchanges = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Skipping unreadable line {} of {}: {}", index + 1, path.display(), e);
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CapturedExchange>(&line) {
                Ok(exchange) => {
                    if filter.map_or(true, |f| f.matches(&exchange)) {
                        exchanges.push(exchange);
                    }
                }
                Err(e) => warn!("Skipping malformed record at {}:{}: {}", path.display(), index + 1, e),
            }
        }
        Ok(exchanges)
    }
}

impl ExchangeRepository for JsonlRepository {
    fn hosts(&self) -> Result<Vec<String>, RepositoryError> {
        let hosts: BTreeSet<String> = self
            .exchanges(None)?
            .into_iter()
            .map(|e| e.host.to_ascii_lowercase())
            .collect();
        Ok(hosts.into_iter().collect())
    }

    fn exchanges(&self, filter: Option<ExchangeFilter>) -> Result<Vec<CapturedExchange>, RepositoryError> {
        let mut exchanges = Vec::new();
        for path in self.capture_files()? {
            exchanges.extend(self.read_file(&path, filter.as_ref())?);
        }
        debug!("Loaded {} exchange(s) from {}", exchanges.len(), self.base_path.display());
        Ok(exchanges)
    }
}
