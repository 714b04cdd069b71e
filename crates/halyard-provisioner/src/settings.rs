use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionerError;
use crate::retry::RetryPolicy;

/// Current settings version. Bump this when adding fields or changing shape.
/// Each bump requires a corresponding entry in [`migrate`].
const CURRENT_VERSION: u32 = 1;

/// Knobs for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Schema version. Missing or 0 = pre-versioned settings.
    pub settings_version: u32,
    /// Maximum number of instances reconciled at once.
    pub concurrency: usize,
    /// Retry budget for transient remote errors, per call.
    pub retry: RetryPolicy,
    /// Budget for the verify → execute loop while drift remains.
    pub verify: RetryPolicy,
    /// Cancel the run after this many seconds.
    pub run_timeout_secs: Option<u64>,
    /// Where to persist state between runs. `None` keeps state in memory.
    pub state_path: Option<PathBuf>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            settings_version: CURRENT_VERSION,
            concurrency: 4,
            retry: RetryPolicy::default(),
            verify: RetryPolicy {
                max_attempts: 5,
                ..RetryPolicy::default()
            },
            run_timeout_secs: None,
            state_path: None,
        }
    }
}

impl EngineSettings {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ProvisionerError> {
        if self.concurrency == 0 {
            return Err(ProvisionerError::Settings(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 || self.verify.max_attempts == 0 {
            return Err(ProvisionerError::Settings(
                "max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_settings(path: &Path) -> Result<EngineSettings, ProvisionerError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ProvisionerError::Settings(format!("failed to read settings at {}: {e}", path.display()))
    })?;

    // Parse as raw JSON so migrations run before deserializing.
    let json: serde_json::Value = serde_json::from_str(&contents)?;
    let on_disk_version = match json.get("settings_version").and_then(|v| v.as_u64()) {
        Some(v) => u32::try_from(v).map_err(|_| {
            ProvisionerError::Settings(format!("settings_version {v} is out of range"))
        })?,
        None => 0,
    };

    let migrated = migrate(json, on_disk_version)?;
    let settings: EngineSettings = serde_json::from_value(migrated)?;
    settings.validate()?;

    tracing::debug!(
        path = %path.display(),
        concurrency = settings.concurrency,
        "engine settings loaded"
    );
    Ok(settings)
}

/// Run sequential migrations from `from_version` up to [`CURRENT_VERSION`].
fn migrate(
    mut json: serde_json::Value,
    from_version: u32,
) -> Result<serde_json::Value, ProvisionerError> {
    if from_version > CURRENT_VERSION {
        return Err(ProvisionerError::Settings(format!(
            "settings_version {from_version} is newer than this build supports ({CURRENT_VERSION})"
        )));
    }

    // v0 → v1: `max_retries` became `retry.max_attempts` (attempts include the first call).
    if from_version < 1 {
        let obj = json
            .as_object_mut()
            .ok_or_else(|| ProvisionerError::Settings("settings is not a JSON object".into()))?;
        if let Some(max_retries) = obj.remove("max_retries").and_then(|v| v.as_u64()) {
            let retry = obj
                .entry("retry")
                .or_insert_with(|| serde_json::Value::Object(Default::default()));
            if let Some(retry) = retry.as_object_mut() {
                retry.insert("max_attempts".into(), (max_retries + 1).into());
            }
        }
        obj.insert("settings_version".into(), CURRENT_VERSION.into());
        tracing::info!("migrated settings v0 → v1 (max_retries → retry.max_attempts)");
    }

    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_settings(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("halyard-settings-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join("settings.json");
        std::fs::write(&path, contents).expect("write");
        path
    }

    #[test]
    fn missing_fields_take_defaults() {
        let path = write_settings("partial", r#"{"settings_version": 1, "concurrency": 2}"#);
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.verify.max_attempts, 5);
        assert_eq!(settings.run_timeout(), None);
    }

    #[test]
    fn unversioned_settings_are_migrated() {
        let path = write_settings("v0", r#"{"max_retries": 4, "run_timeout_secs": 30}"#);
        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.settings_version, CURRENT_VERSION);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.run_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn newer_versions_are_refused() {
        let path = write_settings("future", r#"{"settings_version": 42}"#);
        let err = load_settings(&path).unwrap_err();
        assert!(err.to_string().contains("newer than this build supports"));
    }

    #[test]
    fn oversized_versions_are_refused_not_truncated() {
        // 2^32 + 1 would wrap to version 1 if truncated.
        let path = write_settings("overflow", r#"{"settings_version": 4294967297}"#);
        let err = load_settings(&path).unwrap_err();
        assert!(matches!(err, ProvisionerError::Settings(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let path = write_settings("zero", r#"{"settings_version": 1, "concurrency": 0}"#);
        assert!(matches!(
            load_settings(&path),
            Err(ProvisionerError::Settings(_))
        ));
    }
}
