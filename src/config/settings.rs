use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use anyhow::Context;

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "CLINIC_ROUTER_";

/// Main router configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub loop_guard: LoopGuardConfig,
    pub router: RoutingConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopGuardConfig {
    /// Consecutive same-target decisions without slot progress before the
    /// session is terminated (minimum 2)
    pub repeat_threshold: u32,
    /// Routing decisions kept per session
    pub history_capacity: usize,
    /// Hard ceiling on turns per session
    pub max_steps: u32,
}

impl Default for LoopGuardConfig {
    fn default() -> Self {
        Self {
            repeat_threshold: 2,
            history_capacity: 10,
            max_steps: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Upper bound on a single extractor or classifier call
    pub collaborator_timeout_secs: u64,
    /// Finish the session after a successful booking
    pub single_shot_booking: bool,
    /// Completion command used for intent classification (e.g. `llm -m small`).
    /// Keyword classification is used when unset
    pub completion_command: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            collaborator_timeout_secs: 10,
            single_shot_booking: false,
            completion_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding one JSON file per session.
    /// Defaults to `<data dir>/clinic-router/sessions`
    pub sessions_dir: PathBuf,
    /// JSON file holding booked appointments.
    /// Defaults to `bookings.json` inside `sessions_dir`
    pub bookings_file: Option<PathBuf>,
    /// Sessions idle for longer than this are removed by `sessions --prune`
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            bookings_file: None,
            retention_days: 30,
        }
    }
}

impl StorageConfig {
    pub fn bookings_path(&self) -> PathBuf {
        self.bookings_file
            .clone()
            .unwrap_or_else(|| self.sessions_dir.join("bookings.json"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// YAML schedule to load instead of the demo schedule
    pub schedule_file: Option<PathBuf>,
    /// Days of demo availability generated from today
    pub demo_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            schedule_file: None,
            demo_days: 14,
        }
    }
}

fn default_sessions_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clinic-router")
        .join("sessions")
}

impl RouterConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: RouterConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if file doesn't exist
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration and apply `CLINIC_ROUTER_*` environment overrides
    pub fn load_with_env(path: Option<&Path>) -> anyhow::Result<Self> {
        Ok(Self::load_or_default(path)?.apply_env_overrides())
    }

    /// Auto-detect a config file under `base_dir`.
    ///
    /// Checked in order:
    /// 1. `.clinic-router/config.yaml`
    /// 2. `clinic-router.yaml`
    /// 3. `config/default.yaml`
    pub fn auto_detect(base_dir: &Path) -> Option<PathBuf> {
        let candidates = [
            base_dir.join(".clinic-router/config.yaml"),
            base_dir.join("clinic-router.yaml"),
            base_dir.join("config/default.yaml"),
        ];

        candidates.into_iter().find(|path| path.exists())
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from a lookup keyed by the variable name without its
    /// prefix. Unparseable values are ignored with a warning.
    pub fn apply_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_override(&lookup, "REPEAT_THRESHOLD") {
            self.loop_guard.repeat_threshold = v;
        }
        if let Some(v) = parse_override(&lookup, "HISTORY_CAPACITY") {
            self.loop_guard.history_capacity = v;
        }
        if let Some(v) = parse_override(&lookup, "MAX_STEPS") {
            self.loop_guard.max_steps = v;
        }
        if let Some(v) = parse_override(&lookup, "COLLABORATOR_TIMEOUT_SECS") {
            self.router.collaborator_timeout_secs = v;
        }
        if let Some(v) = parse_override(&lookup, "SINGLE_SHOT_BOOKING") {
            self.router.single_shot_booking = v;
        }
        if let Some(command) = lookup("COMPLETION_COMMAND").filter(|v| !v.trim().is_empty()) {
            self.router.completion_command = Some(command);
        }
        if let Some(dir) = lookup("SESSIONS_DIR").filter(|v| !v.trim().is_empty()) {
            self.storage.sessions_dir = PathBuf::from(dir);
        }
        if let Some(file) = lookup("BOOKINGS_FILE").filter(|v| !v.trim().is_empty()) {
            self.storage.bookings_file = Some(PathBuf::from(file));
        }
        if let Some(v) = parse_override(&lookup, "RETENTION_DAYS") {
            self.storage.retention_days = v;
        }
        if let Some(file) = lookup("SCHEDULE_FILE").filter(|v| !v.trim().is_empty()) {
            self.schedule.schedule_file = Some(PathBuf::from(file));
        }
        self
    }
}

fn parse_override<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}{}={:?}", ENV_PREFIX, key, raw);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = RouterConfig::default();
        assert_eq!(config.loop_guard.repeat_threshold, 2);
        assert_eq!(config.loop_guard.max_steps, 10);
        assert_eq!(config.router.collaborator_timeout_secs, 10);
        assert!(!config.router.single_shot_booking);
        assert!(config.storage.sessions_dir.ends_with("clinic-router/sessions"));
        assert_eq!(config.storage.retention_days, 30);
        assert_eq!(
            config.storage.bookings_path(),
            config.storage.sessions_dir.join("bookings.json")
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(
            &path,
            "loop_guard:\n  repeat_threshold: 3\nrouter:\n  single_shot_booking: true\n",
        )
        .unwrap();

        let config = RouterConfig::from_file(&path).unwrap();
        assert_eq!(config.loop_guard.repeat_threshold, 3);
        assert_eq!(config.loop_guard.max_steps, 10);
        assert!(config.router.single_shot_booking);
        assert_eq!(config.router.collaborator_timeout_secs, 10);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.yaml");
        let config = RouterConfig::load_or_default(Some(&missing)).unwrap();
        assert_eq!(config.loop_guard, LoopGuardConfig::default());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "loop_guard: [not, a, map]").unwrap();
        assert!(RouterConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MAX_STEPS", "4"),
            ("SINGLE_SHOT_BOOKING", "true"),
            ("SESSIONS_DIR", "/tmp/sessions"),
            ("REPEAT_THRESHOLD", "lots"),
            ("RETENTION_DAYS", "7"),
        ]);
        let config = RouterConfig::default()
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.loop_guard.max_steps, 4);
        assert!(config.router.single_shot_booking);
        assert_eq!(config.storage.sessions_dir, PathBuf::from("/tmp/sessions"));
        assert_eq!(config.storage.retention_days, 7);
        // invalid value leaves the default in place
        assert_eq!(config.loop_guard.repeat_threshold, 2);
    }

    #[test]
    fn test_auto_detect_priority() {
        let temp = TempDir::new().unwrap();
        assert!(RouterConfig::auto_detect(temp.path()).is_none());

        std::fs::create_dir_all(temp.path().join("config")).unwrap();
        std::fs::write(temp.path().join("config/default.yaml"), "{}").unwrap();
        std::fs::write(temp.path().join("clinic-router.yaml"), "{}").unwrap();

        assert_eq!(
            RouterConfig::auto_detect(temp.path()),
            Some(temp.path().join("clinic-router.yaml"))
        );
    }
}
