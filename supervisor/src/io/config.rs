//! Supervisor configuration stored as TOML (e.g. `supervisor.toml`).

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::core::stage::DEFAULT_BACKTRACE_FRAMES;

/// Supervisor configuration (TOML).
///
/// Missing fields default to the values used when no file exists.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Frames kept in the backtrace of a captured stage fault.
    pub backtrace_frames: usize,

    /// Upper bound on stage executions in one conditional run. Unset means
    /// unbounded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_conditional_steps: Option<usize>,

    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            backtrace_frames: DEFAULT_BACKTRACE_FRAMES,
            max_conditional_steps: None,
            log_filter: "warn".to_string(),
        }
    }
}

impl SupervisorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backtrace_frames == 0 {
            return Err(anyhow!("backtrace_frames must be > 0"));
        }
        if self.max_conditional_steps == Some(0) {
            return Err(anyhow!("max_conditional_steps must be > 0 when set"));
        }
        if self.log_filter.trim().is_empty() {
            return Err(anyhow!("log_filter must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SupervisorConfig::default()`.
pub fn load_config(path: &Path) -> Result<SupervisorConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = SupervisorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SupervisorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    debug!(path = %path.display(), ?cfg, "config loaded");
    Ok(cfg)
}

/// Write `cfg` as TOML, replacing `path` atomically.
///
/// The file is staged next to its destination so the final rename never
/// crosses filesystems.
pub fn write_config(path: &Path, cfg: &SupervisorConfig) -> Result<()> {
    cfg.validate()?;
    let rendered = toml::to_string_pretty(cfg).context("serialize config toml")?;
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;

    let mut staged = NamedTempFile::new_in(dir)
        .with_context(|| format!("stage config in {}", dir.display()))?;
    writeln!(staged, "{}", rendered.trim_end())
        .with_context(|| format!("write staged config {}", staged.path().display()))?;
    staged
        .persist(path)
        .with_context(|| format!("replace config {}", path.display()))?;
    debug!(path = %path.display(), "config written");
    Ok(())
}

/// Write the default config to `path`. An existing file is kept unless
/// `force` is set.
pub fn init_config(path: &Path, force: bool) -> Result<SupervisorConfig> {
    if path.exists() && !force {
        bail!(
            "config {} already exists (pass --force to overwrite)",
            path.display()
        );
    }
    let cfg = SupervisorConfig::default();
    write_config(path, &cfg)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, SupervisorConfig::default());
        assert_eq!(cfg.backtrace_frames, 5);
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("supervisor.toml");
        let cfg = SupervisorConfig {
            max_conditional_steps: Some(50),
            log_filter: "supervisor=debug".to_string(),
            ..SupervisorConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("supervisor.toml");
        fs::write(&path, "backtrace_frames = 8\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.backtrace_frames, 8);
        assert_eq!(cfg.max_conditional_steps, None);
        assert_eq!(cfg.log_filter, "warn");
    }

    #[test]
    fn zero_step_limit_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("supervisor.toml");
        fs::write(&path, "max_conditional_steps = 0\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("max_conditional_steps"));
    }

    #[test]
    fn init_writes_defaults_and_keeps_existing_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("supervisor.toml");

        let written = init_config(&path, false).expect("init");
        assert_eq!(written, SupervisorConfig::default());
        assert_eq!(load_config(&path).expect("load"), written);

        fs::write(&path, "backtrace_frames = 9\n").expect("write");
        let err = init_config(&path, false).expect_err("existing config");
        assert!(format!("{err:#}").contains("already exists"));
        assert_eq!(load_config(&path).expect("load").backtrace_frames, 9);

        init_config(&path, true).expect("forced init");
        assert_eq!(load_config(&path).expect("load").backtrace_frames, 5);
    }

    #[test]
    fn write_leaves_no_staging_files_behind() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("supervisor.toml");
        write_config(&path, &SupervisorConfig::default()).expect("write");

        let entries: Vec<_> = fs::read_dir(temp.path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("supervisor.toml")]);
    }
}
