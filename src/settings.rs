use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::args::Args;
use crate::drivers::{FrameFormat, ScopeConfig, SimTone};

/// Everything the binary needs to start, loaded from JSON and patched by CLI flags.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub port: Option<String>,
    pub baud: u32,
    pub read_timeout_ms: u64,
    pub format: FrameFormat,
    pub simulate: bool,
    pub sim_tones: Vec<SimTone>,
    pub sim_noise: f64,
    pub out_dir: PathBuf,
    pub scope: ScopeConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: None,
            baud: 115_200,
            read_timeout_ms: 100,
            format: FrameFormat::default(),
            simulate: false,
            sim_tones: vec![
                SimTone { freq_hz: 5.0, amplitude: 1.0, offset: 0.0 },
                SimTone { freq_hz: 5.0, amplitude: 0.5, offset: 0.0 },
                SimTone { freq_hz: 0.2, amplitude: 0.05, offset: 1.0 },
            ],
            sim_noise: 0.01,
            out_dir: PathBuf::from("data"),
            scope: ScopeConfig::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing settings file {}", path.display()))
    }

    /// File (if given) first, then command-line overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut settings = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(port) = &args.port {
            settings.port = Some(port.clone());
        }
        if let Some(baud) = args.baud {
            settings.baud = baud;
        }
        if let Some(dir) = &args.out_dir {
            settings.out_dir = dir.clone();
        }
        if let Some(rate) = args.rate {
            settings.scope.sample_rate_hz = rate;
        }
        settings.simulate |= args.simulate;
        if args.no_log {
            settings.scope.file_logging = false;
        }
        settings.scope.validate()?;
        if settings.format.channels() != settings.scope.channels.len() {
            anyhow::bail!(
                "frame format carries {} channels but {} are configured",
                settings.format.channels(),
                settings.scope.channels.len()
            );
        }
        Ok(settings)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.scope.channels.iter().map(|c| c.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "baud": 9600, "scope": {{ "sample_rate_hz": 1000.0, "cutoff_hz": 100.0 }} }}"#
        )
        .unwrap();
        let settings = Settings::load(file.path()).unwrap();
        assert_eq!(settings.baud, 9600);
        assert_eq!(settings.scope.sample_rate_hz, 1000.0);
        assert_eq!(settings.scope.time_base_s, 1.0);
        assert_eq!(settings.scope.channels.len(), 3);
        assert_eq!(settings.format, FrameFormat::default());
    }

    #[test]
    fn flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "port": "COM4", "baud": 9600 }}"#).unwrap();
        let path = file.path().to_string_lossy().into_owned();
        let args = Args::parse_from(["scope", "-c", path.as_str(), "-p", "COM7", "--no-log"]);
        let settings = Settings::from_args(&args).unwrap();
        assert_eq!(settings.port.as_deref(), Some("COM7"));
        assert_eq!(settings.baud, 9600);
        assert!(!settings.scope.file_logging);
    }

    #[test]
    fn invalid_rate_is_rejected() {
        let args = Args::parse_from(["scope", "--rate", "5"]);
        assert!(Settings::from_args(&args).is_err());
    }

    #[test]
    fn bad_json_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let err = Settings::load(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("parsing settings file"));
    }
}
