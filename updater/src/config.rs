use {
    anyhow::{ensure, Context as _},
    serde::{Deserialize, Serialize},
    std::{
        path::{Path, PathBuf},
        time::Duration,
    },
    thiserror::Error,
};

pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
pub const DEFAULT_PACKAGE: &str = "com.bandainamcoent.idolmaster_gakuen";
pub const DEFAULT_THRESHOLD: f32 = 0.8;

#[derive(Debug, Error)]
#[error("configuration file not found: {0:?}")]
pub struct ConfigNotFound(pub PathBuf);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub adb: AdbConfig,
    pub install: bool,
    pub uninstall: bool,
    pub wait_for_download: bool,
    pub timeouts: Timeouts,
    #[serde(default = "default_package")]
    pub package: String,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    /// Where to save a screenshot when a phase fails.
    #[serde(default)]
    pub screenshots_dir: Option<PathBuf>,
    #[serde(default)]
    pub detection: Detection,
    #[serde(default)]
    pub pacing: Pacing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdbConfig {
    pub server: ServerAddress,
    pub device_serial: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

/// Per-phase limits, in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeouts {
    pub gakuen_running: u64,
    pub detect_credit_screen: u64,
    pub detect_setup_screen: u64,
    pub download_start: u64,
    pub download_finish: u64,
    #[serde(default = "default_install_timeout")]
    pub install: u64,
}

impl Timeouts {
    pub fn gakuen_running(&self) -> Duration {
        Duration::from_secs(self.gakuen_running)
    }

    pub fn detect_credit_screen(&self) -> Duration {
        Duration::from_secs(self.detect_credit_screen)
    }

    pub fn detect_setup_screen(&self) -> Duration {
        Duration::from_secs(self.detect_setup_screen)
    }

    pub fn download_start(&self) -> Duration {
        Duration::from_secs(self.download_start)
    }

    pub fn download_finish(&self) -> Duration {
        Duration::from_secs(self.download_finish)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Detection {
    /// Minimum match score for both detection and clicking.
    pub threshold: f32,
    /// Factor applied to screenshots and templates before matching.
    pub scale: f32,
}

impl Default for Detection {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            scale: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pacing {
    pub poll_interval_ms: u64,
    pub settle_ms: u64,
    pub after_install_ms: u64,
}

impl Pacing {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn after_install(&self) -> Duration {
        Duration::from_millis(self.after_install_ms)
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            settle_ms: 1000,
            after_install_ms: 3000,
        }
    }
}

fn default_package() -> String {
    DEFAULT_PACKAGE.into()
}

fn default_assets_dir() -> PathBuf {
    "assets".into()
}

fn default_install_timeout() -> u64 {
    300
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.try_exists()? {
            return Err(ConfigNotFound(path.into()).into());
        }
        let text = fs_err::read_to_string(path)?;
        let config = Self::parse(&text)
            .with_context(|| format!("failed to load configuration from {path:?}"))?;
        Ok(config)
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let Detection { threshold, scale } = self.detection;
        ensure!(
            threshold > 0.0 && threshold <= 1.0,
            "detection.threshold must be in (0, 1], got {threshold}"
        );
        ensure!(
            scale > 0.0 && scale <= 1.0,
            "detection.scale must be in (0, 1], got {scale}"
        );
        ensure!(!self.package.is_empty(), "package must not be empty");
        Ok(())
    }
}

#[cfg(test)]
const MINIMAL: &str = "
adb:
  server:
    host: 127.0.0.1
    port: 5037
  device_serial: emulator-5554
install: true
uninstall: false
wait_for_download: true
timeouts:
  gakuen_running: 60
  detect_credit_screen: 120
  detect_setup_screen: 120
  download_start: 300
  download_finish: 3600
";

#[test]
fn defaults() {
    let config = Config::parse(MINIMAL).unwrap();
    assert_eq!(config.adb.server.host, "127.0.0.1");
    assert_eq!(config.adb.server.port, 5037);
    assert_eq!(config.adb.device_serial, "emulator-5554");
    assert!(config.install && !config.uninstall && config.wait_for_download);
    assert_eq!(config.timeouts.download_finish(), Duration::from_secs(3600));
    assert_eq!(config.timeouts.install(), Duration::from_secs(300));
    assert_eq!(config.package, DEFAULT_PACKAGE);
    assert_eq!(config.assets_dir, PathBuf::from("assets"));
    assert_eq!(config.screenshots_dir, None);
    assert_eq!(config.detection, Detection::default());
    assert_eq!(config.pacing.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.pacing.after_install(), Duration::from_secs(3));
}

#[test]
fn overrides_and_validation() {
    let text = format!("{MINIMAL}detection:\n  threshold: 0.9\npacing:\n  settle_ms: 5\n");
    let config = Config::parse(&text).unwrap();
    assert_eq!(config.detection.threshold, 0.9);
    assert_eq!(config.detection.scale, 0.25);
    assert_eq!(config.pacing.settle(), Duration::from_millis(5));
    assert_eq!(config.pacing.poll_interval_ms, 1000);

    let text = format!("{MINIMAL}detection:\n  threshold: 1.5\n");
    assert!(Config::parse(&text).is_err());

    let without_timeouts = MINIMAL.split("timeouts:").next().unwrap();
    assert!(Config::parse(without_timeouts).is_err());
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");

    let err = Config::load(&path).unwrap_err();
    assert!(err.downcast_ref::<ConfigNotFound>().is_some());

    fs_err::write(&path, MINIMAL).unwrap();
    assert_eq!(Config::load(&path).unwrap().timeouts.gakuen_running, 60);
}
