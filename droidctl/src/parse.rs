//! Parsers for the text printed by device shell commands.

use {
    anyhow::{bail, Context as _},
    itertools::Itertools,
    strum::Display,
    thiserror::Error,
};

/// Resolution the reference images were captured at, in landscape.
pub const SUPPORTED_RESOLUTION: (u32, u32) = (2560, 1600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Orientation {
    Portrait = 0,
    Landscape = 1,
}

impl Orientation {
    pub fn index(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Error)]
#[error("unknown screen orientation: {0:?}")]
pub struct UnsupportedOrientation(pub String);

#[derive(Debug, Error)]
#[error("device resolution {actual:?} not supported (expected {expected:?} in either orientation)")]
pub struct UnsupportedResolution {
    pub actual: (u32, u32),
    pub expected: (u32, u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionMatch {
    Exact,
    Rotated,
}

/// Decodes an `mCurrentAppOrientation` value.
///
/// `SCREEN_ORIENTATION_UNSPECIFIED` counts as portrait, which is what the
/// device reports before the app has requested anything.
pub fn parse_orientation(value: &str) -> Result<Orientation, UnsupportedOrientation> {
    match value.trim() {
        "SCREEN_ORIENTATION_PORTRAIT" | "SCREEN_ORIENTATION_UNSPECIFIED" => {
            Ok(Orientation::Portrait)
        }
        "SCREEN_ORIENTATION_LANDSCAPE" => Ok(Orientation::Landscape),
        other => Err(UnsupportedOrientation(other.into())),
    }
}

/// Extracts the orientation from `dumpsys window` output filtered down to the
/// `mCurrentAppOrientation=...` token.
pub fn parse_orientation_output(output: &str) -> Result<Orientation, UnsupportedOrientation> {
    let value = output.split('=').next_back().unwrap_or_default();
    parse_orientation(value)
}

/// Parses `wm size` output.
///
/// The last line wins, so an `Override size:` line takes precedence over the
/// physical size.
pub fn parse_resolution(output: &str) -> anyhow::Result<(u32, u32)> {
    let line = output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .next_back()
        .context("empty `wm size` output")?;
    let size = line
        .split_whitespace()
        .next_back()
        .with_context(|| format!("invalid `wm size` line: {line:?}"))?;
    let Some((width, height)) = size.split_once('x') else {
        bail!("invalid `wm size` value: {size:?}");
    };
    let width = width
        .parse()
        .with_context(|| format!("invalid width in {size:?}"))?;
    let height = height
        .parse()
        .with_context(|| format!("invalid height in {size:?}"))?;
    Ok((width, height))
}

pub fn match_resolution(
    actual: (u32, u32),
    supported: (u32, u32),
) -> Result<ResolutionMatch, UnsupportedResolution> {
    if actual == supported {
        Ok(ResolutionMatch::Exact)
    } else if actual == (supported.1, supported.0) {
        Ok(ResolutionMatch::Rotated)
    } else {
        Err(UnsupportedResolution {
            actual,
            expected: supported,
        })
    }
}

/// Serials from `adb devices` output, skipping the header and any device
/// that is not in the `device` state (offline, unauthorized).
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let (serial, state) = line.split_whitespace().collect_tuple()?;
            (state == "device").then(|| serial.to_string())
        })
        .collect()
}

/// Whether `pm list packages` output contains the package.
pub fn package_listed(output: &str, package: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("package:"))
        .any(|name| name == package)
}

/// Whether a `ps -A` row has the package as its process name.
pub fn process_listed(output: &str, package: &str) -> bool {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next_back())
        .any(|name| name == package)
}

#[test]
fn orientation_values() {
    assert_eq!(
        parse_orientation("SCREEN_ORIENTATION_PORTRAIT").unwrap().index(),
        0
    );
    assert_eq!(
        parse_orientation("SCREEN_ORIENTATION_LANDSCAPE").unwrap().index(),
        1
    );
    assert_eq!(
        parse_orientation("SCREEN_ORIENTATION_UNSPECIFIED").unwrap(),
        Orientation::Portrait
    );
    let err = parse_orientation("SCREEN_ORIENTATION_SENSOR").unwrap_err();
    assert_eq!(err.0, "SCREEN_ORIENTATION_SENSOR");
    assert_eq!(
        parse_orientation_output("mCurrentAppOrientation=SCREEN_ORIENTATION_LANDSCAPE\n").unwrap(),
        Orientation::Landscape
    );
    assert!(parse_orientation_output("").is_err());
}

#[test]
fn resolution() {
    assert_eq!(
        parse_resolution("Physical size: 1600x2560\n").unwrap(),
        (1600, 2560)
    );
    assert_eq!(
        parse_resolution("Physical size: 1600x2560\nOverride size: 1080x1920\n").unwrap(),
        (1080, 1920)
    );
    assert!(parse_resolution("").is_err());
    assert!(parse_resolution("Physical size: big").is_err());

    assert_eq!(
        match_resolution((2560, 1600), SUPPORTED_RESOLUTION).unwrap(),
        ResolutionMatch::Exact
    );
    assert_eq!(
        match_resolution((1600, 2560), SUPPORTED_RESOLUTION).unwrap(),
        ResolutionMatch::Rotated
    );
    let err = match_resolution((1920, 1080), SUPPORTED_RESOLUTION).unwrap_err();
    assert_eq!(err.actual, (1920, 1080));
    assert!(err.to_string().contains("(1920, 1080)"));
}

#[test]
fn devices() {
    let output = "* daemon started successfully\n\
                  List of devices attached\n\
                  emulator-5554\tdevice\n\
                  R58M12ABCDE\tunauthorized\n\
                  192.168.1.20:5555\tdevice\n\n";
    assert_eq!(
        parse_devices(output),
        vec!["emulator-5554".to_string(), "192.168.1.20:5555".to_string()]
    );
    assert!(parse_devices("List of devices attached\n\n").is_empty());
}

#[test]
fn packages_and_processes() {
    let packages = "package:com.android.vending\npackage:com.example.game\r\npackage:com.example.game.beta\n";
    assert!(package_listed(packages, "com.example.game"));
    assert!(package_listed(packages, "com.android.vending"));
    assert!(!package_listed(packages, "com.example"));

    let ps = "USER           PID  PPID     VSZ    RSS WCHAN            ADDR S NAME\n\
              root             1     0 1234567   4321 0                   0 S init\n\
              u0_a123       4242   321 9876543 123456 0                  0 S com.example.game\n";
    assert!(process_listed(ps, "com.example.game"));
    assert!(!process_listed(ps, "com.example"));
    assert!(!process_listed("", "com.example.game"));
}
