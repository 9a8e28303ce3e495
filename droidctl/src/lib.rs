mod adb;
pub mod parse;

pub use crate::{
    adb::{AdbDevice, AdbServer},
    parse::{
        match_resolution, Orientation, ResolutionMatch, UnsupportedOrientation,
        UnsupportedResolution, SUPPORTED_RESOLUTION,
    },
};

use {
    anyhow::Context as _,
    derive_more::Deref,
    image::{DynamicImage, GrayImage},
    std::{sync::Arc, time::Instant},
    thiserror::Error,
    tracing::debug,
};

/// Key code of the Home button.
pub const KEYCODE_HOME: u32 = 3;

/// Channel that executes commands on a single device.
pub trait Transport: Send + Sync {
    /// Runs a shell command and returns its standard output.
    fn shell(&self, command: &str) -> anyhow::Result<String>;
    /// Returns the current framebuffer encoded as PNG.
    fn screencap(&self) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Error)]
#[error("device {serial} not found (attached: {attached:?})")]
pub struct DeviceNotFound {
    pub serial: String,
    pub attached: Vec<String>,
}

/// A grayscale capture of the screen.
///
/// Captures are never reused: every detection takes a fresh one.
#[derive(Debug, Clone, Deref)]
pub struct Screenshot {
    #[deref]
    image: GrayImage,
    captured_at: Instant,
}

impl Screenshot {
    pub fn new(image: GrayImage) -> Self {
        Self {
            image,
            captured_at: Instant::now(),
        }
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn into_image(self) -> GrayImage {
        self.image
    }
}

struct ContextData {
    serial: String,
    transport: Box<dyn Transport>,
}

/// Handle to one controlled device.
#[derive(Clone)]
pub struct Context(Arc<ContextData>);

impl Context {
    /// Connects to the adb server and verifies that `serial` is attached.
    pub fn connect(host: &str, port: u16, serial: &str) -> anyhow::Result<Self> {
        let device = AdbServer::new(host, port).device(serial)?;
        Ok(Self::with_transport(serial, device))
    }

    pub fn with_transport(serial: impl Into<String>, transport: impl Transport + 'static) -> Self {
        Self(Arc::new(ContextData {
            serial: serial.into(),
            transport: Box::new(transport),
        }))
    }

    pub fn serial(&self) -> &str {
        &self.0.serial
    }

    pub fn shell(&self, command: &str) -> anyhow::Result<String> {
        self.0
            .transport
            .shell(command)
            .with_context(|| format!("shell command failed: {command:?}"))
    }

    pub fn capture_screen(&self) -> anyhow::Result<DynamicImage> {
        let png = self.0.transport.screencap()?;
        image::load_from_memory(&png).context("failed to decode screen capture")
    }

    pub fn capture_grayscale(&self) -> anyhow::Result<Screenshot> {
        Ok(Screenshot::new(self.capture_screen()?.to_luma8()))
    }

    pub fn tap(&self, x: u32, y: u32) -> anyhow::Result<()> {
        debug!("tap at ({x}, {y})");
        self.shell(&format!("input tap {x} {y}"))?;
        Ok(())
    }

    pub fn key_event(&self, code: u32) -> anyhow::Result<()> {
        self.shell(&format!("input keyevent {code}"))?;
        Ok(())
    }

    pub fn press_home(&self) -> anyhow::Result<()> {
        self.key_event(KEYCODE_HOME)
    }

    /// Disables auto-rotation and pins the display to `user_rotation`
    /// (0..=3, quarter turns).
    pub fn lock_rotation(&self, user_rotation: u8) -> anyhow::Result<()> {
        self.shell("settings put system accelerometer_rotation 0")?;
        self.shell(&format!("settings put system user_rotation {user_rotation}"))?;
        Ok(())
    }

    /// Display size as `(width, height)` in pixels.
    pub fn resolution(&self) -> anyhow::Result<(u32, u32)> {
        parse::parse_resolution(&self.shell("wm size")?)
    }

    /// Checks the display against the resolution the reference images need.
    pub fn ensure_resolution(&self, supported: (u32, u32)) -> anyhow::Result<ResolutionMatch> {
        Ok(match_resolution(self.resolution()?, supported)?)
    }

    /// Orientation requested by the foreground app.
    pub fn orientation(&self) -> anyhow::Result<Orientation> {
        let output =
            self.shell("dumpsys window | grep mCurrentAppOrientation | awk '{ print $1 }'")?;
        Ok(parse::parse_orientation_output(&output)?)
    }

    pub fn is_package_installed(&self, package: &str) -> anyhow::Result<bool> {
        Ok(parse::package_listed(
            &self.shell("pm list packages")?,
            package,
        ))
    }

    pub fn is_process_running(&self, package: &str) -> anyhow::Result<bool> {
        Ok(parse::process_listed(&self.shell("ps -A")?, package))
    }

    /// Starts the package's launcher activity.
    ///
    /// `--pct-syskeys 0` is required on devices without hardware keys
    /// (emulators, containers).
    pub fn launch_package(&self, package: &str) -> anyhow::Result<()> {
        self.shell(&format!("monkey --pct-syskeys 0 -p {package} 1"))?;
        Ok(())
    }

    pub fn force_stop(&self, package: &str) -> anyhow::Result<()> {
        self.shell(&format!("am force-stop {package}"))?;
        Ok(())
    }

    pub fn uninstall(&self, package: &str) -> anyhow::Result<()> {
        self.shell(&format!("pm uninstall {package}"))?;
        Ok(())
    }

    /// Opens the store page of the package.
    pub fn view_store_listing(&self, package: &str) -> anyhow::Result<()> {
        self.shell(&format!(
            "am start -a android.intent.action.VIEW -d 'market://details?id={package}'"
        ))?;
        Ok(())
    }
}

#[cfg(test)]
use {
    image::{ImageFormat, Luma},
    std::{io::Cursor, sync::Mutex},
};

#[cfg(test)]
#[derive(Default)]
struct Recorder {
    commands: Arc<Mutex<Vec<String>>>,
}

#[cfg(test)]
impl Transport for Recorder {
    fn shell(&self, command: &str) -> anyhow::Result<String> {
        self.commands.lock().unwrap().push(command.into());
        Ok(match command {
            "wm size" => "Physical size: 1600x2560\n".into(),
            "pm list packages" => "package:com.example.game\n".into(),
            c if c.starts_with("dumpsys window") => "mCurrentAppOrientation=SCREEN_ORIENTATION_PORTRAIT\n".into(),
            _ => String::new(),
        })
    }

    fn screencap(&self) -> anyhow::Result<Vec<u8>> {
        let image = GrayImage::from_pixel(4, 3, Luma([200]));
        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

#[test]
fn commands() {
    let recorder = Recorder::default();
    let commands = recorder.commands.clone();
    let ctx = Context::with_transport("emulator-5554", recorder);

    ctx.tap(10, 20).unwrap();
    ctx.press_home().unwrap();
    ctx.lock_rotation(3).unwrap();
    assert_eq!(ctx.resolution().unwrap(), (1600, 2560));
    assert_eq!(
        ctx.ensure_resolution(SUPPORTED_RESOLUTION).unwrap(),
        ResolutionMatch::Rotated
    );
    assert_eq!(ctx.orientation().unwrap(), Orientation::Portrait);
    assert!(ctx.is_package_installed("com.example.game").unwrap());
    assert!(!ctx.is_process_running("com.example.game").unwrap());

    let commands = commands.lock().unwrap();
    assert_eq!(commands[0], "input tap 10 20");
    assert_eq!(commands[1], "input keyevent 3");
    assert_eq!(commands[2], "settings put system accelerometer_rotation 0");
    assert_eq!(commands[3], "settings put system user_rotation 3");
}

#[test]
fn grayscale_capture() {
    let ctx = Context::with_transport("emulator-5554", Recorder::default());
    let screenshot = ctx.capture_grayscale().unwrap();
    assert_eq!(screenshot.dimensions(), (4, 3));
    assert!(screenshot.pixels().all(|p| p.0[0] == 200));
}
