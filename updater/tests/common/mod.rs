//! A scripted device that reacts to shell commands and taps the way the game
//! and the store do, rendering tiny synthetic screens.

use {
    gakuen_updater::{
        config::{AdbConfig, Detection, Pacing, ServerAddress, Timeouts},
        Config, Label, Templates,
    },
    image::{imageops::replace, GrayImage, ImageFormat, Luma},
    std::{
        io::Cursor,
        path::PathBuf,
        sync::{Arc, Mutex},
    },
    strum::IntoEnumIterator,
};

pub const PACKAGE: &str = "com.example.game";

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;
const BACKGROUND: u8 = 60;
const TEMPLATE_SIZE: (u32, u32) = (12, 10);

pub fn pattern(width: u32, height: u32, seed: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let mut h = x.wrapping_mul(0x9E37_79B1)
            ^ y.wrapping_mul(0x85EB_CA77)
            ^ seed.wrapping_mul(0xC2B2_AE3D);
        h ^= h >> 15;
        h = h.wrapping_mul(0x2C1B_3C6D);
        h ^= h >> 12;
        Luma([(h & 0xFF) as u8])
    })
}

pub fn template(label: Label) -> GrayImage {
    pattern(TEMPLATE_SIZE.0, TEMPLATE_SIZE.1, label as u32 + 1)
}

pub fn templates() -> Arc<Templates> {
    Arc::new(Templates::from_images(Label::iter().map(|l| (l, template(l)))).unwrap())
}

/// Where each element is drawn on its screen.
fn position(label: Label) -> (u32, u32) {
    match label {
        Label::PlaystoreInstall => (20, 20),
        Label::GakuenSetup => (10, 10),
        Label::GakuenConsent => (4, 30),
        Label::GakuenAgree => (40, 6),
        Label::GakuenMoveForward => (26, 20),
        Label::Loading | Label::GakuenAgreeAll => (0, 0),
    }
}

fn hits(label: Label, x: u32, y: u32) -> bool {
    let (left, top) = position(label);
    (left..left + TEMPLATE_SIZE.0).contains(&x) && (top..top + TEMPLATE_SIZE.1).contains(&y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Home,
    Store,
    Credits,
    Setup,
    Consent,
    Agree,
    Download,
    Done,
}

pub struct State {
    pub installed: bool,
    pub running: bool,
    pub stage: Stage,
    pub credits_frames: u32,
    pub download_frames: u32,
    pub store_has_button: bool,
    pub install_completes: bool,
    pub setup_appears: bool,
    pub agree_responds: bool,
    /// Whether the game switches to landscape once the download starts.
    pub rotates: bool,
    pub commands: Vec<String>,
}

#[derive(Clone)]
pub struct FakeDevice(pub Arc<Mutex<State>>);

impl FakeDevice {
    pub fn new(installed: bool) -> Self {
        Self(Arc::new(Mutex::new(State {
            installed,
            running: false,
            stage: Stage::Home,
            credits_frames: 2,
            download_frames: 3,
            store_has_button: true,
            install_completes: true,
            setup_appears: true,
            agree_responds: true,
            rotates: true,
            commands: Vec::new(),
        })))
    }

    pub fn context(&self) -> droidctl::Context {
        droidctl::Context::with_transport("fake-device", self.clone())
    }

    pub fn commands(&self) -> Vec<String> {
        self.0.lock().unwrap().commands.clone()
    }

    pub fn position_of(&self, command: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.starts_with(command))
    }
}

fn render(elements: &[Label]) -> GrayImage {
    let mut screen = GrayImage::from_pixel(WIDTH, HEIGHT, Luma([BACKGROUND]));
    for &label in elements {
        let (x, y) = position(label);
        replace(&mut screen, &template(label), x.into(), y.into());
    }
    screen
}

impl State {
    fn tap(&mut self, x: u32, y: u32) {
        self.stage = match self.stage {
            Stage::Store if self.store_has_button && hits(Label::PlaystoreInstall, x, y) => {
                self.installed = self.install_completes;
                Stage::Home
            }
            Stage::Setup => Stage::Consent,
            Stage::Consent if hits(Label::GakuenConsent, x, y) => Stage::Agree,
            Stage::Agree if self.agree_responds && hits(Label::GakuenAgree, x, y) => {
                Stage::Download
            }
            stage => stage,
        };
    }

    fn screen(&mut self) -> GrayImage {
        match self.stage {
            Stage::Home => render(&[]),
            Stage::Store if self.store_has_button => render(&[Label::PlaystoreInstall]),
            Stage::Store => render(&[]),
            Stage::Credits => {
                if self.credits_frames > 0 {
                    self.credits_frames -= 1;
                    GrayImage::from_pixel(WIDTH, HEIGHT, Luma([240]))
                } else if self.setup_appears {
                    self.stage = Stage::Setup;
                    render(&[Label::GakuenSetup])
                } else {
                    self.stage = Stage::Home;
                    render(&[])
                }
            }
            Stage::Setup => render(&[Label::GakuenSetup]),
            Stage::Consent => render(&[Label::GakuenConsent]),
            Stage::Agree => render(&[Label::GakuenAgree]),
            Stage::Download => {
                if self.download_frames > 0 {
                    self.download_frames -= 1;
                    render(&[])
                } else {
                    self.stage = Stage::Done;
                    render(&[Label::GakuenMoveForward])
                }
            }
            Stage::Done => render(&[Label::GakuenMoveForward]),
        }
    }
}

impl droidctl::Transport for FakeDevice {
    fn shell(&self, command: &str) -> anyhow::Result<String> {
        let mut state = self.0.lock().unwrap();
        state.commands.push(command.into());
        let words: Vec<&str> = command.split_whitespace().collect();
        let output = match words.as_slice() {
            ["wm", "size"] => format!("Physical size: {WIDTH}x{HEIGHT}\n"),
            ["pm", "list", "packages"] => {
                let mut output = "package:com.android.vending\n".to_string();
                if state.installed {
                    output += &format!("package:{PACKAGE}\n");
                }
                output
            }
            ["pm", "uninstall", package] if *package == PACKAGE => {
                state.installed = false;
                "Success\n".into()
            }
            ["ps", "-A"] => {
                let mut output = "USER PID PPID VSZ RSS WCHAN ADDR S NAME\n".to_string();
                if state.running {
                    output += &format!("u0_a99 4242 321 100 100 0 0 S {PACKAGE}\n");
                }
                output
            }
            ["monkey", .., package, "1"] if *package == PACKAGE => {
                if state.installed {
                    state.running = true;
                    if matches!(state.stage, Stage::Home | Stage::Store) {
                        state.stage = Stage::Credits;
                    }
                }
                String::new()
            }
            ["am", "force-stop", package] if *package == PACKAGE => {
                state.running = false;
                state.stage = Stage::Home;
                String::new()
            }
            ["am", "start", "-a", "android.intent.action.VIEW", ..] => {
                state.stage = Stage::Store;
                String::new()
            }
            ["input", "tap", x, y] => {
                let (x, y) = (x.parse::<u32>()?, y.parse::<u32>()?);
                state.tap(x, y);
                String::new()
            }
            ["input", "keyevent", "3"] => {
                if state.stage == Stage::Store {
                    state.stage = Stage::Home;
                }
                String::new()
            }
            ["dumpsys", "window", ..] => {
                let value = if state.rotates && matches!(state.stage, Stage::Download | Stage::Done) {
                    "SCREEN_ORIENTATION_LANDSCAPE"
                } else {
                    "SCREEN_ORIENTATION_PORTRAIT"
                };
                format!("mCurrentAppOrientation={value}\n")
            }
            ["settings", "put", ..] => String::new(),
            _ => anyhow::bail!("unexpected command: {command:?}"),
        };
        Ok(output)
    }

    fn screencap(&self) -> anyhow::Result<Vec<u8>> {
        let screen = self.0.lock().unwrap().screen();
        let mut png = Vec::new();
        screen.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(png)
    }
}

pub fn config(install: bool, uninstall: bool, wait_for_download: bool) -> Config {
    Config {
        adb: AdbConfig {
            server: ServerAddress {
                host: "127.0.0.1".into(),
                port: 5037,
            },
            device_serial: "fake-device".into(),
        },
        install,
        uninstall,
        wait_for_download,
        timeouts: Timeouts {
            gakuen_running: 5,
            detect_credit_screen: 5,
            detect_setup_screen: 5,
            download_start: 5,
            download_finish: 5,
            install: 5,
        },
        package: PACKAGE.into(),
        assets_dir: PathBuf::from("assets"),
        screenshots_dir: None,
        detection: Detection {
            threshold: 0.8,
            scale: 1.0,
        },
        pacing: Pacing {
            poll_interval_ms: 1,
            settle_ms: 0,
            after_install_ms: 0,
        },
    }
}
