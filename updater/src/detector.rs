use {
    crate::{
        matcher::{Match, TemplateMatcher},
        templates::Label,
    },
    droidctl::Screenshot,
    image::GrayImage,
    serde::Serialize,
    strum::{Display, EnumIter, EnumString},
    thiserror::Error,
    tracing::debug,
};

/// Mean gray level above which a screen counts as the white credits screen.
pub const CREDITS_BRIGHTNESS: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    Setup,
    Loading,
    Credits,
    MoveForward,
    Buttons,
    Install,
}

#[derive(Debug, Error)]
#[error("invalid screen type {0:?}")]
pub struct UnsupportedScreen(pub String);

impl Screen {
    pub fn parse(name: &str) -> Result<Self, UnsupportedScreen> {
        name.parse().map_err(|_| UnsupportedScreen(name.into()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub screen: Screen,
    pub shown: bool,
    pub matches: Vec<Match>,
}

/// Answers "is this screen shown right now" from a fresh capture per call.
pub struct ScreenDetector {
    device: droidctl::Context,
    matcher: TemplateMatcher,
}

impl ScreenDetector {
    pub fn new(device: droidctl::Context, matcher: TemplateMatcher) -> Self {
        Self { device, matcher }
    }

    pub fn threshold(&self) -> f32 {
        self.matcher.threshold()
    }

    fn capture(&self) -> anyhow::Result<Screenshot> {
        self.device.capture_grayscale()
    }

    fn find(&self, labels: &[Label]) -> anyhow::Result<Vec<Match>> {
        let screenshot = self.capture()?;
        let matches = self.matcher.find(&screenshot, labels);
        debug!(?labels, found = matches.len(), "template search");
        Ok(matches)
    }

    fn shown(&self, label: Label) -> anyhow::Result<bool> {
        Ok(!self.find(&[label])?.is_empty())
    }

    pub fn is_setup_screen(&self) -> anyhow::Result<bool> {
        self.shown(Label::GakuenSetup)
    }

    pub fn is_loading_screen(&self) -> anyhow::Result<bool> {
        self.shown(Label::Loading)
    }

    /// The credits and the first loading screens are mostly white, so the
    /// mean brightness is enough to tell them apart from everything else.
    pub fn is_credits_screen(&self, brightness_threshold: f64) -> anyhow::Result<bool> {
        let screenshot = self.capture()?;
        let brightness = mean_brightness(&screenshot);
        debug!(brightness, "credits check");
        Ok(brightness > brightness_threshold)
    }

    pub fn is_move_forward_visible(&self) -> anyhow::Result<bool> {
        self.shown(Label::GakuenMoveForward)
    }

    /// Every onboarding button currently visible.
    pub fn detect_actionable_buttons(&self) -> anyhow::Result<Vec<Match>> {
        self.find(&Label::ACTIONABLE)
    }

    pub fn detect_install_button(&self) -> anyhow::Result<Vec<Match>> {
        self.find(&[Label::PlaystoreInstall])
    }

    /// One-shot check of any screen, for diagnostics.
    pub fn detect(&self, screen: Screen) -> anyhow::Result<DetectionResult> {
        let (shown, matches) = match screen {
            Screen::Credits => (self.is_credits_screen(CREDITS_BRIGHTNESS)?, Vec::new()),
            Screen::Setup => self.detect_labels(&[Label::GakuenSetup])?,
            Screen::Loading => self.detect_labels(&[Label::Loading])?,
            Screen::MoveForward => self.detect_labels(&[Label::GakuenMoveForward])?,
            Screen::Buttons => self.detect_labels(&Label::ACTIONABLE)?,
            Screen::Install => self.detect_labels(&[Label::PlaystoreInstall])?,
        };
        Ok(DetectionResult {
            screen,
            shown,
            matches,
        })
    }

    fn detect_labels(&self, labels: &[Label]) -> anyhow::Result<(bool, Vec<Match>)> {
        let matches = self.find(labels)?;
        Ok((!matches.is_empty(), matches))
    }
}

pub fn mean_brightness(image: &GrayImage) -> f64 {
    let count = u64::from(image.width()) * u64::from(image.height());
    if count == 0 {
        return 0.0;
    }
    let total: u64 = image.pixels().map(|p| u64::from(p.0[0])).sum();
    total as f64 / count as f64
}

#[cfg(test)]
use {
    crate::{config::Detection, matcher::pattern, templates::Templates},
    image::{imageops::replace, ImageFormat, Luma},
    std::{io::Cursor, sync::Arc},
    strum::IntoEnumIterator,
};

#[cfg(test)]
struct FixedScreen(Vec<u8>);

#[cfg(test)]
impl droidctl::Transport for FixedScreen {
    fn shell(&self, _command: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }

    fn screencap(&self) -> anyhow::Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
fn templates() -> Templates {
    Templates::from_images(
        Label::iter().map(|label| (label, pattern(12, 10, label as u32 + 1))),
    )
    .unwrap()
}

#[cfg(test)]
fn detector(screen: &GrayImage) -> ScreenDetector {
    let mut png = Vec::new();
    screen
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .unwrap();
    let config = Detection {
        threshold: 0.8,
        scale: 1.0,
    };
    ScreenDetector::new(
        droidctl::Context::with_transport("test", FixedScreen(png)),
        TemplateMatcher::new(Arc::new(templates()), &config),
    )
}

#[test]
fn nothing_on_blank_screen() {
    let detector = detector(&GrayImage::from_pixel(64, 48, Luma([60])));
    assert!(detector.detect_actionable_buttons().unwrap().is_empty());
    assert!(!detector.is_setup_screen().unwrap());
    assert!(!detector.is_loading_screen().unwrap());
    assert!(!detector.is_move_forward_visible().unwrap());
    assert!(!detector.is_credits_screen(CREDITS_BRIGHTNESS).unwrap());
}

#[test]
fn tiny_screen_is_not_an_error() {
    let detector = detector(&GrayImage::from_pixel(5, 5, Luma([60])));
    assert!(detector.detect_actionable_buttons().unwrap().is_empty());
}

#[test]
fn multiple_buttons() {
    let all = templates();
    let mut screen = GrayImage::from_pixel(64, 48, Luma([60]));
    replace(&mut screen, all.get(Label::GakuenConsent), 4, 30);
    replace(&mut screen, all.get(Label::GakuenAgreeAll), 40, 6);
    let detector = detector(&screen);

    let mut found = detector.detect_actionable_buttons().unwrap();
    found.sort_by_key(|m| m.label);
    let labels: Vec<_> = found.iter().map(|m| m.label).collect();
    assert_eq!(labels, [Label::GakuenConsent, Label::GakuenAgreeAll]);
    assert_eq!(found[0].bbox.center(), (10, 35));
    assert_eq!((found[1].bbox.x, found[1].bbox.y), (40, 6));
    assert!(!detector.is_setup_screen().unwrap());

    let detection = detector.detect(Screen::Buttons).unwrap();
    assert!(detection.shown);
    assert_eq!(detection.matches.len(), 2);
}

#[test]
fn credits_brightness() {
    let detector = detector(&GrayImage::from_pixel(64, 48, Luma([230])));
    assert!(detector.is_credits_screen(CREDITS_BRIGHTNESS).unwrap());
    assert!(!detector.is_credits_screen(240.0).unwrap());
    assert!(detector.detect(Screen::Credits).unwrap().shown);
    assert_eq!(mean_brightness(&GrayImage::new(0, 0)), 0.0);
}

#[test]
fn screen_names() {
    assert_eq!(Screen::parse("move_forward").unwrap(), Screen::MoveForward);
    assert_eq!(Screen::Setup.to_string(), "setup");
    let err = Screen::parse("title").unwrap_err();
    assert_eq!(err.to_string(), "invalid screen type \"title\"");
    assert_eq!(Screen::iter().count(), 6);
}
