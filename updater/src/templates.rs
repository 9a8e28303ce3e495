use {
    anyhow::{bail, Context as _},
    image::{GrayImage, ImageReader},
    itertools::Itertools,
    serde::Serialize,
    std::{collections::BTreeMap, path::Path},
    strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr},
};

/// Reference images the detectors know about.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumIter, IntoStaticStr, Serialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Label {
    GakuenSetup,
    Loading,
    PlaystoreInstall,
    GakuenConsent,
    GakuenAgree,
    GakuenAgreeAll,
    GakuenMoveForward,
}

impl Label {
    /// Buttons that are clicked through during onboarding.
    pub const ACTIONABLE: [Label; 4] = [
        Label::GakuenConsent,
        Label::GakuenAgree,
        Label::GakuenAgreeAll,
        Label::GakuenMoveForward,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            Label::GakuenSetup => "gakuen_setup.png",
            Label::Loading => "gakuen_loading.png",
            Label::PlaystoreInstall => "playstore_install.png",
            Label::GakuenConsent => "gakuen_consent.png",
            Label::GakuenAgree => "gakuen_agree.png",
            Label::GakuenAgreeAll => "gakuen_agree_all.png",
            Label::GakuenMoveForward => "gakuen_move_forward.png",
        }
    }
}

/// Immutable set of grayscale reference images, one per [Label].
#[derive(Debug, Clone)]
pub struct Templates {
    images: BTreeMap<Label, GrayImage>,
}

impl Templates {
    /// Loads every label's image from `dir`. All of them are required.
    pub fn load(dir: &Path) -> anyhow::Result<Self> {
        let images = Label::iter()
            .map(|label| {
                let path = dir.join(label.file_name());
                let image = load_grayscale(&path)
                    .with_context(|| format!("failed to load template {label}"))?;
                Ok((label, image))
            })
            .collect::<anyhow::Result<BTreeMap<_, _>>>()?;
        Ok(Self { images })
    }

    /// Builds the set from images in memory. Every label must be present.
    pub fn from_images(images: impl IntoIterator<Item = (Label, GrayImage)>) -> anyhow::Result<Self> {
        let images: BTreeMap<_, _> = images.into_iter().collect();
        let missing = Label::iter()
            .filter(|label| !images.contains_key(label))
            .join(", ");
        if !missing.is_empty() {
            bail!("missing templates: {missing}");
        }
        Ok(Self { images })
    }

    pub fn get(&self, label: Label) -> &GrayImage {
        // Construction guarantees every label is present.
        &self.images[&label]
    }
}

fn load_grayscale(path: &Path) -> anyhow::Result<GrayImage> {
    let reader =
        ImageReader::open(path).with_context(|| format!("failed to open image {:?}", path))?;
    let image = reader
        .decode()
        .with_context(|| format!("failed to decode image {:?}", path))?;
    Ok(image.into_luma8())
}

#[test]
fn labels() {
    assert_eq!(Label::GakuenAgreeAll.to_string(), "gakuen_agree_all");
    assert_eq!(<&str>::from(Label::Loading), "loading");
    assert_eq!(Label::Loading.file_name(), "gakuen_loading.png");
    assert_eq!(Label::iter().count(), 7);
}

#[test]
fn load_requires_every_image() {
    let dir = tempfile::tempdir().unwrap();
    for label in Label::iter().skip(1) {
        GrayImage::from_pixel(3, 2, image::Luma([label as u8 * 10]))
            .save(dir.path().join(label.file_name()))
            .unwrap();
    }
    let err = Templates::load(dir.path()).unwrap_err();
    assert!(format!("{err:#}").contains("gakuen_setup"));

    GrayImage::from_pixel(3, 2, image::Luma([7]))
        .save(dir.path().join(Label::GakuenSetup.file_name()))
        .unwrap();
    let templates = Templates::load(dir.path()).unwrap();
    assert_eq!(templates.get(Label::GakuenSetup).get_pixel(0, 0).0, [7]);
    assert_eq!(templates.get(Label::GakuenAgree).dimensions(), (3, 2));

    assert!(Templates::from_images([(Label::Loading, GrayImage::new(1, 1))]).is_err());
}
