use {
    crate::{
        config::Detection,
        templates::{Label, Templates},
    },
    image::{
        imageops::{crop_imm, resize, FilterType},
        GrayImage, Luma,
    },
    imageproc::{
        definitions::Image,
        integral_image::{integral_image, integral_squared_image},
        template_matching::{match_template_parallel, MatchTemplateMethod},
    },
    serde::Serialize,
    std::{collections::BTreeMap, sync::Arc},
    strum::IntoEnumIterator,
};

/// The coarse pass never shrinks a template's shorter side below this.
const MIN_COARSE_SIDE: u32 = 16;

/// Coarse positions per label that are re-scored at full resolution.
const CANDIDATES: usize = 3;

/// Axis-aligned box in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BBox {
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Match {
    pub label: Label,
    pub bbox: BBox,
    pub score: f32,
}

struct Coarse {
    scale: f32,
    template: GrayImage,
}

/// Finds reference images in screenshots.
///
/// The score is the mean-subtracted normalized cross-correlation between the
/// template and the window under it, so flat regions never match and the
/// result is independent of brightness offsets.
///
/// Search runs in two passes. Screenshot and template are first shrunk by
/// `detection.scale` and every placement is scored. The best few coarse
/// positions are then scored again at full resolution in a small
/// neighborhood, and that score is the one reported.
pub struct TemplateMatcher {
    templates: Arc<Templates>,
    coarse: BTreeMap<Label, Coarse>,
    threshold: f32,
}

impl TemplateMatcher {
    pub fn new(templates: Arc<Templates>, detection: &Detection) -> Self {
        let coarse = Label::iter()
            .map(|label| {
                let template = templates.get(label);
                let scale = coarse_scale(template.dimensions(), detection.scale);
                let coarse = Coarse {
                    scale,
                    template: scale_image(template, scale),
                };
                (label, coarse)
            })
            .collect();
        Self {
            templates,
            coarse,
            threshold: detection.threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Best candidate for each label, whatever its score.
    pub fn best_matches(&self, screenshot: &GrayImage, labels: &[Label]) -> Vec<Match> {
        // Shrunk screenshots, one per distinct coarse scale.
        let mut screens: Vec<(f32, GrayImage)> = Vec::new();
        labels
            .iter()
            .filter_map(|&label| {
                let template = self.templates.get(label);
                let coarse = &self.coarse[&label];
                let (x, y, score) = if coarse.scale >= 1.0 {
                    best_match(screenshot, template)?
                } else {
                    let index = match screens.iter().position(|(s, _)| *s == coarse.scale) {
                        Some(index) => index,
                        None => {
                            screens.push((coarse.scale, scale_image(screenshot, coarse.scale)));
                            screens.len() - 1
                        }
                    };
                    refine(screenshot, template, &screens[index].1, coarse)?
                };
                let (width, height) = template.dimensions();
                let bbox = BBox {
                    x,
                    y,
                    width,
                    height,
                };
                Some(Match { label, bbox, score })
            })
            .collect()
    }

    /// Candidates scoring above the threshold. An empty result means nothing
    /// was detected.
    pub fn find(&self, screenshot: &GrayImage, labels: &[Label]) -> Vec<Match> {
        let mut matches = self.best_matches(screenshot, labels);
        matches.retain(|m| m.score > self.threshold);
        matches
    }
}

/// Largest shrink not exceeding `scale` that keeps the template usable.
fn coarse_scale((width, height): (u32, u32), scale: f32) -> f32 {
    let side = width.min(height).max(1) as f32;
    scale.max(MIN_COARSE_SIDE as f32 / side).min(1.0)
}

fn scale_image(image: &GrayImage, scale: f32) -> GrayImage {
    if scale >= 1.0 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    let width = ((width as f32 * scale).round() as u32).max(1);
    let height = ((height as f32 * scale).round() as u32).max(1);
    resize(image, width, height, FilterType::Triangle)
}

fn unscale(value: u32, scale: f32) -> u32 {
    (value as f32 / scale).round() as u32
}

/// Re-scores the best coarse positions at full resolution.
fn refine(
    screenshot: &GrayImage,
    template: &GrayImage,
    coarse_screen: &GrayImage,
    coarse: &Coarse,
) -> Option<(u32, u32, f32)> {
    let scores = score_map(coarse_screen, &coarse.template)?;
    let (screen_width, screen_height) = screenshot.dimensions();
    let (width, height) = template.dimensions();
    // Rounding in both resizes shifts positions by up to about one coarse pixel.
    let radius = 2 * (1.0 / coarse.scale).ceil() as u32 + 1;
    peaks(&scores, CANDIDATES, coarse.template.dimensions())
        .into_iter()
        .filter_map(|(x, y)| {
            let (x, y) = (unscale(x, coarse.scale), unscale(y, coarse.scale));
            let left = x.saturating_sub(radius).min(screen_width);
            let top = y.saturating_sub(radius).min(screen_height);
            let right = (x + width + radius).min(screen_width);
            let bottom = (y + height + radius).min(screen_height);
            let region = crop_imm(screenshot, left, top, right - left, bottom - top).to_image();
            let (x, y, score) = best_match(&region, template)?;
            Some((left + x, top + y, score))
        })
        .max_by(|a, b| a.2.total_cmp(&b.2))
}

/// Up to `count` best positions, each at least a template size apart.
fn peaks(scores: &Image<Luma<f32>>, count: usize, (width, height): (u32, u32)) -> Vec<(u32, u32)> {
    let mut found: Vec<(u32, u32)> = Vec::new();
    while found.len() < count {
        let best = scores
            .enumerate_pixels()
            .filter(|&(x, y, _)| {
                !found
                    .iter()
                    .any(|&(fx, fy)| x.abs_diff(fx) < width && y.abs_diff(fy) < height)
            })
            .max_by(|a, b| a.2 .0[0].total_cmp(&b.2 .0[0]));
        match best {
            Some((x, y, _)) => found.push((x, y)),
            None => break,
        }
    }
    found
}

fn window_sum(integral: &Image<Luma<u64>>, x: u32, y: u32, width: u32, height: u32) -> f64 {
    let at = |x, y| integral.get_pixel(x, y).0[0];
    ((at(x + width, y + height) + at(x, y)) - (at(x + width, y) + at(x, y + height))) as f64
}

/// Score of every placement of `template` inside `image`, in `[-1, 1]`.
///
/// Returns `None` if the template doesn't fit into the image.
fn score_map(image: &GrayImage, template: &GrayImage) -> Option<Image<Luma<f32>>> {
    let (image_width, image_height) = image.dimensions();
    let (width, height) = template.dimensions();
    if width == 0 || height == 0 || width > image_width || height > image_height {
        return None;
    }
    let n = f64::from(width * height);
    let template_mean = template.pixels().map(|p| f64::from(p.0[0])).sum::<f64>() / n;
    let template_var: f64 = template
        .pixels()
        .map(|p| (f64::from(p.0[0]) - template_mean).powi(2))
        .sum();

    let correlation =
        match_template_parallel(image, template, MatchTemplateMethod::CrossCorrelation);
    let sums = integral_image::<_, u64>(image);
    let squares = integral_squared_image::<_, u64>(image);

    let scores = Image::<Luma<f32>>::from_fn(correlation.width(), correlation.height(), |x, y| {
        let sum = window_sum(&sums, x, y, width, height);
        let window_var = window_sum(&squares, x, y, width, height) - sum * sum / n;
        let denominator = (template_var * window_var.max(0.0)).sqrt();
        let score = if denominator <= f64::EPSILON {
            0.0
        } else {
            let value = f64::from(correlation.get_pixel(x, y).0[0]);
            (value - template_mean * sum) / denominator
        };
        Luma([score.clamp(-1.0, 1.0) as f32])
    });
    Some(scores)
}

/// Position and score of the window that correlates best with `template`.
///
/// Returns `None` if the template doesn't fit into the image.
pub fn best_match(image: &GrayImage, template: &GrayImage) -> Option<(u32, u32, f32)> {
    let scores = score_map(image, template)?;
    scores
        .enumerate_pixels()
        .max_by(|a, b| a.2 .0[0].total_cmp(&b.2 .0[0]))
        .map(|(x, y, score)| (x, y, score.0[0]))
}

/// Deterministic noise image, distinct for every seed.
#[cfg(test)]
pub(crate) fn pattern(width: u32, height: u32, seed: u32) -> GrayImage {
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

/// Noise made of square blocks, closer to real button art than per-pixel noise.
#[cfg(test)]
fn blocky(width: u32, height: u32, block: u32, seed: u32) -> GrayImage {
    resize(
        &pattern(width / block, height / block, seed),
        width,
        height,
        FilterType::Nearest,
    )
}

#[cfg(test)]
fn blocky_templates(width: u32, height: u32, block: u32) -> Templates {
    Templates::from_images(
        Label::iter().map(|label| (label, blocky(width, height, block, label as u32 + 1))),
    )
    .unwrap()
}

#[test]
fn finds_pasted_template() {
    let template = pattern(12, 10, 1);
    let mut screen = GrayImage::from_pixel(40, 30, Luma([90]));
    image::imageops::replace(&mut screen, &template, 21, 13);

    let (x, y, score) = best_match(&screen, &template).unwrap();
    assert_eq!((x, y), (21, 13));
    assert!(score > 0.99, "score = {score}");
}

#[test]
fn flat_and_oversized() {
    let template = pattern(12, 10, 2);
    let screen = GrayImage::from_pixel(40, 30, Luma([128]));
    let (_, _, score) = best_match(&screen, &template).unwrap();
    assert_eq!(score, 0.0);

    assert!(best_match(&GrayImage::new(4, 4), &template).is_none());
    assert!(best_match(&screen, &GrayImage::from_pixel(3, 3, Luma([9]))).is_some());
}

#[test]
fn box_center() {
    let bbox = BBox {
        x: 100,
        y: 40,
        width: 51,
        height: 20,
    };
    assert_eq!(bbox.center(), (125, 50));
}

#[test]
fn coarse_scale_limits() {
    assert_eq!(coarse_scale((300, 100), 0.25), 0.25);
    assert_eq!(coarse_scale((100, 40), 0.25), 0.4);
    assert_eq!(coarse_scale((12, 10), 0.25), 1.0);
    assert_eq!(coarse_scale((300, 100), 1.0), 1.0);
}

#[test]
fn coarse_pass_reports_full_resolution_scores() {
    let templates = Arc::new(blocky_templates(120, 40, 5));
    let detection = Detection {
        threshold: 0.8,
        scale: 0.5,
    };
    let matcher = TemplateMatcher::new(templates.clone(), &detection);
    // Odd and even offsets land between coarse pixels differently.
    for (x, y) in [(200, 101), (201, 100), (33, 257)] {
        let mut screen = GrayImage::from_pixel(640, 400, Luma([60]));
        image::imageops::replace(&mut screen, templates.get(Label::GakuenConsent), x, y);

        let found = matcher.find(&screen, &Label::ACTIONABLE);
        assert_eq!(found.len(), 1, "{found:?}");
        assert_eq!(found[0].label, Label::GakuenConsent);
        assert_eq!((found[0].bbox.x, found[0].bbox.y), (x as u32, y as u32));
        assert!(found[0].score > 0.99, "score = {}", found[0].score);
    }
}

#[test]
fn device_resolution_search_is_fast() {
    let templates = Arc::new(blocky_templates(300, 100, 10));
    let matcher = TemplateMatcher::new(templates.clone(), &Detection::default());
    let mut screen = GrayImage::from_pixel(2560, 1600, Luma([60]));
    image::imageops::replace(&mut screen, templates.get(Label::GakuenAgree), 1203, 901);

    let started = std::time::Instant::now();
    let found = matcher.find(&screen, &Label::ACTIONABLE);
    let elapsed = started.elapsed();

    assert_eq!(found.len(), 1, "{found:?}");
    assert_eq!(found[0].label, Label::GakuenAgree);
    assert_eq!((found[0].bbox.x, found[0].bbox.y), (1203, 901));
    assert!(found[0].score > 0.99, "score = {}", found[0].score);
    assert!(elapsed < std::time::Duration::from_secs(10), "{elapsed:?}");
}
