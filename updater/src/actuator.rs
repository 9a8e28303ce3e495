use {
    crate::{
        matcher::{BBox, Match},
        templates::Label,
    },
    itertools::Itertools,
    std::{thread::sleep, time::Duration},
    thiserror::Error,
    tracing::{debug, info},
};

/// Upper bound on detect-and-click rounds in [Actuator::click_until_none].
pub const MAX_CLICK_ROUNDS: usize = 50;

/// Clicking didn't make the detected buttons go away.
#[derive(Debug, Error)]
#[error(
    "buttons are still shown after {rounds} rounds of clicking: {}",
    .labels.iter().join(", ")
)]
pub struct ButtonsStuck {
    pub rounds: usize,
    /// Labels detected in the last round.
    pub labels: Vec<Label>,
}

/// Turns detections into taps.
pub struct Actuator {
    device: droidctl::Context,
    threshold: f32,
    settle: Duration,
}

impl Actuator {
    /// `threshold` must be the detector's threshold so that everything
    /// detected is also clicked.
    pub fn new(device: droidctl::Context, threshold: f32, settle: Duration) -> Self {
        Self {
            device,
            threshold,
            settle,
        }
    }

    pub fn tap_center_of(&self, bbox: &BBox) -> anyhow::Result<()> {
        let (x, y) = bbox.center();
        self.device.tap(x, y)
    }

    /// Taps the middle of the display and waits for the UI to react.
    pub fn tap_screen_center(&self) -> anyhow::Result<()> {
        info!("clicking screen");
        let (width, height) = self.device.resolution()?;
        self.device.tap(width / 2, height / 2)?;
        sleep(self.settle);
        Ok(())
    }

    /// Taps every match above the threshold. Returns the number of taps.
    pub fn click_all_detected(&self, matches: &[Match]) -> anyhow::Result<usize> {
        let mut taps = 0;
        for m in matches.iter().filter(|m| m.score > self.threshold) {
            debug!(label = %m.label, score = m.score, "clicking");
            self.tap_center_of(&m.bbox)?;
            taps += 1;
        }
        Ok(taps)
    }

    /// Detects and clicks until a detection comes back empty.
    ///
    /// Fails with [ButtonsStuck] if the screen still shows buttons after
    /// [MAX_CLICK_ROUNDS] rounds.
    pub fn click_until_none(
        &self,
        mut detect: impl FnMut() -> anyhow::Result<Vec<Match>>,
    ) -> anyhow::Result<usize> {
        let mut taps = 0;
        let mut last = Vec::new();
        for _ in 0..MAX_CLICK_ROUNDS {
            let matches = detect()?;
            if matches.is_empty() {
                return Ok(taps);
            }
            taps += self.click_all_detected(&matches)?;
            last = matches;
        }
        Err(ButtonsStuck {
            rounds: MAX_CLICK_ROUNDS,
            labels: last.iter().map(|m| m.label).collect(),
        }
        .into())
    }
}

#[cfg(test)]
#[derive(Default, Clone)]
struct Taps(std::sync::Arc<std::sync::Mutex<Vec<String>>>);

#[cfg(test)]
impl droidctl::Transport for Taps {
    fn shell(&self, command: &str) -> anyhow::Result<String> {
        if command == "wm size" {
            return Ok("Physical size: 1600x2560\n".into());
        }
        self.0.lock().unwrap().push(command.into());
        Ok(String::new())
    }

    fn screencap(&self) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("no screen")
    }
}

#[cfg(test)]
fn actuator() -> (Actuator, Taps) {
    let taps = Taps::default();
    let device = droidctl::Context::with_transport("test", taps.clone());
    (Actuator::new(device, 0.8, Duration::ZERO), taps)
}

#[cfg(test)]
fn button(label: Label, x: u32, score: f32) -> Match {
    Match {
        label,
        bbox: BBox {
            x,
            y: 10,
            width: 20,
            height: 10,
        },
        score,
    }
}

#[test]
fn one_batch_then_stop() {
    let (actuator, taps) = actuator();
    let mut batches = vec![
        Vec::new(),
        vec![
            button(Label::GakuenConsent, 0, 0.95),
            button(Label::GakuenAgree, 100, 0.9),
        ],
    ];
    let mut calls = 0;
    let total = actuator
        .click_until_none(|| {
            calls += 1;
            Ok(batches.pop().unwrap_or_default())
        })
        .unwrap();
    assert_eq!(total, 2);
    assert_eq!(calls, 2);
    assert_eq!(
        *taps.0.lock().unwrap(),
        ["input tap 10 15".to_string(), "input tap 110 15".to_string()]
    );
}

#[test]
fn low_scores_are_skipped() {
    let (actuator, taps) = actuator();
    let count = actuator
        .click_all_detected(&[
            button(Label::GakuenAgreeAll, 0, 0.8),
            button(Label::GakuenAgree, 40, 0.81),
        ])
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(*taps.0.lock().unwrap(), ["input tap 50 15".to_string()]);
}

#[test]
fn stuck_screen_gives_up() {
    let (actuator, taps) = actuator();
    let err = actuator
        .click_until_none(|| Ok(vec![button(Label::GakuenConsent, 0, 0.99)]))
        .unwrap_err();
    let stuck = err.downcast_ref::<ButtonsStuck>().unwrap();
    assert_eq!(stuck.rounds, MAX_CLICK_ROUNDS);
    assert_eq!(stuck.labels, [Label::GakuenConsent]);
    assert!(err.to_string().ends_with("clicking: gakuen_consent"));
    assert_eq!(taps.0.lock().unwrap().len(), MAX_CLICK_ROUNDS);
}

#[test]
fn screen_center() {
    let (actuator, taps) = actuator();
    actuator.tap_screen_center().unwrap();
    assert_eq!(*taps.0.lock().unwrap(), ["input tap 800 1280".to_string()]);
}
