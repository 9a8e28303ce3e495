use {
    crate::{
        actuator::Actuator,
        config::Config,
        detector::{ScreenDetector, CREDITS_BRIGHTNESS},
        matcher::TemplateMatcher,
        poll::{probe, PollLoop},
        templates::Templates,
    },
    anyhow::bail,
    chrono::Utc,
    droidctl::Orientation,
    fs_err::create_dir_all,
    std::{
        path::{Path, PathBuf},
        sync::Arc,
        thread::sleep,
        time::Duration,
    },
    strum::Display,
    thiserror::Error,
    tracing::{debug, info, warn},
};

/// `user_rotation` value for the landscape layout the game runs in.
const LANDSCAPE_ROTATION: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Phase {
    Orient,
    Uninstall,
    InstallOrLaunch,
    Launch,
    PastCredits,
    SetupScreenReady,
    DismissOnboarding,
    EarlyExit,
    DownloadWait,
}

#[derive(Debug, Error)]
#[error("{message} (phase {phase}, waited {timeout:?})")]
pub struct PhaseTimeout {
    pub phase: Phase,
    pub timeout: Duration,
    pub message: &'static str,
}

/// What a successful run went through.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    pub phases: Vec<Phase>,
    pub installed_from_store: bool,
}

/// Drives one device from a (possibly missing) install to a finished
/// download. Each phase either completes or aborts the whole run.
pub struct Orchestrator {
    config: Config,
    device: droidctl::Context,
    detector: ScreenDetector,
    actuator: Actuator,
    report: Report,
}

impl Orchestrator {
    pub fn new(config: Config, device: droidctl::Context, templates: Arc<Templates>) -> Self {
        let matcher = TemplateMatcher::new(templates, &config.detection);
        let actuator = Actuator::new(
            device.clone(),
            matcher.threshold(),
            config.pacing.settle(),
        );
        Self {
            detector: ScreenDetector::new(device.clone(), matcher),
            actuator,
            device,
            config,
            report: Report::default(),
        }
    }

    pub fn run(mut self) -> anyhow::Result<Report> {
        match self.run_phases() {
            Ok(()) => Ok(self.report),
            Err(err) => {
                if let Some(dir) = &self.config.screenshots_dir {
                    match save_screenshot(&self.device, dir, "failure") {
                        Ok(path) => warn!("saved screenshot of the failure to {path:?}"),
                        Err(err) => warn!("failed to save failure screenshot: {err:?}"),
                    }
                }
                Err(err)
            }
        }
    }

    fn enter(&mut self, phase: Phase) {
        info!(%phase, "entering phase");
        self.report.phases.push(phase);
    }

    fn poll_interval(&self) -> Duration {
        self.config.pacing.poll_interval()
    }

    fn run_phases(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::Orient);
        self.device.lock_rotation(LANDSCAPE_ROTATION)?;

        if self.config.uninstall {
            self.uninstall()?;
        }
        self.install_or_prepare()?;
        self.launch()?;
        self.wait_past_credits()?;
        self.wait_for_setup_screen()?;
        self.dismiss_onboarding()?;

        if !self.config.wait_for_download {
            self.enter(Phase::EarlyExit);
            info!("configured not to wait for the download, exiting");
            self.device.force_stop(&self.config.package)?;
            return Ok(());
        }
        self.wait_for_download()
    }

    fn uninstall(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::Uninstall);
        let package = &self.config.package;
        if self.device.is_package_installed(package)? {
            info!("uninstalling {package}");
            self.device.uninstall(package)?;
        }
        Ok(())
    }

    fn install_or_prepare(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::InstallOrLaunch);
        let package = &self.config.package;
        if self.device.is_package_installed(package)? || !self.config.install {
            // Start from a clean process.
            self.device.force_stop(package)?;
            return Ok(());
        }

        info!("game not installed, opening the store");
        self.device.view_store_listing(package)?;
        sleep(self.config.pacing.settle());
        let buttons = self.detector.detect_install_button()?;
        if buttons.is_empty() {
            bail!("could not find the install button");
        }
        self.actuator.click_all_detected(&buttons)?;

        info!("waiting for the game to finish installing");
        let timeout = self.config.timeouts.install();
        let device = &self.device;
        let installed = PollLoop::until_true(timeout, self.poll_interval())
            .wait(&mut probe(|| device.is_package_installed(package)))?;
        if !installed {
            return Err(PhaseTimeout {
                phase: Phase::InstallOrLaunch,
                timeout,
                message: "game did not finish installing in time",
            }
            .into());
        }
        self.device.press_home()?;
        sleep(self.config.pacing.after_install());
        info!("game installed successfully");
        self.report.installed_from_store = true;
        Ok(())
    }

    fn launch(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::Launch);
        let package = &self.config.package;
        let settle = self.config.pacing.settle();
        let device = &self.device;
        let launch = || -> anyhow::Result<()> {
            device.launch_package(package)?;
            sleep(settle);
            Ok(())
        };
        launch()?;

        info!("waiting for the game to start");
        let timeout = self.config.timeouts.gakuen_running();
        let running = PollLoop::until_true(timeout, self.poll_interval())
            .wait(&mut probe(|| device.is_process_running(package)).with_action(launch))?;
        if !running {
            return Err(PhaseTimeout {
                phase: Phase::Launch,
                timeout,
                message: "game did not start in time",
            }
            .into());
        }
        Ok(())
    }

    fn wait_past_credits(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::PastCredits);
        let timeout = self.config.timeouts.detect_credit_screen();
        let detector = &self.detector;
        let passed = PollLoop::while_true(timeout, self.poll_interval())
            .wait(&mut probe(|| detector.is_credits_screen(CREDITS_BRIGHTNESS)))?;
        if !passed {
            return Err(PhaseTimeout {
                phase: Phase::PastCredits,
                timeout,
                message: "game did not get past the credits screen in time",
            }
            .into());
        }
        info!("passed credits screen");
        Ok(())
    }

    fn wait_for_setup_screen(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::SetupScreenReady);
        let timeout = self.config.timeouts.detect_setup_screen();
        let detector = &self.detector;
        let shown = PollLoop::until_true(timeout, self.poll_interval())
            .wait(&mut probe(|| detector.is_setup_screen()))?;
        if !shown {
            return Err(PhaseTimeout {
                phase: Phase::SetupScreenReady,
                timeout,
                message: "game did not reach the setup screen in time",
            }
            .into());
        }
        info!("game loaded successfully");
        Ok(())
    }

    /// Clicks through consent and permission prompts. The game switches to
    /// landscape once it is past them and the data download starts.
    fn dismiss_onboarding(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::DismissOnboarding);
        self.actuator.tap_screen_center()?;

        info!("entering button click loop");
        let timeout = self.config.timeouts.download_start();
        let (device, detector, actuator) = (&self.device, &self.detector, &self.actuator);
        let still_portrait = || -> anyhow::Result<bool> {
            Ok(device.orientation()? == Orientation::Portrait)
        };
        let click_buttons = || -> anyhow::Result<()> {
            if detector.is_loading_screen()? {
                debug!("loading screen shown");
            }
            let taps = actuator.click_until_none(|| detector.detect_actionable_buttons())?;
            debug!(taps, "clicked onboarding buttons");
            Ok(())
        };
        let progressed = PollLoop::while_true(timeout, self.poll_interval())
            .wait(&mut probe(still_portrait).with_action(click_buttons))?;
        if !progressed {
            return Err(PhaseTimeout {
                phase: Phase::DismissOnboarding,
                timeout,
                message: "game did not start downloading in time",
            }
            .into());
        }
        info!("game download started");
        Ok(())
    }

    fn wait_for_download(&mut self) -> anyhow::Result<()> {
        self.enter(Phase::DownloadWait);
        info!("entering download loop");
        let timeout = self.config.timeouts.download_finish();
        let (detector, actuator) = (&self.detector, &self.actuator);
        // Tapping keeps the download screen from dimming.
        let finished = PollLoop::until_true(timeout, self.poll_interval()).wait(
            &mut probe(|| detector.is_move_forward_visible())
                .with_action(|| actuator.tap_screen_center()),
        )?;
        if !finished {
            return Err(PhaseTimeout {
                phase: Phase::DownloadWait,
                timeout,
                message: "game did not finish downloading in time",
            }
            .into());
        }
        info!("game has finished downloading");
        self.device.force_stop(&self.config.package)?;
        Ok(())
    }
}

/// Saves the current screen as `<prefix>_<timestamp>.png` in `dir`.
pub fn save_screenshot(device: &droidctl::Context, dir: &Path, prefix: &str) -> anyhow::Result<PathBuf> {
    if !dir.try_exists()? {
        create_dir_all(dir)?;
    }
    let path = dir.join(format!(
        "{prefix}_{}",
        Utc::now().format("%d%m%Y%H%M%S.png")
    ));
    device.capture_screen()?.save(&path)?;
    Ok(path)
}
