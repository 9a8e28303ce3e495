mod common;

use {
    common::{config, templates, FakeDevice, Stage, PACKAGE},
    gakuen_updater::{ButtonsStuck, Label, Orchestrator, Phase, PhaseTimeout},
};

#[test]
fn fresh_install_waits_for_download() {
    let device = FakeDevice::new(false);
    let report = Orchestrator::new(config(true, false, true), device.context(), templates())
        .run()
        .unwrap();

    assert_eq!(
        report.phases,
        [
            Phase::Orient,
            Phase::InstallOrLaunch,
            Phase::Launch,
            Phase::PastCredits,
            Phase::SetupScreenReady,
            Phase::DismissOnboarding,
            Phase::DownloadWait,
        ]
    );
    assert!(report.installed_from_store);

    let commands = device.commands();
    assert_eq!(commands[0], "settings put system accelerometer_rotation 0");
    assert_eq!(commands[1], "settings put system user_rotation 3");
    let store = device.position_of("am start -a android.intent.action.VIEW").unwrap();
    let install_tap = device.position_of("input tap 26 25").unwrap();
    let home = device.position_of("input keyevent 3").unwrap();
    let launch = device.position_of("monkey").unwrap();
    assert!(store < install_tap && install_tap < home && home < launch);
    assert!(commands.contains(&"input tap 10 35".to_string()));
    assert!(commands.contains(&"input tap 46 11".to_string()));
    assert_eq!(
        commands.last().unwrap(),
        &format!("am force-stop {PACKAGE}")
    );

    let state = device.0.lock().unwrap();
    assert!(state.installed);
    assert!(!state.running);
}

#[test]
fn installed_game_exits_after_onboarding() {
    let device = FakeDevice::new(true);
    let report = Orchestrator::new(config(false, false, false), device.context(), templates())
        .run()
        .unwrap();

    assert_eq!(
        report.phases,
        [
            Phase::Orient,
            Phase::InstallOrLaunch,
            Phase::Launch,
            Phase::PastCredits,
            Phase::SetupScreenReady,
            Phase::DismissOnboarding,
            Phase::EarlyExit,
        ]
    );
    assert!(!report.installed_from_store);

    let commands = device.commands();
    assert!(!commands.iter().any(|c| c.contains("market://")));
    let stop = device.position_of("am force-stop").unwrap();
    let launch = device.position_of("monkey").unwrap();
    assert!(stop < launch);
    assert_eq!(
        commands.last().unwrap(),
        &format!("am force-stop {PACKAGE}")
    );
    // Left before the download finished.
    assert_eq!(device.0.lock().unwrap().stage, Stage::Home);
}

#[test]
fn missing_setup_screen_times_out() {
    let device = FakeDevice::new(true);
    device.0.lock().unwrap().setup_appears = false;
    let screenshots = tempfile::tempdir().unwrap();
    let mut config = config(false, false, true);
    config.timeouts.detect_setup_screen = 0;
    config.screenshots_dir = Some(screenshots.path().join("failures"));

    let err = Orchestrator::new(config, device.context(), templates())
        .run()
        .unwrap_err();
    let timeout = err.downcast_ref::<PhaseTimeout>().unwrap();
    assert_eq!(timeout.phase, Phase::SetupScreenReady);

    let saved: Vec<_> = fs_err::read_dir(screenshots.path().join("failures"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(saved.len(), 1);
    assert!(saved[0].starts_with("failure_") && saved[0].ends_with(".png"));
}

#[test]
fn missing_install_button_is_fatal() {
    let device = FakeDevice::new(false);
    device.0.lock().unwrap().store_has_button = false;
    let err = Orchestrator::new(config(true, false, true), device.context(), templates())
        .run()
        .unwrap_err();
    assert_eq!(err.to_string(), "could not find the install button");
    assert!(device.position_of("monkey").is_none());
}

#[test]
fn uninstalled_game_never_starts() {
    let device = FakeDevice::new(true);
    let mut config = config(false, true, true);
    config.timeouts.gakuen_running = 0;

    let err = Orchestrator::new(config, device.context(), templates())
        .run()
        .unwrap_err();
    let timeout = err.downcast_ref::<PhaseTimeout>().unwrap();
    assert_eq!(timeout.phase, Phase::Launch);
    assert!(device
        .commands()
        .contains(&format!("pm uninstall {PACKAGE}")));
    assert!(!device.0.lock().unwrap().installed);
}

#[test]
fn install_that_never_finishes_times_out() {
    let device = FakeDevice::new(false);
    device.0.lock().unwrap().install_completes = false;
    let mut config = config(true, false, true);
    config.timeouts.install = 0;

    let err = Orchestrator::new(config, device.context(), templates())
        .run()
        .unwrap_err();
    let timeout = err.downcast_ref::<PhaseTimeout>().unwrap();
    assert_eq!(timeout.phase, Phase::InstallOrLaunch);
    assert!(device.position_of("input tap 26 25").is_some());
    assert!(device.position_of("monkey").is_none());
}

#[test]
fn game_that_stays_portrait_times_out() {
    let device = FakeDevice::new(true);
    {
        let mut state = device.0.lock().unwrap();
        state.rotates = false;
        state.download_frames = u32::MAX;
    }
    let mut config = config(false, false, true);
    config.timeouts.download_start = 1;

    let err = Orchestrator::new(config, device.context(), templates())
        .run()
        .unwrap_err();
    let timeout = err.downcast_ref::<PhaseTimeout>().unwrap();
    assert_eq!(timeout.phase, Phase::DismissOnboarding);
    // The buttons were clicked; only the rotation never came.
    assert!(device.position_of("input tap 10 35").is_some());
    assert!(device.position_of("input tap 46 11").is_some());
    assert_eq!(device.0.lock().unwrap().stage, Stage::Download);
}

#[test]
fn unresponsive_button_stops_the_click_loop() {
    let device = FakeDevice::new(true);
    device.0.lock().unwrap().agree_responds = false;

    let err = Orchestrator::new(config(false, false, true), device.context(), templates())
        .run()
        .unwrap_err();
    let stuck = err.downcast_ref::<ButtonsStuck>().unwrap();
    assert_eq!(stuck.labels, [Label::GakuenAgree]);
    let commands = device.commands();
    let taps = |at: &str| commands.iter().filter(|c| c.as_str() == at).count();
    // Consent goes away after the first round, agree never does.
    assert_eq!(taps("input tap 10 35"), 1);
    assert_eq!(taps("input tap 46 11"), stuck.rounds - 1);
}

#[test]
fn download_that_never_finishes_times_out() {
    let device = FakeDevice::new(true);
    device.0.lock().unwrap().download_frames = u32::MAX;
    let mut config = config(false, false, true);
    config.timeouts.download_finish = 0;

    let err = Orchestrator::new(config, device.context(), templates())
        .run()
        .unwrap_err();
    let timeout = err.downcast_ref::<PhaseTimeout>().unwrap();
    assert_eq!(timeout.phase, Phase::DownloadWait);
    assert!(device.0.lock().unwrap().running);
}
