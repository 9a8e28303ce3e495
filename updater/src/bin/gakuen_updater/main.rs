use {
    anyhow::Context as _,
    clap::{Parser, Subcommand},
    droidctl::{ResolutionMatch, SUPPORTED_RESOLUTION},
    gakuen_updater::{
        config::{Config, DEFAULT_CONFIG_PATH},
        detector::{Screen, ScreenDetector},
        matcher::TemplateMatcher,
        Orchestrator, Templates,
    },
    std::{
        path::PathBuf,
        sync::Arc,
        time::{SystemTime, UNIX_EPOCH},
    },
    tracing::info,
    tracing_subscriber::{filter::LevelFilter, EnvFilter},
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the configuration file.
    #[clap(long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Install (if needed) and launch the game, then click through onboarding.
    Run,
    /// Check whether a screen is currently shown and print the matches.
    Detect {
        #[clap(value_parser = Screen::parse)]
        screen: Screen,
    },
    /// Save the current screen to a file.
    Screenshot {
        #[clap(long)]
        output: Option<PathBuf>,
    },
}

fn connect(config: &Config) -> anyhow::Result<droidctl::Context> {
    let server = &config.adb.server;
    info!("connecting to adb server at {}:{}", server.host, server.port);
    let device = droidctl::Context::connect(&server.host, server.port, &config.adb.device_serial)?;
    info!("device {} found", device.serial());
    Ok(device)
}

fn load_templates(config: &Config) -> anyhow::Result<Arc<Templates>> {
    let templates = Templates::load(&config.assets_dir)
        .with_context(|| format!("failed to load assets from {:?}", config.assets_dir))?;
    Ok(Arc::new(templates))
}

pub fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .init();

    let config = Config::load(&args.config)?;
    info!("configuration loaded");

    match args.command.unwrap_or(Command::Run) {
        Command::Run => {
            let templates = load_templates(&config)?;
            let device = connect(&config)?;
            match device.ensure_resolution(SUPPORTED_RESOLUTION)? {
                ResolutionMatch::Exact => info!("device resolution matched"),
                ResolutionMatch::Rotated => info!("device resolution matched (rotated)"),
            }
            let report = Orchestrator::new(config, device, templates).run()?;
            info!(phases = ?report.phases, "done");
        }
        Command::Detect { screen } => {
            let templates = load_templates(&config)?;
            let device = connect(&config)?;
            let matcher = TemplateMatcher::new(templates, &config.detection);
            let detection = ScreenDetector::new(device, matcher).detect(screen)?;
            println!("{}", serde_json::to_string_pretty(&detection)?);
        }
        Command::Screenshot { output } => {
            let device = connect(&config)?;
            let path = match output {
                Some(path) => path,
                None => {
                    let seconds = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
                    PathBuf::from(format!("{seconds}.png"))
                }
            };
            device.capture_screen()?.save(&path)?;
            println!("saved screenshot to {path:?}");
        }
    }
    Ok(())
}
