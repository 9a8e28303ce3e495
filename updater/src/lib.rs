//! Installs the game on an Android device and drives its first launch until
//! the initial data download has finished.
//!
//! The device is controlled through [droidctl]; UI elements are found by
//! template matching against a fixed set of reference images ([templates]).

pub mod actuator;
pub mod config;
pub mod detector;
pub mod matcher;
pub mod orchestrator;
pub mod poll;
pub mod templates;

pub use crate::{
    actuator::ButtonsStuck,
    config::Config,
    orchestrator::{Orchestrator, Phase, PhaseTimeout, Report},
    templates::{Label, Templates},
};
