//! Construction point for the OS capture backends. Desktop builds gate
//! their backend behind a feature and register it here; the rest of the
//! crate only ever talks to [ActivityProbe] and [InputHook].

use anyhow::{bail, Result};
use tokio::sync::mpsc;

use crate::{
    agent::keylog::{InputHook, KeyEvent},
    probe::ActivityProbe,
};

pub fn activity_probe() -> Result<Box<dyn ActivityProbe>> {
    // This runtime error keeps headless builds (CI, the server host)
    // compiling without any capture backend.
    bail!("no activity capture backend was compiled into this build")
}

pub fn input_hook() -> Box<dyn InputHook> {
    Box::new(UnavailableHook)
}

/// Installation always fails, which the pipeline treats as "keystroke
/// capture disabled" rather than a fatal error.
struct UnavailableHook;

impl InputHook for UnavailableHook {
    fn install(&mut self, _events: mpsc::Sender<KeyEvent>) -> Result<()> {
        bail!("no input hook backend was compiled into this build")
    }
}
