//! Restart primitive for a supervised host process

use tracing::info;
use twin_ota::Restart;

/// Records the restart request; the process then exits with the
/// configured restart code so its supervisor can relaunch it.
#[derive(Debug, Default)]
pub struct ExitRestart {
    requested: bool,
}

impl ExitRestart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested(&self) -> bool {
        self.requested
    }
}

impl Restart for ExitRestart {
    fn restart_now(&mut self) {
        info!("Restart requested, exiting for supervisor");
        self.requested = true;
    }
}
