//! Restart primitive

/// Restarts the device.
///
/// On hardware `restart_now` does not return. Host implementations may
/// return after recording the request; the driver then reports
/// [`crate::driver::UpdateOutcome::RebootRequested`] and the caller must
/// stop the process.
pub trait Restart {
    /// Restart into the current boot target.
    fn restart_now(&mut self);
}
