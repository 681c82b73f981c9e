//! Post-commit restart hook.

/// Reboots the device into a freshly committed executable image.
pub trait RestartTrigger {
    fn restart(&self);
}

/// Never restarts. For hosts and for callers that reboot on their own terms.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRestart;

impl RestartTrigger for NoRestart {
    fn restart(&self) {
        log::info!("Restart requested, ignored");
    }
}

impl<R: RestartTrigger + ?Sized> RestartTrigger for &R {
    fn restart(&self) {
        (**self).restart()
    }
}
