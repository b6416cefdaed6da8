//! Monitoring camera health guard.

use super::{CameraStatus, Guard, GuardContext, GuardResult};

/// Checks that the monitoring camera is reachable. A rig without a camera
/// reports SKIPPED rather than blocking the arm.
pub struct CameraHealthGuard;

impl Guard for CameraHealthGuard {
    fn name(&self) -> &'static str {
        "camera_health"
    }

    fn check(&self, ctx: &GuardContext) -> GuardResult {
        match ctx.camera {
            CameraStatus::Reachable => GuardResult::pass(self.name(), "camera reachable"),
            CameraStatus::Unreachable => GuardResult::fail(
                self.name(),
                "camera unreachable",
                "check the camera cable and power, or disable this guard for rigs without one",
            ),
            CameraStatus::NotInstalled => {
                GuardResult::skipped(self.name(), "no camera installed on this rig")
            }
        }
    }
}
