//! Operator physical-setup confirmation guard.

use super::{Guard, GuardContext, GuardResult};

/// Requires an explicit operator confirmation that the physical rig is
/// ready (pen seated, bed clear, home position correct). Software cannot
/// verify any of that, so the confirmation travels in the context.
pub struct PhysicalSetupGuard;

impl Guard for PhysicalSetupGuard {
    fn name(&self) -> &'static str {
        "physical_setup"
    }

    fn check(&self, ctx: &GuardContext) -> GuardResult {
        if ctx.setup_confirmed {
            GuardResult::pass(self.name(), "operator confirmed physical setup")
        } else {
            GuardResult::fail(
                self.name(),
                "physical setup not confirmed",
                "inspect the rig and re-run arm with --confirm-setup",
            )
        }
    }
}
