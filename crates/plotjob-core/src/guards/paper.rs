//! Paper alignment / session continuity guard.

use super::{Guard, GuardContext, GuardResult};

/// Passes while an open paper session exists. A session is opened when the
/// operator aligns paper on the bed and closed whenever the paper is
/// disturbed, so an absent session means the medium position cannot be
/// trusted.
pub struct PaperSessionGuard;

impl Guard for PaperSessionGuard {
    fn name(&self) -> &'static str {
        "paper_session"
    }

    fn check(&self, ctx: &GuardContext) -> GuardResult {
        match &ctx.paper_session {
            Some(session) => GuardResult::pass(
                self.name(),
                format!("paper session {} open since {}", session.id, session.opened_at),
            ),
            None => GuardResult::fail(
                self.name(),
                "no open paper session",
                "align the paper on the bed and open a session before arming",
            ),
        }
    }
}
