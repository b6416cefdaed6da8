//! Pen-to-layer compatibility guard.

use super::{Guard, GuardContext, GuardResult};

/// Checks that every pen named in the job's plan is actually loaded in the
/// carousel. A job without a pen mapping cannot be evaluated and reports
/// SKIPPED (single-pen jobs have no mapping).
pub struct PenLayerGuard;

impl Guard for PenLayerGuard {
    fn name(&self) -> &'static str {
        "pen_layer"
    }

    fn check(&self, ctx: &GuardContext) -> GuardResult {
        let mapping = &ctx.job.plan.pen_mapping;
        if mapping.is_empty() {
            return GuardResult::skipped(self.name(), "plan has no pen mapping");
        }

        let mut missing: Vec<&str> = mapping
            .values()
            .filter(|pen| !ctx.loaded_pens.iter().any(|loaded| loaded == *pen))
            .map(String::as_str)
            .collect();
        missing.sort_unstable();
        missing.dedup();

        if missing.is_empty() {
            GuardResult::pass(
                self.name(),
                format!("all {} mapped pens loaded", mapping.len()),
            )
        } else {
            GuardResult::fail(
                self.name(),
                format!("pens not loaded: {}", missing.join(", ")),
                "load the listed pens into the carousel, then retry arming",
            )
        }
    }
}
