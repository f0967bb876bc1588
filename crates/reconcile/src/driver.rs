//! The reconciler driver: applies a registry to a host, item by item.

use crate::exec::CancelToken;
use crate::host::Host;
use crate::item::{ApplyContext, Outcome};
use crate::registry::Registry;
use crate::report;
use crate::template::Renderer;
use crate::{Error, Result};

/// Run-wide options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Predict changes without touching the target.
    pub dry: bool,
    /// Print full content diffs for file rewrites.
    pub diff: bool,
    pub verbose: bool,
}

/// Final tally of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Items counted toward the closing tally
    pub finished: usize,
    pub total: usize,
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
    pub unchanged: usize,
}

/// One engine drives one run. All run state is scoped here; nothing is
/// process-global.
pub struct Engine {
    opts: RunOptions,
    cancel: CancelToken,
}

impl Engine {
    pub fn new(opts: RunOptions, cancel: CancelToken) -> Self {
        Self { opts, cancel }
    }

    /// Apply every registered item against the host, in registration order.
    ///
    /// Aborts on the first failure, wrapping the error with the item's
    /// source location; remaining items are not attempted. The closing
    /// tally is printed either way. `finished` counts every success when
    /// applying for real but only `Unchanged` outcomes when dry running —
    /// the dry tally answers "how much of this inventory is already in
    /// place".
    pub fn apply(
        &self,
        registry: &Registry,
        host: &dyn Host,
        renderer: Option<&dyn Renderer>,
    ) -> Result<RunSummary> {
        let ctx = ApplyContext {
            host,
            dry: self.opts.dry,
            diff: self.opts.diff,
            verbose: self.opts.verbose,
            renderer,
            cancel: self.cancel.clone(),
        };

        let mut summary = RunSummary {
            total: registry.len(),
            ..Default::default()
        };

        let result = self.run_items(registry, &ctx, &mut summary);
        report::tally(summary.finished, summary.total);
        result.map(|()| summary)
    }

    fn run_items(
        &self,
        registry: &Registry,
        ctx: &ApplyContext,
        summary: &mut RunSummary,
    ) -> Result<()> {
        for item in registry.items() {
            self.cancel.check()?;
            log::debug!("applying {item}");

            let outcome = item.apply(ctx).map_err(|err| {
                match registry.display_source(item.id()) {
                    Some(location) => Error::Item {
                        location,
                        cause: Box::new(err),
                    },
                    None => err,
                }
            })?;

            match outcome {
                Outcome::Unchanged => {
                    summary.unchanged += 1;
                    if ctx.verbose {
                        report::unchanged(&item.to_string());
                    }
                }
                Outcome::Created => summary.created += 1,
                Outcome::Modified => summary.modified += 1,
                Outcome::Deleted => summary.deleted += 1,
            }

            if !ctx.dry || outcome == Outcome::Unchanged {
                summary.finished += 1;
            }
        }
        Ok(())
    }
}
