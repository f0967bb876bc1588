//! The item contract: every registered unit of desired state.

use std::fmt;
use std::path::PathBuf;

use crate::exec::CancelToken;
use crate::host::Host;
use crate::template::Renderer;
use crate::Result;

/// Classification of what one apply did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The host already matched the desired state
    Unchanged,
    /// The resource did not exist and was created
    Created,
    /// The resource existed and at least one attribute was converged
    Modified,
    /// The resource existed, was declared for absence, and was removed
    Deleted,
}

impl Outcome {
    pub fn changed(self) -> bool {
        !matches!(self, Outcome::Unchanged)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = match self {
            Outcome::Unchanged => "unchanged",
            Outcome::Created => "created",
            Outcome::Modified => "modified",
            Outcome::Deleted => "deleted",
        };
        f.write_str(word)
    }
}

/// Context handed to every apply: the target host, run flags and the
/// template seam.
pub struct ApplyContext<'a> {
    pub host: &'a dyn Host,
    /// Predicting changes rather than making them
    pub dry: bool,
    /// Print full content diffs for file rewrites
    pub diff: bool,
    pub verbose: bool,
    pub renderer: Option<&'a dyn Renderer>,
    pub cancel: CancelToken,
}

/// A registered unit of desired state (file, user or group).
///
/// Identity is assigned by the registry and is positive and unique for the
/// life of the process. `apply` observes the host, diffs, issues the
/// narrowest mutations and classifies what happened.
pub trait Item: fmt::Debug + fmt::Display + Send {
    fn id(&self) -> u32;
    fn set_id(&mut self, id: u32);

    /// Independent copy with the identity cleared. The copy must share no
    /// mutable substructure with the original.
    fn boxed_clone(&self) -> Box<dyn Item>;

    /// Observe, diff, mutate, classify.
    fn apply(&self, ctx: &ApplyContext) -> Result<Outcome>;

    /// Symbolic names this item makes available to later items.
    ///
    /// Not yet consulted by the driver; registration order is the only
    /// scheduler today.
    fn provides(&self) -> Vec<String> {
        Vec::new()
    }

    /// Symbolic names this item expects some earlier item (or the host) to
    /// provide.
    fn needs(&self) -> Vec<String> {
        Vec::new()
    }

    /// Sanity-check the declaration. Invoked at registration; an error
    /// aborts loading with the item's source location attached.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Local paths whose contents belong in the deployable artifact.
    fn static_files(&self) -> Vec<PathBuf> {
        Vec::new()
    }
}
