//! Template rendering seam.
//!
//! The engine never renders templates itself; file items that carry a
//! template reference hand the source text to whatever renderer the caller
//! wired in. Rendering failures are fatal to the item.

use crate::host::HostInfo;
use crate::Result;

/// Renders file content templates against the ambient host facts.
pub trait Renderer {
    fn render(&self, source: &str, host: &HostInfo) -> Result<String>;
}
