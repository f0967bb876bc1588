//! # reconcile
//!
//! A diff-and-converge engine for files, users and groups over a
//! polymorphic execution target.
//!
//! ## Core Concepts
//!
//! - **Item**: a registered unit of desired state ([`File`], [`User`],
//!   [`Group`]) with a stable identity and a source location
//! - **Host**: the execution target — local OS, remote over SSH, or a dry
//!   in-memory shadow that records what would happen
//! - **Snapshot**: the host-owned in-memory model of the account
//!   databases, kept coherent with every mutation the engine issues
//! - **Outcome**: what one apply did — unchanged, created, modified or
//!   deleted
//! - **Engine**: drives the registry in registration order, aborts on the
//!   first failure, and prints the closing tally
//!
//! ## Example
//!
//! ```no_run
//! use reconcile::{CancelToken, DryHost, Engine, File, Registry, RunOptions};
//!
//! let cancel = CancelToken::new();
//! let mut registry = Registry::new();
//! let mut motd = File::new("/etc/motd");
//! motd.content = Some("welcome\n".to_string());
//! registry.add(Box::new(motd))?;
//!
//! let host = DryHost::new(0, 0, None, cancel.clone());
//! let engine = Engine::new(RunOptions { dry: true, ..Default::default() }, cancel);
//! let summary = engine.apply(&registry, &host, None)?;
//! assert_eq!(summary.created, 1);
//! # Ok::<(), reconcile::Error>(())
//! ```
//!
//! The dry host is a decorator: give it a cascade and read-only operations
//! fall through to the real target while every mutation stays in the
//! shadow, which makes dry-run output match a real apply line for line.

pub mod driver;
pub mod error;
pub mod exec;
pub mod host;
pub mod item;
pub mod model;
pub mod registry;
pub mod report;
pub mod resources;
pub mod template;

pub use driver::{Engine, RunOptions, RunSummary};
pub use error::{Error, Result};
pub use exec::{CancelToken, Cmd, Output};
pub use host::dry::DryHost;
pub use host::local::LocalHost;
pub use host::ssh::{SessionPool, SshHost};
pub use host::{FileStat, Host, HostInfo};
pub use item::{ApplyContext, Item, Outcome};
pub use model::Snapshot;
pub use registry::{ItemMeta, Registry};
pub use resources::{File, Group, User};
pub use template::Renderer;
