//! Resource records: desired state for files, users and groups.

pub mod file;
pub mod group;
pub mod user;

pub use file::File;
pub use group::Group;
pub use user::User;
