//! Database models split into domain-specific modules.

pub mod audit;
pub mod identity;
pub mod invite;
pub mod school;
pub mod session;

pub use audit::*;
pub use identity::*;
pub use invite::*;
pub use school::*;
pub use session::*;
