//! Session domain types: redacted token secrets, user profiles, and session snapshots.

pub mod secret;
pub mod session;
pub mod user;

pub use secret::*;
pub use session::*;
pub use user::*;
