//! Account, session, and one-time token handlers.
//!
//! Raw credentials and tokens never reach the database: passwords are stored
//! as argon2id digests, opaque tokens as SHA-256 digests. Every handler maps
//! a small closed set of storage outcomes onto the HTTP status contract and
//! routes internal failures through the audit sink.

pub(crate) mod email_change;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod profile;
pub(crate) mod register;
pub(crate) mod session;
mod state;
mod storage;
mod tokens;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use self::state::{AuthConfig, AuthState};
