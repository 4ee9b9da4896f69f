mod conversation;
mod message;
mod user;

pub use conversation::*;
pub use message::*;
pub use user::*;

/// Identity resolved from a validated access token.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
}
