pub mod events;
pub mod gateway;
pub mod handler;
pub mod notify;
pub mod presence;
