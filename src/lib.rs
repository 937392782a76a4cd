pub mod commands;
pub mod config;
pub mod data;
pub mod handlers;
pub mod logging;
pub mod warning;

pub const BOT_NAME: &str = "warden";
pub const COMMAND_TARGET: &str = "warden::command";
pub const ERROR_TARGET: &str = "warden::error";
pub const EVENT_TARGET: &str = "warden::handlers";
/// Audit trail of issuance, enforcement, expiry and suspension
pub const MODERATION_TARGET: &str = "warden::moderation";
pub const CONSOLE_TARGET: &str = "warden";

pub use data::{Data, DataInner};
pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
