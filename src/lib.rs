pub mod api;
pub mod app;
mod cli;
pub mod commands;
pub mod db;
pub mod events;
pub mod session;
pub mod upload;

#[cfg(test)]
mod testing;

pub use app::DocChat;
pub use cli::run;
