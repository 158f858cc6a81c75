pub mod classify;
pub mod config;
pub mod handler;
pub mod item;
pub mod logging;
pub mod table;
