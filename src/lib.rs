pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod machines;
pub mod models;
pub mod presence;
pub mod signaling;
pub mod state;
pub mod websocket;
