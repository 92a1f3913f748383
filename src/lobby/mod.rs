//! Lobby management: rosters, the lobby table and client fan-out

pub mod game;
pub mod manager;
pub mod registry;

pub use manager::GameManager;
