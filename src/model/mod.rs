pub mod config;
pub mod containers;
pub mod key;
pub mod score;
