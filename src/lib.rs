pub mod analyzer;
pub mod config;
pub mod dsp;
pub mod models;
pub mod scanner;
pub mod store;
pub mod trajectory;

/// Default audio file extension picked up by discovery
pub const DEFAULT_AUDIO_EXTENSION: &str = "mp3";

/// Application name for XDG paths
pub const APP_NAME: &str = "playlist-features";
