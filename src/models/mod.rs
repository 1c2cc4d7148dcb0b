pub mod config;

pub use config::ReconcilerConfig;
