//! Per-site configuration and the registry that holds it.

mod config;
mod registry;

pub use config::SiteConfig;
pub use registry::SiteRegistry;
