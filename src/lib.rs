//! Cloud resource graph collection, filtering and diagram clustering

pub mod cache;
pub mod cluster;
pub mod config;
pub mod filter;
pub mod graph;
pub mod membership;
pub mod report;
pub mod resource;

/// Version injected at compile time via CLOUDMAP_VERSION env var (set by CI/CD),
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDMAP_VERSION") {
    Some(v) => v,
    None => "dev",
};
