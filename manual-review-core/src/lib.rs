pub mod api;
pub mod client;
pub mod ids;
pub mod scoring;
pub mod state;

pub use api::*;
pub use client::ReviewClient;
pub use ids::*;
pub use scoring::{calculate_final_score, ScoringMethod};
pub use state::{AssignerKind, ReviewState};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Short git hash of the build, or "unknown".
pub fn get_service_version() -> String {
    let hash = option_env!("MANUAL_REVIEW_GIT_HASH").or(built_info::GIT_COMMIT_HASH);
    match hash {
        Some(git_hash) if git_hash.len() >= 8 => git_hash[..8].to_string(),
        Some(git_hash) => git_hash.to_string(),
        None => "unknown".to_string(),
    }
}
