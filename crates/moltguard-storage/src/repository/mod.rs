//! Database repositories.

mod analyses;
mod feedback;

pub use analyses::{create_preview, hash_content, AnalysesRepo};
pub use feedback::FeedbackRepo;
