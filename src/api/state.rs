use crate::pipeline::Pipeline;

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Rule file re-read by the reload endpoint.
    pub rules_path: Arc<PathBuf>,
}
