//! Shared application state.

use std::sync::Arc;

use crate::submission::SubmissionService;

#[derive(Clone)]
pub struct AppState {
    pub submissions: Arc<SubmissionService>,
}

impl AppState {
    pub fn new(submissions: SubmissionService) -> Self {
        Self {
            submissions: Arc::new(submissions),
        }
    }
}
