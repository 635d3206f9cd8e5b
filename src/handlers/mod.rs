//! axum handlers and the state they share.

pub mod blob_handlers;
pub mod bucket_handlers;
pub mod file_handlers;
pub mod health_handlers;

use crate::{blob::LocalBlobAdapter, services::FileService};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub files: FileService,

    /// Set when the blob backend is local disk; serves its presigned links.
    pub links: Option<Arc<LocalBlobAdapter>>,
}

impl AppState {
    pub fn new(files: FileService) -> Self {
        Self { files, links: None }
    }

    pub fn with_links(mut self, links: Arc<LocalBlobAdapter>) -> Self {
        self.links = Some(links);
        self
    }
}

/// Success envelope: the payload's fields plus `"success": true`.
#[derive(Serialize, Debug)]
pub struct Success<T> {
    pub success: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T> Success<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
