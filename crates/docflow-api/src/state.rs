//! Shared application state.

use std::sync::Arc;

use docflow_jobs::Stores;
use docflow_parse::ParserOrchestrator;

/// State handed to every handler.
///
/// `stores` is the same repository set the background worker uses, so
/// the API and the worker observe one consistent view of documents,
/// jobs, chunks, and embeddings.
#[derive(Clone)]
pub struct AppState {
    pub stores: Stores,
    pub parser: Arc<ParserOrchestrator>,
}

impl AppState {
    pub fn new(stores: Stores, parser: Arc<ParserOrchestrator>) -> Self {
        Self { stores, parser }
    }
}
