//! Shared application state handed to every handler via axum's
//! `State<Arc<AppState>>` extractor.

use std::sync::Arc;

use coordinator_core::MarketplaceCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<MarketplaceCoordinator>,
}
