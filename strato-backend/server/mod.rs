mod routes;
mod ws;

use std::sync::Arc;

use axum::Router;

use crate::auth::apikeys::ApiKeyStore;
use crate::config::Config;
use crate::session::tracking::SessionRegistry;
use crate::shell::commands::CommandSet;
use crate::vfs::FsStore;

#[derive(Clone)]
pub struct AppState {
    pub store: FsStore,
    pub registry: Arc<SessionRegistry>,
    pub commands: Arc<CommandSet>,
    pub api_keys: Arc<dyn ApiKeyStore>,
    pub config: Arc<Config>,
}

pub fn create_app(state: AppState) -> Router {
    routes::build_router(state)
}
