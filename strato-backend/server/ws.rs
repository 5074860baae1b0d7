use axum::Extension;
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;

use crate::auth::AuthStatus;
use crate::session::{SessionDeps, run_session};

use super::AppState;

/// GET /shell — upgrade to the multiplexed shell transport. The session
/// middleware has already resolved the caller's authorization.
pub(crate) async fn shell_ws(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthStatus>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let deps = SessionDeps {
        store: state.store.clone(),
        registry: state.registry.clone(),
        commands: state.commands.clone(),
    };
    ws.on_upgrade(move |socket| run_session(socket, deps, auth))
}
