use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::auth::AuthStatus;
use crate::shell::commands::CommandSet;
use crate::shell::io::EnvMap;
use crate::vfs::FsStore;

use super::client::{ClientRuntime, run_client};
use super::crlf::normalize_message;
use super::mailbox::{Mailbox, mailbox};
use super::protocol::{self, MessageType, WireMessage};
use super::tracking::{SessionRecord, SessionRegistry};

/// How long a closing session waits for clients to drain and the writer to
/// flush before the transport is dropped.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared services a socket session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub store: FsStore,
    pub registry: Arc<SessionRegistry>,
    pub commands: Arc<CommandSet>,
}

struct ClientHandle {
    inbound: Mailbox<WireMessage>,
    lifecycle: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Own one upgraded WebSocket: a single reader (this task) decodes and
/// dispatches frames to per-client mailboxes; a single writer serializes
/// the shared outbound mailbox onto the wire. The transport is never
/// touched from anywhere else.
pub async fn run_session(socket: WebSocket, deps: SessionDeps, auth: AuthStatus) {
    let socket_id = uuid::Uuid::new_v4().to_string();
    let session = deps.registry.attach(&socket_id, auth.clone());
    tracing::info!(socket_id = %socket_id, username = %auth.username, "socket session opened");

    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound, mut outbound_rx) = mailbox::<WireMessage>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let msg = normalize_message(msg);
            let bytes = match protocol::encode(&msg) {
                Ok(b) => b,
                Err(err) => {
                    tracing::error!(error = %err, "dropping unencodable frame");
                    continue;
                }
            };
            if ws_sink.send(Message::Binary(bytes.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.close().await;
    });

    let mut clients: HashMap<String, ClientHandle> = HashMap::new();

    while let Some(incoming) = ws_stream.next().await {
        let frame = match incoming {
            Ok(Message::Binary(bytes)) => match protocol::decode(&bytes) {
                Ok(frame) => frame,
                Err(err) => {
                    let mut reply = WireMessage::new(MessageType::ErrResponse);
                    reply.error = format!("invalid messagepack: {err}");
                    outbound.send(reply);
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(_) => {
                let mut reply = WireMessage::new(MessageType::ErrResponse);
                reply.error = "expected binary message".to_string();
                outbound.send(reply);
                continue;
            }
            Err(err) => {
                tracing::debug!(socket_id = %socket_id, error = %err, "socket read error");
                break;
            }
        };

        dispatch(frame, &deps, &auth, &session, &outbound, &mut clients);
    }

    // Shutdown: stop every client, let them drain within the grace period,
    // then close the outbound so the writer flushes and exits. The writer
    // is bounded by the same grace so a blocked transport cannot wedge us.
    for handle in clients.values() {
        handle.lifecycle.cancel();
        handle.inbound.close();
    }
    let drain = async {
        for (_, handle) in clients.drain() {
            let _ = handle.task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!(socket_id = %socket_id, "clients did not drain within the grace period");
    }

    outbound.close();
    if tokio::time::timeout(SHUTDOWN_GRACE, writer).await.is_err() {
        tracing::warn!(socket_id = %socket_id, "writer did not flush within the grace period");
    }

    deps.registry.detach(&socket_id);
    tracing::info!(socket_id = %socket_id, "socket session closed");
}

fn dispatch(
    frame: WireMessage,
    deps: &SessionDeps,
    auth: &AuthStatus,
    session: &Arc<SessionRecord>,
    outbound: &Mailbox<WireMessage>,
    clients: &mut HashMap<String, ClientHandle>,
) {
    let client_id = frame.client_id.clone();

    let Some(handle) = clients.get(&client_id) else {
        if frame.message_type == MessageType::Connect {
            connect_client(frame, deps, auth, session, outbound, clients);
        } else {
            let mut reply =
                WireMessage::reply(MessageType::ErrResponse, &frame.message_id, &client_id);
            reply.error = "invalid client_id: client does not exist".to_string();
            outbound.send(reply);
        }
        return;
    };

    if frame.message_type == MessageType::Disconnect {
        // forward first so the runtime sees the frame, then seal the
        // mailbox; the runtime acknowledges and winds itself down
        handle.inbound.send(frame);
        handle.inbound.close();
        clients.remove(&client_id);
        session.client_disconnected(&client_id);
    } else {
        handle.inbound.send(frame);
    }
}

fn connect_client(
    frame: WireMessage,
    deps: &SessionDeps,
    auth: &AuthStatus,
    session: &Arc<SessionRecord>,
    outbound: &Mailbox<WireMessage>,
    clients: &mut HashMap<String, ClientHandle>,
) {
    let client_id = frame.client_id.clone();

    let mut env = frame.set_env.clone().unwrap_or_default();
    let home = format!("/home/{}", auth.username);
    env.insert("PWD".to_string(), home.clone());
    env.insert("HOME".to_string(), home);

    let (inbound_tx, inbound_rx) = mailbox();
    let lifecycle = CancellationToken::new();
    session.client_connected(&client_id);

    let runtime = ClientRuntime {
        client_id: client_id.clone(),
        env: EnvMap::from_map(env),
        inbound: inbound_rx,
        outbound: outbound.clone(),
        auth: auth.clone(),
        store: deps.store.clone(),
        commands: deps.commands.clone(),
        session: session.clone(),
        registry: deps.registry.clone(),
        lifecycle: lifecycle.clone(),
    };
    let task = tokio::spawn(run_client(runtime));

    clients.insert(
        client_id.clone(),
        ClientHandle {
            inbound: inbound_tx,
            lifecycle,
            task,
        },
    );

    tracing::debug!(client_id = %client_id, "client connected");
    outbound.send(WireMessage::reply(
        MessageType::ConnectAcknowledged,
        &frame.message_id,
        &client_id,
    ));
}
