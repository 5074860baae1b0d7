use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthStatus;
use crate::shell::commands::CommandSet;
use crate::shell::io::{Chunk, EnvMap, InputStream, OutputEvent, OutputKind};
use crate::shell::{self, ShellContext};
use crate::vfs::FsStore;

use super::events::Broadcaster;
use super::mailbox::{MailboxReceiver, Mailbox, mailbox};
use super::protocol::{MessageType, WireMessage};
use super::tracking::{SessionRecord, SessionRegistry};

/// State for one logical client multiplexed over a socket session. A
/// single task owns the inbound mailbox and runs at most one command at a
/// time.
pub struct ClientRuntime {
    pub client_id: String,
    pub env: EnvMap,
    pub inbound: MailboxReceiver<WireMessage>,
    pub outbound: Mailbox<WireMessage>,
    pub auth: AuthStatus,
    pub store: FsStore,
    pub commands: Arc<CommandSet>,
    pub session: Arc<SessionRecord>,
    pub registry: Arc<SessionRegistry>,
    /// Cancelled by the multiplexer on session shutdown.
    pub lifecycle: CancellationToken,
}

/// Drive the client until it disconnects, its inbound mailbox closes, or
/// the session shuts down.
pub async fn run_client(mut rt: ClientRuntime) {
    loop {
        let msg = tokio::select! {
            _ = rt.lifecycle.cancelled() => break,
            msg = rt.inbound.recv() => msg,
        };
        let Some(msg) = msg else { break };

        match msg.message_type {
            MessageType::RunCommand => {
                let disconnect = handle_run_command(&mut rt, msg).await;
                if let Some(disconnect) = disconnect {
                    acknowledge_disconnect(&rt, &disconnect);
                    rt.session.client_disconnected(&rt.client_id);
                    return;
                }
                if rt.lifecycle.is_cancelled() {
                    break;
                }
            }
            MessageType::Disconnect => {
                acknowledge_disconnect(&rt, &msg);
                rt.session.client_disconnected(&rt.client_id);
                return;
            }
            MessageType::SetEnv => {
                if let Some(vars) = &msg.set_env {
                    rt.env.merge(vars);
                }
            }
            // no command running: input is dropped, interrupts are no-ops
            MessageType::InputStream | MessageType::StdinEof | MessageType::CommandInterrupt => {}
            other => {
                tracing::debug!(client_id = %rt.client_id, message_type = ?other, "ignoring frame while idle");
            }
        }
    }

    rt.session.client_disconnected(&rt.client_id);
    tracing::debug!(client_id = %rt.client_id, "client runtime closing");
}

fn acknowledge_disconnect(rt: &ClientRuntime, disconnect: &WireMessage) {
    rt.outbound.send(WireMessage::reply(
        MessageType::DisconnectAcknowledged,
        &disconnect.message_id,
        &rt.client_id,
    ));
}

/// Run one command: emit `command_running`, bind stdio to frames through
/// the output broadcaster, feed stdin frames into the executor, handle
/// interrupt/disconnect, and emit `command_finished` after all output has
/// drained. Returns the disconnect frame if one arrived mid-command.
async fn handle_run_command(rt: &mut ClientRuntime, request: WireMessage) -> Option<WireMessage> {
    let request_id = request.message_id.clone();
    rt.session.command_running(&rt.client_id, &request.command);
    rt.session
        .log_line(&rt.client_id, format!("run_command: {}", request.command));
    rt.outbound.send(WireMessage::reply(
        MessageType::CommandRunning,
        &request_id,
        &rt.client_id,
    ));

    let env_before = rt.env.snapshot();
    let cancel = rt.lifecycle.child_token();
    let events: Broadcaster<OutputEvent> = Broadcaster::new();

    // Tap 1: frame every chunk onto the session outbound, in order.
    let framer = {
        let mut listener = events.subscribe();
        let outbound = rt.outbound.clone();
        let client_id = rt.client_id.clone();
        let ref_id = request_id.clone();
        tokio::spawn(async move {
            while let Some(event) = listener.recv().await {
                let text = String::from_utf8_lossy(&event.chunk).into_owned();
                let frame = match event.kind {
                    OutputKind::Stdout => {
                        let mut m =
                            WireMessage::reply(MessageType::OutputStream, &ref_id, &client_id);
                        m.output_stream = text;
                        m
                    }
                    OutputKind::Stderr => {
                        let mut m =
                            WireMessage::reply(MessageType::ErrorStream, &ref_id, &client_id);
                        m.error_stream = text;
                        m
                    }
                };
                outbound.send(frame);
            }
        })
    };

    // Tap 2: record the command's stdio on the session tracker.
    let tracker = {
        let mut listener = events.subscribe();
        let session = rt.session.clone();
        let client_id = rt.client_id.clone();
        tokio::spawn(async move {
            while let Some(event) = listener.recv().await {
                let text = String::from_utf8_lossy(&event.chunk);
                match event.kind {
                    OutputKind::Stdout => session.stdout_chunk(&client_id, &text),
                    OutputKind::Stderr => session.stderr_chunk(&client_id, &text),
                }
            }
        })
    };

    let (stdin_tx, stdin_rx) = mailbox::<Chunk>();

    let exec = {
        let mut shell_ctx = ShellContext {
            commands: rt.commands.clone(),
            store: rt.store.clone(),
            auth: rt.auth.clone(),
            env: rt.env.clone(),
            session: Some(rt.session.clone()),
            registry: rt.registry.clone(),
            events: events.clone(),
            client_stdin: Some(InputStream::from_pipe(stdin_rx)),
            cancel: cancel.clone(),
        };
        let command_line = request.command.clone();
        tokio::spawn(async move { shell::run_script(&command_line, &mut shell_ctx).await })
    };
    tokio::pin!(exec);

    let mut disconnect: Option<WireMessage> = None;
    let mut inbound_open = true;
    let status = loop {
        tokio::select! {
            result = &mut exec => {
                break match result {
                    Ok(Ok(code)) => code,
                    Ok(Err(parse_err)) => {
                        events.emit(OutputEvent {
                            kind: OutputKind::Stderr,
                            chunk: format!("invalid command string: {parse_err}").into_bytes(),
                        });
                        1
                    }
                    Err(join_err) => {
                        tracing::error!(error = %join_err, "command task failed");
                        events.emit(OutputEvent {
                            kind: OutputKind::Stderr,
                            chunk: b"internal error: command crashed".to_vec(),
                        });
                        1
                    }
                };
            }
            msg = rt.inbound.recv(), if inbound_open => match msg {
                None => {
                    // session is going away; stop the command and drain
                    inbound_open = false;
                    cancel.cancel();
                }
                Some(m) => match m.message_type {
                    MessageType::InputStream => {
                        rt.session.stdin_chunk(&rt.client_id, &m.input_stream);
                        stdin_tx.send(m.input_stream.into_bytes());
                    }
                    MessageType::StdinEof => stdin_tx.close(),
                    MessageType::CommandInterrupt => cancel.cancel(),
                    MessageType::Disconnect => {
                        cancel.cancel();
                        disconnect = Some(m);
                    }
                    MessageType::SetEnv => {
                        if let Some(vars) = &m.set_env {
                            rt.env.merge(vars);
                        }
                    }
                    MessageType::RunCommand => {
                        let mut busy =
                            WireMessage::reply(MessageType::ErrResponse, &m.message_id, &rt.client_id);
                        busy.error = "command already running".to_string();
                        rt.outbound.send(busy);
                    }
                    _ => {}
                },
            },
        }
    };

    // Every output frame must hit the outbound mailbox before
    // command_finished: close the broadcaster and join both taps first.
    stdin_tx.close();
    events.close();
    let _ = framer.await;
    let _ = tracker.await;

    rt.session.command_finished(&rt.client_id, status);
    rt.session
        .log_line(&rt.client_id, format!("command_finished: exit {status}"));
    let mut finished = WireMessage::reply(MessageType::CommandFinished, &request_id, &rt.client_id);
    finished.command_result = Some(status);
    rt.outbound.send(finished);

    // propagate builtin env mutations (cd) back to the caller
    let env_after = rt.env.snapshot();
    let changed: HashMap<String, String> = env_after
        .into_iter()
        .filter(|(k, v)| env_before.get(k) != Some(v))
        .collect();
    if !changed.is_empty() {
        let mut update = WireMessage::reply(MessageType::SetEnv, &request_id, &rt.client_id);
        update.set_env = Some(changed);
        rt.outbound.send(update);
    }

    disconnect
}
