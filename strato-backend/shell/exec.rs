use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::AuthStatus;
use crate::session::events::Broadcaster;
use crate::session::mailbox::mailbox;
use crate::session::tracking::{SessionRecord, SessionRegistry};
use crate::vfs::FsStore;
use crate::vfs::open::{self, OpenFlags};

use super::commands::{CommandContext, CommandSet};
use super::io::{EnvMap, InputStream, OutputEvent, OutputKind, OutputStream};
use super::lexer::{Word, WordPart};
use super::parser::{self, Pipeline, Redirect, SeqOp};

/// Everything a script run needs from its client: the builtin registry,
/// the store, the caller's authorization, the shared env, the output tap,
/// the client's stdin feed, and the command's cancellation token.
pub struct ShellContext {
    pub commands: Arc<CommandSet>,
    pub store: FsStore,
    pub auth: AuthStatus,
    pub env: EnvMap,
    pub session: Option<Arc<SessionRecord>>,
    pub registry: Arc<SessionRegistry>,
    pub events: Broadcaster<OutputEvent>,
    pub client_stdin: Option<InputStream>,
    pub cancel: CancellationToken,
}

/// Run one command line: sequential pipelines joined by `;`/`&&`/`||`,
/// each pipeline's stages running concurrently over in-memory pipes.
/// Returns the exit status of the last pipeline executed, or a parse
/// error message for the caller to surface on stderr.
pub async fn run_script(line: &str, ctx: &mut ShellContext) -> Result<i32, String> {
    let script = parser::parse(line)?;

    let mut status = 0;
    for (op, pipeline) in &script.pipelines {
        match op {
            SeqOp::Always => {}
            SeqOp::AndIf if status != 0 => continue,
            SeqOp::OrIf if status == 0 => continue,
            _ => {}
        }
        status = run_pipeline(pipeline, ctx).await;
        if ctx.cancel.is_cancelled() {
            break;
        }
    }
    Ok(status)
}

/// Expand a word against the environment. Unknown variables expand empty;
/// a fully empty unquoted expansion drops the word.
fn expand_word(word: &Word, env: &HashMap<String, String>) -> Option<String> {
    let mut out = String::new();
    for part in &word.parts {
        match part {
            WordPart::Literal(s) => out.push_str(s),
            WordPart::Var(name) => {
                if let Some(value) = env.get(name) {
                    out.push_str(value);
                }
            }
        }
    }
    if out.is_empty() && !word.quoted {
        None
    } else {
        Some(out)
    }
}

fn expand_words(words: &[Word], env: &HashMap<String, String>) -> Vec<String> {
    words.iter().filter_map(|w| expand_word(w, env)).collect()
}

enum RedirTarget {
    Out(String),
    Append(String),
    In(String),
}

async fn run_pipeline(pipeline: &Pipeline, ctx: &mut ShellContext) -> i32 {
    let n = pipeline.commands.len();
    let env_snapshot = ctx.env.snapshot();

    // The client's stdin feeds the first stage of the first pipeline that
    // asks for it; everything downstream reads from its predecessor.
    let mut upstream = ctx
        .client_stdin
        .take()
        .unwrap_or_else(InputStream::closed);

    let mut handles = Vec::with_capacity(n);
    for (i, command) in pipeline.commands.iter().enumerate() {
        let (stdout, downstream) = if i == n - 1 {
            (
                OutputStream::to_tap(ctx.events.clone(), OutputKind::Stdout),
                InputStream::closed(),
            )
        } else {
            let (tx, rx) = mailbox();
            (OutputStream::to_pipe(tx), InputStream::from_pipe(rx))
        };
        let stdin = std::mem::replace(&mut upstream, downstream);
        let stderr = OutputStream::to_tap(ctx.events.clone(), OutputKind::Stderr);

        let args = expand_words(&command.words, &env_snapshot);
        let redirects: Vec<RedirTarget> = match command
            .redirects
            .iter()
            .map(|r| {
                let expand = |w: &Word| {
                    expand_word(w, &env_snapshot)
                        .ok_or_else(|| "redirection target expands to nothing".to_string())
                };
                Ok(match r {
                    Redirect::Out(w) => RedirTarget::Out(expand(w)?),
                    Redirect::Append(w) => RedirTarget::Append(expand(w)?),
                    Redirect::In(w) => RedirTarget::In(expand(w)?),
                })
            })
            .collect::<Result<Vec<_>, String>>()
        {
            Ok(r) => r,
            Err(msg) => {
                let _ = stderr.write_str(&msg).await;
                // keep the pipe chain intact: this stage produces nothing
                let mut stdout = stdout;
                let _ = stdout.finish().await;
                handles.push(tokio::spawn(async move { 1 }));
                continue;
            }
        };

        let stage = CommandContext {
            args,
            stdin,
            stdout,
            stderr,
            env: ctx.env.clone(),
            auth: ctx.auth.clone(),
            store: ctx.store.clone(),
            session: ctx.session.clone(),
            registry: ctx.registry.clone(),
            cancel: ctx.cancel.clone(),
        };
        let commands = ctx.commands.clone();
        handles.push(tokio::spawn(run_stage(commands, stage, redirects)));
    }

    // Exit status of the pipeline is the last stage's; earlier stages are
    // still awaited so their redirections finalize before we return.
    let mut status = 0;
    let last = handles.len().saturating_sub(1);
    for (i, handle) in handles.into_iter().enumerate() {
        let code = handle.await.unwrap_or(1);
        if i == last {
            status = code;
        }
    }
    status
}

async fn run_stage(
    commands: Arc<CommandSet>,
    mut ctx: CommandContext,
    redirects: Vec<RedirTarget>,
) -> i32 {
    let cwd = ctx.cwd();
    let tags = ctx.tags();

    for redirect in redirects {
        let result: crate::vfs::FsResult<()> = async {
            match &redirect {
                RedirTarget::Out(path) => {
                    let handle = open::open(
                        &ctx.store,
                        Some(&tags),
                        &cwd,
                        path,
                        OpenFlags::write_only().create(),
                    )
                    .await?;
                    if let Some(writer) = handle.into_write() {
                        ctx.stdout = OutputStream::to_file(writer);
                    }
                    Ok(())
                }
                RedirTarget::Append(path) => {
                    let handle = open::open(
                        &ctx.store,
                        Some(&tags),
                        &cwd,
                        path,
                        OpenFlags::write_only().create().append(),
                    )
                    .await?;
                    if let Some(writer) = handle.into_write() {
                        ctx.stdout = OutputStream::to_file(writer);
                    }
                    Ok(())
                }
                RedirTarget::In(path) => {
                    let handle =
                        open::open(&ctx.store, Some(&tags), &cwd, path, OpenFlags::read_only())
                            .await?;
                    if let Some(reader) = handle.into_read() {
                        ctx.stdin = InputStream::from_file(reader);
                    }
                    Ok(())
                }
            }
        }
        .await;

        if let Err(err) = result {
            let _ = ctx.stderr.write_str(&format!("error: {err}")).await;
            let _ = ctx.stdout.finish().await;
            let _ = ctx.stderr.finish().await;
            return 1;
        }
    }

    let mut code = if ctx.args.is_empty() {
        let _ = ctx.stderr.write_str("error: missing command").await;
        1
    } else {
        match commands.get(&ctx.args[0]) {
            Some(command) => command.run(&mut ctx).await,
            None => {
                let _ = ctx.stderr.write_str("command does not exist").await;
                1
            }
        }
    };

    // Sealing stdout can itself fail (a `> file` close runs the final
    // write_file); surface that as a stage failure.
    if let Err(err) = ctx.stdout.finish().await {
        let _ = ctx.stderr.write_str(&format!("error: {err}")).await;
        code = 1;
    }
    let _ = ctx.stderr.finish().await;
    code
}
