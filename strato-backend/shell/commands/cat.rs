use async_trait::async_trait;

use crate::vfs::path;

use super::{Command, CommandContext, EXIT_INTERRUPT};

/// Concatenate files to stdout, each followed by CRLF. With no arguments,
/// copies stdin through until EOF.
pub struct CmdCat;

#[async_trait]
impl Command for CmdCat {
    fn identifier(&self) -> &'static str {
        "cat"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if ctx.args.len() > 1 {
            return cat_files(ctx).await;
        }

        let cancel = ctx.cancel.clone();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return EXIT_INTERRUPT,
                chunk = ctx.stdin.read_chunk() => match chunk {
                    Ok(Some(chunk)) => {
                        if let Err(err) = ctx.stdout.write(&chunk).await {
                            return ctx.fail(&format!("error: {err}")).await;
                        }
                    }
                    Ok(None) => return 0,
                    Err(err) => return ctx.fail(&format!("error: {err}")).await,
                },
            }
        }
    }
}

async fn cat_files(ctx: &mut CommandContext) -> i32 {
    let cwd = ctx.cwd();
    let tags = ctx.tags();
    let files = ctx.args[1..].to_vec();

    for (i, file) in files.iter().enumerate() {
        if ctx.cancel.is_cancelled() {
            return EXIT_INTERRUPT;
        }

        let abs = match path::abs_path(&cwd, file) {
            Ok(p) => p,
            Err(err) => {
                return ctx
                    .fail(&format!("error (arg {i}): invalid filepath: {err}"))
                    .await;
            }
        };

        let mut download = match ctx.store.lookup_read(Some(&tags), &abs).await {
            Ok(d) => d,
            Err(err) => {
                return ctx.fail(&format!("error (arg {i}): {err}")).await;
            }
        };

        let mut buf = [0u8; 4096];
        loop {
            if ctx.cancel.is_cancelled() {
                return EXIT_INTERRUPT;
            }
            let n = match download.read_chunk(&mut buf).await {
                Ok(n) => n,
                Err(err) => {
                    return ctx
                        .fail(&format!("error reading from file (arg {i}): {err}"))
                        .await;
                }
            };
            if n == 0 {
                break;
            }
            if let Err(err) = ctx.stdout.write(&buf[..n]).await {
                return ctx.fail(&format!("error: {err}")).await;
            }
        }
        let _ = ctx.stdout.write_str("\r\n").await;
    }
    0
}
