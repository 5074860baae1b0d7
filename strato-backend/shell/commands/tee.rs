use async_trait::async_trait;
use mongodb::bson::oid::ObjectId;

use crate::vfs::path;
use crate::vfs::types::AccessMode;

use super::cat::CmdCat;
use super::{Command, CommandContext, EXIT_INTERRUPT};

/// Copy stdin to stdout and into every listed file. The content is
/// uploaded once; all targets share the same blob id. Parent directories
/// are permission-checked up front so a late failure doesn't waste the
/// upload.
pub struct CmdTee;

#[async_trait]
impl Command for CmdTee {
    fn identifier(&self) -> &'static str {
        "tee"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if ctx.args.len() == 1 {
            return CmdCat.run(ctx).await;
        }

        let cwd = ctx.cwd();
        let tags = ctx.tags();

        let mut targets: Vec<(ObjectId, String)> = Vec::with_capacity(ctx.args.len() - 1);
        for raw_path in ctx.args[1..].to_vec() {
            let abs = match path::abs_path(&cwd, &raw_path) {
                Ok(p) => p,
                Err(err) => {
                    return ctx
                        .fail(&format!("error: invalid path ({raw_path:?}): {err}"))
                        .await;
                }
            };
            let (folder, name) = match path::dir_up(&abs) {
                Ok(split) => split,
                Err(err) => {
                    return ctx
                        .fail(&format!("error: invalid path ({raw_path:?}): {err}"))
                        .await;
                }
            };
            let parent = match ctx.store.lookup(Some(&tags), &folder).await {
                Ok(p) => p,
                Err(err) => {
                    return ctx
                        .fail(&format!("error: failed to get folder ({folder:?}): {err}"))
                        .await;
                }
            };
            if !parent.permissions.is_allowed(AccessMode::Write, Some(&tags)) {
                return ctx
                    .fail(&format!("error: cannot write to folder ({folder:?})"))
                    .await;
            }
            if !parent.permissions.is_allowed(AccessMode::Execute, Some(&tags)) {
                return ctx
                    .fail(&format!("error: cannot descend into folder ({folder:?})"))
                    .await;
            }
            targets.push((parent.id, name));
        }

        let mut upload = match ctx.store.blobs().open_upload().await {
            Ok(u) => u,
            Err(err) => {
                return ctx
                    .fail(&format!("error: failed to open upload stream: {err}"))
                    .await;
            }
        };

        let cancel = ctx.cancel.clone();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = upload.abort().await;
                    return EXIT_INTERRUPT;
                }
                chunk = ctx.stdin.read_chunk() => chunk,
            };
            match chunk {
                Ok(Some(chunk)) => {
                    if let Err(err) = upload.write_all(&chunk).await {
                        let _ = ctx
                            .stderr
                            .write_str(&format!("error: failed to write to upload stream: {err}"))
                            .await;
                        return 1;
                    }
                    if let Err(err) = ctx.stdout.write(&chunk).await {
                        let _ = upload.abort().await;
                        return ctx.fail(&format!("error: {err}")).await;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let _ = upload.abort().await;
                    return ctx.fail(&format!("error: {err}")).await;
                }
            }
        }

        let blob_id = match upload.close().await {
            Ok(id) => id,
            Err(err) => {
                return ctx
                    .fail(&format!("error: failed to finalize file upload: {err}"))
                    .await;
            }
        };

        for (parent_id, name) in &targets {
            if let Err(err) = ctx
                .store
                .write_file(Some(&tags), *parent_id, name, Some(blob_id))
                .await
            {
                return ctx
                    .fail(&format!("error: failed to write file ({name:?}): {err}"))
                    .await;
            }
        }
        0
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;
    use crate::session::mailbox::mailbox;
    use crate::shell::io::InputStream;

    #[tokio::test]
    async fn writes_stdin_to_all_targets_and_stdout() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["tee", "/home/a", "/home/b"], &[("PWD", "/")]);

        let (tx, rx) = mailbox();
        ctx.stdin = InputStream::from_pipe(rx);
        tx.send(b"shared ".to_vec());
        tx.send(b"content".to_vec());
        tx.close();

        assert_eq!(CmdTee.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert_eq!(stdout, "shared content");

        let a = harness.store.lookup_read_all(None, "/home/a").await.unwrap();
        let b = harness.store.lookup_read_all(None, "/home/b").await.unwrap();
        assert_eq!(a, b"shared content");
        assert_eq!(b, b"shared content");

        // one upload, shared by both targets
        let entry_a = harness.store.lookup(None, "/home/a").await.unwrap();
        let entry_b = harness.store.lookup(None, "/home/b").await.unwrap();
        assert_eq!(entry_a.file_ref, entry_b.file_ref);
    }

    #[tokio::test]
    async fn unwritable_parent_fails_before_reading_stdin() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["pilot"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["tee", "/cant/x"], &[("PWD", "/")]);

        assert_eq!(CmdTee.run(&mut ctx).await, 1);
        let (_, stderr) = Harness::drain(listener);
        assert!(stderr.contains("failed to get folder"));
    }

    #[tokio::test]
    async fn no_args_behaves_like_cat() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &[]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["tee"], &[]);

        let (tx, rx) = mailbox();
        ctx.stdin = InputStream::from_pipe(rx);
        tx.send(b"passthrough".to_vec());
        tx.close();

        assert_eq!(CmdTee.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert_eq!(stdout, "passthrough");
    }
}
