use async_trait::async_trait;

use crate::vfs::path;

use super::{Command, CommandContext};

pub struct CmdMv;

#[async_trait]
impl Command for CmdMv {
    fn identifier(&self) -> &'static str {
        "mv"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if ctx.args.len() < 3 {
            return ctx.fail("usage: mv <SOURCE FILE(S)...> <DESTINATION>").await;
        }

        let cwd = ctx.cwd();
        let tags = ctx.tags();
        let sources = ctx.args[1..ctx.args.len() - 1].to_vec();
        let dest = ctx.args[ctx.args.len() - 1].clone();

        let dest_abs = match path::abs_path(&cwd, &dest) {
            Ok(p) => p,
            Err(err) => {
                return ctx.fail(&format!("invalid path ({dest:?}): {err}")).await;
            }
        };

        for source in &sources {
            let source_abs = match path::abs_path(&cwd, source) {
                Ok(p) => p,
                Err(err) => {
                    return ctx.fail(&format!("invalid path ({source:?}): {err}")).await;
                }
            };
            if let Err(err) = ctx
                .store
                .move_entry(Some(&tags), &dest_abs, &source_abs)
                .await
            {
                return ctx
                    .fail(&format!("error ({source:?}): couldn't move to {dest:?}: {err}"))
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

    #[tokio::test]
    async fn renames_and_moves_into_directories() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let root = harness.store.lookup(None, "/").await.unwrap();
        let blob = harness.store.write_blob(b"data").await.unwrap();
        harness
            .store
            .write_file(None, root.id, "f", Some(blob))
            .await
            .unwrap();

        // rename
        let mut ctx = harness.context(&auth, &["mv", "/f", "/renamed"], &[("PWD", "/")]);
        assert_eq!(CmdMv.run(&mut ctx).await, 0);
        assert!(harness.store.lookup(None, "/f").await.is_err());

        // move into existing directory keeps the name
        let mut ctx = harness.context(&auth, &["mv", "/renamed", "/home"], &[("PWD", "/")]);
        assert_eq!(CmdMv.run(&mut ctx).await, 0);
        assert_eq!(
            harness
                .store
                .lookup_read_all(None, "/home/renamed")
                .await
                .unwrap(),
            b"data"
        );
    }

    #[tokio::test]
    async fn multiple_sources_into_one_directory() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let root = harness.store.lookup(None, "/").await.unwrap();
        for name in ["a", "b"] {
            harness
                .store
                .write_file(None, root.id, name, None)
                .await
                .unwrap();
        }

        let mut ctx = harness.context(&auth, &["mv", "/a", "/b", "/home"], &[("PWD", "/")]);
        assert_eq!(CmdMv.run(&mut ctx).await, 0);
        assert!(harness.store.lookup(None, "/home/a").await.is_ok());
        assert!(harness.store.lookup(None, "/home/b").await.is_ok());
    }

    #[tokio::test]
    async fn missing_source_fails() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["mv", "/ghost", "/home"], &[("PWD", "/")]);
        assert_eq!(CmdMv.run(&mut ctx).await, 1);
        let (_, stderr) = Harness::drain(listener);
        assert!(stderr.contains("couldn't move"));
    }
}
