use async_trait::async_trait;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};
use crate::vfs::path;

use super::{Command, CommandContext};

pub struct CmdRm;

#[async_trait]
impl Command for CmdRm {
    fn identifier(&self) -> &'static str {
        "rm"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if ctx.args.len() == 1 || ctx.args.iter().any(|a| a == "-h" || a == "--help") {
            return ctx.fail("usage: rm [-rf] <FILES...>").await;
        }

        let options = [
            OptionDescriptor {
                identifier: "recursive",
                aliases: &["r", "recursive"],
                default: FlagValue::Bool(false),
            },
            OptionDescriptor {
                identifier: "forced",
                aliases: &["f", "forced"],
                default: FlagValue::Bool(false),
            },
        ];
        let (vals, paths) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };
        let rm_directories = vals["recursive"].as_bool();
        let forced = vals["forced"].as_bool();

        if paths.is_empty() {
            return ctx.fail("usage: rm [-rf] <FILES...>").await;
        }

        let cwd = ctx.cwd();
        let tags = ctx.tags();
        for raw_path in &paths {
            let abs = match path::abs_path(&cwd, raw_path) {
                Ok(p) => p,
                Err(err) => {
                    return ctx
                        .fail(&format!("error: path invalid ({raw_path:?}): {err}"))
                        .await;
                }
            };
            if let Err(err) = ctx
                .store
                .remove_file(Some(&tags), &abs, forced, rm_directories)
                .await
            {
                return ctx
                    .fail(&format!("error: failed to remove file ({raw_path:?}): {err}"))
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
    async fn removes_files() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let root = harness.store.lookup(None, "/").await.unwrap();
        harness
            .store
            .write_file(None, root.id, "f", None)
            .await
            .unwrap();

        let mut ctx = harness.context(&auth, &["rm", "/f"], &[("PWD", "/")]);
        assert_eq!(CmdRm.run(&mut ctx).await, 0);
        assert!(harness.store.lookup(None, "/f").await.is_err());
    }

    #[tokio::test]
    async fn directories_need_r() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let root = harness.store.lookup(None, "/").await.unwrap();
        harness
            .store
            .write_directory(None, root.id, "d", None)
            .await
            .unwrap();

        let mut ctx = harness.context(&auth, &["rm", "/d"], &[("PWD", "/")]);
        assert_eq!(CmdRm.run(&mut ctx).await, 1);

        let mut ctx = harness.context(&auth, &["rm", "-r", "/d"], &[("PWD", "/")]);
        assert_eq!(CmdRm.run(&mut ctx).await, 0);
        assert!(harness.store.lookup(None, "/d").await.is_err());
    }

    #[tokio::test]
    async fn help_flag_prints_usage() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &[]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["rm", "--help"], &[("PWD", "/")]);
        assert_eq!(CmdRm.run(&mut ctx).await, 1);
        let (_, stderr) = Harness::drain(listener);
        assert!(stderr.contains("usage: rm"));
    }
}
