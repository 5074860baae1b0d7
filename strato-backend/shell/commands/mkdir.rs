use async_trait::async_trait;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};
use crate::vfs::FsErrorKind;
use crate::vfs::path;

use super::{Command, CommandContext};

pub struct CmdMkdir;

#[async_trait]
impl Command for CmdMkdir {
    fn identifier(&self) -> &'static str {
        "mkdir"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let options = [OptionDescriptor {
            identifier: "parents",
            aliases: &["p", "parents"],
            default: FlagValue::Bool(false),
        }];
        let (vals, paths) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };
        let mk_parents = vals["parents"].as_bool();

        if paths.is_empty() {
            return ctx.fail("usage: mkdir [-p] <PATHS...>").await;
        }

        let cwd = ctx.cwd();
        let tags = ctx.tags();
        let mut status = 0;
        for raw_path in &paths {
            let abs = match path::abs_path(&cwd, raw_path) {
                Ok(p) => p,
                Err(err) => {
                    let _ = ctx
                        .stderr
                        .write_str(&format!("error: invalid path ({raw_path:?}): {err}\r\n"))
                        .await;
                    status = 1;
                    continue;
                }
            };

            match ctx.store.mkdir(Some(&tags), &abs, None, mk_parents).await {
                Ok(_) => {}
                // -p absorbs "already exists"
                Err(err) if mk_parents && err.kind() == FsErrorKind::Exist => {}
                Err(err) => {
                    let _ = ctx
                        .stderr
                        .write_str(&format!("error creating directory ({raw_path:?}): {err}\r\n"))
                        .await;
                    status = 1;
                }
            }
        }
        status
    }
}
