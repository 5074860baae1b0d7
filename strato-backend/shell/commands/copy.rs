use async_trait::async_trait;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};
use crate::vfs::path;

use super::{Command, CommandContext};

pub struct CmdCopy;

#[async_trait]
impl Command for CmdCopy {
    fn identifier(&self) -> &'static str {
        "cp"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let options = [OptionDescriptor {
            identifier: "recursive",
            aliases: &["r", "R"],
            default: FlagValue::Bool(false),
        }];
        let (vals, args) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };
        let recursive = vals["recursive"].as_bool();

        if args.len() < 2 {
            return ctx.fail("usage: cp [-r] <SOURCE_PATHS...> <DEST_PATH>").await;
        }

        let cwd = ctx.cwd();
        let tags = ctx.tags();
        let sources = &args[..args.len() - 1];
        let dest = &args[args.len() - 1];

        let dest_abs = match path::abs_path(&cwd, dest) {
            Ok(p) => p,
            Err(err) => return ctx.fail(&format!("invalid path ({dest:?}): {err}")).await,
        };

        let mut status = 0;
        for source in sources {
            let source_abs = match path::abs_path(&cwd, source) {
                Ok(p) => p,
                Err(err) => {
                    return ctx.fail(&format!("invalid path ({source:?}): {err}")).await;
                }
            };
            if let Err(err) = ctx
                .store
                .copy_entry(Some(&tags), &dest_abs, &source_abs, recursive)
                .await
            {
                let _ = ctx
                    .stderr
                    .write_str(&format!("error ({source:?}): failed to copy: {err}\r\n"))
                    .await;
                status = 1;
            }
        }
        status
    }
}
