use async_trait::async_trait;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};
use crate::vfs::path;
use crate::vfs::types::{AccessMode, PermOp};

use super::{Command, CommandContext};

const USAGE: &str = "usage: chmod [-R] <MODE> <PATHS...>\r\n\
MODE is in the form of <tagname><{+|-}><[rwxp]>\r\n\
You must hold the update permission on each target; updates to the\r\n\
update-permission list itself are subject to safety rules.\r\n";

/// Grant or revoke a tag's access on entries. The mode letters are applied
/// in order, one store call each.
pub struct CmdChmod;

fn parse_mode(mode_str: &str) -> Result<(String, PermOp, Vec<AccessMode>), String> {
    let add_idx = mode_str.rfind('+');
    let remove_idx = mode_str.rfind('-');
    let (idx, op) = match (add_idx, remove_idx) {
        (None, None) => return Err("can't recognize op: no + or -".into()),
        (Some(a), Some(r)) if a > r => (a, PermOp::Add),
        (Some(a), None) => (a, PermOp::Add),
        (_, Some(r)) => (r, PermOp::Remove),
    };

    let tag = mode_str[..idx].to_string();
    if tag.is_empty() {
        return Err("missing tag name before the op".into());
    }
    let mut modes = Vec::new();
    for perm in mode_str[idx + 1..].chars() {
        modes.push(match perm {
            'r' => AccessMode::Read,
            'w' => AccessMode::Write,
            'x' => AccessMode::Execute,
            'p' => AccessMode::UpdatePerms,
            other => return Err(format!("invalid perm: {other}")),
        });
    }
    if modes.is_empty() {
        return Err("no perms given after the op".into());
    }
    Ok((tag, op, modes))
}

#[async_trait]
impl Command for CmdChmod {
    fn identifier(&self) -> &'static str {
        "chmod"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if ctx.args.len() < 3 {
            return ctx.fail(USAGE).await;
        }

        let options = [OptionDescriptor {
            identifier: "recursive",
            aliases: &["R", "r"],
            default: FlagValue::Bool(false),
        }];
        let (vals, args) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };
        let recursive = vals["recursive"].as_bool();

        if args.len() < 2 {
            return ctx
                .fail("invalid usage: run \"chmod\" for usage explanation")
                .await;
        }

        let (tag, op, modes) = match parse_mode(&args[0]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };

        let cwd = ctx.cwd();
        let tags = ctx.tags();
        let mut status = 0;
        for raw_path in &args[1..] {
            let abs = match path::abs_path(&cwd, raw_path) {
                Ok(p) => p,
                Err(err) => {
                    return ctx
                        .fail(&format!("invalid path ({raw_path:?}): {err}"))
                        .await;
                }
            };
            for mode in &modes {
                if let Err(err) = ctx
                    .store
                    .chmod(Some(&tags), &abs, &tag, op, *mode, recursive)
                    .await
                {
                    let _ = ctx
                        .stderr
                        .write_str(&format!(
                            "error ({raw_path:?}): failed to update perm: {err}\r\n"
                        ))
                        .await;
                    status = 1;
                }
            }
        }
        status
    }
}
