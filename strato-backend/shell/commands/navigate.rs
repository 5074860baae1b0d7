use async_trait::async_trait;

use crate::vfs::path;
use crate::vfs::types::AccessMode;

use super::{Command, CommandContext};

/// Change the working directory. `$PWD` is shared state; the client
/// runtime propagates the change back to the caller as a `set_env` frame.
pub struct CmdCd;

#[async_trait]
impl Command for CmdCd {
    fn identifier(&self) -> &'static str {
        "cd"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        if ctx.args.len() > 2 {
            return ctx.fail("usage: cd [DIRECTORY]").await;
        }

        let target = match ctx.args.get(1) {
            Some(p) => p.clone(),
            None => ctx.env.get("HOME").unwrap_or_else(|| "/".to_string()),
        };

        let cwd = ctx.cwd();
        let abs = match path::abs_path(&cwd, &target) {
            Ok(p) => p,
            Err(err) => return ctx.fail(&format!("invalid path ({target:?}): {err}")).await,
        };

        let tags = ctx.tags();
        let entry = match ctx.store.lookup(Some(&tags), &abs).await {
            Ok(e) => e,
            Err(err) => return ctx.fail(&format!("cd: {err}")).await,
        };
        if !entry.is_dir() {
            return ctx.fail(&format!("cd: {abs} is not a directory")).await;
        }
        if !entry.permissions.is_allowed(AccessMode::Execute, Some(&tags)) {
            return ctx.fail(&format!("cd: cannot enter {abs}")).await;
        }

        ctx.env.set("PWD", &abs);
        0
    }
}
