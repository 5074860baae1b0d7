use async_trait::async_trait;

use super::{Command, CommandContext};

/// Prints its arguments to stderr and fails with exit code 1. Used by
/// callers that want to surface a message as a failed command.
pub struct CmdError;

#[async_trait]
impl Command for CmdError {
    fn identifier(&self) -> &'static str {
        "error"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let msg = ctx.args[1..].join(" ");
        let _ = ctx.stderr.write_str(&msg).await;
        1
    }
}
