use std::time::Duration;

use async_trait::async_trait;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};

use super::{Command, CommandContext, EXIT_INTERRUPT};

/// Emit its arguments on a fixed interval until interrupted. Useful for
/// keeping a channel warm and for exercising interruption.
pub struct CmdHeartbeat;

#[async_trait]
impl Command for CmdHeartbeat {
    fn identifier(&self) -> &'static str {
        "heartbeat"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let options = [OptionDescriptor {
            identifier: "delay",
            aliases: &["d", "delay"],
            default: FlagValue::Str("500".into()),
        }];
        let (vals, rest) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };

        let delay_ms: u64 = match vals["delay"].as_str().parse() {
            Ok(n) => n,
            Err(_) => return ctx.fail("error: invalid number").await,
        };
        if delay_ms == 0 {
            return ctx.fail("duration must be more than 0").await;
        }

        let mut line = if rest.is_empty() {
            "beep".to_string()
        } else {
            rest.join(" ")
        };
        line.push_str("\r\n");

        let cancel = ctx.cancel.clone();
        let mut ticker = tokio::time::interval(Duration::from_millis(delay_ms));
        // the first tick fires immediately; skip it so the delay is honest
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return EXIT_INTERRUPT,
                _ = ticker.tick() => {
                    if let Err(err) = ctx.stdout.write_str(&line).await {
                        return ctx.fail(&format!("error: {err}")).await;
                    }
                }
            }
        }
    }
}
