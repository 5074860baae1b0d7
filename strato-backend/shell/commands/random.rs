use async_trait::async_trait;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};

use super::{Command, CommandContext};

const MAX_RANDOM_BYTES: usize = 1 << 20;

/// Emit cryptographically random bytes to stdout, for piping into
/// `base64`, `hex`, or `tee`.
pub struct CmdCryptoRand;

#[async_trait]
impl Command for CmdCryptoRand {
    fn identifier(&self) -> &'static str {
        "crypto-rand"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let options = [OptionDescriptor {
            identifier: "count",
            aliases: &["n", "count"],
            default: FlagValue::Str("32".into()),
        }];
        let (vals, rest) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };
        if !rest.is_empty() {
            return ctx.fail("usage: crypto-rand [-n BYTES]").await;
        }

        let count: usize = match vals["count"].as_str().parse() {
            Ok(n) => n,
            Err(_) => return ctx.fail("error: invalid number").await,
        };
        if count == 0 || count > MAX_RANDOM_BYTES {
            return ctx
                .fail(&format!("error: count must be between 1 and {MAX_RANDOM_BYTES}"))
                .await;
        }

        let mut bytes = vec![0u8; count];
        if getrandom::fill(&mut bytes).is_err() {
            return ctx.fail("error: randomness source unavailable").await;
        }
        match ctx.stdout.write(&bytes).await {
            Ok(()) => 0,
            Err(err) => ctx.fail(&format!("error: {err}")).await,
        }
    }
}
