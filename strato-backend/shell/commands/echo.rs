use async_trait::async_trait;

use crate::shell::flags::{FlagValue, OptionDescriptor, parse_args};

use super::{Command, CommandContext};

pub struct CmdEcho;

/// Interpret backslash escapes the way `echo -e` does. Args from single
/// quotes still carry literal backslashes; everything else was already
/// unescaped by the lexer.
fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('x') => {
                let digits: String = chars.by_ref().take(2).collect();
                match u8::from_str_radix(&digits, 16) {
                    Ok(byte) if digits.len() == 2 => out.push(byte as char),
                    _ => {
                        out.push_str("\\x");
                        out.push_str(&digits);
                    }
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[async_trait]
impl Command for CmdEcho {
    fn identifier(&self) -> &'static str {
        "echo"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let options = [
            OptionDescriptor {
                identifier: "escape",
                aliases: &["e"],
                default: FlagValue::Bool(false),
            },
            OptionDescriptor {
                identifier: "no_newline",
                aliases: &["n"],
                default: FlagValue::Bool(false),
            },
        ];
        let (vals, args) = match parse_args(&options, &ctx.args[1..]) {
            Ok(parsed) => parsed,
            Err(msg) => return ctx.fail(&msg).await,
        };

        let mut out = args.join(" ");
        if vals["escape"].as_bool() {
            out = unescape(&out);
        }
        if !vals["no_newline"].as_bool() {
            out.push_str("\r\n");
        }

        match ctx.stdout.write_str(&out).await {
            Ok(()) => 0,
            Err(err) => ctx.fail(&format!("error: {err}")).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;

    #[test]
    fn unescape_handles_common_sequences() {
        assert_eq!(unescape(r"a\nb"), "a\nb");
        assert_eq!(unescape(r"a\tb"), "a\tb");
        assert_eq!(unescape(r"a\\b"), "a\\b");
        assert_eq!(unescape(r"\x41"), "A");
        assert_eq!(unescape(r"\q"), "\\q");
        assert_eq!(unescape("plain"), "plain");
    }

    #[tokio::test]
    async fn joins_args_with_crlf() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["echo", "hello", "world"], &[("PWD", "/")]);

        assert_eq!(CmdEcho.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert_eq!(stdout, "hello world\r\n");
    }

    #[tokio::test]
    async fn n_suppresses_newline_and_e_unescapes() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &["sysadmin"]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["echo", "-en", r"a\tb"], &[("PWD", "/")]);

        assert_eq!(CmdEcho.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert_eq!(stdout, "a\tb");
    }
}
