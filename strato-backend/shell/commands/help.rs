use async_trait::async_trait;

use super::{Command, CommandContext};

const HELP_TEXT: &str = "
Help menu

Commands:

# whoami
whoami returns structured output concerning the current user session.
This includes AuthStatus information (such as username and user tags), and the contents of the user's user.profile file

# ls [-yl] [DIRS...]
ls prints out the files available in the specified directory(s).
options:
\"y\": yaml structured output
\"l\": long output (as opposed to simple field names)

# cat [FILES...]
cat outputs the contents of the given files in order.
If it isn't given any files to cat, it copies stdin to stdout.

# cd <filepath>
cd changes the working directory (stored in env as $PWD). This affects commands that take in filepaths, as they detect the relative path and resolve it against the current working directory.

# tee [FILES...]
tee opens the given files and writes stdin to all the files and stdout.
If tee isn't given any files to overwrite, it simply doesn't do file ops (same as cat)

# mkdir [-p] <PATHS...>
mkdir creates directories. With -p, missing parents are created too and existing directories are not an error.

# mv <SOURCES...> <DEST>
mv re-links entries: into DEST when it is a directory, or renaming onto DEST's leaf name otherwise.

# cp [-r] <SOURCES...> <DEST>
cp copies files (content is shared, not duplicated). Directories require -r.

# rm [-rf] <FILES...>
rm removes files. -r allows directories; -f falls back to the update permission when write is missing.

# chmod [-R] <MODE> <PATHS...>
chmod grants or revokes a tag's access. MODE is <tagname>{+|-}[rwxp].

# echo [-en] [ARGS...]
echo prints the given arguments to stdout with spaces between them.
options:
\"e\": escape - unescape '\\' sequences, such as \\n.
\"n\": no-newline - don't print a newline after all the args.

# error [ARGS...]
error prints all the arguments, with spaces between them to stderr, and fails immediately with exit code 1.

# heartbeat [-d MS] [ARGS...]
heartbeat prints its arguments every MS milliseconds until interrupted.

# base64 / hex
base64 and hex stream-encode stdin to stdout.

# crypto-rand [-n BYTES]
crypto-rand emits random bytes to stdout, for piping into base64, hex or tee.

# change-password <OLD> <NEW>
change-password verifies the old password and rewrites the login file with the new one.

# logout
logout ends the current session.

# clients
clients prints out server-tracked information about the different clients connected on the current socket session.

# sockets // NOTE: only users with \"sysadmin\" tag can run this command
sockets lists the socket sessions that currently are using resources on the server.

";

pub struct CmdHelp;

#[async_trait]
impl Command for CmdHelp {
    fn identifier(&self) -> &'static str {
        "help"
    }

    async fn run(&self, ctx: &mut CommandContext) -> i32 {
        let crlf = HELP_TEXT.replace('\n', "\r\n");
        match ctx.stdout.write_str(&crlf).await {
            Ok(()) => 0,
            Err(err) => ctx.fail(&format!("error: {err}")).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::Harness;
    use super::*;

    #[tokio::test]
    async fn prints_crlf_normalized_help() {
        let harness = Harness::new().await;
        let auth = harness.auth("alice", &[]);
        let listener = harness.events.subscribe();
        let mut ctx = harness.context(&auth, &["help"], &[]);

        assert_eq!(CmdHelp.run(&mut ctx).await, 0);
        let (stdout, _) = Harness::drain(listener);
        assert!(stdout.contains("Help menu"));
        assert!(stdout.contains("# whoami"));
        assert!(!stdout.replace("\r\n", "").contains('\n'), "all newlines are CRLF");
    }
}
