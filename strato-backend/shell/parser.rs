use super::lexer::{Token, Word, tokenize};

#[derive(Debug, Clone, PartialEq)]
pub enum Redirect {
    Out(Word),
    Append(Word),
    In(Word),
}

/// One pipeline stage: its words (command + args, pre-expansion) and any
/// redirections attached to it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SimpleCommand {
    pub words: Vec<Word>,
    pub redirects: Vec<Redirect>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub commands: Vec<SimpleCommand>,
}

/// How a pipeline is joined to the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqOp {
    /// `;` — run unconditionally.
    Always,
    /// `&&` — run only if the previous pipeline exited 0.
    AndIf,
    /// `||` — run only if the previous pipeline exited non-zero.
    OrIf,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Script {
    pub pipelines: Vec<(SeqOp, Pipeline)>,
}

/// Parse a full command line. An empty line parses to an empty script.
pub fn parse(input: &str) -> Result<Script, String> {
    let tokens = tokenize(input)?;
    let mut script = Script::default();
    let mut pos = 0;

    let mut connector = SeqOp::Always;
    loop {
        // tolerate stray separators and a trailing one
        while pos < tokens.len() && tokens[pos] == Token::Semi {
            pos += 1;
        }
        if pos >= tokens.len() {
            break;
        }

        let pipeline = parse_pipeline(&tokens, &mut pos)?;
        script.pipelines.push((connector, pipeline));

        match tokens.get(pos) {
            None => break,
            Some(Token::Semi) => {
                connector = SeqOp::Always;
                pos += 1;
            }
            Some(Token::AndIf) => {
                connector = SeqOp::AndIf;
                pos += 1;
                if pos >= tokens.len() {
                    return Err("expected a command after &&".into());
                }
            }
            Some(Token::OrIf) => {
                connector = SeqOp::OrIf;
                pos += 1;
                if pos >= tokens.len() {
                    return Err("expected a command after ||".into());
                }
            }
            Some(other) => return Err(format!("unexpected token: {other:?}")),
        }
    }

    Ok(script)
}

fn parse_pipeline(tokens: &[Token], pos: &mut usize) -> Result<Pipeline, String> {
    let mut commands = vec![parse_command(tokens, pos)?];
    while tokens.get(*pos) == Some(&Token::Pipe) {
        *pos += 1;
        commands.push(parse_command(tokens, pos)?);
    }
    Ok(Pipeline { commands })
}

fn parse_command(tokens: &[Token], pos: &mut usize) -> Result<SimpleCommand, String> {
    let mut command = SimpleCommand::default();

    loop {
        match tokens.get(*pos) {
            Some(Token::Word(word)) => {
                command.words.push(word.clone());
                *pos += 1;
            }
            Some(Token::RedirOut) => {
                *pos += 1;
                command.redirects.push(Redirect::Out(redir_target(tokens, pos)?));
            }
            Some(Token::RedirAppend) => {
                *pos += 1;
                command
                    .redirects
                    .push(Redirect::Append(redir_target(tokens, pos)?));
            }
            Some(Token::RedirIn) => {
                *pos += 1;
                command.redirects.push(Redirect::In(redir_target(tokens, pos)?));
            }
            _ => break,
        }
    }

    if command.words.is_empty() && command.redirects.is_empty() {
        return Err("missing command".into());
    }
    if command.words.is_empty() {
        return Err("redirection without a command".into());
    }
    Ok(command)
}

fn redir_target(tokens: &[Token], pos: &mut usize) -> Result<Word, String> {
    match tokens.get(*pos) {
        Some(Token::Word(word)) => {
            *pos += 1;
            Ok(word.clone())
        }
        _ => Err("redirection requires a target path".into()),
    }
}
