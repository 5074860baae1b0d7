/// One piece of a word, kept separate so variable expansion happens after
/// tokenization with the quoting context already resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum WordPart {
    Literal(String),
    /// `$name` or `${name}` outside single quotes.
    Var(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Word {
    pub parts: Vec<WordPart>,
    /// True when the word carried quotes, so `""` survives as an empty
    /// argument instead of being dropped after expansion.
    pub quoted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Word(Word),
    Pipe,
    Semi,
    AndIf,
    OrIf,
    RedirOut,
    RedirAppend,
    RedirIn,
}

fn is_var_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_var_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

struct Lexer<'a> {
    chars: Vec<char>,
    pos: usize,
    input: &'a str,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn err(&self, msg: &str) -> String {
        format!("{msg} (in {:?})", self.input)
    }

    /// Resolve a backslash escape. `\n`, `\r`, `\t`, `\xHH`, `\uHHHH`;
    /// anything else yields the escaped character itself.
    ///
    /// Words are UTF-8 strings from here through expansion and the
    /// argument list, so `\xHH` cannot inject a raw byte: 80-FF are taken
    /// as the code points U+0080-U+00FF and come out UTF-8 encoded
    /// (`\xff` is `ÿ`, two bytes). `\xHH` and `\u00HH` are equivalent.
    fn escape(&mut self) -> Result<String, String> {
        let Some(c) = self.bump() else {
            return Err(self.err("unused escape at the end of the command"));
        };
        match c {
            'n' => Ok("\n".into()),
            'r' => Ok("\r".into()),
            't' => Ok("\t".into()),
            'x' => {
                let hi = self.bump().ok_or_else(|| self.err("incomplete \\x escape"))?;
                let lo = self.bump().ok_or_else(|| self.err("incomplete \\x escape"))?;
                let digits: String = [hi, lo].iter().collect();
                let byte = u8::from_str_radix(&digits, 16)
                    .map_err(|_| self.err(&format!("invalid \\x escape: {digits}")))?;
                // code point, not raw byte; see the doc comment above
                Ok((byte as char).to_string())
            }
            'u' => {
                let mut digits = String::new();
                for _ in 0..4 {
                    digits.push(self.bump().ok_or_else(|| self.err("incomplete \\u escape"))?);
                }
                let code = u32::from_str_radix(&digits, 16)
                    .map_err(|_| self.err(&format!("invalid \\u escape: {digits}")))?;
                let ch = char::from_u32(code)
                    .ok_or_else(|| self.err(&format!("invalid \\u escape: {digits}")))?;
                Ok(ch.to_string())
            }
            other => Ok(other.to_string()),
        }
    }

    /// `$name` / `${name}`. A `$` not followed by a name is literal.
    fn variable(&mut self) -> Result<WordPart, String> {
        match self.peek() {
            Some('{') => {
                self.bump();
                let mut name = String::new();
                loop {
                    match self.bump() {
                        Some('}') => break,
                        Some(c) if is_var_char(c) => name.push(c),
                        Some(c) => {
                            return Err(self.err(&format!("invalid character {c:?} in ${{}}")));
                        }
                        None => return Err(self.err("unclosed ${ in command")),
                    }
                }
                if name.is_empty() {
                    return Err(self.err("empty ${} expansion"));
                }
                Ok(WordPart::Var(name))
            }
            Some(c) if is_var_start(c) => {
                let mut name = String::new();
                while let Some(c) = self.peek() {
                    if is_var_char(c) {
                        name.push(c);
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
                Ok(WordPart::Var(name))
            }
            _ => Ok(WordPart::Literal("$".into())),
        }
    }
}

/// Tokenize a command line: whitespace-separated words with single/double
/// quoting and backslash escapes, plus the operators `|`, `;`, `&&`, `||`,
/// `>`, `>>`, `<`.
pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Lexer {
        chars: input.chars().collect(),
        pos: 0,
        input,
    };
    let mut tokens: Vec<Token> = Vec::new();

    let mut word = Word::default();
    let mut literal = String::new();

    macro_rules! flush_literal {
        () => {
            if !literal.is_empty() {
                word.parts.push(WordPart::Literal(std::mem::take(&mut literal)));
            }
        };
    }
    macro_rules! flush_word {
        () => {
            flush_literal!();
            if !word.parts.is_empty() || word.quoted {
                tokens.push(Token::Word(std::mem::take(&mut word)));
            } else {
                word = Word::default();
            }
        };
    }

    while let Some(c) = lexer.bump() {
        match c {
            ' ' | '\t' => {
                flush_word!();
            }
            '|' => {
                flush_word!();
                if lexer.peek() == Some('|') {
                    lexer.bump();
                    tokens.push(Token::OrIf);
                } else {
                    tokens.push(Token::Pipe);
                }
            }
            '&' => {
                flush_word!();
                if lexer.peek() == Some('&') {
                    lexer.bump();
                    tokens.push(Token::AndIf);
                } else {
                    return Err(lexer.err("background execution (&) is not supported"));
                }
            }
            ';' => {
                flush_word!();
                tokens.push(Token::Semi);
            }
            '>' => {
                flush_word!();
                if lexer.peek() == Some('>') {
                    lexer.bump();
                    tokens.push(Token::RedirAppend);
                } else {
                    tokens.push(Token::RedirOut);
                }
            }
            '<' => {
                flush_word!();
                tokens.push(Token::RedirIn);
            }
            '\\' => literal.push_str(&lexer.escape()?),
            '$' => {
                flush_literal!();
                word.parts.push(lexer.variable()?);
            }
            '\'' => {
                word.quoted = true;
                loop {
                    match lexer.bump() {
                        Some('\'') => {
                            // '' inside single quotes escapes a quote
                            if lexer.peek() == Some('\'') {
                                lexer.bump();
                                literal.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => literal.push(c),
                        None => return Err(lexer.err("unclosed quote in input")),
                    }
                }
            }
            '"' => {
                word.quoted = true;
                loop {
                    match lexer.bump() {
                        Some('"') => break,
                        Some('\\') => literal.push_str(&lexer.escape()?),
                        Some('$') => {
                            flush_literal!();
                            word.parts.push(lexer.variable()?);
                        }
                        Some(c) => literal.push(c),
                        None => return Err(lexer.err("unclosed quote in input")),
                    }
                }
            }
            other => literal.push(other),
        }
    }

    flush_word!();
    Ok(tokens)
}
