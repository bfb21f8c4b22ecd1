//! Import of the cache name and asset list from a service-worker script.
//!
//! Only the two constant declarations are read; the rest of the script is
//! ignored. The asset array is tokenized strictly: adjacent string literals
//! with no `,` between them are reported instead of being joined.

use regex::Regex;

use crate::config::ShellConfig;
use crate::error::{Error, Result};

/// Variable holding the cache name in a typical worker script.
pub const DEFAULT_NAME_VAR: &str = "CACHE_NAME";

/// Variable holding the asset array in a typical worker script.
pub const DEFAULT_ASSETS_VAR: &str = "ASSETS_TO_CACHE";

/// Names of the variables to extract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptVars {
    /// Variable assigned the cache name string.
    pub name_var: String,
    /// Variable assigned the asset array.
    pub assets_var: String,
}

impl Default for ScriptVars {
    fn default() -> Self {
        Self {
            name_var: DEFAULT_NAME_VAR.to_string(),
            assets_var: DEFAULT_ASSETS_VAR.to_string(),
        }
    }
}

/// What was extracted from a worker script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedWorker {
    /// The cache name, if the script declares one.
    pub cache_name: Option<String>,
    /// Asset entries in declaration order.
    pub assets: Vec<String>,
}

impl ImportedWorker {
    /// Converts the import into a shell configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the script declared no cache name, or the
    /// validation error of the resulting configuration.
    pub fn into_config(self, scope: Option<&str>) -> Result<ShellConfig> {
        let name = self
            .cache_name
            .ok_or_else(|| Error::Config("script does not declare a cache name".to_string()))?;
        let mut config = ShellConfig::new(name, self.assets);
        if let Some(scope) = scope {
            config = config.with_scope(scope);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Extracts [`DEFAULT_NAME_VAR`] and [`DEFAULT_ASSETS_VAR`] from `text`.
///
/// # Errors
///
/// Returns [`Error::ManifestParse`] if the asset array is missing or malformed.
pub fn parse_worker_script(source_name: &str, text: &str) -> Result<ImportedWorker> {
    parse_worker_script_with(source_name, text, &ScriptVars::default())
}

/// Extracts the variables named in `vars` from `text`.
///
/// # Errors
///
/// Returns [`Error::ManifestParse`] if the asset array is missing or malformed,
/// or if the name variable is not assigned a string literal.
pub fn parse_worker_script_with(source_name: &str, text: &str, vars: &ScriptVars) -> Result<ImportedWorker> {
    let mut lexer = Lexer::new(source_name, text);

    let cache_name = match find_assignment(text, &vars.name_var)? {
        Some(offset) => {
            lexer.pos = offset;
            match lexer.next_token()? {
                Token::Str { value, .. } => Some(value),
                other => {
                    return Err(lexer.error(
                        other.offset(),
                        format!("expected a string literal for `{}`", vars.name_var),
                    ));
                }
            }
        }
        None => None,
    };

    let Some(offset) = find_assignment(text, &vars.assets_var)? else {
        return Err(Error::parse_at(
            source_name,
            text,
            0,
            format!("no `{}` array found", vars.assets_var),
        ));
    };
    lexer.pos = offset;
    let assets = lexer.array(&vars.assets_var)?;

    Ok(ImportedWorker { cache_name, assets })
}

/// Offset just past `<const|let|var> <var> =`, if the script assigns `var`.
fn find_assignment(text: &str, var: &str) -> Result<Option<usize>> {
    let pattern = format!(r"\b(?:const|let|var)\s+{}\s*=", regex::escape(var));
    let re = Regex::new(&pattern).map_err(|e| Error::Config(format!("invalid variable name {var:?}: {e}")))?;
    Ok(re.find_iter(text).find(|m| is_code(text, m.start())).map(|m| m.end()))
}

/// Returns true when `offset` lies outside comments and string literals.
///
/// Unterminated comments and strings run to the end of the text; the lexer
/// reports them later if they matter.
fn is_code(text: &str, offset: usize) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < offset {
        let end = match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'/') => text[i..].find('\n').map_or(text.len(), |n| i + n),
            b'/' if bytes.get(i + 1) == Some(&b'*') => text[i + 2..].find("*/").map_or(text.len(), |n| i + n + 4),
            quote @ (b'\'' | b'"' | b'`') => {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j] != quote {
                    if bytes[j] == b'\\' {
                        j += 1;
                    }
                    j += 1;
                }
                (j + 1).min(bytes.len())
            }
            _ => {
                i += 1;
                continue;
            }
        };
        if end > offset {
            return false;
        }
        i = end;
    }
    true
}

#[derive(Debug)]
enum Token {
    Str { value: String, offset: usize },
    Comma(usize),
    Open(usize),
    Close(usize),
    Other(char, usize),
    Eof(usize),
}

impl Token {
    const fn offset(&self) -> usize {
        match self {
            Self::Str { offset, .. }
            | Self::Comma(offset)
            | Self::Open(offset)
            | Self::Close(offset)
            | Self::Other(_, offset)
            | Self::Eof(offset) => *offset,
        }
    }
}

struct Lexer<'a> {
    source_name: &'a str,
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    const fn new(source_name: &'a str, text: &'a str) -> Self {
        Self {
            source_name,
            text,
            pos: 0,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> Error {
        Error::parse_at(self.source_name, self.text, offset, message)
    }

    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            let rest = &self.text[self.pos..];
            if rest.starts_with("//") {
                self.pos += rest.find('\n').unwrap_or(rest.len());
            } else if rest.starts_with("/*") {
                let start = self.pos;
                let end = rest[2..]
                    .find("*/")
                    .ok_or_else(|| self.error(start, "unterminated comment"))?;
                self.pos += end + 4;
            } else if self.peek().is_some_and(char::is_whitespace) {
                self.bump();
            } else {
                return Ok(());
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia()?;
        let offset = self.pos;
        let Some(c) = self.bump() else {
            return Ok(Token::Eof(offset));
        };
        Ok(match c {
            '\'' | '"' | '`' => Token::Str {
                value: self.string(c, offset)?,
                offset,
            },
            ',' => Token::Comma(offset),
            '[' => Token::Open(offset),
            ']' => Token::Close(offset),
            other => Token::Other(other, offset),
        })
    }

    fn string(&mut self, quote: char, start: usize) -> Result<String> {
        let mut value = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(self.error(start, "unterminated string literal"));
            };
            match c {
                c if c == quote => return Ok(value),
                '\n' if quote != '`' => return Err(self.error(start, "unterminated string literal")),
                '$' if quote == '`' && self.peek() == Some('{') => {
                    return Err(self.error(self.pos - 1, "template interpolation is not supported"));
                }
                '\\' => self.escape(&mut value, start)?,
                c => value.push(c),
            }
        }
    }

    fn escape(&mut self, value: &mut String, start: usize) -> Result<()> {
        let escape_at = self.pos - 1;
        let Some(c) = self.bump() else {
            return Err(self.error(start, "unterminated string literal"));
        };
        match c {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            // line continuation
            '\n' => {}
            'u' => {
                let digits = if self.peek() == Some('{') {
                    self.bump();
                    let rest = &self.text[self.pos..];
                    let end = rest.find('}').ok_or_else(|| self.error(escape_at, "invalid unicode escape"))?;
                    self.pos += end + 1;
                    &rest[..end]
                } else {
                    let digits = self.text.get(self.pos..self.pos + 4).unwrap_or("");
                    self.pos += digits.len();
                    digits
                };
                let ch = u32::from_str_radix(digits, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| self.error(escape_at, "invalid unicode escape"))?;
                value.push(ch);
            }
            'x' => {
                let digits = self.text.get(self.pos..self.pos + 2).unwrap_or("");
                self.pos += digits.len();
                let ch = u8::from_str_radix(digits, 16)
                    .map(char::from)
                    .map_err(|_| self.error(escape_at, "invalid hex escape"))?;
                value.push(ch);
            }
            other => value.push(other),
        }
        Ok(())
    }

    /// Parses an array literal of string literals starting at `[`.
    fn array(&mut self, var: &str) -> Result<Vec<String>> {
        let open = match self.next_token()? {
            Token::Open(offset) => offset,
            other => {
                return Err(self.error(other.offset(), format!("expected `[` after `{var} =`")));
            }
        };

        let mut items: Vec<String> = Vec::new();
        let mut expect_value = true;
        loop {
            match self.next_token()? {
                Token::Str { value, offset } => {
                    if !expect_value {
                        let previous = items.last().map_or("", String::as_str);
                        return Err(self.error(
                            offset,
                            format!("missing `,` between {previous:?} and {value:?}"),
                        ));
                    }
                    items.push(value);
                    expect_value = false;
                }
                Token::Comma(offset) => {
                    if expect_value {
                        return Err(self.error(offset, "empty array element"));
                    }
                    expect_value = true;
                }
                Token::Close(_) => return Ok(items),
                Token::Eof(_) => return Err(self.error(open, format!("unterminated `{var}` array"))),
                Token::Open(offset) => {
                    return Err(self.error(offset, "nested arrays are not supported"));
                }
                Token::Other(c, offset) => {
                    return Err(self.error(offset, format!("unexpected `{c}` in `{var}` array")));
                }
            }
        }
    }
}
