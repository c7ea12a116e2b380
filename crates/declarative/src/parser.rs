//! Declaration parser
//!
//! Turns declaration text into an [`AttributeNode`] tree:
//!
//! ```text
//! networking.hostName = "workstation";
//! environment.systemPackages = [ "git" "neovim@0.10.2" ];
//! users.users.chris = {
//!   shell = "/bin/zsh";
//!   home = "${HOME}";
//! };
//! environment.variables.EDITOR = "${users.users.chris.shell}";
//! ```
//!
//! Strings may interpolate `$NAME` / `${NAME}` from the environment table
//! and `${a.b.c}` from another scalar in the same file. References are
//! resolved once the whole file is parsed, so forward references work.

use crate::attr::{AttributeNode, Scalar, is_identifier_char};
use crate::error::SyntaxError;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Parse declaration text
///
/// `env` is the interpolation table for `$NAME` references.
pub fn parse(source: &str, env: &BTreeMap<String, String>) -> Result<AttributeNode, SyntaxError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        scope: Vec::new(),
        pending: Vec::new(),
    };
    let mut root = parser.parse_file()?;
    log::trace!(
        "parsed {} bindings, {} strings to interpolate",
        root.as_mapping().map_or(0, |m| m.len()),
        parser.pending.len()
    );

    let resolved = Resolver::new(&root, &parser.pending, env).resolve_all()?;
    for (pending, text) in parser.pending.iter().zip(resolved) {
        if let Some(slot) = node_at_mut(&mut root, &pending.location) {
            *slot = AttributeNode::str(text);
        }
    }
    Ok(root)
}

// ============================================================================
// Lexer
// ============================================================================

/// Part of a string literal
#[derive(Debug, Clone, PartialEq)]
enum Piece {
    /// Text subject to `$` interpolation
    Template(String),
    /// Text produced by `\$`, never interpolated
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(Vec<Piece>),
    Int(i64),
    Float(f64),
    Equals,
    Semi,
    Dot,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("'{name}'"),
            Self::Str(_) => "a string".to_string(),
            Self::Int(_) | Self::Float(_) => "a number".to_string(),
            Self::Equals => "'='".to_string(),
            Self::Semi => "';'".to_string(),
            Self::Dot => "'.'".to_string(),
            Self::LBrace => "'{'".to_string(),
            Self::RBrace => "'}'".to_string(),
            Self::LBracket => "'['".to_string(),
            Self::RBracket => "']'".to_string(),
            Self::Eof => "end of file".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            chars: source.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Character after the next one
    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    fn tokenize(mut self) -> Result<Vec<Spanned>, SyntaxError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia();
            let (line, column) = (self.line, self.column);
            let Some(c) = self.peek() else {
                tokens.push(Spanned {
                    token: Token::Eof,
                    line,
                    column,
                });
                return Ok(tokens);
            };

            let token = match c {
                '=' | ';' | '.' | '{' | '}' | '[' | ']' => {
                    self.bump();
                    match c {
                        '=' => Token::Equals,
                        ';' => Token::Semi,
                        '.' => Token::Dot,
                        '{' => Token::LBrace,
                        '}' => Token::RBrace,
                        '[' => Token::LBracket,
                        _ => Token::RBracket,
                    }
                }
                '"' => self.string(line, column)?,
                c if c.is_ascii_digit() => self.number(line, column)?,
                '-' if self.peek_second().is_some_and(|n| n.is_ascii_digit()) => {
                    self.number(line, column)?
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    let mut ident = String::new();
                    while let Some(c) = self.peek().filter(|c| is_identifier_char(*c)) {
                        ident.push(c);
                        self.bump();
                    }
                    Token::Ident(ident)
                }
                other => {
                    return Err(SyntaxError::new(
                        line,
                        column,
                        format!("unexpected character '{other}'"),
                    ));
                }
            };
            tokens.push(Spanned {
                token,
                line,
                column,
            });
        }
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else if c == '#' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.bump();
                }
            } else {
                break;
            }
        }
    }

    fn digits(&mut self, text: &mut String) {
        while let Some(c) = self.peek().filter(char::is_ascii_digit) {
            text.push(c);
            self.bump();
        }
    }

    fn number(&mut self, line: usize, column: usize) -> Result<Token, SyntaxError> {
        let mut text = String::new();
        if self.peek() == Some('-') {
            text.push('-');
            self.bump();
        }
        self.digits(&mut text);

        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            text.push('.');
            self.bump();
            self.digits(&mut text);
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let mut ahead = self.chars.clone();
            ahead.next();
            let sign = ahead.next_if(|c| matches!(c, '+' | '-'));
            if ahead.next().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                text.push('e');
                self.bump();
                if let Some(sign) = sign {
                    text.push(sign);
                    self.bump();
                }
                self.digits(&mut text);
            }
        }

        if is_float {
            match text.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Token::Float(f)),
                Ok(_) => Err(SyntaxError::new(
                    line,
                    column,
                    format!("number '{text}' is out of range"),
                )),
                Err(_) => Err(SyntaxError::new(line, column, format!("invalid number '{text}'"))),
            }
        } else {
            text.parse().map(Token::Int).map_err(|_| {
                SyntaxError::new(line, column, format!("integer '{text}' is out of range"))
            })
        }
    }

    fn string(&mut self, line: usize, column: usize) -> Result<Token, SyntaxError> {
        self.bump();
        let mut pieces = Vec::new();
        let mut current = String::new();
        loop {
            let Some(c) = self.bump() else {
                return Err(SyntaxError::new(line, column, "unterminated string"));
            };
            match c {
                '"' => break,
                '\\' => {
                    let escape_line = self.line;
                    let escape_column = self.column;
                    match self.bump() {
                        Some('"') => current.push('"'),
                        Some('\\') => current.push('\\'),
                        Some('n') => current.push('\n'),
                        Some('t') => current.push('\t'),
                        Some('r') => current.push('\r'),
                        Some('$') => {
                            if !current.is_empty() {
                                pieces.push(Piece::Template(std::mem::take(&mut current)));
                            }
                            pieces.push(Piece::Literal("$".to_string()));
                        }
                        Some(other) => {
                            return Err(SyntaxError::new(
                                escape_line,
                                escape_column,
                                format!("unknown escape '\\{other}'"),
                            ));
                        }
                        None => {
                            return Err(SyntaxError::new(line, column, "unterminated string"));
                        }
                    }
                }
                other => current.push(other),
            }
        }
        if !current.is_empty() || pieces.is_empty() {
            pieces.push(Piece::Template(current));
        }
        Ok(Token::Str(pieces))
    }
}

// ============================================================================
// Parser
// ============================================================================

/// One step of a location in the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Seg {
    Key(String),
    Index(usize),
}

/// A string literal whose interpolation is deferred until the whole file
/// is parsed
#[derive(Debug, Clone)]
struct Pending {
    location: Vec<Seg>,
    pieces: Vec<Piece>,
    line: usize,
    column: usize,
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    /// Location of the value being parsed
    scope: Vec<Seg>,
    pending: Vec<Pending>,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Spanned {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let at = self.peek();
        SyntaxError::new(at.line, at.column, message)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), SyntaxError> {
        if &self.peek().token == expected {
            self.next();
            Ok(())
        } else {
            Err(self.error_here(format!(
                "expected {}, found {}",
                expected.describe(),
                self.peek().token.describe()
            )))
        }
    }

    fn parse_file(&mut self) -> Result<AttributeNode, SyntaxError> {
        let mut root = AttributeNode::empty_mapping();
        while self.peek().token != Token::Eof {
            self.parse_binding(&mut root)?;
        }
        Ok(root)
    }

    fn parse_binding(&mut self, target: &mut AttributeNode) -> Result<(), SyntaxError> {
        let start = self.peek().clone();
        let keys = self.parse_path()?;
        self.expect(&Token::Equals)?;

        let depth = self.scope.len();
        self.scope.extend(keys.iter().cloned().map(Seg::Key));
        let value = self.parse_value();
        self.scope.truncate(depth);
        let value = value?;
        self.expect(&Token::Semi)?;

        target.insert_path(&keys, value).map_err(|conflict| {
            let mut full: Vec<String> = self
                .scope
                .iter()
                .filter_map(|seg| match seg {
                    Seg::Key(k) => Some(k.clone()),
                    Seg::Index(_) => None,
                })
                .collect();
            full.extend(conflict.path);
            SyntaxError::new(
                start.line,
                start.column,
                format!("duplicate binding for '{}'", full.join(".")),
            )
        })
    }

    fn parse_path(&mut self) -> Result<Vec<String>, SyntaxError> {
        let mut keys = vec![self.parse_key()?];
        while self.peek().token == Token::Dot {
            self.next();
            keys.push(self.parse_key()?);
        }
        Ok(keys)
    }

    fn parse_key(&mut self) -> Result<String, SyntaxError> {
        let at = self.next();
        match at.token {
            Token::Ident(name) => Ok(name),
            // Keys are never interpolated
            Token::Str(pieces) => Ok(raw_text(&pieces)),
            other => Err(SyntaxError::new(
                at.line,
                at.column,
                format!("expected an attribute name, found {}", other.describe()),
            )),
        }
    }

    fn parse_value(&mut self) -> Result<AttributeNode, SyntaxError> {
        let at = self.next();
        match at.token {
            Token::Str(pieces) => {
                let text = raw_text(&pieces);
                if needs_interpolation(&pieces) {
                    self.pending.push(Pending {
                        location: self.scope.clone(),
                        pieces,
                        line: at.line,
                        column: at.column,
                    });
                }
                Ok(AttributeNode::str(text))
            }
            Token::Int(i) => Ok(AttributeNode::int(i)),
            Token::Float(f) => Ok(AttributeNode::Scalar(Scalar::Float(f))),
            Token::Ident(name) if name == "true" => Ok(AttributeNode::bool(true)),
            Token::Ident(name) if name == "false" => Ok(AttributeNode::bool(false)),
            Token::LBracket => {
                let mut items = Vec::new();
                while self.peek().token != Token::RBracket {
                    if self.peek().token == Token::Eof {
                        return Err(SyntaxError::new(at.line, at.column, "unclosed '['"));
                    }
                    self.scope.push(Seg::Index(items.len()));
                    let item = self.parse_value();
                    self.scope.pop();
                    items.push(item?);
                }
                self.next();
                Ok(AttributeNode::List(items))
            }
            Token::LBrace => {
                let mut mapping = AttributeNode::empty_mapping();
                while self.peek().token != Token::RBrace {
                    if self.peek().token == Token::Eof {
                        return Err(SyntaxError::new(at.line, at.column, "unclosed '{'"));
                    }
                    self.parse_binding(&mut mapping)?;
                }
                self.next();
                Ok(mapping)
            }
            other => Err(SyntaxError::new(
                at.line,
                at.column,
                format!("expected a value, found {}", other.describe()),
            )),
        }
    }
}

fn raw_text(pieces: &[Piece]) -> String {
    pieces
        .iter()
        .map(|p| match p {
            Piece::Template(s) | Piece::Literal(s) => s.as_str(),
        })
        .collect()
}

fn needs_interpolation(pieces: &[Piece]) -> bool {
    pieces
        .iter()
        .any(|p| matches!(p, Piece::Template(s) if s.contains('$')))
}

fn node_at_mut<'t>(root: &'t mut AttributeNode, location: &[Seg]) -> Option<&'t mut AttributeNode> {
    location.iter().try_fold(root, |node, seg| match (node, seg) {
        (AttributeNode::Mapping(m), Seg::Key(k)) => m.get_mut(k),
        (AttributeNode::List(items), Seg::Index(i)) => items.get_mut(*i),
        _ => None,
    })
}

// ============================================================================
// Interpolation
// ============================================================================

struct Resolver<'t> {
    tree: &'t AttributeNode,
    pending: &'t [Pending],
    env: &'t BTreeMap<String, String>,
    /// Pending strings addressable by a `${a.b.c}` reference
    by_path: HashMap<Vec<String>, usize>,
    resolved: HashMap<usize, String>,
    visiting: HashSet<usize>,
}

impl<'t> Resolver<'t> {
    fn new(
        tree: &'t AttributeNode,
        pending: &'t [Pending],
        env: &'t BTreeMap<String, String>,
    ) -> Self {
        let by_path = pending
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| {
                let keys: Option<Vec<String>> = p
                    .location
                    .iter()
                    .map(|seg| match seg {
                        Seg::Key(k) => Some(k.clone()),
                        Seg::Index(_) => None,
                    })
                    .collect();
                keys.map(|keys| (keys, idx))
            })
            .collect();
        Self {
            tree,
            pending,
            env,
            by_path,
            resolved: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    fn resolve_all(mut self) -> Result<Vec<String>, SyntaxError> {
        (0..self.pending.len()).map(|idx| self.resolve(idx)).collect()
    }

    fn resolve(&mut self, idx: usize) -> Result<String, SyntaxError> {
        if let Some(done) = self.resolved.get(&idx) {
            return Ok(done.clone());
        }
        let pending = self.pending;
        let pending = &pending[idx];
        let (line, column) = (pending.line, pending.column);
        if !self.visiting.insert(idx) {
            return Err(SyntaxError::new(line, column, "circular reference"));
        }

        let mut text = String::new();
        for piece in &pending.pieces {
            match piece {
                Piece::Literal(literal) => text.push_str(literal),
                Piece::Template(template) => {
                    let expanded = shellexpand::env_with_context(template, |name: &str| {
                        self.lookup(name, line, column).map(Some)
                    })
                    .map_err(|e| e.cause)?;
                    text.push_str(&expanded);
                }
            }
        }

        self.visiting.remove(&idx);
        self.resolved.insert(idx, text.clone());
        Ok(text)
    }

    fn lookup(&mut self, name: &str, line: usize, column: usize) -> Result<String, SyntaxError> {
        if !name.contains('.') {
            return self.env.get(name).cloned().ok_or_else(|| {
                SyntaxError::new(line, column, format!("undefined variable '{name}'"))
            });
        }

        let path: Vec<String> = name.split('.').map(str::to_string).collect();
        if let Some(&target) = self.by_path.get(&path) {
            return self.resolve(target);
        }
        match self.tree.get_path(&path) {
            Some(AttributeNode::Scalar(scalar)) => Ok(scalar.to_plain_string()),
            Some(other) => Err(SyntaxError::new(
                line,
                column,
                format!("'{name}' is {} and cannot be interpolated", article(other.type_name())),
            )),
            None => Err(SyntaxError::new(
                line,
                column,
                format!("reference to undeclared '{name}'"),
            )),
        }
    }
}

fn article(type_name: &str) -> String {
    if type_name.starts_with(['a', 'e', 'i', 'o', 'u']) {
        format!("an {type_name}")
    } else {
        format!("a {type_name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn parse_ok(source: &str) -> AttributeNode {
        parse(source, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_dotted_path_equals_nested_block() {
        let dotted = parse_ok("a.b.c = 1;");
        let nested = parse_ok("a = { b = { c = 1; }; };");
        assert_eq!(dotted, nested);
    }

    #[test]
    fn test_rebinding_merges_mappings() {
        let tree = parse_ok(
            r#"
            services.ssh.enable = true;
            services.ssh = { user = "sshd"; };
            services.cups.enable = false;
            "#,
        );
        assert_eq!(tree.lookup("services.ssh.enable"), Some(&AttributeNode::bool(true)));
        assert_eq!(tree.lookup("services.ssh.user"), Some(&AttributeNode::str("sshd")));
        assert_eq!(tree.lookup("services.cups.enable"), Some(&AttributeNode::bool(false)));
    }

    #[test]
    fn test_duplicate_binding_is_error() {
        let err = parse(
            "networking.hostName = \"a\";\nnetworking.hostName = \"b\";\n",
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!((err.line, err.column), (2, 1));
        assert!(err.message.contains("duplicate binding for 'networking.hostName'"));
    }

    #[test]
    fn test_duplicate_binding_inside_block_reports_full_path() {
        let err = parse("a = { b = 1; b = 2; };", &BTreeMap::new()).unwrap_err();
        assert!(err.message.contains("'a.b'"), "{}", err.message);
    }

    #[test]
    fn test_scalars_lists_and_comments() {
        let tree = parse_ok(
            r#"
            # workstation
            n = -42;          # trailing comment
            f = 2.5e-3;
            g = 1E3;
            t = true;
            pkgs = [ "git" "vim"
                     "htop" ];
            empty = [ ];
            "quoted key" = "x";
            "#,
        );
        assert_eq!(tree.lookup("n"), Some(&AttributeNode::int(-42)));
        assert_eq!(tree.lookup("f"), Some(&AttributeNode::Scalar(Scalar::Float(2.5e-3))));
        assert_eq!(tree.lookup("g"), Some(&AttributeNode::Scalar(Scalar::Float(1000.0))));
        assert_eq!(tree.lookup("t"), Some(&AttributeNode::bool(true)));
        assert_eq!(tree.lookup("pkgs").and_then(AttributeNode::as_list).map(<[_]>::len), Some(3));
        assert_eq!(tree.lookup("empty"), Some(&AttributeNode::List(vec![])));
        assert_eq!(
            tree.as_mapping().and_then(|m| m.get("quoted key")),
            Some(&AttributeNode::str("x"))
        );
    }

    #[test]
    fn test_missing_semicolon_position() {
        let err = parse("a = 1\nb = 2;", &BTreeMap::new()).unwrap_err();
        assert_eq!((err.line, err.column), (2, 1));
        assert_eq!(err.message, "expected ';', found 'b'");
    }

    #[test]
    fn test_unterminated_string_position() {
        let err = parse("a = 1;\n  b = \"open", &BTreeMap::new()).unwrap_err();
        assert_eq!((err.line, err.column), (2, 7));
        assert_eq!(err.message, "unterminated string");
    }

    #[test]
    fn test_bare_identifier_is_not_a_value() {
        let err = parse("a = yes;", &BTreeMap::new()).unwrap_err();
        assert_eq!(err.message, "expected a value, found 'yes'");
    }

    #[test]
    fn test_env_interpolation() {
        let tree = parse(
            r#"home = "$HOME/src"; user = "${USER}";"#,
            &env(&[("HOME", "/home/chris"), ("USER", "chris")]),
        )
        .unwrap();
        assert_eq!(tree.lookup("home"), Some(&AttributeNode::str("/home/chris/src")));
        assert_eq!(tree.lookup("user"), Some(&AttributeNode::str("chris")));
    }

    #[test]
    fn test_escaped_dollar_is_literal() {
        let tree = parse_ok(r#"prompt = "\$HOME costs \$5";"#);
        assert_eq!(tree.lookup("prompt"), Some(&AttributeNode::str("$HOME costs $5")));
    }

    #[test]
    fn test_undefined_variable_is_error() {
        let err = parse("a = 1;\nb = \"$NOPE\";", &BTreeMap::new()).unwrap_err();
        assert_eq!((err.line, err.column), (2, 5));
        assert!(err.message.contains("NOPE"));
    }

    #[test]
    fn test_forward_reference_and_chain() {
        let tree = parse_ok(
            r#"
            environment.variables.EDITOR = "${users.users.chris.shell}";
            users.users.chris.shell = "${programs.shell}";
            programs.shell = "zsh";
            port = "${services.ssh.settings.Port}";
            services.ssh.settings.Port = 22;
            "#,
        );
        assert_eq!(
            tree.lookup("environment.variables.EDITOR"),
            Some(&AttributeNode::str("zsh"))
        );
        assert_eq!(tree.lookup("port"), Some(&AttributeNode::str("22")));
    }

    #[test]
    fn test_reference_inside_list() {
        let tree = parse_ok(r#"versions.git = "2.45"; pkgs = [ "vim" "git@${versions.git}" ];"#);
        assert_eq!(
            tree.lookup("pkgs"),
            Some(&AttributeNode::List(vec![
                AttributeNode::str("vim"),
                AttributeNode::str("git@2.45"),
            ]))
        );
    }

    #[test]
    fn test_overflowing_float_is_error() {
        let err = parse("x = 1e400;", &BTreeMap::new()).unwrap_err();
        assert_eq!((err.line, err.column), (1, 5));
        assert_eq!(err.message, "number '1e400' is out of range");
        assert!(parse("x = -1e400;", &BTreeMap::new()).is_err());
    }

    #[test]
    fn test_float_prints_back() {
        let tree = parse_ok("a = 1e300; b = -2.5e-7; c = 0.1;");
        assert_eq!(parse(&tree.to_document(), &BTreeMap::new()), Ok(tree));
    }

    #[test]
    fn test_circular_reference_is_error() {
        let err = parse(r#"a.x = "${a.y}"; a.y = "${a.x}";"#, &BTreeMap::new()).unwrap_err();
        assert!(err.message.contains("circular reference"), "{}", err.message);
    }

    #[test]
    fn test_reference_to_mapping_is_error() {
        let err = parse(r#"a.b = 1; c = "${a.x}";"#, &BTreeMap::new()).unwrap_err();
        assert!(err.message.contains("undeclared 'a.x'"), "{}", err.message);

        let err = parse(r#"a.b.c = 1; d = "${a.b}";"#, &BTreeMap::new()).unwrap_err();
        assert_eq!(err.message, "'a.b' is an attribute set and cannot be interpolated");
    }

    // ------------------------------------------------------------------------
    // Property tests
    // ------------------------------------------------------------------------

    fn key_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z_][a-zA-Z0-9_'-]{0,6}",
            "[a-z .$\"]{1,6}",
        ]
    }

    fn value_strategy() -> impl Strategy<Value = AttributeNode> {
        let leaf = prop_oneof![
            any::<i64>().prop_map(AttributeNode::int),
            any::<bool>().prop_map(AttributeNode::bool),
            prop::num::f64::NORMAL.prop_map(|f| AttributeNode::Scalar(Scalar::Float(f))),
            ".{0,12}".prop_map(AttributeNode::str),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(AttributeNode::List),
                prop::collection::btree_map(key_strategy(), inner, 0..4)
                    .prop_map(|m| AttributeNode::Mapping(m.into_iter().collect())),
            ]
        })
    }

    fn document_strategy() -> impl Strategy<Value = AttributeNode> {
        prop::collection::btree_map(key_strategy(), value_strategy(), 0..6)
            .prop_map(|m| AttributeNode::Mapping(m.into_iter().collect()))
    }

    proptest! {
        /// Printing a tree and parsing it back yields the same tree
        #[test]
        fn parse_print_roundtrip(tree in document_strategy()) {
            let printed = tree.to_document();
            let reparsed = parse(&printed, &BTreeMap::new());
            prop_assert_eq!(reparsed, Ok(tree));
        }
    }
}
