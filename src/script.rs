//! Lexer and parser for the reference engine's expression language.
//!
//! ```text
//! program := { stmt [";"] }
//! stmt    := "import" STRING
//!          | "import" IDENT "from" STRING
//!          | "export" "default" expr
//!          | "let" IDENT "=" expr
//!          | "throw" expr
//!          | expr
//! expr    := term { ("+" | "-") term }
//! term    := unary { ("*" | "/") unary }
//! unary   := "-" unary | postfix
//! postfix := primary { "." IDENT [ "(" [ expr { "," expr } ] ")" ] }
//! primary := NUMBER | STRING | "true" | "false" | "null" | IDENT | "(" expr ")"
//! ```
//!
//! Statements on the same line must be separated by `;`. Expressions nest
//! at most 128 levels deep.

use crate::exception::{Exception, ExceptionKind};

/// Bound on both parser recursion and expression tree height, so that
/// evaluating and dropping any parsed tree stays well inside a thread stack.
const MAX_NESTING: usize = 128;

/// Whether source is parsed as a module or as global script code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Module code: may import and export.
    Module,
    /// Global script code.
    Script,
}

/// A source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64, bool),
    Str(String),
    Ident(String),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    tok: Tok,
    pos: Pos,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

/// Expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    Str(String),
    /// Boolean literal.
    Bool(bool),
    /// `null`
    Null,
    /// Binding reference.
    Ident(String, Pos),
    /// Arithmetic negation.
    Neg(Box<Expr>, Pos),
    /// Left-associative run of binary operators at one precedence level:
    /// `head op1 e1 op2 e2 ...`. Each operator carries its own position.
    Chain(Box<Expr>, Vec<(BinOp, Expr, Pos)>),
    /// `target.name`
    Member(Box<Expr>, String, Pos),
    /// `target.name(args)`
    Call(Box<Expr>, String, Vec<Expr>, Pos),
}

/// Statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `import "path"` or `import name from "path"`.
    Import {
        /// Local binding for the default export.
        binding: Option<String>,
        /// Module path.
        path: String,
        /// Statement position.
        pos: Pos,
    },
    /// `export default expr`
    ExportDefault(Expr),
    /// `let name = expr`
    Let(String, Expr),
    /// `throw expr`
    Throw(Expr, Pos),
    /// Expression statement.
    Expr(Expr),
}

/// A parsed program.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Statements in source order.
    pub stmts: Vec<Stmt>,
}

/// Parse `source`, attributing errors to `file`.
pub fn parse(source: &str, kind: SourceKind, file: &str) -> Result<Program, Exception> {
    let tokens = lex(source).map_err(|(msg, pos)| syntax(msg, pos, file))?;
    let mut parser = Parser {
        tokens,
        at: 0,
        kind,
        depth: 0,
    };
    parser.program().map_err(|(msg, pos)| syntax(msg, pos, file))
}

fn syntax(msg: String, pos: Pos, file: &str) -> Exception {
    Exception::new(ExceptionKind::SyntaxError, msg).at(file, pos.line, pos.column)
}

type PResult<T> = Result<T, (String, Pos)>;

/// An expression and the height of its tree.
type Node = (Expr, usize);

fn lex(source: &str) -> PResult<Vec<Token>> {
    let mut out = Vec::new();
    let mut chars = source.chars().peekable();
    let mut pos = Pos { line: 1, column: 1 };

    fn bump(pos: &mut Pos, c: char) {
        if c == '\n' {
            pos.line += 1;
            pos.column = 1;
        } else {
            pos.column += 1;
        }
    }

    while let Some(&c) = chars.peek() {
        let start = pos;
        if c.is_whitespace() {
            bump(&mut pos, c);
            chars.next();
        } else if c == '/' && source_peek2(&chars) == Some('/') {
            while let Some(&c) = chars.peek() {
                if c == '\n' {
                    break;
                }
                bump(&mut pos, c);
                chars.next();
            }
        } else if c.is_ascii_digit() {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() || c == '.' || c == '_' {
                    if c != '_' {
                        text.push(c);
                    }
                    bump(&mut pos, c);
                    chars.next();
                } else {
                    break;
                }
            }
            let is_int = !text.contains('.');
            let n: f64 = text
                .parse()
                .map_err(|_| (format!("invalid number literal '{}'", text), start))?;
            out.push(Token {
                tok: Tok::Num(n, is_int),
                pos: start,
            });
        } else if c == '"' || c == '\'' {
            let quote = c;
            bump(&mut pos, c);
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    None => return Err(("unterminated string literal".into(), start)),
                    Some(c) if c == quote => {
                        bump(&mut pos, c);
                        break;
                    }
                    Some('\\') => {
                        bump(&mut pos, '\\');
                        let escaped = chars
                            .next()
                            .ok_or_else(|| ("unterminated string literal".to_string(), start))?;
                        bump(&mut pos, escaped);
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            other => other,
                        });
                    }
                    Some(c) => {
                        bump(&mut pos, c);
                        text.push(c);
                    }
                }
            }
            out.push(Token {
                tok: Tok::Str(text),
                pos: start,
            });
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_alphanumeric() || c == '_' || c == '$' {
                    text.push(c);
                    bump(&mut pos, c);
                    chars.next();
                } else {
                    break;
                }
            }
            out.push(Token {
                tok: Tok::Ident(text),
                pos: start,
            });
        } else if "+-*/().,;=".contains(c) {
            bump(&mut pos, c);
            chars.next();
            out.push(Token {
                tok: Tok::Punct(c),
                pos: start,
            });
        } else {
            return Err((format!("unexpected character '{}'", c), start));
        }
    }
    out.push(Token { tok: Tok::Eof, pos });
    Ok(out)
}

fn source_peek2(chars: &std::iter::Peekable<std::str::Chars<'_>>) -> Option<char> {
    let mut ahead = chars.clone();
    ahead.next();
    ahead.next()
}

struct Parser {
    tokens: Vec<Token>,
    at: usize,
    kind: SourceKind,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof.
        &self.tokens[self.at.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let tok = self.peek().clone();
        if self.at < self.tokens.len() - 1 {
            self.at += 1;
        }
        tok
    }

    fn is_punct(&self, c: char) -> bool {
        self.peek().tok == Tok::Punct(c)
    }

    fn is_keyword(&self, kw: &str) -> bool {
        matches!(&self.peek().tok, Tok::Ident(s) if s == kw)
    }

    fn expect_punct(&mut self, c: char) -> PResult<()> {
        if self.is_punct(c) {
            self.next();
            Ok(())
        } else {
            Err(self.unexpected(&format!("expected '{}'", c)))
        }
    }

    fn unexpected(&self, context: &str) -> (String, Pos) {
        let tok = self.peek();
        let found = match &tok.tok {
            Tok::Eof => "unexpected end of input".to_string(),
            Tok::Num(n, _) => format!("unexpected number {}", n),
            Tok::Str(s) => format!("unexpected string \"{}\"", s),
            Tok::Ident(s) => format!("unexpected token '{}'", s),
            Tok::Punct(c) => format!("unexpected token '{}'", c),
        };
        (format!("{}, {}", found, context), tok.pos)
    }

    fn program(&mut self) -> PResult<Program> {
        let mut stmts = Vec::new();
        while self.peek().tok != Tok::Eof {
            if self.is_punct(';') {
                self.next();
                continue;
            }
            let stmt = self.stmt()?;
            stmts.push(stmt);
            let end_line = self.tokens[self.at.saturating_sub(1)].pos.line;
            if self.is_punct(';') {
                self.next();
            } else if self.peek().tok != Tok::Eof && self.peek().pos.line == end_line {
                return Err(self.unexpected("expected ';' or newline"));
            }
        }
        Ok(Program { stmts })
    }

    fn stmt(&mut self) -> PResult<Stmt> {
        let pos = self.peek().pos;
        if self.is_keyword("import") {
            if self.kind == SourceKind::Script {
                return Err((
                    "import statements are only valid inside modules".into(),
                    pos,
                ));
            }
            self.next();
            let binding = match self.next().tok {
                Tok::Str(path) => {
                    return Ok(Stmt::Import {
                        binding: None,
                        path,
                        pos,
                    })
                }
                Tok::Ident(name) => name,
                _ => return Err(("expected module path or binding after import".into(), pos)),
            };
            if !self.is_keyword("from") {
                return Err(self.unexpected("expected 'from'"));
            }
            self.next();
            match self.next().tok {
                Tok::Str(path) => Ok(Stmt::Import {
                    binding: Some(binding),
                    path,
                    pos,
                }),
                _ => Err(("expected module path after 'from'".into(), pos)),
            }
        } else if self.is_keyword("export") {
            if self.kind == SourceKind::Script {
                return Err((
                    "export statements are only valid inside modules".into(),
                    pos,
                ));
            }
            self.next();
            if !self.is_keyword("default") {
                return Err(self.unexpected("expected 'default'"));
            }
            self.next();
            Ok(Stmt::ExportDefault(self.expr()?.0))
        } else if self.is_keyword("let") {
            self.next();
            let name = match self.next().tok {
                Tok::Ident(name) => name,
                _ => return Err(("expected binding name after let".into(), pos)),
            };
            self.expect_punct('=')?;
            Ok(Stmt::Let(name, self.expr()?.0))
        } else if self.is_keyword("throw") {
            self.next();
            Ok(Stmt::Throw(self.expr()?.0, pos))
        } else {
            Ok(Stmt::Expr(self.expr()?.0))
        }
    }

    fn nest(&mut self, pos: Pos) -> PResult<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(("expression nested too deeply".into(), pos));
        }
        Ok(())
    }

    fn sized(expr: Expr, height: usize, pos: Pos) -> PResult<Node> {
        if height > MAX_NESTING {
            return Err(("expression nested too deeply".into(), pos));
        }
        Ok((expr, height))
    }

    fn expr(&mut self) -> PResult<Node> {
        let pos = self.peek().pos;
        self.nest(pos)?;
        let node = self.chain(Self::term, &[('+', BinOp::Add), ('-', BinOp::Sub)])?;
        self.depth -= 1;
        Ok(node)
    }

    fn term(&mut self) -> PResult<Node> {
        self.chain(Self::unary, &[('*', BinOp::Mul), ('/', BinOp::Div)])
    }

    /// Left-associative run of same-precedence operators, kept flat.
    fn chain(
        &mut self,
        operand: fn(&mut Self) -> PResult<Node>,
        ops: &[(char, BinOp)],
    ) -> PResult<Node> {
        let (head, mut height) = operand(self)?;
        let mut tail = Vec::new();
        loop {
            let pos = self.peek().pos;
            let Some(&(_, op)) = ops.iter().find(|&&(c, _)| self.is_punct(c)) else {
                break;
            };
            self.next();
            let (rhs, h) = operand(self)?;
            height = height.max(h);
            tail.push((op, rhs, pos));
        }
        let Some(&(_, _, pos)) = tail.first() else {
            return Ok((head, height));
        };
        Self::sized(Expr::Chain(Box::new(head), tail), height + 1, pos)
    }

    fn unary(&mut self) -> PResult<Node> {
        if self.is_punct('-') {
            let pos = self.next().pos;
            self.nest(pos)?;
            let (inner, height) = self.unary()?;
            self.depth -= 1;
            return Self::sized(Expr::Neg(Box::new(inner), pos), height + 1, pos);
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Node> {
        let (mut target, mut height) = self.primary()?;
        while self.is_punct('.') {
            let pos = self.next().pos;
            let name = match self.next().tok {
                Tok::Ident(name) => name,
                _ => return Err(("expected property name after '.'".into(), pos)),
            };
            if self.is_punct('(') {
                self.next();
                let mut args = Vec::new();
                if !self.is_punct(')') {
                    loop {
                        let (arg, h) = self.expr()?;
                        height = height.max(h);
                        args.push(arg);
                        if !self.is_punct(',') {
                            break;
                        }
                        self.next();
                    }
                }
                self.expect_punct(')')?;
                (target, height) =
                    Self::sized(Expr::Call(Box::new(target), name, args, pos), height + 1, pos)?;
            } else {
                (target, height) =
                    Self::sized(Expr::Member(Box::new(target), name, pos), height + 1, pos)?;
            }
        }
        Ok((target, height))
    }

    fn primary(&mut self) -> PResult<Node> {
        let token = self.peek().clone();
        let expr = match token.tok {
            Tok::Num(n, true) if n.abs() < 9.007_199_254_740_992e15 => Expr::Int(n as i64),
            Tok::Num(n, _) => Expr::Float(n),
            Tok::Str(s) => Expr::Str(s),
            Tok::Ident(name) => match name.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" => Expr::Null,
                _ => Expr::Ident(name, token.pos),
            },
            Tok::Punct('(') => {
                self.next();
                let inner = self.expr()?;
                self.expect_punct(')')?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected("expected expression")),
        };
        self.next();
        Ok((expr, 1))
    }
}
