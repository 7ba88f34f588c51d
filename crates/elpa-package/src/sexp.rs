//! A small reader and printer for the subset of Lisp data found in package
//! headers, `-pkg.el` descriptor files and `archive-contents`.
//!
//! Supported syntax: integers, symbols, strings (with the usual escapes),
//! proper and dotted lists, vectors, `'x` quoting and `;` line comments.

use std::fmt;

use crate::error::{PackageError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sexp {
    Int(i64),
    Symbol(String),
    Str(String),
    List(Vec<Sexp>),
    /// A list whose final cdr is not `nil`: `(a b . c)`.
    Dotted(Vec<Sexp>, Box<Sexp>),
    Vector(Vec<Sexp>),
}

impl Sexp {
    pub fn symbol(name: impl Into<String>) -> Self {
        Sexp::Symbol(name.into())
    }

    pub fn string(value: impl Into<String>) -> Self {
        Sexp::Str(value.into())
    }

    pub fn is_nil(&self) -> bool {
        match self {
            Sexp::Symbol(name) => name == "nil",
            Sexp::List(items) => items.is_empty(),
            _ => false,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Sexp::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Sexp::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Sexp::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the elements of a proper list; `nil` reads as the empty list.
    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Sexp::List(items) => Some(items),
            Sexp::Symbol(name) if name == "nil" => Some(&[]),
            _ => None,
        }
    }

    /// Strips one level of `(quote x)`.
    pub fn unquote(&self) -> &Sexp {
        if let Sexp::List(items) = self {
            if let [Sexp::Symbol(head), inner] = items.as_slice() {
                if head == "quote" {
                    return inner;
                }
            }
        }
        self
    }
}

/// Reads the first datum in `text`.
pub fn read(text: &str) -> Result<Sexp> {
    let mut reader = Reader::new(text);
    match reader.next_datum()? {
        Some(datum) => Ok(datum),
        None => Err(reader.error("expected a datum")),
    }
}

/// Reads every top-level datum in `text`.
pub fn read_all(text: &str) -> Result<Vec<Sexp>> {
    let mut reader = Reader::new(text);
    let mut out = Vec::new();
    while let Some(datum) = reader.next_datum()? {
        out.push(datum);
    }
    Ok(out)
}

/// Returns true when every opening paren/bracket in `text` has been closed,
/// ignoring strings and comments.
pub(crate) fn is_balanced(text: &str) -> bool {
    let mut depth = 0i64;
    let mut in_string = false;
    let mut escaped = false;
    let mut in_comment = false;
    for ch in text.chars() {
        if in_comment {
            if ch == '\n' {
                in_comment = false;
            }
            continue;
        }
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            ';' => in_comment = true,
            '(' | '[' => depth += 1,
            ')' | ']' => depth -= 1,
            _ => {}
        }
    }
    depth <= 0 && !in_string
}

/// Lists, vectors and quotes nested deeper than this are a read error.
pub const MAX_DEPTH: usize = 128;

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    fn nested<T>(&mut self, read: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        self.depth += 1;
        let result = read(self);
        self.depth -= 1;
        result
    }

    fn error(&self, message: &'static str) -> PackageError {
        PackageError::Read {
            offset: self.pos,
            message,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_trivia(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.bump();
            } else if ch == ';' {
                while let Some(ch) = self.bump() {
                    if ch == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_datum(&mut self) -> Result<Option<Sexp>> {
        self.skip_trivia();
        let Some(ch) = self.peek() else {
            return Ok(None);
        };
        let datum = match ch {
            '(' => {
                self.bump();
                self.nested(Self::read_list)?
            }
            '[' => {
                self.bump();
                Sexp::Vector(self.nested(|reader| reader.read_seq(']'))?)
            }
            ')' | ']' => return Err(self.error("unexpected closing delimiter")),
            '\'' => {
                self.bump();
                let inner = self
                    .nested(Self::next_datum)?
                    .ok_or_else(|| self.error("quote without a datum"))?;
                Sexp::List(vec![Sexp::symbol("quote"), inner])
            }
            '"' => {
                self.bump();
                Sexp::Str(self.read_string()?)
            }
            _ => self.read_atom()?,
        };
        Ok(Some(datum))
    }

    fn read_list(&mut self) -> Result<Sexp> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.error("unterminated list")),
                Some(')') => {
                    self.bump();
                    return Ok(Sexp::List(items));
                }
                Some('.') if self.is_lone_dot() => {
                    self.bump();
                    if items.is_empty() {
                        return Err(self.error("dotted pair without a car"));
                    }
                    let tail = self
                        .next_datum()?
                        .ok_or_else(|| self.error("dotted pair without a cdr"))?;
                    self.skip_trivia();
                    if self.bump() != Some(')') {
                        return Err(self.error("expected `)` after dotted cdr"));
                    }
                    return Ok(match tail {
                        Sexp::List(rest) => {
                            items.extend(rest);
                            Sexp::List(items)
                        }
                        tail if tail.is_nil() => Sexp::List(items),
                        tail => Sexp::Dotted(items, Box::new(tail)),
                    });
                }
                Some(_) => {
                    let datum = self
                        .next_datum()?
                        .ok_or_else(|| self.error("unterminated list"))?;
                    items.push(datum);
                }
            }
        }
    }

    fn read_seq(&mut self, close: char) -> Result<Vec<Sexp>> {
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None => return Err(self.error("unterminated vector")),
                Some(ch) if ch == close => {
                    self.bump();
                    return Ok(items);
                }
                Some(_) => {
                    let datum = self
                        .next_datum()?
                        .ok_or_else(|| self.error("unterminated vector"))?;
                    items.push(datum);
                }
            }
        }
    }

    fn is_lone_dot(&self) -> bool {
        let rest = &self.src[self.pos..];
        let mut chars = rest.chars();
        chars.next();
        match chars.next() {
            None => true,
            Some(next) => next.is_whitespace() || next == '(' || next == ')',
        }
    }

    fn read_string(&mut self) -> Result<String> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    None => return Err(self.error("unterminated string escape")),
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    // Escaped newline is a line continuation.
                    Some('\n') => {}
                    Some(other) => out.push(other),
                },
                Some(ch) => out.push(ch),
            }
        }
    }

    fn read_atom(&mut self) -> Result<Sexp> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || matches!(ch, '(' | ')' | '[' | ']' | '"' | ';' | '\'') {
                break;
            }
            if ch == '\\' {
                self.bump();
            }
            self.bump();
        }
        let token = &self.src[start..self.pos];
        if token.is_empty() {
            return Err(self.error("unexpected character"));
        }
        if let Ok(value) = token.parse::<i64>() {
            return Ok(Sexp::Int(value));
        }
        Ok(Sexp::Symbol(token.replace('\\', "")))
    }
}

impl fmt::Display for Sexp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexp::Int(value) => write!(f, "{value}"),
            Sexp::Symbol(name) => f.write_str(name),
            Sexp::Str(value) => write_escaped(f, value),
            Sexp::List(items) if items.is_empty() => f.write_str("nil"),
            Sexp::List(items) => {
                f.write_str("(")?;
                write_items(f, items)?;
                f.write_str(")")
            }
            Sexp::Dotted(items, tail) => {
                f.write_str("(")?;
                write_items(f, items)?;
                write!(f, " . {tail})")
            }
            Sexp::Vector(items) => {
                f.write_str("[")?;
                write_items(f, items)?;
                f.write_str("]")
            }
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[Sexp]) -> fmt::Result {
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

fn write_escaped(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in value.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            _ => write!(f, "{ch}")?,
        }
    }
    f.write_str("\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_requirement_lists() {
        let datum = read(r#"((emacs "24.4") (dash "2.19.1"))"#).unwrap();
        let items = datum.as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[1],
            Sexp::List(vec![Sexp::symbol("dash"), Sexp::string("2.19.1")])
        );
    }

    #[test]
    fn reads_quotes_dots_vectors_and_comments() {
        let forms = read_all(
            "; leading comment\n(define-package \"foo\" \"1.0\" \"Foo\" '((bar \"1\")))\n(a . [1 2 sym])",
        )
        .unwrap();
        assert_eq!(forms.len(), 2);

        let define = forms[0].as_list().unwrap();
        assert_eq!(define[0].as_symbol(), Some("define-package"));
        let reqs = define[4].unquote().as_list().unwrap();
        assert_eq!(reqs[0].as_list().unwrap()[0].as_symbol(), Some("bar"));

        assert_eq!(
            forms[1],
            Sexp::Dotted(
                vec![Sexp::symbol("a")],
                Box::new(Sexp::Vector(vec![
                    Sexp::Int(1),
                    Sexp::Int(2),
                    Sexp::symbol("sym")
                ]))
            )
        );
    }

    #[test]
    fn dotted_list_tail_is_flattened() {
        assert_eq!(
            read("(a . (b c))").unwrap(),
            Sexp::List(vec![Sexp::symbol("a"), Sexp::symbol("b"), Sexp::symbol("c")])
        );
        assert_eq!(read("(a . nil)").unwrap(), Sexp::List(vec![Sexp::symbol("a")]));
    }

    #[test]
    fn string_escapes_survive_print_and_read() {
        let original = Sexp::string("say \"hi\" \\ bye");
        let printed = original.to_string();
        assert_eq!(printed, r#""say \"hi\" \\ bye""#);
        assert_eq!(read(&printed).unwrap(), original);
    }

    #[test]
    fn empty_list_prints_as_nil() {
        assert_eq!(Sexp::List(Vec::new()).to_string(), "nil");
        assert!(read("nil").unwrap().is_nil());
        assert_eq!(read("nil").unwrap().as_list(), Some(&[][..]));
    }

    #[test]
    fn reports_unterminated_input() {
        assert!(matches!(read("(a b"), Err(PackageError::Read { .. })));
        assert!(matches!(read("\"abc"), Err(PackageError::Read { .. })));
        assert!(matches!(read(")"), Err(PackageError::Read { .. })));
        assert!(read("   ").is_err());
    }

    #[test]
    fn deep_nesting_is_a_read_error() {
        let fits = format!("{}{}", "(".repeat(MAX_DEPTH), ")".repeat(MAX_DEPTH));
        assert!(read(&fits).is_ok());

        for deep in [
            "(".repeat(500_000),
            "[".repeat(MAX_DEPTH + 1),
            format!("{}a", "'".repeat(500_000)),
        ] {
            assert!(matches!(
                read(&deep),
                Err(PackageError::Read {
                    message: "nesting too deep",
                    ..
                })
            ));
        }
    }

    #[test]
    fn balance_ignores_strings_and_comments() {
        assert!(is_balanced(r#"((a "(") (b))"#));
        assert!(!is_balanced("((a \"1\")"));
        assert!(is_balanced("(a) ; (unclosed in comment"));
    }
}
