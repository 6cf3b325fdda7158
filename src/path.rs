use crate::error::{FormError, Result};
use std::fmt;
use std::fmt::Write;
use std::str::FromStr;

/// One step in a path: a property name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// An ordered sequence of segments addressing one location in a value tree.
/// The empty path addresses the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Path(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&Segment> {
        self.0.last()
    }

    /// Path of a named property below this one.
    pub fn child(&self, key: impl Into<String>) -> Path {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(key.into()));
        Path(segments)
    }

    /// Like `child`, but rejects keys that would not survive `encode`.
    pub fn checked_child(&self, key: impl Into<String>) -> Result<Path> {
        let key = key.into();
        check_key(&key)?;
        Ok(self.child(key))
    }

    /// Path of an array element below this one.
    pub fn index(&self, index: usize) -> Path {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Path(segments)
    }

    /// Append every segment of `suffix`.
    pub fn join(&self, suffix: &Path) -> Path {
        let mut segments = self.0.clone();
        segments.extend(suffix.0.iter().cloned());
        Path(segments)
    }

    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            return None;
        }
        Some(Path(self.0[..self.0.len() - 1].to_vec()))
    }

    /// This path followed by each enclosing path, nearest first.
    /// The root is not included.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> + '_ {
        (1..=self.0.len()).rev().map(|n| Path(self.0[..n].to_vec()))
    }

    pub fn to_name(&self) -> String {
        encode(self)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(self))
    }
}

impl FromStr for Path {
    type Err = FormError;

    fn from_str(s: &str) -> Result<Self> {
        decode(s)
    }
}

// ── Encoding ───────────────────────────────────────────────────────

/// A property name must be non-empty and free of `.`, `[`, and `]`, or its
/// encoded field name would decode to a different path.
pub fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(FormError::invalid_name(key, "empty property name"));
    }
    match key.find(['.', '[', ']']) {
        Some(offset) => Err(FormError::invalid_name(
            key,
            format!("reserved character at offset {}", offset),
        )),
        None => Ok(()),
    }
}

/// Encode a path as a field name: `a.b[0].c`.
///
/// Key segments after the first are prefixed with `.`; index segments are
/// written `[n]` with no preceding dot. The root encodes to `""`.
pub fn encode(path: &Path) -> String {
    let mut name = String::new();
    for segment in path.segments() {
        match segment {
            Segment::Key(key) => {
                if !name.is_empty() {
                    name.push('.');
                }
                name.push_str(key);
            }
            Segment::Index(index) => {
                // Writing to a String cannot fail.
                let _ = write!(name, "[{}]", index);
            }
        }
    }
    name
}

// ── Decoding ───────────────────────────────────────────────────────

/// Parser state: tracks position in the field name.
struct NameParser<'a> {
    input: &'a str,
    pos: usize,
}

/// Decode a field name into a path.
///
/// Fails with `InvalidName` on empty segments (leading, trailing, or doubled
/// dots), unbalanced brackets, or bracket contents that are not a canonical
/// non-negative integer.
pub fn decode(name: &str) -> Result<Path> {
    if name.is_empty() {
        return Ok(Path::root());
    }

    let mut parser = NameParser {
        input: name,
        pos: 0,
    };
    let mut segments = Vec::new();

    if parser.peek_char() == Some('[') {
        segments.push(parser.parse_index()?);
    } else {
        segments.push(parser.parse_key()?);
    }

    while let Some(ch) = parser.peek_char() {
        match ch {
            '.' => {
                parser.advance(1);
                segments.push(parser.parse_key()?);
            }
            '[' => segments.push(parser.parse_index()?),
            _ => return Err(parser.error(format!("unexpected '{}'", ch))),
        }
    }

    Ok(Path(segments))
}

impl<'a> NameParser<'a> {
    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self, n: usize) {
        self.pos += n;
    }

    fn eat_char(&mut self, ch: char) -> bool {
        if self.peek_char() == Some(ch) {
            self.advance(ch.len_utf8());
            true
        } else {
            false
        }
    }

    fn error(&self, message: String) -> FormError {
        FormError::invalid_name(self.input, format!("{} at offset {}", message, self.pos))
    }

    /// A property name runs until the next `.`, `[`, or end of input.
    fn parse_key(&mut self) -> Result<Segment> {
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            match ch {
                '.' | '[' => break,
                ']' => return Err(self.error("unbalanced ']'".to_string())),
                _ => self.advance(ch.len_utf8()),
            }
        }
        if self.pos == start {
            return Err(self.error("empty segment".to_string()));
        }
        Ok(Segment::Key(self.input[start..self.pos].to_string()))
    }

    fn parse_index(&mut self) -> Result<Segment> {
        if !self.eat_char('[') {
            return Err(self.error("expected '['".to_string()));
        }
        let start = self.pos;
        while let Some(ch) = self.peek_char() {
            if ch == ']' {
                break;
            }
            if !ch.is_ascii_digit() {
                return Err(self.error(format!(
                    "index must be a non-negative integer, found '{}'",
                    ch
                )));
            }
            self.advance(1);
        }
        let digits = &self.input[start..self.pos];
        if !self.eat_char(']') {
            return Err(self.error("unclosed '['".to_string()));
        }
        if digits.is_empty() {
            return Err(self.error("empty index".to_string()));
        }
        if digits.len() > 1 && digits.starts_with('0') {
            return Err(self.error(format!("index \"{}\" has leading zeros", digits)));
        }
        digits
            .parse::<usize>()
            .map(Segment::Index)
            .map_err(|_| self.error(format!("index \"{}\" is too large", digits)))
    }
}

// ── Path relations ─────────────────────────────────────────────────

/// Prefix test: true when `child` is `parent` or lies below it.
pub fn is_descendant(parent: &Path, child: &Path) -> bool {
    child.0.len() >= parent.0.len() && child.0[..parent.0.len()] == parent.0[..]
}

/// The suffix of `target` below `base`, or `None` when `base` is not a prefix.
pub fn relative_path(base: &Path, target: &Path) -> Option<Path> {
    if is_descendant(base, target) {
        Some(Path(target.0[base.0.len()..].to_vec()))
    } else {
        None
    }
}

/// Field-name flavour of `is_descendant`. Undecodable names never match.
pub fn is_name_within(parent: &str, child: &str) -> bool {
    match (decode(parent), decode(child)) {
        (Ok(p), Ok(c)) => is_descendant(&p, &c),
        _ => false,
    }
}
