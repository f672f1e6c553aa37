use std::fmt;

/// Half-open character interval `[start..end)` into a template's source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Interval {
    pub start: usize,
    pub end: usize,
}

impl Interval {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end: end.max(start) }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Smallest interval covering both.
    pub fn union(&self, other: &Interval) -> Interval {
        Interval::new(self.start.min(other.start), self.end.max(other.end))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.start, self.end)
    }
}

/// A `line:char` position; lines count from 1 and characters from 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub line: usize,
    pub char_position: usize,
}

impl Coordinate {
    pub fn new(line: usize, char_position: usize) -> Self {
        Self { line, char_position }
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.char_position)
    }
}

/// Position of the character at `index` (counted in chars, not bytes).
pub fn line_char_position(s: &str, index: usize) -> Coordinate {
    let mut line = 1;
    let mut char_position = 0;
    for c in s.chars().take(index) {
        if c == '\n' {
            line += 1;
            char_position = 0;
        } else {
            char_position += 1;
        }
    }
    Coordinate::new(line, char_position)
}

/// Returns the chars of `s` in `[start..end)` as a String.
pub fn char_slice(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Directory part of a fully qualified template name: `/a/b/t` -> `/a/b/`.
pub fn get_prefix(name: &str) -> String {
    match name.rfind('/') {
        Some(i) => name[..=i].to_string(),
        None => "/".to_string(),
    }
}

pub fn fully_qualified(name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{}", name)
    }
}

pub fn trim_one_starting_newline(s: &str) -> &str {
    if let Some(rest) = s.strip_prefix("\r\n") {
        rest
    } else if let Some(rest) = s.strip_prefix('\n') {
        rest
    } else {
        s
    }
}

pub fn trim_one_trailing_newline(s: &str) -> &str {
    if let Some(rest) = s.strip_suffix("\r\n") {
        rest
    } else if let Some(rest) = s.strip_suffix('\n') {
        rest
    } else {
        s
    }
}

/// Replaces the non-printing characters with their escapes for dumps and error text.
pub fn replace_escapes(s: &str) -> String {
    s.replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}
