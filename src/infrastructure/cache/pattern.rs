//! Redis-dialect key patterns for in-process matching.
//!
//! `SCAN MATCH` and the `glob` crate disagree on a few points: Redis negates
//! a set with `[^...]`, escapes with backslash, and accepts runs of `*`.
//! Patterns are rewritten into the `glob` dialect before compiling so the
//! memory tier removes exactly what the shared tier removes.

use std::fmt;

use glob::{Pattern, PatternError};

/// A compiled key pattern with Redis `MATCH` semantics.
#[derive(Clone)]
pub struct KeyPattern {
    source: String,
    compiled: Pattern,
}

impl KeyPattern {
    /// Compile a Redis-style pattern.
    ///
    /// # Errors
    ///
    /// Returns an error for an unterminated or empty `[...]` set.
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        Ok(Self {
            source: pattern.to_string(),
            compiled: Pattern::new(&translate(pattern)?)?,
        })
    }

    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        self.compiled.matches(key)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Escape `literal` so it matches only itself, in Redis dialect.
    #[must_use]
    pub fn escape(literal: &str) -> String {
        let mut out = String::with_capacity(literal.len());
        for c in literal.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                out.push('\\');
            }
            out.push(c);
        }
        out
    }
}

impl fmt::Debug for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("KeyPattern").field(&self.source).finish()
    }
}

#[derive(Debug, Clone, Copy)]
enum Member {
    Char(char),
    Range(char, char),
}

fn literal(c: char) -> String {
    Pattern::escape(&c.to_string())
}

fn translate(pattern: &str) -> Result<String, PatternError> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => {
                while chars.get(i + 1) == Some(&'*') {
                    i += 1;
                }
                out.push('*');
            }
            '?' => out.push('?'),
            '\\' if i + 1 < chars.len() => {
                i += 1;
                out.push_str(&literal(chars[i]));
            }
            '[' => {
                let (negated, members, consumed) =
                    parse_set(&chars[i + 1..]).ok_or(PatternError {
                        pos: i,
                        msg: "unterminated character set",
                    })?;
                if members.is_empty() && !negated {
                    return Err(PatternError {
                        pos: i,
                        msg: "empty character set",
                    });
                }
                out.push_str(&render_set(negated, &members));
                i += consumed;
            }
            c => out.push_str(&literal(c)),
        }
        i += 1;
    }
    Ok(out)
}

/// Parse the body of a set that starts just after `[`. Returns the set and
/// how many chars were consumed, including the closing `]`.
fn parse_set(rest: &[char]) -> Option<(bool, Vec<Member>, usize)> {
    let mut i = 0;
    let negated = rest.first() == Some(&'^');
    if negated {
        i += 1;
    }
    let mut members = Vec::new();
    while i < rest.len() {
        match rest[i] {
            ']' => return Some((negated, members, i + 1)),
            '\\' if i + 1 < rest.len() => {
                i += 1;
                members.push(Member::Char(rest[i]));
            }
            c if rest.get(i + 1) == Some(&'-') && i + 2 < rest.len() && rest[i + 2] != ']' => {
                let end = rest[i + 2];
                members.push(Member::Range(c.min(end), c.max(end)));
                i += 2;
            }
            c => members.push(Member::Char(c)),
        }
        i += 1;
    }
    None
}

fn render_set(negated: bool, members: &[Member]) -> String {
    if members.is_empty() {
        // `[^]` matches any one char.
        return "?".into();
    }
    // `]` is only literal first in a glob set and `-` only last; `!` must
    // not lead a non-negated set.
    let mut head = String::new();
    let mut body = String::new();
    let mut tail = String::new();
    for member in members {
        match *member {
            Member::Char(']') => head.push(']'),
            Member::Char('-') => tail.push('-'),
            Member::Char(c) => body.push(c),
            Member::Range(a, b) => {
                body.push(a);
                body.push('-');
                body.push(b);
            }
        }
    }
    let mut out = String::from(if negated { "[!" } else { "[" });
    out.push_str(&head);
    if !negated && head.is_empty() && body.starts_with('!') {
        body.remove(0);
        tail.insert(0, '!');
    }
    out.push_str(&body);
    out.push_str(&tail);
    out.push(']');
    out
}
