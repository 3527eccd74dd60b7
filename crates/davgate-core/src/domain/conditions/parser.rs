//! `If` header parser
//!
//! ```text
//! If          = 1*( [ Resource-Tag ] 1*List )
//! Resource-Tag = "<" Simple-ref ">"
//! List        = "(" 1*Condition ")"
//! Condition   = [ "Not" ] ( State-token | "[" entity-tag "]" )
//! State-token = "<" URI ">"
//! ```
//!
//! Lists that follow a resource tag belong to that tag; lists before any
//! tag apply to the request target. Parsing is all-or-nothing.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a single condition tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Live etag equals the value
    Etag,
    /// A live lock with this token applies to the resource
    Token,
}

/// One test inside a condition list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub negated: bool,
    pub kind: ConditionKind,
    /// Token URI, or entity-tag exactly as written (quotes and `W/` kept)
    pub value: String,
}

impl Condition {
    pub fn token(value: impl Into<String>) -> Self {
        Self {
            negated: false,
            kind: ConditionKind::Token,
            value: value.into(),
        }
    }

    pub fn etag(value: impl Into<String>) -> Self {
        Self {
            negated: false,
            kind: ConditionKind::Etag,
            value: value.into(),
        }
    }

    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "Not ")?;
        }
        match self.kind {
            ConditionKind::Token => write!(f, "<{}>", self.value),
            ConditionKind::Etag => write!(f, "[{}]", self.value),
        }
    }
}

/// Conditions that must all hold
pub type ConditionList = Vec<Condition>;

/// Condition lists scoped to one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfEntry {
    /// Resource reference as written, `None` for the request target
    pub resource: Option<String>,
    pub lists: Vec<ConditionList>,
}

/// A parsed `If` header
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfHeader {
    pub entries: Vec<IfEntry>,
}

impl IfHeader {
    /// Parse a raw header value
    pub fn parse(input: &str) -> Result<Self> {
        Parser { input, pos: 0 }.parse_header()
    }

    /// Every condition list paired with the resource it is scoped to
    pub fn lists(&self) -> impl Iterator<Item = (Option<&str>, &ConditionList)> {
        self.entries
            .iter()
            .flat_map(|e| e.lists.iter().map(move |l| (e.resource.as_deref(), l)))
    }

    /// Every token mentioned anywhere in the header
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.lists()
            .flat_map(|(_, list)| list.iter())
            .filter(|c| c.kind == ConditionKind::Token)
            .map(|c| c.value.as_str())
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn parse_header(mut self) -> Result<IfHeader> {
        let mut entries: Vec<IfEntry> = Vec::new();

        self.skip_ws();
        if self.at_end() {
            return Err(self.error("empty header"));
        }

        while !self.at_end() {
            match self.peek() {
                Some('<') => {
                    let resource = self.delimited('<', '>')?.trim().to_string();
                    if resource.is_empty() {
                        return Err(self.error("empty resource tag"));
                    }
                    entries.push(IfEntry {
                        resource: Some(resource),
                        lists: Vec::new(),
                    });
                }
                Some('(') => {
                    let list = self.parse_list()?;
                    match entries.last_mut() {
                        Some(entry) => entry.lists.push(list),
                        None => entries.push(IfEntry {
                            resource: None,
                            lists: vec![list],
                        }),
                    }
                }
                Some(c) => return Err(self.error(&format!("unexpected character '{}'", c))),
                None => break,
            }
            self.skip_ws();
        }

        if let Some(entry) = entries.iter().find(|e| e.lists.is_empty()) {
            return Err(self.error(&format!(
                "resource tag <{}> has no condition list",
                entry.resource.as_deref().unwrap_or_default()
            )));
        }

        Ok(IfHeader { entries })
    }

    fn parse_list(&mut self) -> Result<ConditionList> {
        self.expect('(')?;
        let mut list = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                Some(')') => {
                    self.pos += 1;
                    break;
                }
                None => return Err(self.error("unterminated condition list")),
                _ => list.push(self.parse_condition()?),
            }
        }

        if list.is_empty() {
            return Err(self.error("empty condition list"));
        }
        Ok(list)
    }

    fn parse_condition(&mut self) -> Result<Condition> {
        let negated = self.eat_keyword("not");
        if negated {
            self.skip_ws();
        }

        let condition = match self.peek() {
            Some('<') => {
                let token = self.delimited('<', '>')?.trim();
                if token.is_empty() {
                    return Err(self.error("empty state token"));
                }
                Condition::token(token)
            }
            Some('[') => Condition::etag(self.parse_entity_tag()?),
            Some(c) => return Err(self.error(&format!("expected condition, found '{}'", c))),
            None => return Err(self.error("expected condition, found end of header")),
        };

        Ok(Condition { negated, ..condition })
    }

    /// `[` [W/] quoted-string `]`, returning the text between the brackets
    fn parse_entity_tag(&mut self) -> Result<String> {
        self.expect('[')?;
        let start = self.pos;

        if self.rest().starts_with("W/") {
            self.pos += 2;
        }

        if self.peek() == Some('"') {
            self.pos += 1;
            let mut escaped = false;
            loop {
                match self.next_char() {
                    Some('\\') if !escaped => escaped = true,
                    Some('"') if !escaped => break,
                    Some(_) => escaped = false,
                    None => return Err(self.error("unterminated entity tag")),
                }
            }
        } else {
            // Tolerate unquoted tags from sloppy clients
            while let Some(c) = self.peek() {
                if c == ']' {
                    break;
                }
                self.pos += c.len_utf8();
            }
        }

        let value = self.input[start..self.pos].trim().to_string();
        self.skip_ws();
        self.expect(']')?;

        if value.is_empty() {
            return Err(self.error("empty entity tag"));
        }
        Ok(value)
    }

    fn delimited(&mut self, open: char, close: char) -> Result<&'a str> {
        self.expect(open)?;
        let rest = self.rest();
        match rest.find(close) {
            Some(end) => {
                let inner = &rest[..end];
                self.pos += end + close.len_utf8();
                Ok(inner)
            }
            None => Err(self.error(&format!("missing '{}'", close))),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let rest = self.rest();
        let Some(prefix) = rest.get(..keyword.len()) else {
            return false;
        };
        if !prefix.eq_ignore_ascii_case(keyword) {
            return false;
        }
        let boundary = rest[keyword.len()..]
            .chars()
            .next()
            .map(|c| c.is_whitespace() || c == '<' || c == '[')
            .unwrap_or(false);

        if boundary {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            Ok(())
        } else {
            Err(self.error(&format!("expected '{}'", c)))
        }
    }

    fn skip_ws(&mut self) {
        while let Some(c) = self.peek() {
            if !c.is_whitespace() {
                break;
            }
            self.pos += c.len_utf8();
        }
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: &str) -> Error {
        Error::MalformedConditionalHeader(format!("{} at offset {}", message, self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_lists() {
        let header = IfHeader::parse("(<urn:uuid:a>) (<urn:uuid:b>)").unwrap();
        assert_eq!(header.entries.len(), 1);
        assert_eq!(header.entries[0].resource, None);
        assert_eq!(
            header.entries[0].lists,
            vec![
                vec![Condition::token("urn:uuid:a")],
                vec![Condition::token("urn:uuid:b")]
            ]
        );
    }

    #[test]
    fn test_not_and_etags() {
        let header = IfHeader::parse(r#"(Not <urn:uuid:a> ["xyz"]) ([W/"weak"])"#).unwrap();
        let lists = &header.entries[0].lists;

        assert_eq!(lists[0][0], Condition::token("urn:uuid:a").negate());
        assert_eq!(lists[0][1], Condition::etag(r#""xyz""#));
        assert_eq!(lists[1][0], Condition::etag(r#"W/"weak""#));
    }

    #[test]
    fn test_tagged_entries() {
        let header = IfHeader::parse(
            "<http://example.com/dav/a> (<urn:uuid:1>) <http://example.com/dav/b> ([\"e\"]) (Not <DAV:no-lock>)",
        )
        .unwrap();

        assert_eq!(header.entries.len(), 2);
        assert_eq!(header.entries[0].resource.as_deref(), Some("http://example.com/dav/a"));
        assert_eq!(header.entries[1].lists.len(), 2);
        assert_eq!(header.tokens().collect::<Vec<_>>(), vec!["urn:uuid:1", "DAV:no-lock"]);
    }

    #[test]
    fn test_keyword_is_case_insensitive() {
        let header = IfHeader::parse("(NOT<urn:uuid:a>)").unwrap();
        assert!(header.entries[0].lists[0][0].negated);

        // "Nothing" is not the keyword
        assert!(IfHeader::parse("(Nothing)").is_err());
    }

    #[test]
    fn test_etag_with_bracket_inside_quotes() {
        let header = IfHeader::parse(r#"(["a]b"])"#).unwrap();
        assert_eq!(header.entries[0].lists[0][0].value, r#""a]b""#);
    }

    #[test]
    fn test_malformed_headers() {
        for raw in [
            "",
            "   ",
            "()",
            "(<urn:uuid:a>",
            "<http://x/a>",
            "<http://x/a> (<t>) <http://x/b>",
            "(Not)",
            "(<>)",
            "([])",
            "([\"open])",
            "garbage",
            "(<a>) junk",
        ] {
            let err = IfHeader::parse(raw).unwrap_err();
            assert!(
                matches!(err, Error::MalformedConditionalHeader(_)),
                "expected malformed error for {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_display_round_trips_condition() {
        let c = Condition::etag(r#""x""#).negate();
        assert_eq!(c.to_string(), r#"Not ["x"]"#);
    }
}
