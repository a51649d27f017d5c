//! Tokenizer and grammar.
//!
//! Keywords match case-insensitively; identifiers keep their case and are
//! limited to `[A-Za-z0-9_-]+`, so nothing user-typed can carry script
//! syntax into a fragment.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use pagebridge_core_types::BridgeError;

/// Every form the interpreter accepts, one per line.
pub const ACCEPTED_FORMS: &str = "SHOW DATABASES\n\
SHOW STORES FROM <db>\n\
SELECT * FROM <db>.<store>\n\
CLEAR FROM <db>.<store>";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ParsedQuery {
    ListDatabases,
    ListStores { db: String },
    SelectAll { db: String, store: String },
    ClearStore { db: String, store: String },
}

impl fmt::Display for ParsedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsedQuery::ListDatabases => write!(f, "SHOW DATABASES"),
            ParsedQuery::ListStores { db } => write!(f, "SHOW STORES FROM {db}"),
            ParsedQuery::SelectAll { db, store } => write!(f, "SELECT * FROM {db}.{store}"),
            ParsedQuery::ClearStore { db, store } => write!(f, "CLEAR FROM {db}.{store}"),
        }
    }
}

/// Both variants render the reason followed by [`ACCEPTED_FORMS`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("{reason}\naccepted forms:\n{forms}", forms = ACCEPTED_FORMS)]
    Unsupported { reason: String },
    #[error("{reason}\naccepted forms:\n{forms}", forms = ACCEPTED_FORMS)]
    Malformed { reason: String },
}

impl From<QueryError> for BridgeError {
    fn from(err: QueryError) -> Self {
        match &err {
            QueryError::Unsupported { .. } => BridgeError::unsupported(err.to_string()),
            QueryError::Malformed { .. } => BridgeError::parse(err.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Star,
    Dot,
}

fn tokenize(line: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    for chunk in line.split_whitespace() {
        let mut start = 0;
        for (idx, ch) in chunk.char_indices() {
            if ch == '*' || ch == '.' {
                if start < idx {
                    tokens.push(Token::Word(&chunk[start..idx]));
                }
                tokens.push(if ch == '*' { Token::Star } else { Token::Dot });
                start = idx + 1;
            }
        }
        if start < chunk.len() {
            tokens.push(Token::Word(&chunk[start..]));
        }
    }
    tokens
}

fn is_identifier(word: &str) -> bool {
    !word.is_empty()
        && word
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

struct Cursor<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    form: &'static str,
}

impl<'a> Cursor<'a> {
    fn malformed(&self, reason: impl Into<String>) -> QueryError {
        QueryError::Malformed {
            reason: format!("malformed {}: {}", self.form, reason.into()),
        }
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn keyword(&mut self, expected: &str) -> Result<(), QueryError> {
        match self.next() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case(expected) => Ok(()),
            Some(other) => Err(self.malformed(format!("expected {expected}, found {}", describe(&other)))),
            None => Err(self.malformed(format!("expected {expected}"))),
        }
    }

    fn identifier(&mut self, what: &str) -> Result<String, QueryError> {
        match self.next() {
            Some(Token::Word(word)) if is_identifier(word) => Ok(word.to_string()),
            Some(Token::Word(word)) => Err(self.malformed(format!(
                "{what} {word:?} may only contain letters, digits, '_' and '-'"
            ))),
            Some(other) => Err(self.malformed(format!("expected {what}, found {}", describe(&other)))),
            None => Err(self.malformed(format!("missing {what}"))),
        }
    }

    fn qualified(&mut self) -> Result<(String, String), QueryError> {
        let db = self.identifier("database name")?;
        match self.next() {
            Some(Token::Dot) => {}
            _ => return Err(self.malformed("expected <db>.<store>")),
        }
        let store = self.identifier("store name")?;
        Ok((db, store))
    }

    fn star(&mut self) -> Result<(), QueryError> {
        match self.next() {
            Some(Token::Star) => Ok(()),
            _ => Err(self.malformed("only SELECT * is supported")),
        }
    }

    fn end(&mut self) -> Result<(), QueryError> {
        match self.next() {
            None => Ok(()),
            Some(other) => Err(self.malformed(format!("unexpected {}", describe(&other)))),
        }
    }
}

fn describe(token: &Token<'_>) -> String {
    match token {
        Token::Word(word) => format!("{word:?}"),
        Token::Star => "'*'".to_string(),
        Token::Dot => "'.'".to_string(),
    }
}

/// Parses one query line. A trailing `;` is tolerated.
pub fn parse(line: &str) -> Result<ParsedQuery, QueryError> {
    let trimmed = line.trim().trim_end_matches(';').trim_end();
    let tokens = tokenize(trimmed);
    let verb = match tokens.first() {
        Some(Token::Word(word)) => word.to_ascii_uppercase(),
        Some(other) => {
            return Err(QueryError::Unsupported {
                reason: format!("unsupported command starting with {}", describe(other)),
            })
        }
        None => {
            return Err(QueryError::Malformed {
                reason: "empty query".to_string(),
            })
        }
    };

    let form = match verb.as_str() {
        "SHOW" => "SHOW",
        "SELECT" => "SELECT",
        "CLEAR" => "CLEAR",
        _ => {
            return Err(QueryError::Unsupported {
                reason: format!("unsupported command {verb:?}"),
            })
        }
    };
    let mut cursor = Cursor {
        tokens,
        pos: 1,
        form,
    };

    let query = match form {
        "SHOW" => match cursor.next() {
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("DATABASES") => {
                ParsedQuery::ListDatabases
            }
            Some(Token::Word(word)) if word.eq_ignore_ascii_case("STORES") => {
                cursor.keyword("FROM")?;
                let db = cursor.identifier("database name")?;
                ParsedQuery::ListStores { db }
            }
            _ => return Err(cursor.malformed("expected DATABASES or STORES FROM <db>")),
        },
        "SELECT" => {
            cursor.star()?;
            cursor.keyword("FROM")?;
            let (db, store) = cursor.qualified()?;
            ParsedQuery::SelectAll { db, store }
        }
        _ => {
            cursor.keyword("FROM")?;
            let (db, store) = cursor.qualified()?;
            ParsedQuery::ClearStore { db, store }
        }
    };
    cursor.end()?;
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_form() {
        assert_eq!(parse("SHOW DATABASES").unwrap(), ParsedQuery::ListDatabases);
        assert_eq!(
            parse("show stores from app-db").unwrap(),
            ParsedQuery::ListStores { db: "app-db".into() }
        );
        assert_eq!(
            parse("SELECT * FROM mydb.items").unwrap(),
            ParsedQuery::SelectAll {
                db: "mydb".into(),
                store: "items".into()
            }
        );
        assert_eq!(
            parse("  Clear From Cache_1 . Entries ;").unwrap(),
            ParsedQuery::ClearStore {
                db: "Cache_1".into(),
                store: "Entries".into()
            }
        );
        assert_eq!(
            parse("select*from a.b").unwrap(),
            ParsedQuery::SelectAll {
                db: "a".into(),
                store: "b".into()
            }
        );
    }

    #[test]
    fn unknown_commands_are_unsupported_with_help() {
        let err = parse("DROP TABLE x").unwrap_err();
        assert!(matches!(err, QueryError::Unsupported { .. }));
        assert!(err.to_string().ends_with(ACCEPTED_FORMS));
        assert!(err.to_string().contains("SELECT * FROM <db>.<store>"));
    }

    #[test]
    fn malformed_known_commands_are_parse_errors() {
        for line in [
            "",
            "SHOW",
            "SHOW TABLES",
            "SHOW STORES mydb",
            "SELECT name FROM a.b",
            "SELECT * FROM items",
            "SELECT * FROM a.b extra",
            "CLEAR a.b",
            "SELECT * FROM a'b.c",
            "SHOW STORES FROM x\"); alert(1); //",
        ] {
            let err = parse(line).unwrap_err();
            assert!(matches!(err, QueryError::Malformed { .. }), "{line}");
            assert!(err.to_string().ends_with(ACCEPTED_FORMS));
        }
    }

    #[test]
    fn display_round_trips() {
        for line in ["SHOW DATABASES", "SHOW STORES FROM a", "SELECT * FROM a.b", "CLEAR FROM a.b"] {
            assert_eq!(parse(line).unwrap().to_string(), line);
        }
    }

    #[test]
    fn errors_map_onto_bridge_kinds() {
        use pagebridge_core_types::BridgeErrorKind;
        let unsupported: BridgeError = parse("UPDATE x").unwrap_err().into();
        assert_eq!(unsupported.kind, BridgeErrorKind::Unsupported);
        let malformed: BridgeError = parse("SELECT *").unwrap_err().into();
        assert_eq!(malformed.kind, BridgeErrorKind::ParseError);
    }
}
