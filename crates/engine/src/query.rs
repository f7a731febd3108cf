//! Selection expressions over library metadata.
//!
//! An expression is a whitespace-separated list of terms, all of which must
//! match:
//!
//! | Term            | Matches when                                          |
//! |-----------------|-------------------------------------------------------|
//! | `field:value`   | the field contains `value`, ignoring case             |
//! | `field::regex`  | the field matches the regular expression              |
//! | `field!`        | the field is absent or empty                          |
//! | `word`          | any field contains `word`, ignoring case              |
//!
//! Values containing spaces can be double-quoted: `artist:"Miles Davis"`.
//! The empty expression matches everything.

use crate::error::{ErrorKind, Result};
use crate::model::Metadata;
use exn::ResultExt;
use regex::Regex;

#[derive(Debug, Clone)]
enum Term {
    Contains { field: String, needle: String },
    Regex { field: String, pattern: Regex },
    Empty { field: String },
    Any { needle: String },
}
impl Term {
    fn parse(token: &str) -> Result<Self> {
        if let Some((field, pattern)) = token.split_once("::") {
            let pattern = Regex::new(pattern).or_raise(|| ErrorKind::Configuration)?;
            return Ok(Self::Regex { field: field.to_string(), pattern });
        }
        if let Some((field, needle)) = token.split_once(':') {
            return Ok(Self::Contains { field: field.to_string(), needle: needle.to_lowercase() });
        }
        if let Some(field) = token.strip_suffix('!')
            && !field.is_empty()
        {
            return Ok(Self::Empty { field: field.to_string() });
        }
        Ok(Self::Any { needle: token.to_lowercase() })
    }

    fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Contains { field, needle } => {
                metadata.get(field).is_some_and(|v| v.to_string().to_lowercase().contains(needle.as_str()))
            },
            Self::Regex { field, pattern } => metadata.get(field).is_some_and(|v| pattern.is_match(&v.to_string())),
            Self::Empty { field } => metadata.get(field).is_none_or(|v| v.is_empty()),
            Self::Any { needle } => metadata.iter().any(|(_, v)| v.to_string().to_lowercase().contains(needle.as_str())),
        }
    }
}

/// A parsed selection expression.
#[derive(Debug, Clone, Default)]
pub struct Query {
    terms: Vec<Term>,
}
impl Query {
    /// Parse an expression.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::Configuration`] for an invalid regular expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let terms = tokenize(expression).iter().map(|t| Term::parse(t)).collect::<Result<Vec<_>>>()?;
        Ok(Self { terms })
    }

    /// Whether this query selects every item.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.terms.iter().all(|term| term.matches(metadata))
    }
}

/// Splits on whitespace outside double quotes, dropping the quotes.
fn tokenize(expression: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in expression.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            },
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
