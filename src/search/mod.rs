//! Catalog search: query validation and the matching rules of each mode.
//!
//! Matching is done in SQL by the catalog store. This module owns which
//! columns each mode looks at so the rules stay in one place.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const MAX_QUERY_LEN: usize = 150;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Name, catalog id or color
    #[default]
    All,
    Name,
    Id,
    /// Parts by color name; sets never match
    Color,
}

impl SearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchMode::All => "all",
            SearchMode::Name => "name",
            SearchMode::Id => "id",
            SearchMode::Color => "color",
        }
    }

    /// SQL condition selecting matching rows of `sets`, or `None` when this
    /// mode never returns sets. Uses the `:contains` and `:prefix` parameters.
    pub fn set_condition(&self) -> Option<&'static str> {
        match self {
            SearchMode::All => Some(
                "(s.name LIKE :contains ESCAPE '\\' OR s.lego_id LIKE :prefix ESCAPE '\\')",
            ),
            SearchMode::Name => Some("s.name LIKE :contains ESCAPE '\\'"),
            SearchMode::Id => Some("s.lego_id LIKE :prefix ESCAPE '\\'"),
            SearchMode::Color => None,
        }
    }

    /// SQL condition selecting matching parts, joined as `sh` (shapes) and
    /// `c` (colors).
    pub fn part_condition(&self) -> &'static str {
        match self {
            SearchMode::All => {
                "(sh.name LIKE :contains ESCAPE '\\' OR sh.lego_id LIKE :prefix ESCAPE '\\' \
                 OR c.name LIKE :contains ESCAPE '\\')"
            }
            SearchMode::Name => "sh.name LIKE :contains ESCAPE '\\'",
            SearchMode::Id => "sh.lego_id LIKE :prefix ESCAPE '\\'",
            SearchMode::Color => "c.name LIKE :contains ESCAPE '\\'",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = SearchQueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(SearchMode::All),
            "name" => Ok(SearchMode::Name),
            "id" => Ok(SearchMode::Id),
            "color" => Ok(SearchMode::Color),
            other => Err(SearchQueryError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SearchQueryError {
    #[error("This field is required.")]
    Empty,
    #[error(
        "Ensure this value has at most {max} characters (it has {0}).",
        max = MAX_QUERY_LEN
    )]
    TooLong(usize),
    #[error("Select a valid choice. {0} is not one of the available choices.")]
    UnknownMode(String),
}

/// A validated search request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchQuery {
    text: String,
    mode: SearchMode,
}

impl SearchQuery {
    pub fn new<S: Into<String>>(text: S, mode: SearchMode) -> Result<Self, SearchQueryError> {
        let text = text.into();
        let text = text.trim();
        if text.is_empty() {
            return Err(SearchQueryError::Empty);
        }
        let len = text.chars().count();
        if len > MAX_QUERY_LEN {
            return Err(SearchQueryError::TooLong(len));
        }
        Ok(SearchQuery {
            text: text.to_string(),
            mode,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn mode(&self) -> SearchMode {
        self.mode
    }

    /// LIKE pattern for a substring match.
    pub fn contains_pattern(&self) -> String {
        format!("%{}%", escape_like(&self.text))
    }

    /// LIKE pattern for a prefix match.
    pub fn prefix_pattern(&self) -> String {
        format!("{}%", escape_like(&self.text))
    }
}

fn escape_like(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
