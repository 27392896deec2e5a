use serde::{Deserialize, Serialize};
use toml::Table;

use crate::QueryResult;

/// A section of a TOML document, falling back to `Default` when the
/// section is absent.
pub trait ConfigSection: for<'a> Deserialize<'a> + Default {
    fn section_name() -> &'static str;

    fn from_toml(source: &str) -> QueryResult<Self> {
        let table: Table = source.parse()?;
        match table.get(Self::section_name()) {
            Some(value) => Ok(value.clone().try_into()?),
            None => Ok(Self::default()),
        }
    }
}

/// Per-execution switches for `Query::execute`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteOptions {
    /// Trace every executed command and every rejected filter test.
    pub debug: bool,
}

impl ExecuteOptions {
    pub fn debug() -> Self {
        Self { debug: true }
    }
}

impl ConfigSection for ExecuteOptions {
    fn section_name() -> &'static str {
        "query"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_query_section() {
        let options = ExecuteOptions::from_toml("[query]\ndebug = true\n").unwrap();
        assert!(options.debug);
    }

    #[test]
    fn missing_section_defaults() {
        let options = ExecuteOptions::from_toml("[other]\nkey = 1\n").unwrap();
        assert_eq!(options, ExecuteOptions::default());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(ExecuteOptions::from_toml("[query\n").is_err());
        assert!(ExecuteOptions::from_toml("[query]\ndebug = \"yes\"\n").is_err());
    }
}
