use thiserror::Error;

pub type QueryResult<T = ()> = Result<T, QueryError>;

/// Structural errors. Missing data never ends up here, it resolves to an
/// empty or null result instead.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("could not resolve component `{0}`")]
    UnknownComponent(String),

    #[error("unknown cmd `{0}`")]
    UnknownCommand(&'static str),

    #[error("alias `{0}` was never stored")]
    MissingAlias(String),

    #[error("malformed query expression: {0}")]
    MalformedExpression(String),

    #[error("`{command}` cannot be applied to {found}")]
    InvalidTarget {
        command: &'static str,
        found: &'static str,
    },

    #[error("failed to parse query config: {0}")]
    Config(#[from] toml::de::Error),
}
