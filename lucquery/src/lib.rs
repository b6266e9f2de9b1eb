//! # lucquery - Expressions de filtrage
//!
//! Deux grammaires, un seul prédicat :
//!
//! - [`daap`] : la grammaire compacte des paramètres `query=` / `filter=`
//!   envoyés par les clients (`'champ:valeur'`, jointures `+`/espace/`,`)
//! - [`smart`] : la grammaire riche des listes de lecture intelligentes
//!   (`artist is "Beatles" and year >= 1965`)
//!
//! Les deux parseurs produisent le même arbre [`QueryNode`], abaissé en
//! clause SQL par [`to_sql`]. L'expression réservée `"1"` est le prédicat
//! vrai-partout des listes intelligentes.

mod fields;
mod node;

pub mod daap;
pub mod smart;

pub use fields::{FieldType, QueryField, find_field};
pub use node::{CmpOp, QueryNode, StrOp, to_sql};

/// Erreurs de parsing d'expression
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Illegal character '{ch}' at index {index}: {expr}")]
    IllegalChar { ch: char, index: usize, expr: String },

    #[error("Illegal operator at index {index}: {expr}")]
    IllegalOperator { index: usize, expr: String },

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Illegal escape '\\{0}'")]
    IllegalEscape(char),

    #[error("Unterminated string literal: {0}")]
    UnterminatedString(String),

    #[error("Unexpected end of expression: {0}")]
    UnexpectedEnd(String),

    #[error("Expected {expected} at index {index}: {expr}")]
    Expected { expected: &'static str, index: usize, expr: String },
}

/// Type Result spécialisé pour lucquery
pub type Result<T> = std::result::Result<T, QueryError>;
