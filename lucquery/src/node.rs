//! Arbre de requête et abaissement SQL.

use crate::fields::{FieldType, QueryField};

/// Comparaison arithmétique
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Le,
    Lt,
    Ge,
    Gt,
}

impl CmpOp {
    fn sql(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Le => "<=",
            CmpOp::Lt => "<",
            CmpOp::Ge => ">=",
            CmpOp::Gt => ">",
        }
    }

    /// Négation (préfixe `!` de la grammaire DAAP)
    pub fn negate(self) -> Self {
        match self {
            CmpOp::Eq => CmpOp::Ne,
            CmpOp::Ne => CmpOp::Eq,
            CmpOp::Gt => CmpOp::Le,
            CmpOp::Le => CmpOp::Gt,
            CmpOp::Lt => CmpOp::Ge,
            CmpOp::Ge => CmpOp::Lt,
        }
    }
}

/// Comparaison de chaîne
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrOp {
    Is,
    Begins,
    Ends,
    Contains,
}

/// Nœud d'expression, commun aux deux grammaires
#[derive(Debug, Clone)]
pub enum QueryNode {
    And(Box<QueryNode>, Box<QueryNode>),
    Or(Box<QueryNode>, Box<QueryNode>),
    Not(Box<QueryNode>),
    IntCmp {
        field: &'static QueryField,
        op: CmpOp,
        value: i64,
    },
    StrCmp {
        field: &'static QueryField,
        op: StrOp,
        value: String,
    },
    /// Prédicat vrai-partout (expression vide, raccourci `"1"`)
    ConstTrue,
}

/// Échappe une valeur littérale : chaque apostrophe est doublée
pub fn sql_escape(term: &str) -> String {
    term.replace('\'', "''")
}

/// Abaisse l'arbre en clause SQL évaluable par le catalogue
pub fn to_sql(node: &QueryNode) -> String {
    match node {
        QueryNode::And(left, right) => format!("({} AND {})", to_sql(left), to_sql(right)),
        QueryNode::Or(left, right) => format!("({} OR {})", to_sql(left), to_sql(right)),
        QueryNode::Not(inner) => format!("(NOT {})", to_sql(inner)),
        QueryNode::IntCmp { field, op, value } => {
            debug_assert!(matches!(field.ftype, FieldType::I32 | FieldType::I64));
            format!("({} {} {})", field.column, op.sql(), value)
        }
        QueryNode::StrCmp { field, op, value } => {
            let escaped = sql_escape(value);
            match op {
                StrOp::Is => format!("({}='{}')", field.column, escaped),
                StrOp::Begins => format!("({} LIKE '{}%')", field.column, escaped),
                StrOp::Ends => format!("({} LIKE '%{}')", field.column, escaped),
                StrOp::Contains => format!("({} LIKE '%{}%')", field.column, escaped),
            }
        }
        QueryNode::ConstTrue => "1".to_string(),
    }
}
