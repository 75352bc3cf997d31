//! Expression syntax tree

use schema::Value;
use std::fmt;

/// A reference to a value produced elsewhere in the configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reference {
    /// `TYPE.NAME.ATTR[.path]`
    Resource {
        resource_type: String,
        name: String,
        attribute: String,
    },
    /// `var.NAME`
    Variable { name: String },
}

impl Reference {
    /// Parse a dotted reference path
    pub fn parse(path: &str) -> Option<Self> {
        let parts: Vec<&str> = path.split('.').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return None;
        }
        match parts.as_slice() {
            ["var", name] => Some(Self::Variable {
                name: (*name).to_string(),
            }),
            ["var", ..] => None,
            [resource_type, name, attribute @ ..] if !attribute.is_empty() => {
                Some(Self::Resource {
                    resource_type: (*resource_type).to_string(),
                    name: (*name).to_string(),
                    attribute: attribute.join("."),
                })
            }
            _ => None,
        }
    }

    /// `TYPE.NAME` of a resource reference
    pub fn resource_address(&self) -> Option<String> {
        match self {
            Self::Resource {
                resource_type,
                name,
                ..
            } => Some(format!("{resource_type}.{name}")),
            Self::Variable { .. } => None,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource {
                resource_type,
                name,
                attribute,
            } => write!(f, "{resource_type}.{name}.{attribute}"),
            Self::Variable { name } => write!(f, "var.{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }
}

/// Expression inside `${ ... }`
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Reference(Reference),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

impl Expr {
    /// Collect every reference in evaluation order
    pub fn references(&self, out: &mut Vec<Reference>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(reference) => out.push(reference.clone()),
            Self::List(items) | Self::Call { args: items, .. } => {
                for item in items {
                    item.references(out);
                }
            }
            Self::Index { target, index } => {
                target.references(out);
                index.references(out);
            }
            Self::Unary { expr, .. } => expr.references(out),
            Self::Binary { left, right, .. } => {
                left.references(out);
                right.references(out);
            }
            Self::Conditional {
                cond,
                then,
                otherwise,
            } => {
                cond.references(out);
                then.references(out);
                otherwise.references(out);
            }
        }
    }
}

/// One segment of a template
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Literal(String),
    /// Parsed expression with its source text
    Expr { expr: Expr, source: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_references() {
        assert_eq!(
            Reference::parse("aws_instance.web.private_ip"),
            Some(Reference::Resource {
                resource_type: "aws_instance".to_string(),
                name: "web".to_string(),
                attribute: "private_ip".to_string(),
            })
        );
        assert_eq!(
            Reference::parse("test_resource.a.list.0").map(|r| r.to_string()),
            Some("test_resource.a.list.0".to_string())
        );
        assert_eq!(
            Reference::parse("var.region"),
            Some(Reference::Variable {
                name: "region".to_string()
            })
        );
        assert_eq!(Reference::parse("var.a.b"), None);
        assert_eq!(Reference::parse("aws_instance.web"), None);
        assert_eq!(Reference::parse("a..b"), None);
    }

    #[test]
    fn resource_address() {
        let reference = Reference::parse("t.n.id").unwrap();
        assert_eq!(reference.resource_address().as_deref(), Some("t.n"));
    }
}
