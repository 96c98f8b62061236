use std::fmt;
use twin_types::Node;

/// `insert into <target> select <projections>`
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub target: String,
    pub projections: Vec<Projection>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// `<expr> as <alias>`
    Expr { expr: Expr, alias: String },
    /// `<entity>.*`
    Wildcard { entity: String },
}

/// Reference to one property of one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyRef {
    pub entity: String,
    pub path: String,
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.entity, self.path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Node),
    Property(PropertyRef),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Collect every property reference in evaluation order
    pub fn references<'a>(&'a self, out: &mut Vec<&'a PropertyRef>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Property(r) => out.push(r),
            Expr::Neg(inner) => inner.references(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.references(out);
                rhs.references(out);
            }
        }
    }
}
