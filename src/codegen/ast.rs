//! Syntax tree of a parsed program

use crate::protocol::Range;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    /// Numeric literal as written
    Number(String),
    Template(Vec<TemplatePart>),
    Traversal {
        root: String,
        accessors: Vec<Accessor>,
        range: Range,
    },
    List(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    Call {
        name: String,
        args: Vec<Expr>,
        range: Range,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TemplatePart {
    Literal(String),
    Interpolation(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accessor {
    Attr(String),
    Index(Expr),
}

impl Expr {
    pub fn string(value: impl Into<String>) -> Self {
        Expr::Template(vec![TemplatePart::Literal(value.into())])
    }

    /// The value of a string with no interpolations
    pub fn as_literal_str(&self) -> Option<String> {
        let Expr::Template(parts) = self else {
            return None;
        };
        let mut out = String::new();
        for part in parts {
            match part {
                TemplatePart::Literal(s) => out.push_str(s),
                TemplatePart::Interpolation(_) => return None,
            }
        }
        Some(out)
    }

    /// Visit this expression and every expression nested in it.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Interpolation(e) = part {
                        e.walk(f);
                    }
                }
            }
            Expr::Traversal { accessors, .. } => {
                for accessor in accessors {
                    if let Accessor::Index(e) = accessor {
                        e.walk(f);
                    }
                }
            }
            Expr::List(items) | Expr::Call { args: items, .. } => {
                for e in items {
                    e.walk(f);
                }
            }
            Expr::Object(entries) => {
                for (_, e) in entries {
                    e.walk(f);
                }
            }
            Expr::Null | Expr::Bool(_) | Expr::Number(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Expr,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigBlock {
    pub name: String,
    pub type_name: String,
    pub default: Option<Expr>,
    pub description: Option<String>,
    pub range: Range,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceOptions {
    pub protect: Option<Expr>,
    pub depends_on: Option<Expr>,
    pub parent: Option<Expr>,
    pub provider: Option<Expr>,
    pub ignore_changes: Option<Expr>,
}

impl ResourceOptions {
    pub fn is_empty(&self) -> bool {
        self.entries().next().is_none()
    }

    /// Set options in a fixed order, with their snake_case names
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, &Expr)> {
        [
            ("protect", &self.protect),
            ("depends_on", &self.depends_on),
            ("parent", &self.parent),
            ("provider", &self.provider),
            ("ignore_changes", &self.ignore_changes),
        ]
        .into_iter()
        .filter_map(|(name, e)| e.as_ref().map(|e| (name, e)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBlock {
    pub name: String,
    /// `package:module:Type`
    pub token: String,
    pub attributes: Vec<Attribute>,
    pub options: ResourceOptions,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputBlock {
    pub name: String,
    pub value: Expr,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalBinding {
    pub name: String,
    pub value: Expr,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Config(ConfigBlock),
    Resource(ResourceBlock),
    Output(OutputBlock),
    Local(LocalBinding),
}

impl Item {
    pub fn name(&self) -> &str {
        match self {
            Item::Config(c) => &c.name,
            Item::Resource(r) => &r.name,
            Item::Output(o) => &o.name,
            Item::Local(l) => &l.name,
        }
    }

    pub fn range(&self) -> &Range {
        match self {
            Item::Config(c) => &c.range,
            Item::Resource(r) => &r.range,
            Item::Output(o) => &o.range,
            Item::Local(l) => &l.range,
        }
    }

    /// Every top-level expression of the item
    pub fn expressions(&self) -> Vec<&Expr> {
        match self {
            Item::Config(c) => c.default.iter().collect(),
            Item::Resource(r) => r
                .attributes
                .iter()
                .map(|a| &a.value)
                .chain(r.options.entries().map(|(_, e)| e))
                .collect(),
            Item::Output(o) => vec![&o.value],
            Item::Local(l) => vec![&l.value],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub name: String,
    pub items: Vec<Item>,
}

/// `package:module:Type`, with the module path cut at its first `/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeToken {
    pub package: String,
    pub module: String,
    pub member: String,
}

impl TypeToken {
    pub fn parse(token: &str) -> Option<Self> {
        let mut parts = token.split(':');
        let package = parts.next()?;
        let module = parts.next()?;
        let member = parts.next()?;
        if parts.next().is_some() || package.is_empty() || member.is_empty() {
            return None;
        }
        let module = module.split('/').next().unwrap_or_default();
        Some(Self {
            package: package.to_string(),
            module: if module.is_empty() { "index" } else { module }.to_string(),
            member: member.to_string(),
        })
    }
}
