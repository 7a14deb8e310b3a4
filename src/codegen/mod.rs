//! Language-neutral program representation
//!
//! Programs arrive as `.pp` files: a small block language with `config`,
//! `resource` and `output` blocks plus local values. This module parses
//! them and checks names; emitting a concrete language is the job of each
//! runtime.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{Accessor, Expr, Item, SourceFile, TemplatePart, TypeToken};

use std::collections::{BTreeMap, BTreeSet};

use crate::protocol::{Diagnostic, Diagnostics};

pub const SOURCE_EXTENSION: &str = "pp";
pub const MAIN_FILE: &str = "main.pp";

/// Functions a program may call
pub const BUILTIN_FUNCTIONS: [&str; 4] = ["toJSON", "readFile", "secret", "invoke"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Config,
    Resource,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclKind,
    /// File that declares the name
    pub file: String,
}

/// Every file of one program
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub files: Vec<SourceFile>,
}

impl Program {
    /// Parse every `.pp` entry of `sources`; other entries are ignored.
    pub fn parse(sources: &BTreeMap<String, String>, diags: &mut Diagnostics) -> Self {
        let mut files = Vec::new();
        for (name, text) in sources {
            if std::path::Path::new(name)
                .extension()
                .is_none_or(|ext| ext != SOURCE_EXTENSION)
            {
                tracing::debug!("skipping non-program source {}", name);
                continue;
            }
            files.push(parser::parse_file(name, text, diags));
        }
        Self { files }
    }

    pub fn is_empty(&self) -> bool {
        self.files.iter().all(|f| f.items.is_empty())
    }

    /// Referenceable names: configs, resources and locals
    pub fn declarations(&self) -> BTreeMap<String, Declaration> {
        let mut out = BTreeMap::new();
        for file in &self.files {
            for item in &file.items {
                let kind = match item {
                    Item::Config(_) => DeclKind::Config,
                    Item::Resource(_) => DeclKind::Resource,
                    Item::Local(_) => DeclKind::Local,
                    Item::Output(_) => continue,
                };
                out.entry(item.name().to_string()).or_insert(Declaration {
                    kind,
                    file: file.name.clone(),
                });
            }
        }
        out
    }

    /// Packages used by resources and invokes
    pub fn packages(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for file in &self.files {
            for item in &file.items {
                if let Item::Resource(r) = item {
                    if let Some(token) = TypeToken::parse(&r.token) {
                        out.insert(token.package);
                    }
                }
                for expr in item.expressions() {
                    expr.walk(&mut |e| {
                        if let Some(token) = invoke_token(e) {
                            out.insert(token.package);
                        }
                    });
                }
            }
        }
        out
    }

    /// Name and shape checks.
    ///
    /// References to undeclared names are warnings, or errors in strict mode.
    pub fn check(&self, strict: bool, diags: &mut Diagnostics) {
        let declarations = self.declarations();
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();

        for file in &self.files {
            for item in &file.items {
                if !matches!(item, Item::Output(_)) {
                    if let Some(first) = seen.insert(item.name(), &file.name) {
                        diags.push(
                            Diagnostic::error(format!("duplicate declaration of '{}'", item.name()))
                                .with_detail(format!("first declared in {}", first))
                                .at(item.range().clone()),
                        );
                    }
                }

                if let Item::Resource(r) = item {
                    if TypeToken::parse(&r.token).is_none() {
                        diags.push(
                            Diagnostic::error(format!("invalid resource type '{}'", r.token))
                                .with_detail("expected package:module:Type")
                                .at(r.range.clone()),
                        );
                    }
                }

                for expr in item.expressions() {
                    expr.walk(&mut |e| check_expr(e, &declarations, strict, diags));
                }
            }
        }
    }
}

fn invoke_token(expr: &Expr) -> Option<TypeToken> {
    match expr {
        Expr::Call { name, args, .. } if name == "invoke" => {
            TypeToken::parse(&args.first()?.as_literal_str()?)
        }
        _ => None,
    }
}

fn check_expr(
    expr: &Expr,
    declarations: &BTreeMap<String, Declaration>,
    strict: bool,
    diags: &mut Diagnostics,
) {
    match expr {
        Expr::Traversal { root, range, .. } if !declarations.contains_key(root) => {
            let summary = format!("undeclared reference '{}'", root);
            let diagnostic = if strict {
                Diagnostic::error(summary)
            } else {
                Diagnostic::warning(summary)
            };
            diags.push(diagnostic.at(range.clone()));
        }
        Expr::Call { name, args, range } => {
            if !BUILTIN_FUNCTIONS.contains(&name.as_str()) {
                diags.push(
                    Diagnostic::error(format!("unsupported function '{}'", name))
                        .with_detail(format!("supported: {}", BUILTIN_FUNCTIONS.join(", ")))
                        .at(range.clone()),
                );
                return;
            }
            let expected = match name.as_str() {
                "invoke" => 1..=2,
                _ => 1..=1,
            };
            if !expected.contains(&args.len()) {
                diags.push(
                    Diagnostic::error(format!(
                        "{} takes {} argument(s), got {}",
                        name,
                        expected.start(),
                        args.len()
                    ))
                    .at(range.clone()),
                );
            } else if name == "invoke" && invoke_token(expr).is_none() {
                diags.push(
                    Diagnostic::error("invoke needs a literal function token")
                        .with_detail("expected \"package:module:function\"")
                        .at(range.clone()),
                );
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Severity;

    fn program(files: &[(&str, &str)]) -> (Program, Diagnostics) {
        let sources: BTreeMap<String, String> = files
            .iter()
            .map(|(n, s)| (n.to_string(), s.to_string()))
            .collect();
        let mut diags = Diagnostics::new();
        let program = Program::parse(&sources, &mut diags);
        (program, diags)
    }

    #[test]
    fn empty_program_has_no_diagnostics() {
        let (program, mut diags) = program(&[]);
        program.check(true, &mut diags);
        assert!(program.is_empty());
        assert!(diags.is_empty());
    }

    #[test]
    fn undeclared_names_depend_on_strictness() {
        let (program, _) = program(&[("main.pp", "output o {\n  value = missing.id\n}\n")]);

        let mut lenient = Diagnostics::new();
        program.check(false, &mut lenient);
        assert_eq!(lenient.len(), 1);
        assert_eq!(lenient.iter().next().unwrap().severity, Severity::Warning);

        let mut strict = Diagnostics::new();
        program.check(true, &mut strict);
        assert!(strict.has_errors());
    }

    #[test]
    fn declarations_span_files() {
        let (program, _) = program(&[
            ("main.pp", "output o {\n  value = bucket.arn\n}\n"),
            ("storage.pp", "resource bucket \"aws:s3:Bucket\" {}\n"),
            ("README.md", "not a program"),
        ]);
        assert_eq!(program.files.len(), 2);
        let mut diags = Diagnostics::new();
        program.check(true, &mut diags);
        assert!(diags.is_empty());
        assert_eq!(program.declarations()["bucket"].file, "storage.pp");
    }

    #[test]
    fn reports_duplicates_bad_types_and_unknown_functions() {
        let (program, _) = program(&[(
            "main.pp",
            "a = 1\na = 2\nresource r \"nope\" {}\nb = md5(\"x\")\nc = invoke(a)\n",
        )]);
        let mut diags = Diagnostics::new();
        program.check(false, &mut diags);
        let summaries: Vec<_> = diags.iter().map(|d| d.summary.clone()).collect();
        assert!(summaries.contains(&"duplicate declaration of 'a'".to_string()));
        assert!(summaries.contains(&"invalid resource type 'nope'".to_string()));
        assert!(summaries.contains(&"unsupported function 'md5'".to_string()));
        assert!(summaries.contains(&"invoke needs a literal function token".to_string()));
    }

    #[test]
    fn collects_packages() {
        let (program, _) = program(&[(
            "main.pp",
            "resource b \"aws:s3:Bucket\" {}\nresource p \"random:index:RandomPet\" {}\n\
             ami = invoke(\"gcp:compute:getImage\", {})\n",
        )]);
        let packages: Vec<_> = program.packages().into_iter().collect();
        assert_eq!(packages, ["aws", "gcp", "random"]);
    }
}
