//! Python emission for parsed programs
//!
//! Each `.pp` file becomes one Python module; `main.pp` becomes
//! `__main__.py`. Items are emitted in source order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use super::names::{import_name, package_alias, py_str, python_ident, snake_case};
use crate::codegen::ast::{ConfigBlock, ResourceBlock};
use crate::codegen::{
    Accessor, DeclKind, Declaration, Expr, Item, Program, SourceFile, TemplatePart, TypeToken,
    MAIN_FILE,
};
use crate::protocol::{Diagnostic, Diagnostics};

pub const MAIN_MODULE: &str = "__main__.py";

/// Output file name for a program file
pub fn output_name(source: &str) -> String {
    if Path::new(source).file_name().is_some_and(|n| n == MAIN_FILE) {
        let parent = Path::new(source).parent().unwrap_or_else(|| Path::new(""));
        return parent.join(MAIN_MODULE).display().to_string();
    }
    Path::new(source).with_extension("py").display().to_string()
}

fn module_of(source: &str) -> String {
    let stem = Path::new(source)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    python_ident(&stem)
}

struct Emitter<'a> {
    file: &'a SourceFile,
    decls: &'a BTreeMap<String, Declaration>,
    imports: BTreeSet<String>,
    packages: BTreeSet<String>,
    cross_file: BTreeMap<String, BTreeSet<String>>,
}

impl<'a> Emitter<'a> {
    fn new(file: &'a SourceFile, decls: &'a BTreeMap<String, Declaration>) -> Self {
        Self {
            file,
            decls,
            imports: BTreeSet::new(),
            packages: BTreeSet::new(),
            cross_file: BTreeMap::new(),
        }
    }

    fn is_resource(&self, root: &str) -> bool {
        self.decls
            .get(root)
            .is_some_and(|d| d.kind == DeclKind::Resource)
    }

    fn mentions_resource(&self, expr: &Expr) -> bool {
        let mut found = false;
        expr.walk(&mut |e| {
            if let Expr::Traversal { root, .. } = e {
                found |= self.is_resource(root);
            }
        });
        found
    }

    fn note_reference(&mut self, root: &str) {
        if let Some(decl) = self.decls.get(root) {
            if decl.file != self.file.name {
                self.cross_file
                    .entry(decl.file.clone())
                    .or_default()
                    .insert(python_ident(root));
            }
        }
    }

    fn expr(&mut self, expr: &Expr) -> String {
        match expr {
            Expr::Null => "None".to_string(),
            Expr::Bool(true) => "True".to_string(),
            Expr::Bool(false) => "False".to_string(),
            Expr::Number(n) => n.clone(),
            Expr::Template(parts) => self.template(parts),
            Expr::Traversal {
                root, accessors, ..
            } => {
                self.note_reference(root);
                let resource = self.is_resource(root);
                let mut out = python_ident(root);
                for accessor in accessors {
                    match accessor {
                        Accessor::Attr(name) if resource => {
                            let _ = write!(out, ".{}", python_ident(name));
                        }
                        Accessor::Attr(name) => {
                            let _ = write!(out, "[{}]", py_str(name));
                        }
                        Accessor::Index(index) => {
                            let index = self.expr(index);
                            let _ = write!(out, "[{}]", index);
                        }
                    }
                }
                out
            }
            Expr::List(items) => {
                let items: Vec<String> = items.iter().map(|e| self.expr(e)).collect();
                format!("[{}]", items.join(", "))
            }
            Expr::Object(entries) => {
                let entries: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{}: {}", py_str(k), self.expr(v)))
                    .collect();
                format!("{{{}}}", entries.join(", "))
            }
            Expr::Call { name, args, .. } => self.call(name, args),
        }
    }

    fn template(&mut self, parts: &[TemplatePart]) -> String {
        if let Some(text) = Expr::Template(parts.to_vec()).as_literal_str() {
            return py_str(&text);
        }

        let outputs = parts.iter().any(|p| match p {
            TemplatePart::Interpolation(e) => self.mentions_resource(e),
            TemplatePart::Literal(_) => false,
        });
        let rendered: Vec<(bool, String)> = parts
            .iter()
            .map(|p| match p {
                TemplatePart::Literal(s) => (true, s.clone()),
                TemplatePart::Interpolation(e) => (false, self.expr(e)),
            })
            .collect();

        if outputs {
            self.imports.insert("langhost".to_string());
            let args: Vec<String> = rendered
                .iter()
                .map(|(lit, s)| if *lit { py_str(s) } else { s.clone() })
                .collect();
            return format!("langhost.Output.concat({})", args.join(", "));
        }

        let f_string_safe = rendered
            .iter()
            .all(|(lit, s)| *lit || !(s.contains('"') || s.contains('\\')));
        if f_string_safe {
            let mut out = String::from("f\"");
            for (lit, s) in &rendered {
                if *lit {
                    let quoted = py_str(s);
                    let body = &quoted[1..quoted.len() - 1];
                    out.push_str(&body.replace('{', "{{").replace('}', "}}"));
                } else {
                    let _ = write!(out, "{{{}}}", s);
                }
            }
            out.push('"');
            out
        } else {
            let args: Vec<String> = rendered
                .iter()
                .map(|(lit, s)| if *lit { py_str(s) } else { format!("str({})", s) })
                .collect();
            format!("\"\".join([{}])", args.join(", "))
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> String {
        match (name, args) {
            ("toJSON", [value]) => {
                let rendered = self.expr(value);
                if self.mentions_resource(value) {
                    format!("langhost.Output.json_dumps({})", rendered)
                } else {
                    self.imports.insert("json".to_string());
                    format!("json.dumps({})", rendered)
                }
            }
            ("readFile", [path]) => {
                self.imports.insert("pathlib".to_string());
                format!("pathlib.Path({}).read_text()", self.expr(path))
            }
            ("secret", [value]) => format!("langhost.Output.secret({})", self.expr(value)),
            ("invoke", [token, rest @ ..]) => {
                let Some(token) = token.as_literal_str().and_then(|t| TypeToken::parse(&t)) else {
                    return "None".to_string();
                };
                self.packages.insert(token.package.clone());
                let function = format!("{}_output", python_ident(&token.member));
                let kwargs = match rest.first() {
                    None => String::new(),
                    Some(Expr::Object(entries)) => entries
                        .iter()
                        .map(|(k, v)| format!("{}={}", python_ident(k), self.expr(v)))
                        .collect::<Vec<_>>()
                        .join(", "),
                    Some(other) => format!("**{}", self.expr(other)),
                };
                format!("{}({})", qualified(&token, &function), kwargs)
            }
            // Reported by the checker; emit a placeholder so the rest still generates
            _ => "None".to_string(),
        }
    }

    fn config(&mut self, out: &mut String, config: &ConfigBlock) {
        let ident = python_ident(&config.name);
        let (require, get) = match config.type_name.as_str() {
            "string" => ("require", "get"),
            "int" => ("require_int", "get_int"),
            "number" => ("require_float", "get_float"),
            "bool" => ("require_bool", "get_bool"),
            _ => ("require_object", "get_object"),
        };
        if let Some(description) = &config.description {
            let _ = writeln!(out, "# {}", description);
        }
        match &config.default {
            None => {
                let _ = writeln!(out, "{} = config.{}({})", ident, require, py_str(&config.name));
            }
            Some(default) => {
                let default = self.expr(default);
                let _ = writeln!(out, "{} = config.{}({})", ident, get, py_str(&config.name));
                let _ = writeln!(out, "if {} is None:", ident);
                let _ = writeln!(out, "    {} = {}", ident, default);
            }
        }
    }

    fn resource(&mut self, out: &mut String, resource: &ResourceBlock) {
        let ident = python_ident(&resource.name);
        let Some(token) = TypeToken::parse(&resource.token) else {
            let _ = writeln!(out, "{} = None", ident);
            return;
        };
        self.packages.insert(token.package.clone());

        let mut args = vec![py_str(&resource.name)];
        for attr in &resource.attributes {
            let value = self.expr(&attr.value);
            args.push(format!("{}={}", python_ident(&attr.name), value));
        }
        if !resource.options.is_empty() {
            let options: Vec<String> = resource
                .options
                .entries()
                .map(|(name, e)| format!("{}={}", name, self.expr(e)))
                .collect();
            args.push(format!("opts=langhost.ResourceOptions({})", options.join(", ")));
        }

        let constructor = qualified(&token, &token.member);
        if args.len() == 1 {
            let _ = writeln!(out, "{} = {}({})", ident, constructor, args[0]);
        } else {
            let _ = writeln!(out, "{} = {}(", ident, constructor);
            for arg in args {
                let _ = writeln!(out, "    {},", arg);
            }
            let _ = writeln!(out, ")");
        }
    }

    fn emit(mut self, diags: &mut Diagnostics) -> String {
        let file = self.file;
        let mut body = String::new();
        if file.items.iter().any(|i| matches!(i, Item::Config(_))) {
            body.push_str("config = langhost.Config()\n");
        }

        for item in &file.items {
            match item {
                Item::Config(c) => self.config(&mut body, c),
                Item::Local(l) => {
                    let value = self.expr(&l.value);
                    let _ = writeln!(body, "{} = {}", python_ident(&l.name), value);
                }
                Item::Resource(r) => self.resource(&mut body, r),
                Item::Output(o) => {
                    let value = self.expr(&o.value);
                    let _ = writeln!(body, "langhost.export({}, {})", py_str(&o.name), value);
                }
            }
        }

        let mut header = String::new();
        for module in &self.imports {
            if module != "langhost" {
                let _ = writeln!(header, "import {}", module);
            }
        }
        header.push_str("import langhost\n");
        for package in &self.packages {
            let _ = writeln!(header, "import {} as {}", import_name(package), package_alias(package));
        }
        for (source, names) in &self.cross_file {
            if Path::new(source).file_name().is_some_and(|n| n == MAIN_FILE) {
                diags.push(Diagnostic::warning(format!(
                    "{} references {} declared in {}, which cannot be imported",
                    file.name,
                    names.iter().cloned().collect::<Vec<_>>().join(", "),
                    MAIN_FILE
                )));
                continue;
            }
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let _ = writeln!(header, "from {} import {}", module_of(source), names.join(", "));
        }

        if body.is_empty() {
            header
        } else {
            format!("{}\n{}", header, body)
        }
    }
}

fn qualified(token: &TypeToken, member: &str) -> String {
    let alias = package_alias(&token.package);
    if token.module == "index" {
        format!("{}.{}", alias, member)
    } else {
        format!("{}.{}.{}", alias, snake_case(&token.module), member)
    }
}

/// Emit every file of `program` as Python source.
pub fn emit_program(program: &Program, diags: &mut Diagnostics) -> BTreeMap<String, String> {
    let decls = program.declarations();
    let mut out = BTreeMap::new();
    for file in &program.files {
        let source = Emitter::new(file, &decls).emit(diags);
        out.insert(output_name(&file.name), source);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit(files: &[(&str, &str)]) -> (BTreeMap<String, String>, Diagnostics) {
        let sources: BTreeMap<String, String> = files
            .iter()
            .map(|(n, s)| (n.to_string(), s.to_string()))
            .collect();
        let mut diags = Diagnostics::new();
        let program = Program::parse(&sources, &mut diags);
        let out = emit_program(&program, &mut diags);
        (out, diags)
    }

    #[test]
    fn names_output_files() {
        assert_eq!(output_name("main.pp"), "__main__.py");
        assert_eq!(output_name("network.pp"), "network.py");
    }

    #[test]
    fn emits_a_complete_program() {
        let (out, diags) = emit(&[(
            "main.pp",
            r#"config bucketName "string" {
  default = "logs"
}
config replicas "int" {}

resource bucket "aws:s3/bucket:Bucket" {
  bucket = bucketName
  tags = { env = "dev" }
  options {
    protect = true
  }
}

label = "name-${bucketName}"
arnLabel = "arn-${bucket.arn}"
policy = toJSON({ size = replicas })

output bucketArn {
  value = bucket.arn
}
"#,
        )]);
        assert!(diags.is_empty(), "{:?}", diags.iter().collect::<Vec<_>>());
        let main = &out["__main__.py"];
        let expected = "\
import json
import langhost
import langhost_aws as aws

config = langhost.Config()
bucket_name = config.get(\"bucketName\")
if bucket_name is None:
    bucket_name = \"logs\"
replicas = config.require_int(\"replicas\")
bucket = aws.s3.Bucket(
    \"bucket\",
    bucket=bucket_name,
    tags={\"env\": \"dev\"},
    opts=langhost.ResourceOptions(protect=True),
)
label = f\"name-{bucket_name}\"
arn_label = langhost.Output.concat(\"arn-\", bucket.arn)
policy = json.dumps({\"size\": replicas})
langhost.export(\"bucketArn\", bucket.arn)
";
        assert_eq!(main, expected);
    }

    #[test]
    fn invokes_and_secrets() {
        let (out, _) = emit(&[(
            "main.pp",
            "ami = invoke(\"aws:ec2/getAmi:getAmi\", { mostRecent = true })\n\
             token = secret(\"abc\")\n\
             script = readFile(\"./init.sh\")\n",
        )]);
        let main = &out["__main__.py"];
        assert!(main.contains("ami = aws.ec2.get_ami_output(most_recent=True)"));
        assert!(main.contains("token = langhost.Output.secret(\"abc\")"));
        assert!(main.contains("script = pathlib.Path(\"./init.sh\").read_text()"));
        assert!(main.starts_with("import pathlib\nimport langhost\n"));
    }

    #[test]
    fn cross_file_references_are_imported() {
        let (out, _) = emit(&[
            ("main.pp", "output id {\n  value = vpc.id\n}\n"),
            ("network.pp", "resource vpc \"aws:ec2:Vpc\" {\n  cidrBlock = \"10.0.0.0/16\"\n}\n"),
        ]);
        assert!(out["__main__.py"].contains("from network import vpc\n"));
        assert!(out["network.py"].contains("cidr_block=\"10.0.0.0/16\""));
    }

    #[test]
    fn non_resource_traversals_index_by_key() {
        let (out, _) = emit(&[(
            "main.pp",
            "settings = { sizes = [1, 2] }\nfirst = settings.sizes[0]\n",
        )]);
        assert!(out["__main__.py"].contains("first = settings[\"sizes\"][0]\n"));
    }

    #[test]
    fn template_with_quoted_index_avoids_f_string() {
        let (out, _) = emit(&[(
            "main.pp",
            "m = { a = \"x\" }\nv = \"val-${m.a}\"\n",
        )]);
        assert!(out["__main__.py"].contains("v = \"\".join([\"val-\", str(m[\"a\"])])"));
    }
}
