//! GeneratePackage: a Python SDK for one resource package schema

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use super::names::{
    distribution_name, import_name, pascal_case, py_str, python_ident, snake_case,
};
use super::project::{CORE_PACKAGE, CORE_REQUIREMENT};
use super::write_file;
use crate::codegen::TypeToken;
use crate::protocol::{Diagnostic, Diagnostics, GeneratePackageRequest};
use crate::runtime::python::requirements::PYPROJECT_FILE;
use crate::runtime::python::site_packages::PLUGIN_MARKER;
use crate::{LanghostError, Result};

const HEADER: &str = "# coding=utf-8\n\
# *** WARNING: this file was generated by langhost. ***\n\
# *** Do not edit by hand unless you're certain you know what you are doing! ***\n";

const INDEX_MODULE: &str = "_index";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PackageSchema {
    pub name: String,
    pub version: String,
    pub description: String,
    pub plugin_download_url: String,
    pub config: ConfigSchema,
    /// Type token -> resource
    pub resources: BTreeMap<String, ResourceSchema>,
    /// Function token -> function
    pub functions: BTreeMap<String, FunctionSchema>,
    pub parameterization: Option<ParameterizationSchema>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ConfigSchema {
    pub variables: BTreeMap<String, PropertySchema>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
    pub description: String,
    pub items: Option<Box<PropertySchema>>,
    pub additional_properties: Option<Box<PropertySchema>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceSchema {
    pub description: String,
    pub input_properties: BTreeMap<String, PropertySchema>,
    pub required_inputs: Vec<String>,
    pub properties: BTreeMap<String, PropertySchema>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ObjectSchema {
    pub properties: BTreeMap<String, PropertySchema>,
    pub required: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FunctionSchema {
    pub description: String,
    pub inputs: ObjectSchema,
    pub outputs: ObjectSchema,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ParameterizationSchema {
    pub base_provider: BaseProvider,
    /// Base64 encoded provider parameter
    pub parameter: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct BaseProvider {
    pub name: String,
    pub version: String,
}

impl PackageSchema {
    pub fn parse(text: &str) -> Result<Self> {
        let schema: Self = serde_json::from_str(text)
            .map_err(|e| LanghostError::Validation(format!("invalid package schema: {}", e)))?;
        if schema.name.is_empty() {
            return Err(LanghostError::Validation(
                "package schema has no name".to_string(),
            ));
        }
        Ok(schema)
    }

    fn version(&self) -> &str {
        if self.version.is_empty() {
            "0.0.0"
        } else {
            &self.version
        }
    }
}

/// Python annotation for a schema property
fn py_type(prop: &PropertySchema, subject: &str, diags: &mut Diagnostics) -> String {
    if let Some(reference) = &prop.reference {
        diags.push(
            Diagnostic::warning(format!("{}: unsupported type reference '{}'", subject, reference))
                .with_detail("typed as Any"),
        );
        return "Any".to_string();
    }
    match prop.type_name.as_deref() {
        Some("string") => "str".to_string(),
        Some("integer") => "int".to_string(),
        Some("number") => "float".to_string(),
        Some("boolean") => "bool".to_string(),
        Some("array") => match &prop.items {
            Some(items) => format!("list[{}]", py_type(items, subject, diags)),
            None => "list[Any]".to_string(),
        },
        Some("object") => match &prop.additional_properties {
            Some(values) => format!("dict[str, {}]", py_type(values, subject, diags)),
            None => "dict[str, Any]".to_string(),
        },
        other => {
            diags.push(
                Diagnostic::warning(format!(
                    "{}: unsupported property type '{}'",
                    subject,
                    other.unwrap_or("<none>")
                ))
                .with_detail("typed as Any"),
            );
            "Any".to_string()
        }
    }
}

fn docstring(out: &mut String, indent: &str, text: &str) {
    if text.is_empty() {
        return;
    }
    let text = text.replace('\\', "\\\\").replace("\"\"\"", "\\\"\\\"\\\"");
    let _ = writeln!(out, "{}\"\"\"", indent);
    for line in text.lines() {
        if line.is_empty() {
            out.push('\n');
        } else {
            let _ = writeln!(out, "{}{}", indent, line);
        }
    }
    let _ = writeln!(out, "{}\"\"\"", indent);
}

/// Keyword arguments of a generated signature, required ones first
fn parameters(
    props: &BTreeMap<String, PropertySchema>,
    required: &[String],
    wrap_input: bool,
    subject: &str,
    diags: &mut Diagnostics,
) -> Vec<(String, String, String)> {
    let mut params = Vec::new();
    for (name, prop) in props {
        let mut ty = py_type(prop, &format!("{}.{}", subject, name), diags);
        if wrap_input {
            ty = format!("langhost.Input[{}]", ty);
        }
        let param = if required.contains(name) {
            format!("{}: {}", python_ident(name), ty)
        } else {
            format!("{}: Optional[{}] = None", python_ident(name), ty)
        };
        params.push((name.clone(), python_ident(name), param));
    }
    params.sort_by_key(|(name, _, _)| !required.contains(name));
    params
}

fn resource_class(
    out: &mut String,
    token: &str,
    member: &str,
    resource: &ResourceSchema,
    diags: &mut Diagnostics,
) {
    let _ = writeln!(out, "\nclass {}(langhost.CustomResource):", member);
    docstring(out, "    ", &resource.description);
    let params = parameters(
        &resource.input_properties,
        &resource.required_inputs,
        true,
        token,
        diags,
    );

    out.push_str("    def __init__(\n        self,\n        resource_name: str,\n        *,\n");
    for (_, _, param) in &params {
        let _ = writeln!(out, "        {},", param);
    }
    out.push_str("        opts: Optional[langhost.ResourceOptions] = None,\n    ) -> None:\n");
    out.push_str("        props: dict[str, Any] = {\n");
    for (name, ident, _) in &params {
        let _ = writeln!(out, "            {}: {},", py_str(name), ident);
    }
    out.push_str("        }\n");
    let _ = writeln!(
        out,
        "        super().__init__({}, resource_name, props, opts)",
        py_str(token)
    );

    for (name, prop) in &resource.properties {
        let ty = py_type(prop, &format!("{}.{}", token, name), diags);
        let _ = writeln!(
            out,
            "\n    @property\n    def {}(self) -> langhost.Output[{}]:",
            python_ident(name),
            ty
        );
        docstring(out, "        ", &prop.description);
        let _ = writeln!(out, "        return self._get({})", py_str(name));
    }
}

fn function_wrappers(
    out: &mut String,
    token: &str,
    member: &str,
    function: &FunctionSchema,
    diags: &mut Diagnostics,
) {
    let result = format!("{}Result", pascal_case(member));
    let fields: Vec<String> = function
        .outputs
        .properties
        .iter()
        .map(|(name, prop)| {
            let ty = py_type(prop, &format!("{}.{}", token, name), diags);
            format!("{}: {}", py_str(name), ty)
        })
        .collect();
    let _ = writeln!(
        out,
        "\n{} = TypedDict({}, {{{}}}, total=False)",
        result,
        py_str(&result),
        fields.join(", ")
    );

    let ident = snake_case(member);
    for (suffix, wrap, returns, call) in [
        ("", false, result.clone(), "invoke"),
        (
            "_output",
            true,
            format!("langhost.Output[{}]", result),
            "invoke_output",
        ),
    ] {
        // Both wrappers share inputs; report their type problems once
        let params = if wrap {
            parameters(
                &function.inputs.properties,
                &function.inputs.required,
                wrap,
                token,
                &mut Diagnostics::new(),
            )
        } else {
            parameters(
                &function.inputs.properties,
                &function.inputs.required,
                wrap,
                token,
                diags,
            )
        };
        let _ = writeln!(out, "\n\ndef {}{}(", ident, suffix);
        if !params.is_empty() {
            out.push_str("    *,\n");
        }
        for (_, _, param) in &params {
            let _ = writeln!(out, "    {},", param);
        }
        let _ = writeln!(
            out,
            "    opts: Optional[langhost.InvokeOptions] = None,\n) -> {}:",
            returns
        );
        docstring(out, "    ", &function.description);
        out.push_str("    args: dict[str, Any] = {\n");
        for (name, ident, _) in &params {
            let _ = writeln!(out, "        {}: {},", py_str(name), ident);
        }
        out.push_str("    }\n");
        let _ = writeln!(
            out,
            "    return langhost.runtime.{}({}, args, opts)",
            call,
            py_str(token)
        );
    }
}

fn config_module(schema: &PackageSchema, diags: &mut Diagnostics) -> String {
    let mut out = format!(
        "{}\nfrom typing import Any, Optional\n\nimport langhost\n\n__config__ = langhost.Config({})\n",
        HEADER,
        py_str(&schema.name)
    );
    for (name, prop) in &schema.config.variables {
        let ty = py_type(prop, &format!("config.{}", name), diags);
        let getter = match ty.as_str() {
            "str" => "get",
            "int" => "get_int",
            "float" => "get_float",
            "bool" => "get_bool",
            _ => "get_object",
        };
        let _ = writeln!(out, "\n\ndef {}() -> Optional[{}]:", python_ident(name), ty);
        docstring(&mut out, "    ", &prop.description);
        let _ = writeln!(out, "    return __config__.{}({})", getter, py_str(name));
    }
    out
}

/// Reject extra file paths that are absolute or climb out of the package.
fn validate_extra_files(extra: &BTreeMap<String, Vec<u8>>) -> Result<()> {
    for name in extra.keys() {
        let path = Path::new(name);
        let escapes = name.is_empty()
            || path
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(LanghostError::Validation(format!(
                "extra file path '{}' must be relative and inside the package",
                name
            )));
        }
    }
    Ok(())
}

fn pyproject(schema: &PackageSchema, core: &str) -> Result<String> {
    let import = import_name(&schema.name);
    let mut table = toml::Table::new();
    let mut build = toml::Table::new();
    build.insert(
        "requires".into(),
        toml::Value::Array(vec!["setuptools>=61.0".into()]),
    );
    build.insert("build-backend".into(), "setuptools.build_meta".into());
    table.insert("build-system".into(), build.into());

    let mut project = toml::Table::new();
    project.insert("name".into(), distribution_name(&schema.name).into());
    project.insert("version".into(), schema.version().into());
    if !schema.description.is_empty() {
        project.insert("description".into(), schema.description.clone().into());
    }
    project.insert("readme".into(), "README.md".into());
    project.insert("requires-python".into(), ">=3.9".into());
    project.insert(
        "dependencies".into(),
        toml::Value::Array(vec![core.into()]),
    );
    table.insert("project".into(), project.into());

    let mut package_data = toml::Table::new();
    package_data.insert(
        import,
        toml::Value::Array(vec!["py.typed".into(), PLUGIN_MARKER.into()]),
    );
    let mut setuptools = toml::Table::new();
    setuptools.insert("package-data".into(), package_data.into());
    let mut tool = toml::Table::new();
    tool.insert("setuptools".into(), setuptools.into());
    table.insert("tool".into(), tool.into());

    toml::to_string(&table).map_err(|e| LanghostError::Manifest(e.to_string()))
}

fn plugin_marker(schema: &PackageSchema) -> Result<String> {
    let mut marker = serde_json::json!({ "resource": true });
    match &schema.parameterization {
        Some(p) => {
            marker["name"] = p.base_provider.name.clone().into();
            marker["version"] = p.base_provider.version.clone().into();
            marker["parameterization"] = serde_json::json!({
                "name": schema.name,
                "version": schema.version(),
                "value": p.parameter,
            });
        }
        None => {
            marker["name"] = schema.name.clone().into();
            marker["version"] = schema.version().into();
        }
    }
    if !schema.plugin_download_url.is_empty() {
        marker["server"] = schema.plugin_download_url.clone().into();
    }
    let mut text = serde_json::to_string_pretty(&marker)?;
    text.push('\n');
    Ok(text)
}

/// Generated sources keyed by path relative to the package directory
pub fn package_files(
    schema: &PackageSchema,
    req: &GeneratePackageRequest,
    diags: &mut Diagnostics,
) -> Result<BTreeMap<PathBuf, Vec<u8>>> {
    let root = PathBuf::from(import_name(&schema.name));
    let mut files: BTreeMap<PathBuf, Vec<u8>> = BTreeMap::new();

    let mut modules: BTreeMap<String, String> = BTreeMap::new();
    let module_for = |token: &str, diags: &mut Diagnostics| -> Option<(String, TypeToken)> {
        match TypeToken::parse(token) {
            Some(t) if t.package == schema.name => {
                let module = if t.module == "index" {
                    INDEX_MODULE.to_string()
                } else {
                    snake_case(&t.module)
                };
                Some((module, t))
            }
            _ => {
                diags.push(Diagnostic::warning(format!(
                    "skipping '{}': not a {} type token",
                    token, schema.name
                )));
                None
            }
        }
    };

    for (token, resource) in &schema.resources {
        let Some((module, t)) = module_for(token, diags) else {
            continue;
        };
        let out = modules.entry(module).or_default();
        resource_class(out, token, &t.member, resource, diags);
    }
    for (token, function) in &schema.functions {
        let Some((module, t)) = module_for(token, diags) else {
            continue;
        };
        let out = modules.entry(module).or_default();
        function_wrappers(out, token, &t.member, function, diags);
    }

    let mut init = format!("{}\n", HEADER);
    if modules.contains_key(INDEX_MODULE) {
        let _ = writeln!(init, "from .{} import *", INDEX_MODULE);
    }
    for (module, body) in &modules {
        let source = format!(
            "{}\nfrom typing import Any, Optional, TypedDict\n\nimport langhost\n\n{}",
            HEADER, body
        );
        let path = if module == INDEX_MODULE {
            root.join(format!("{}.py", INDEX_MODULE))
        } else {
            let _ = writeln!(init, "from . import {}", module);
            root.join(module).join("__init__.py")
        };
        files.insert(path, source.into_bytes());
    }

    if !schema.config.variables.is_empty() {
        init.push_str("from . import config\n");
        files.insert(
            root.join("config").join("vars.py"),
            config_module(schema, diags).into_bytes(),
        );
        files.insert(
            root.join("config").join("__init__.py"),
            format!("{}\nfrom .vars import *\n", HEADER).into_bytes(),
        );
    }
    files.insert(root.join("__init__.py"), init.into_bytes());
    files.insert(root.join("py.typed"), Vec::new());
    files.insert(root.join(PLUGIN_MARKER), plugin_marker(schema)?.into_bytes());

    let core = if req.local {
        match req.local_dependencies.get(CORE_PACKAGE) {
            Some(path) => format!("{} @ file://{}", CORE_PACKAGE, path),
            None => {
                diags.push(
                    Diagnostic::warning("local package generation without a local langhost SDK")
                        .with_detail(format!("depending on {}", CORE_REQUIREMENT)),
                );
                CORE_REQUIREMENT.to_string()
            }
        }
    } else {
        CORE_REQUIREMENT.to_string()
    };
    files.insert(
        PathBuf::from(PYPROJECT_FILE),
        pyproject(schema, &core)?.into_bytes(),
    );

    let mut readme = format!("# {}\n", distribution_name(&schema.name));
    if !schema.description.is_empty() {
        let _ = write!(readme, "\n{}\n", schema.description);
    }
    files.insert(PathBuf::from("README.md"), readme.into_bytes());

    for (name, content) in &req.extra_files {
        files.insert(PathBuf::from(name), content.clone());
    }
    Ok(files)
}

pub fn generate_package(req: &GeneratePackageRequest) -> Result<Diagnostics> {
    let schema = PackageSchema::parse(&req.schema)?;
    validate_extra_files(&req.extra_files)?;

    let mut diags = Diagnostics::new();
    let files = package_files(&schema, req, &mut diags)?;
    let dir = Path::new(&req.directory);
    for (path, content) in &files {
        write_file(&dir.join(path), content)?;
    }
    tracing::info!(
        "generated package {} in {} ({} files)",
        distribution_name(&schema.name),
        dir.display(),
        files.len()
    );
    Ok(diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = r##"{
        "name": "aws",
        "version": "6.1.0",
        "description": "AWS resources",
        "config": {
            "variables": {
                "region": {"type": "string", "description": "Default region"},
                "maxRetries": {"type": "integer"}
            }
        },
        "resources": {
            "aws:s3/bucket:Bucket": {
                "description": "An S3 bucket",
                "inputProperties": {
                    "bucket": {"type": "string"},
                    "tags": {"type": "object", "additionalProperties": {"type": "string"}},
                    "policy": {"$ref": "#/types/aws:iam:Policy"}
                },
                "requiredInputs": ["bucket"],
                "properties": {"arn": {"type": "string"}}
            },
            "aws::Provider": {"inputProperties": {"region": {"type": "string"}}}
        },
        "functions": {
            "aws:ec2/getAmi:getAmi": {
                "inputs": {"properties": {"mostRecent": {"type": "boolean"}}},
                "outputs": {"properties": {"imageId": {"type": "string"}}}
            }
        }
    }"##;

    fn request(dir: &Path) -> GeneratePackageRequest {
        GeneratePackageRequest {
            directory: dir.display().to_string(),
            schema: SCHEMA.to_string(),
            ..Default::default()
        }
    }

    fn read(dir: &Path, path: &str) -> String {
        std::fs::read_to_string(dir.join(path)).unwrap()
    }

    #[test]
    fn generates_sdk_layout() {
        let tmp = tempfile::tempdir().unwrap();
        let mut req = request(tmp.path());
        req.extra_files
            .insert("LICENSE".to_string(), b"Apache-2.0\n".to_vec());
        let diags = generate_package(&req).unwrap();

        let warnings: Vec<_> = diags.iter().map(|d| d.summary.clone()).collect();
        assert_eq!(
            warnings,
            ["aws:s3/bucket:Bucket.policy: unsupported type reference '#/types/aws:iam:Policy'"]
        );

        let init = read(tmp.path(), "langhost_aws/__init__.py");
        assert!(init.contains("from ._index import *\n"));
        assert!(init.contains("from . import ec2\n"));
        assert!(init.contains("from . import s3\n"));
        assert!(init.contains("from . import config\n"));

        let s3 = read(tmp.path(), "langhost_aws/s3/__init__.py");
        assert!(s3.starts_with(HEADER));
        assert!(s3.contains("class Bucket(langhost.CustomResource):"));
        assert!(s3.contains("        bucket: langhost.Input[str],\n"));
        assert!(s3.contains("        tags: Optional[langhost.Input[dict[str, str]]] = None,\n"));
        assert!(s3.contains("        policy: Optional[langhost.Input[Any]] = None,\n"));
        assert!(s3.contains("super().__init__(\"aws:s3/bucket:Bucket\", resource_name, props, opts)"));
        assert!(s3.contains("    def arn(self) -> langhost.Output[str]:"));

        let ec2 = read(tmp.path(), "langhost_aws/ec2/__init__.py");
        assert!(ec2.contains("GetAmiResult = TypedDict(\"GetAmiResult\", {\"imageId\": str}, total=False)"));
        assert!(ec2.contains("def get_ami(\n"));
        assert!(ec2.contains("def get_ami_output(\n"));
        assert!(ec2.contains("    most_recent: Optional[langhost.Input[bool]] = None,\n"));
        assert!(ec2.contains("return langhost.runtime.invoke_output(\"aws:ec2/getAmi:getAmi\", args, opts)"));

        assert!(read(tmp.path(), "langhost_aws/_index.py").contains("class Provider("));
        let vars = read(tmp.path(), "langhost_aws/config/vars.py");
        assert!(vars.contains("def max_retries() -> Optional[int]:\n"));
        assert!(vars.contains("    return __config__.get_int(\"maxRetries\")"));

        let pyproject: toml::Table = read(tmp.path(), "pyproject.toml").parse().unwrap();
        assert_eq!(pyproject["project"]["name"].as_str(), Some("langhost-aws"));
        assert_eq!(pyproject["project"]["version"].as_str(), Some("6.1.0"));
        assert_eq!(
            pyproject["project"]["dependencies"][0].as_str(),
            Some(CORE_REQUIREMENT)
        );

        let marker: serde_json::Value =
            serde_json::from_str(&read(tmp.path(), "langhost_aws/langhost-plugin.json")).unwrap();
        assert_eq!(marker["name"], "aws");
        assert_eq!(marker["version"], "6.1.0");
        assert!(tmp.path().join("langhost_aws/py.typed").exists());
        assert_eq!(read(tmp.path(), "LICENSE"), "Apache-2.0\n");
    }

    #[test]
    fn local_generation_pins_the_core_sdk() {
        let tmp = tempfile::tempdir().unwrap();
        let mut req = request(tmp.path());
        req.local = true;
        req.local_dependencies
            .insert("langhost".to_string(), "/src/sdk".to_string());
        generate_package(&req).unwrap();
        let pyproject: toml::Table = read(tmp.path(), "pyproject.toml").parse().unwrap();
        assert_eq!(
            pyproject["project"]["dependencies"][0].as_str(),
            Some("langhost @ file:///src/sdk")
        );

        let other = tempfile::tempdir().unwrap();
        let mut req = request(other.path());
        req.local = true;
        let diags = generate_package(&req).unwrap();
        assert!(diags
            .iter()
            .any(|d| d.summary.contains("without a local langhost SDK")));
    }

    #[test]
    fn escaping_extra_files_fail_before_writing() {
        for bad in ["../outside.txt", "/etc/passwd", ""] {
            let tmp = tempfile::tempdir().unwrap();
            let mut req = request(tmp.path());
            req.extra_files.insert(bad.to_string(), b"x".to_vec());
            let err = generate_package(&req).unwrap_err();
            assert!(matches!(err, LanghostError::Validation(_)), "{bad}");
            assert!(std::fs::read_dir(tmp.path()).unwrap().next().is_none());
        }
    }

    #[test]
    fn parameterized_packages_point_at_their_base_provider() {
        let schema = PackageSchema::parse(
            r#"{"name": "mydb", "version": "1.0.0",
                "parameterization": {"baseProvider": {"name": "terraform-provider", "version": "0.8.0"},
                                     "parameter": "eyJ4IjoxfQ=="}}"#,
        )
        .unwrap();
        let marker: serde_json::Value = serde_json::from_str(&plugin_marker(&schema).unwrap()).unwrap();
        assert_eq!(marker["name"], "terraform-provider");
        assert_eq!(marker["parameterization"]["name"], "mydb");
        assert_eq!(marker["parameterization"]["value"], "eyJ4IjoxfQ==");
    }

    #[test]
    fn schema_needs_a_name() {
        assert!(matches!(
            PackageSchema::parse(r#"{"version": "1.0.0"}"#),
            Err(LanghostError::Validation(_))
        ));
    }
}
