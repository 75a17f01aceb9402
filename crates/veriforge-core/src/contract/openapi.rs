//! OpenAPI 3 / Swagger 2 document parsing and structural checks.
//!
//! YAML is parsed with `serde_yaml`, which also accepts JSON documents.

use std::fmt;

use serde_yaml::{Mapping, Value};

use veriforge_domain::{Artifact, ArtifactType, Result, VerifyError};

const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// Contract document family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpecType {
    OpenApi3,
    Swagger2,
}

impl SpecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecType::OpenApi3 => "openapi",
            SpecType::Swagger2 => "swagger",
        }
    }
}

impl fmt::Display for SpecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Upper-case HTTP method.
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
}

impl Endpoint {
    /// Whether the path is templated (`/users/{id}`).
    pub fn has_path_params(&self) -> bool {
        self.path.contains('{')
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A structural defect, optionally tied to an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralProblem {
    pub method: Option<String>,
    pub path: Option<String>,
    pub message: String,
}

impl StructuralProblem {
    fn document(message: impl Into<String>) -> Self {
        Self {
            method: None,
            path: None,
            message: message.into(),
        }
    }

    fn at(method: Option<&str>, path: &str, message: impl Into<String>) -> Self {
        Self {
            method: method.map(str::to_ascii_uppercase),
            path: Some(path.to_string()),
            message: message.into(),
        }
    }
}

/// A parsed contract.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractSpec {
    /// Artifact path the contract came from.
    pub source: String,
    pub spec_type: SpecType,
    pub version: String,
    pub title: Option<String>,
    /// Absolute base URL declared by the document, if any.
    pub base_url: Option<String>,
    pub endpoints: Vec<Endpoint>,
    pub problems: Vec<StructuralProblem>,
}

impl ContractSpec {
    pub fn is_well_formed(&self) -> bool {
        self.problems.is_empty()
    }

    /// `GET` endpoints that can be called without filling path parameters.
    pub fn probeable(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints
            .iter()
            .filter(|e| e.method == "GET" && !e.has_path_params())
    }
}

/// Cheap check for an artifact that may hold an API contract.
pub fn looks_like_contract(artifact: &Artifact) -> bool {
    if artifact.artifact_type == ArtifactType::Schema {
        return true;
    }
    let ext = artifact.extension();
    if !matches!(ext.as_deref(), Some("yaml" | "yml" | "json")) {
        return false;
    }
    has_contract_marker(&artifact.content)
}

fn has_contract_marker(content: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim_start_matches(|c: char| c == '{' || c.is_whitespace());
        ["openapi", "swagger"].iter().any(|key| {
            line.starts_with(&format!("{key}:")) || line.starts_with(&format!("\"{key}\""))
        })
    })
}

/// Parse a contract document.
///
/// Errors only when the document is not YAML/JSON or is not an OpenAPI or
/// Swagger document at all. Anything else wrong with it is recorded in
/// [`ContractSpec::problems`].
pub fn parse_contract(source: &str, content: &str) -> Result<ContractSpec> {
    let doc: Value = serde_yaml::from_str(content)?;
    let root = doc
        .as_mapping()
        .ok_or_else(|| VerifyError::Contract(format!("{source}: document is not a mapping")))?;

    let (spec_type, version) = if let Some(v) = root.get("openapi") {
        (SpecType::OpenApi3, scalar_string(v))
    } else if let Some(v) = root.get("swagger") {
        (SpecType::Swagger2, scalar_string(v))
    } else {
        return Err(VerifyError::Contract(format!(
            "{source}: neither 'openapi' nor 'swagger' is declared"
        )));
    };

    let mut problems = Vec::new();
    let version = version.unwrap_or_default();
    let version_ok = match spec_type {
        SpecType::OpenApi3 => version.starts_with("3."),
        SpecType::Swagger2 => version == "2.0" || version == "2",
    };
    if !version_ok {
        problems.push(StructuralProblem::document(format!(
            "unsupported {spec_type} version '{version}'"
        )));
    }

    let title = root
        .get("info")
        .and_then(|info| info.get("title"))
        .and_then(scalar_string)
        .filter(|t| !t.trim().is_empty());
    if title.is_none() {
        problems.push(StructuralProblem::document("info.title is missing"));
    }

    let base_url = match spec_type {
        SpecType::OpenApi3 => openapi_base_url(root),
        SpecType::Swagger2 => swagger_base_url(root),
    };

    let mut endpoints = Vec::new();
    match root.get("paths") {
        Some(Value::Mapping(paths)) => collect_endpoints(paths, &mut endpoints, &mut problems),
        Some(_) => problems.push(StructuralProblem::document("'paths' is not a mapping")),
        None => problems.push(StructuralProblem::document("'paths' is missing")),
    }

    Ok(ContractSpec {
        source: source.to_string(),
        spec_type,
        version,
        title,
        base_url,
        endpoints,
        problems,
    })
}

fn collect_endpoints(
    paths: &Mapping,
    endpoints: &mut Vec<Endpoint>,
    problems: &mut Vec<StructuralProblem>,
) {
    for (key, item) in paths {
        let Some(path) = key.as_str() else {
            problems.push(StructuralProblem::document("non-string key under 'paths'"));
            continue;
        };
        if !path.starts_with('/') {
            problems.push(StructuralProblem::at(None, path, "path must begin with '/'"));
        }
        let Some(operations) = item.as_mapping() else {
            problems.push(StructuralProblem::at(None, path, "path item is not a mapping"));
            continue;
        };
        for method in METHODS {
            let Some(operation) = operations.get(method) else {
                continue;
            };
            let has_responses = operation
                .get("responses")
                .and_then(Value::as_mapping)
                .is_some_and(|r| !r.is_empty());
            if !has_responses {
                problems.push(StructuralProblem::at(
                    Some(method),
                    path,
                    "operation declares no responses",
                ));
            }
            endpoints.push(Endpoint {
                method: method.to_ascii_uppercase(),
                path: path.to_string(),
                operation_id: operation.get("operationId").and_then(scalar_string),
            });
        }
    }
}

fn openapi_base_url(root: &Mapping) -> Option<String> {
    let url = root
        .get("servers")?
        .as_sequence()?
        .first()?
        .get("url")
        .and_then(scalar_string)?;
    is_absolute(&url).then(|| url.trim_end_matches('/').to_string())
}

fn swagger_base_url(root: &Mapping) -> Option<String> {
    let host = root.get("host").and_then(scalar_string)?;
    let scheme = root
        .get("schemes")
        .and_then(Value::as_sequence)
        .and_then(|s| s.first())
        .and_then(scalar_string)
        .unwrap_or_else(|| "https".to_string());
    let base_path = root
        .get("basePath")
        .and_then(scalar_string)
        .unwrap_or_default();
    Some(format!("{scheme}://{host}{}", base_path.trim_end_matches('/')))
}

fn is_absolute(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => {
            let text = n.to_string();
            // YAML reads `swagger: 2.0` as a float
            Some(if n.is_f64() && !text.contains('.') {
                format!("{text}.0")
            } else {
                text
            })
        }
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
