//! Declarative test cases and the built-in comply-server suite

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use crate::client::{HttpClient, ResponseSnapshot, TestContext};
use crate::error::{HarnessError, HarnessResult};
use crate::report::slugify;

/// One named check against the server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique name; also names the failure report
    pub name: String,

    #[serde(default)]
    pub description: String,

    pub request: RequestSpec,

    #[serde(default)]
    pub expect: Expectations,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(default = "default_method")]
    pub method: String,

    pub path: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl RequestSpec {
    pub fn get(path: &str) -> Self {
        Self {
            method: default_method(),
            path: path.to_string(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// What a response must look like for the test to pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expectations {
    #[serde(default = "default_status")]
    pub status: u16,

    /// Substring the `content-type` header must contain
    #[serde(default)]
    pub content_type: Option<String>,

    #[serde(default)]
    pub body: Option<BodyShape>,
}

fn default_status() -> u16 {
    200
}

impl Default for Expectations {
    fn default() -> Self {
        Self {
            status: default_status(),
            content_type: None,
            body: None,
        }
    }
}

/// Expected shape of a JSON body. `field` is a dot-separated path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum BodyShape {
    /// Any valid JSON document
    Json,

    /// The field exists and equals `value`
    FieldEquals { field: String, value: Value },

    /// The field exists and is not null, false or empty
    FieldPresent { field: String },

    /// The field exists and is an array
    FieldArray { field: String },

    /// The body is a non-empty array
    NonEmptyArray,
}

impl Expectations {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn with_body(mut self, shape: BodyShape) -> Self {
        self.body = Some(shape);
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// Check status, then content type, then body shape
    pub fn check(&self, response: &ResponseSnapshot) -> HarnessResult<()> {
        if response.status != self.status {
            return Err(HarnessError::Assertion(format!(
                "Expected status {}, got {}",
                self.status, response.status
            )));
        }

        if let Some(expected) = &self.content_type {
            match response.header("content-type") {
                Some(actual) if actual.contains(expected.as_str()) => {}
                Some(actual) => {
                    return Err(HarnessError::Assertion(format!(
                        "Expected content-type containing '{}', got '{}'",
                        expected, actual
                    )))
                }
                None => {
                    return Err(HarnessError::Assertion(format!(
                        "Expected content-type containing '{}', but the header is missing",
                        expected
                    )))
                }
            }
        }

        match &self.body {
            Some(shape) => shape.check(&response.body),
            None => Ok(()),
        }
    }
}

impl BodyShape {
    pub fn check(&self, body: &str) -> HarnessResult<()> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| HarnessError::Decode(format!("{} (body: {})", e, preview(body))))?;

        match self {
            BodyShape::Json => Ok(()),
            BodyShape::FieldEquals { field, value: expected } => {
                let actual = lookup(&value, field)?;
                if actual == expected {
                    Ok(())
                } else {
                    Err(HarnessError::Assertion(format!(
                        "Expected `{}` to be {}, got {}",
                        field, expected, actual
                    )))
                }
            }
            BodyShape::FieldPresent { field } => {
                let actual = lookup(&value, field)?;
                let empty = matches!(actual, Value::Null | Value::Bool(false))
                    || actual.as_str().is_some_and(str::is_empty);
                if empty {
                    Err(HarnessError::Assertion(format!(
                        "Expected `{}` to have a value, got {}",
                        field, actual
                    )))
                } else {
                    Ok(())
                }
            }
            BodyShape::FieldArray { field } => match lookup(&value, field)? {
                Value::Array(_) => Ok(()),
                other => Err(HarnessError::Assertion(format!(
                    "Expected `{}` to be an array, got {}",
                    field,
                    json_type(other)
                ))),
            },
            BodyShape::NonEmptyArray => match &value {
                Value::Array(items) if items.is_empty() => Err(HarnessError::Assertion(
                    "Expected a non-empty array, got an empty one".to_string(),
                )),
                Value::Array(_) => Ok(()),
                other => Err(HarnessError::Assertion(format!(
                    "Expected an array, got {}",
                    json_type(other)
                ))),
            },
        }
    }
}

fn lookup<'a>(value: &'a Value, field: &str) -> HarnessResult<&'a Value> {
    let mut current = value;
    for segment in field.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| {
                HarnessError::Assertion(format!("Response has no `{}` field", field))
            })?,
            other => {
                return Err(HarnessError::Assertion(format!(
                    "Expected an object containing `{}`, got {}",
                    field,
                    json_type(other)
                )))
            }
        };
    }
    Ok(current)
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(body: &str) -> String {
    const LIMIT: usize = 200;
    if body.is_empty() {
        return "<empty>".to_string();
    }
    match body.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

impl TestCase {
    pub fn new(name: &str, request: RequestSpec, expect: Expectations) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            request,
            expect,
        }
    }

    /// Perform the exchange through `client`, recording it in `ctx`, and check the response
    pub async fn run(&self, client: &HttpClient, ctx: &mut TestContext) -> HarnessResult<()> {
        let response = client.send(ctx, &self.request).await?;
        self.expect.check(&response)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SuiteFile {
    Wrapped { tests: Vec<TestCase> },
    List(Vec<TestCase>),
}

/// Parse a suite from YAML: a list of cases or `{tests: [...]}`
pub fn from_yaml(yaml: &str) -> HarnessResult<Vec<TestCase>> {
    let cases = match serde_yaml::from_str(yaml)? {
        SuiteFile::Wrapped { tests } => tests,
        SuiteFile::List(tests) => tests,
    };
    validate(&cases)?;
    Ok(cases)
}

pub fn from_file(path: &Path) -> HarnessResult<Vec<TestCase>> {
    let content = std::fs::read_to_string(path)?;
    from_yaml(&content)
}

/// Names must be non-empty and map to distinct report files
pub fn validate(cases: &[TestCase]) -> HarnessResult<()> {
    let mut slugs = HashSet::new();
    for case in cases {
        if case.name.trim().is_empty() {
            return Err(HarnessError::InvalidConfig("test case with an empty name".into()));
        }
        if !case.request.path.starts_with('/') {
            return Err(HarnessError::InvalidConfig(format!(
                "{}: request path must start with '/': {}",
                case.name, case.request.path
            )));
        }
        if !slugs.insert(slugify(&case.name)) {
            return Err(HarnessError::InvalidConfig(format!(
                "duplicate test name (or report slug): {}",
                case.name
            )));
        }
    }
    Ok(())
}

/// The standard comply-server checks, in execution order
pub fn builtin_suite() -> Vec<TestCase> {
    vec![
        TestCase::new(
            "Server Status",
            RequestSpec::get("/server/status"),
            Expectations::status(200).with_body(BodyShape::FieldEquals {
                field: "status".into(),
                value: Value::String("OK".into()),
            }),
        ),
        TestCase::new(
            "Server Version",
            RequestSpec::get("/server/version"),
            Expectations::status(200).with_body(BodyShape::FieldPresent {
                field: "version".into(),
            }),
        ),
        TestCase::new(
            "API Documentation",
            RequestSpec::get("/server/api"),
            Expectations::status(200).with_body(BodyShape::NonEmptyArray),
        ),
        TestCase::new(
            "List Plugins",
            RequestSpec::get("/server/plugins/list"),
            Expectations::status(200).with_body(BodyShape::FieldArray {
                field: "data".into(),
            }),
        ),
        TestCase::new(
            "Server Next Commands",
            RequestSpec::get("/server/next-commands"),
            Expectations::status(200).with_body(BodyShape::FieldArray {
                field: "commands".into(),
            }),
        ),
        TestCase::new(
            "Invalid Endpoint Returns 404",
            RequestSpec::get("/invalid/endpoint"),
            Expectations::status(404),
        ),
        TestCase::new(
            "Server Accepts JSON",
            RequestSpec::get("/server/status").header("Accept", "application/json"),
            Expectations::status(200).with_content_type("application/json"),
        ),
    ]
}
