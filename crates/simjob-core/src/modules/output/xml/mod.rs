mod legacy;
mod schema;

pub use legacy::decode_legacy;
pub use schema::decode_schema_based;

use crate::domain::{ResultRecord, number};
use crate::modules::logs::LogContainer;
use crate::modules::retrieved::RetrievedFiles;
use roxmltree::{Document, Node};
use serde_json::Value;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum XmlDecodeError {
    #[error("failed to read XML data: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse XML output: {0}")]
    Parse(String),
    #[error("unsupported XML format: {0}")]
    UnsupportedFormat(String),
    #[error("unexpected XML content: {0}")]
    Unexpected(String),
}

impl XmlDecodeError {
    pub(crate) fn missing(path: &str) -> Self {
        Self::Parse(format!("required element '{path}' is missing"))
    }
}

pub type XmlResult<T> = Result<T, XmlDecodeError>;

/// Generation of the XML output format, told apart by the root element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlSchemaGeneration {
    SchemaBased,
    Legacy,
}

impl XmlSchemaGeneration {
    pub fn sniff(document: &Document<'_>) -> XmlResult<Self> {
        let root = document.root_element();
        let name = root.tag_name().name();
        if name.ends_with("espresso") {
            Ok(Self::SchemaBased)
        } else if name == "Root" {
            Ok(Self::Legacy)
        } else {
            Err(XmlDecodeError::UnsupportedFormat(format!(
                "unrecognized root element '{name}'"
            )))
        }
    }
}

impl Display for XmlSchemaGeneration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SchemaBased => f.write_str("schema-based"),
            Self::Legacy => f.write_str("legacy"),
        }
    }
}

/// Decodes the bytes of one XML output file into a partial result.
///
/// `temporary` is only consulted by the legacy format, which keeps the
/// per-k-point eigenvalues in separate files.
pub fn decode_xml(
    bytes: &[u8],
    temporary: Option<&dyn RetrievedFiles>,
) -> XmlResult<(ResultRecord, LogContainer)> {
    let text = std::str::from_utf8(bytes)
        .map_err(|source| XmlDecodeError::Parse(format!("XML file is not valid UTF-8: {source}")))?;
    let document = Document::parse(text).map_err(|source| XmlDecodeError::Parse(source.to_string()))?;

    let generation = XmlSchemaGeneration::sniff(&document)?;
    tracing::debug!(%generation, "decoding XML output");
    match generation {
        XmlSchemaGeneration::SchemaBased => decode_schema_based(&document),
        XmlSchemaGeneration::Legacy => decode_legacy(&document, temporary),
    }
}

pub(crate) fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|candidate| candidate.is_element() && candidate.tag_name().name() == name)
}

pub(crate) fn children<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |candidate| candidate.is_element() && candidate.tag_name().name() == name)
}

/// Follows a `/`-separated element path below `node`.
pub(crate) fn descend<'a, 'input>(node: Node<'a, 'input>, path: &str) -> Option<Node<'a, 'input>> {
    path.split('/')
        .try_fold(node, |current, segment| child(current, segment))
}

pub(crate) fn require<'a, 'input>(node: Node<'a, 'input>, path: &str) -> XmlResult<Node<'a, 'input>> {
    descend(node, path).ok_or_else(|| XmlDecodeError::missing(path))
}

pub(crate) fn text<'a>(node: Node<'a, '_>) -> &'a str {
    node.text().map(str::trim).unwrap_or_default()
}

pub(crate) fn parse_scalar<T: FromStr>(raw: &str, what: &str) -> XmlResult<T> {
    let cleaned = raw.trim().replace(['d', 'D'], "e");
    cleaned
        .parse::<T>()
        .map_err(|_| XmlDecodeError::Parse(format!("invalid value '{}' for '{what}'", raw.trim())))
}

pub(crate) fn text_f64(node: Node<'_, '_>) -> XmlResult<f64> {
    parse_scalar(text(node), node.tag_name().name())
}

pub(crate) fn text_i64(node: Node<'_, '_>) -> XmlResult<i64> {
    parse_scalar(text(node), node.tag_name().name())
}

pub(crate) fn text_bool(node: Node<'_, '_>) -> XmlResult<bool> {
    parse_bool(text(node), node.tag_name().name())
}

pub(crate) fn parse_bool(raw: &str, what: &str) -> XmlResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | ".true." | "1" => Ok(true),
        "false" | "f" | ".false." | "0" => Ok(false),
        other => Err(XmlDecodeError::Parse(format!(
            "invalid boolean '{other}' for '{what}'"
        ))),
    }
}

pub(crate) fn text_f64_list(node: Node<'_, '_>) -> XmlResult<Vec<f64>> {
    let what = node.tag_name().name();
    text(node)
        .split_whitespace()
        .map(|token| parse_scalar(token, what))
        .collect()
}

pub(crate) fn text_i64_list(node: Node<'_, '_>) -> XmlResult<Vec<i64>> {
    let what = node.tag_name().name();
    text(node)
        .split_whitespace()
        .map(|token| parse_scalar(token, what))
        .collect()
}

pub(crate) fn attr<'a>(node: Node<'a, '_>, name: &str) -> XmlResult<&'a str> {
    node.attribute(name).ok_or_else(|| {
        XmlDecodeError::Parse(format!(
            "attribute '{name}' is missing on '{}'",
            node.tag_name().name()
        ))
    })
}

pub(crate) fn attr_f64(node: Node<'_, '_>, name: &str) -> XmlResult<f64> {
    parse_scalar(attr(node, name)?, name)
}

pub(crate) fn attr_i64(node: Node<'_, '_>, name: &str) -> XmlResult<i64> {
    parse_scalar(attr(node, name)?, name)
}

pub(crate) fn optional_child_f64(node: Node<'_, '_>, path: &str) -> XmlResult<Option<f64>> {
    descend(node, path).map(text_f64).transpose()
}

pub(crate) fn optional_child_i64(node: Node<'_, '_>, path: &str) -> XmlResult<Option<i64>> {
    descend(node, path).map(text_i64).transpose()
}

pub(crate) fn optional_child_bool(node: Node<'_, '_>, path: &str) -> XmlResult<Option<bool>> {
    descend(node, path).map(text_bool).transpose()
}

pub(crate) fn optional_child_text(node: Node<'_, '_>, path: &str) -> Option<String> {
    descend(node, path).map(|found| text(found).to_string())
}

pub(crate) fn float_list(values: &[f64]) -> Value {
    Value::Array(values.iter().copied().map(number).collect())
}

pub(crate) fn float_matrix(rows: &[Vec<f64>]) -> Value {
    Value::Array(rows.iter().map(|row| float_list(row)).collect())
}

pub(crate) fn cell_volume(a1: &[f64; 3], a2: &[f64; 3], a3: &[f64; 3]) -> f64 {
    let cross = [
        a2[1] * a3[2] - a2[2] * a3[1],
        a2[2] * a3[0] - a2[0] * a3[2],
        a2[0] * a3[1] - a2[1] * a3[0],
    ];
    (a1[0] * cross[0] + a1[1] * cross[1] + a1[2] * cross[2]).abs()
}

pub(crate) fn vector3(values: Vec<f64>, what: &str) -> XmlResult<[f64; 3]> {
    <[f64; 3]>::try_from(values).map_err(|values: Vec<f64>| {
        XmlDecodeError::Parse(format!(
            "'{what}' must hold 3 components, got {}",
            values.len()
        ))
    })
}

/// Compares dotted version strings numerically, component by component.
pub(crate) fn version_less_than(version: &str, reference: &str) -> bool {
    let components = |raw: &str| -> Vec<u64> {
        raw.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    let (left, right) = (components(version), components(reference));
    let width = left.len().max(right.len());
    for index in 0..width {
        let a = left.get(index).copied().unwrap_or(0);
        let b = right.get(index).copied().unwrap_or(0);
        if a != b {
            return a < b;
        }
    }
    false
}
