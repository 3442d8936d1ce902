//! XPath evaluation helpers and absolute element paths.

use sxd_document::dom::Element;
use sxd_xpath::Context;
use sxd_xpath::Factory;
use sxd_xpath::Value;
use sxd_xpath::nodeset::Node;

use super::element_children;
use super::local_name;
use super::parent_element;

#[derive(Debug, thiserror::Error)]
#[error("XPath '{expression}' failed: {message}")]
pub struct XPathError {
    pub expression: String,
    pub message: String,
}

impl XPathError {
    fn new(expression: &str, message: impl Into<String>) -> Self {
        Self {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

/// Evaluate `expression` with `node` as the context node. Absolute paths
/// resolve against the document root of the tree `node` belongs to.
pub fn evaluate<'d>(
    expression: &str,
    node: impl Into<Node<'d>>,
) -> Result<Value<'d>, XPathError> {
    let factory = Factory::new();
    let xpath = factory
        .build(expression)
        .map_err(|error| XPathError::new(expression, error.to_string()))?
        .ok_or_else(|| XPathError::new(expression, "empty expression"))?;
    let context = Context::new();
    xpath
        .evaluate(&context, node)
        .map_err(|error| XPathError::new(expression, error.to_string()))
}

/// Evaluate `expression` and keep only element results, in document order.
/// Non-nodeset results evaluate to an empty list.
pub fn select_elements<'d>(
    expression: &str,
    node: impl Into<Node<'d>>,
) -> Result<Vec<Element<'d>>, XPathError> {
    match evaluate(expression, node)? {
        Value::Nodeset(nodeset) => Ok(nodeset
            .document_order()
            .into_iter()
            .filter_map(|node| match node {
                Node::Element(element) => Some(element),
                _ => None,
            })
            .collect()),
        _ => Ok(Vec::new()),
    }
}

/// Absolute element path of `node` within its own (possibly detached) tree,
/// with `[n]` positional predicates only where same-named siblings exist.
pub fn element_path(node: Element<'_>) -> String {
    let mut segments = Vec::new();
    let mut current = Some(node);
    while let Some(element) = current {
        let parent = parent_element(element);
        let name = local_name(element);
        let segment = match parent {
            Some(parent) => {
                let same_named: Vec<_> = element_children(parent)
                    .into_iter()
                    .filter(|sibling| local_name(*sibling) == name)
                    .collect();
                if same_named.len() > 1 {
                    let position = same_named
                        .iter()
                        .position(|sibling| *sibling == element)
                        .map(|index| index + 1)
                        .unwrap_or(1);
                    format!("{name}[{position}]")
                } else {
                    name.to_string()
                }
            }
            None => name.to_string(),
        };
        segments.push(segment);
        current = parent;
    }
    segments.reverse();
    format!("/{}", segments.join("/"))
}
