//! Replaces attribute placeholders of the form `${select(xpath)}`.
//!
//! Absolute expressions resolve against the document root; relative ones
//! against the item's context node. The result must be exactly one value.

use async_trait::async_trait;
use sxd_document::dom::Element;
use sxd_xpath::Value;
use sxd_xpath::nodeset::Node;

use crate::error::HydrationError;
use crate::hydration::HydrationEngine;
use crate::hydration::HydrationItem;
use crate::hydration::HydrationStrategy;
use crate::xml::path::evaluate;
use crate::xml::self_and_descendants;
use crate::xml::to_xml_string;

const PLACEHOLDER_PREFIX: &str = "${select(";
const PLACEHOLDER_SUFFIX: &str = ")}";

pub struct AttributeSelectHydrationStrategy;

fn extract_xpath(value: &str) -> Result<Option<String>, HydrationError> {
    if !value.starts_with(PLACEHOLDER_PREFIX) || !value.ends_with(PLACEHOLDER_SUFFIX) {
        return Ok(None);
    }
    let inner = value[PLACEHOLDER_PREFIX.len()..value.len() - PLACEHOLDER_SUFFIX.len()].trim();
    if inner.is_empty() {
        return Err(HydrationError::EmptyPlaceholder);
    }
    Ok(Some(inner.to_string()))
}

fn stringify(node: Node<'_>) -> String {
    match node {
        Node::Element(element) => to_xml_string(element),
        other => other.string_value(),
    }
}

fn resolve_xpath<'d>(
    expression: &str,
    document_root: Element<'d>,
    context: Option<Element<'d>>,
) -> Result<String, HydrationError> {
    let value = if expression.starts_with('/') {
        evaluate(expression, document_root)?
    } else if expression.starts_with('.') {
        let context = context.ok_or_else(|| HydrationError::MissingContext {
            expression: expression.to_string(),
        })?;
        evaluate(expression, context)?
    } else {
        return Err(HydrationError::InvalidAttributeSelect {
            expression: expression.to_string(),
        });
    };

    match value {
        Value::Nodeset(nodeset) => {
            let mut nodes = nodeset.document_order();
            if nodes.len() != 1 {
                return Err(HydrationError::AttributeSelectCardinality {
                    expression: expression.to_string(),
                    count: nodes.len(),
                });
            }
            Ok(stringify(nodes.remove(0)))
        }
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Boolean(boolean) => Ok(boolean.to_string()),
    }
}

#[async_trait(?Send)]
impl<'d> HydrationStrategy<'d> for AttributeSelectHydrationStrategy {
    async fn apply(
        &self,
        items: Vec<HydrationItem<'d>>,
        document_root: Element<'d>,
        _engine: &HydrationEngine<'d>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError> {
        for item in &items {
            for element in self_and_descendants(item.element) {
                for attribute in element.attributes() {
                    let Some(expression) = extract_xpath(attribute.value())? else {
                        continue;
                    };
                    let resolved = resolve_xpath(&expression, document_root, item.context)?;
                    element.set_attribute_value(attribute.name(), &resolved);
                }
            }
        }
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_exact_placeholders_match() {
        assert_eq!(extract_xpath("plain").unwrap(), None);
        assert_eq!(extract_xpath("${select(/a/b)} and more").unwrap(), None);
        assert_eq!(
            extract_xpath("${select(/a/b)}").unwrap().as_deref(),
            Some("/a/b")
        );
    }

    #[test]
    fn empty_placeholder_is_rejected() {
        assert!(matches!(
            extract_xpath("${select(  )}"),
            Err(HydrationError::EmptyPlaceholder)
        ));
    }
}
