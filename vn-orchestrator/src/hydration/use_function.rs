//! Expands elements whose `use` attribute names a custom hydration function.
//!
//! Only `vn:link(sourceXPath, childName)` is supported: the element is cloned
//! once per child matched under each source node, and each clone is bound to
//! that child as its context. Expansion runs to fixed point, since a clone
//! may itself carry `use`.

use std::collections::VecDeque;

use async_trait::async_trait;
use sxd_document::dom::Element;

use crate::error::HydrationError;
use crate::hydration::HydrationEngine;
use crate::hydration::HydrationItem;
use crate::hydration::HydrationStrategy;
use crate::xml::attribute_value;
use crate::xml::copy_subtree;
use crate::xml::path::select_elements;

const SUPPORTED_NAMESPACE: &str = "vn";
const SUPPORTED_FUNCTIONS: [&str; 1] = ["link"];

pub struct UseFunctionHydrationStrategy;

fn strip_namespace<'a>(
    value: &'a str,
    expression: &str,
) -> Result<(&'a str, &'a str), HydrationError> {
    value
        .split_once(':')
        .ok_or_else(|| HydrationError::InvalidUseExpression {
            expression: expression.to_string(),
            reason: "expected prefix:function format".to_string(),
        })
}

/// Parse `prefix:fn(arg1, arg2)` into the function name and its two
/// arguments. The prefix is validated separately by the caller.
fn parse_use_expression(expression: &str) -> Result<(String, (String, String)), HydrationError> {
    if !expression.ends_with(')') {
        return Err(HydrationError::InvalidUseExpression {
            expression: expression.to_string(),
            reason: "expected parentheses".to_string(),
        });
    }
    let without_suffix = &expression[..expression.len() - 1];
    let (prefix_and_function, arguments) =
        without_suffix
            .split_once('(')
            .ok_or_else(|| HydrationError::InvalidUseExpression {
                expression: expression.to_string(),
                reason: "expected parentheses".to_string(),
            })?;
    let (_, function) = strip_namespace(prefix_and_function, expression)?;

    let parts: Vec<&str> = arguments
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect();
    if parts.len() != 2 {
        return Err(HydrationError::InvalidUseExpression {
            expression: expression.to_string(),
            reason: format!(
                "function '{function}' expects exactly two arguments; received {}",
                parts.len()
            ),
        });
    }
    Ok((
        function.to_string(),
        (parts[0].to_string(), parts[1].to_string()),
    ))
}

impl UseFunctionHydrationStrategy {
    fn expand_use<'d>(
        &self,
        item: &HydrationItem<'d>,
        expression: &str,
        document_root: Element<'d>,
        engine: &HydrationEngine<'d>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError> {
        let head = expression.split('(').next().unwrap_or(expression);
        let (prefix, _) = strip_namespace(head, expression)?;
        if prefix != SUPPORTED_NAMESPACE {
            return Err(HydrationError::UnsupportedNamespace {
                prefix: prefix.to_string(),
                expression: expression.to_string(),
            });
        }

        let (function, arguments) = parse_use_expression(expression)?;
        if !SUPPORTED_FUNCTIONS.contains(&function.as_str()) {
            return Err(HydrationError::UnsupportedFunction { name: function });
        }

        self.execute_link(item, arguments, document_root, engine)
    }

    fn execute_link<'d>(
        &self,
        item: &HydrationItem<'d>,
        (source_xpath, child_name): (String, String),
        document_root: Element<'d>,
        engine: &HydrationEngine<'d>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError> {
        let matches = select_elements(&source_xpath, document_root)?;
        if matches.is_empty() {
            return Err(HydrationError::EmptyLinkSource {
                expression: source_xpath,
            });
        }

        let mut produced = Vec::new();
        for matched in matches {
            let children = select_elements(&format!("./{child_name}"), matched)?;
            for child in children {
                let clone = copy_subtree(engine.document().dom(), item.element);
                clone.remove_attribute("use");
                produced.push(HydrationItem {
                    element: clone,
                    context: Some(child),
                });
            }
        }
        Ok(produced)
    }
}

#[async_trait(?Send)]
impl<'d> HydrationStrategy<'d> for UseFunctionHydrationStrategy {
    async fn apply(
        &self,
        items: Vec<HydrationItem<'d>>,
        document_root: Element<'d>,
        engine: &HydrationEngine<'d>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError> {
        let mut output = Vec::new();
        for item in items {
            let mut queue: VecDeque<HydrationItem<'d>> = VecDeque::from([item]);
            while let Some(current) = queue.pop_front() {
                let Some(expression) = attribute_value(current.element, "use") else {
                    output.push(current);
                    continue;
                };
                let expression = expression.to_string();
                let clones = self.expand_use(&current, &expression, document_root, engine)?;
                if clones.is_empty() {
                    return Err(HydrationError::EmptyExpansion { expression });
                }
                queue.extend(clones);
            }
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_expressions() {
        let (function, (first, second)) =
            parse_use_expression("vn:link(/root/portfolio/position, .)").unwrap();
        assert_eq!(function, "link");
        assert_eq!(first, "/root/portfolio/position");
        assert_eq!(second, ".");
    }

    #[test]
    fn rejects_missing_parentheses_and_bad_arity() {
        assert!(parse_use_expression("vn:link").is_err());
        assert!(parse_use_expression("vn:link(a)").is_err());
        assert!(parse_use_expression("vn:link(a, b, c)").is_err());
    }
}
