//! Resolves `select` attributes by merging in the referenced node and
//! re-hydrating the result through the full pipeline.
//!
//! Nodes under a `use`-carrying ancestor are left alone; they are picked up
//! once that ancestor has been expanded and becomes an item root of its own.

use std::collections::HashMap;

use async_trait::async_trait;
use sxd_document::dom::Element;

use crate::error::HydrationError;
use crate::hydration::HydrationEngine;
use crate::hydration::HydrationItem;
use crate::hydration::HydrationStrategy;
use crate::xml::attribute_value;
use crate::xml::descendants;
use crate::xml::local_name;
use crate::xml::merge::merge_elements;
use crate::xml::parent_element;
use crate::xml::path::select_elements;
use crate::xml::replace_with_many;

pub struct SelectHydrationStrategy;

fn has_use_ancestor(node: Element<'_>) -> bool {
    let mut current = parent_element(node);
    while let Some(ancestor) = current {
        if attribute_value(ancestor, "use").is_some() {
            return true;
        }
        current = parent_element(ancestor);
    }
    false
}

fn resolve_reference<'d>(
    expression: &str,
    document_root: Element<'d>,
    context: Option<Element<'d>>,
    cache: &mut HashMap<String, Element<'d>>,
) -> Result<Element<'d>, HydrationError> {
    if expression.starts_with('/') {
        if let Some(element) = cache.get(expression) {
            return Ok(*element);
        }
        let matches = select_elements(expression, document_root)?;
        let element = validate_single(expression, matches)?;
        cache.insert(expression.to_string(), element);
        return Ok(element);
    }

    if !expression.starts_with('.') {
        return Err(HydrationError::InvalidSelectExpression {
            expression: expression.to_string(),
        });
    }

    let context = context.ok_or_else(|| HydrationError::MissingContext {
        expression: expression.to_string(),
    })?;

    if expression == "." {
        return Ok(context);
    }

    let matches = select_elements(expression, context)?;
    validate_single(expression, matches)
}

fn validate_single<'d>(
    expression: &str,
    matches: Vec<Element<'d>>,
) -> Result<Element<'d>, HydrationError> {
    if matches.len() != 1 {
        return Err(HydrationError::SelectCardinality {
            expression: expression.to_string(),
            count: matches.len(),
        });
    }
    Ok(matches[0])
}

#[async_trait(?Send)]
impl<'d> HydrationStrategy<'d> for SelectHydrationStrategy {
    async fn apply(
        &self,
        items: Vec<HydrationItem<'d>>,
        document_root: Element<'d>,
        engine: &HydrationEngine<'d>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError> {
        let mut cache: HashMap<String, Element<'d>> = HashMap::new();
        for item in &items {
            loop {
                let eligible: Vec<Element<'d>> = descendants(item.element)
                    .into_iter()
                    .filter(|node| {
                        node.attribute("select").is_some() && !has_use_ancestor(*node)
                    })
                    .collect();
                if eligible.is_empty() {
                    break;
                }

                for node in eligible {
                    let expression = attribute_value(node, "select")
                        .unwrap_or_default()
                        .to_string();
                    if expression.is_empty() {
                        return Err(HydrationError::EmptySelectValue);
                    }

                    let referenced =
                        resolve_reference(&expression, document_root, item.context, &mut cache)?;

                    let parent =
                        parent_element(node).ok_or_else(|| HydrationError::MissingParent {
                            tag: local_name(node).to_string(),
                            expression: expression.clone(),
                        })?;

                    let merged = merge_elements(
                        engine.document().dom(),
                        node,
                        referenced,
                        &["select"],
                        &[],
                    );

                    // The merged content may itself contain href/use/select or
                    // placeholders; run it through the whole pipeline and
                    // splice every produced item back in order.
                    let replacements = engine.hydrate(merged, document_root, item.context).await?;
                    if replacements.is_empty() {
                        return Err(HydrationError::EmptyResult {
                            expression: expression.clone(),
                        });
                    }
                    let elements: Vec<Element<'d>> = replacements
                        .iter()
                        .map(|replacement| {
                            replacement.element.remove_attribute("select");
                            replacement.element
                        })
                        .collect();
                    replace_with_many(parent, node, &elements);
                }
            }
        }
        Ok(items)
    }
}
