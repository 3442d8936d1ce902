//! Identity-aware element merging.
//!
//! Used by both the href strategy (local node vs fetched remote node) and the
//! select strategy (local node vs referenced node). The local side always
//! wins: its attributes overlay the remote's, its text is kept when non-blank,
//! and its children drive the merge order. Children are matched by identity
//! (`name`/`id` attribute) when present, positionally otherwise.

use std::collections::HashMap;
use std::collections::HashSet;

use sxd_document::dom::Document;
use sxd_document::dom::Element;

use super::attribute_value;
use super::copy_subtree;
use super::element_children;
use super::leading_text;
use super::local_name;
use super::tail_text;

const IDENTITY_ATTRIBUTES: [&str; 2] = ["name", "id"];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChildKey {
    tag: String,
    attribute: Option<(&'static str, String)>,
    position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChildSignature {
    tag: String,
    attribute: Option<(&'static str, String)>,
}

fn child_key(element: Element<'_>, position: usize) -> ChildKey {
    for attribute in IDENTITY_ATTRIBUTES {
        if let Some(value) = attribute_value(element, attribute) {
            return ChildKey {
                tag: local_name(element).to_string(),
                attribute: Some((attribute, value.to_string())),
                position: 0,
            };
        }
    }
    ChildKey {
        tag: local_name(element).to_string(),
        attribute: None,
        position,
    }
}

fn child_signature(element: Element<'_>) -> ChildSignature {
    for attribute in IDENTITY_ATTRIBUTES {
        if let Some(value) = attribute_value(element, attribute) {
            return ChildSignature {
                tag: local_name(element).to_string(),
                attribute: Some((attribute, value.to_string())),
            };
        }
    }
    ChildSignature {
        tag: local_name(element).to_string(),
        attribute: None,
    }
}

fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

/// Merge `local` over `remote` into a fresh detached element of `document`.
///
/// `ignore_local` / `ignore_remote` name attributes dropped from the
/// respective side (`href` for href merges, `select` on the local side for
/// select merges). Neither input is mutated.
pub fn merge_elements<'d>(
    document: Document<'d>,
    local: Element<'d>,
    remote: Element<'_>,
    ignore_local: &[&str],
    ignore_remote: &[&str],
) -> Element<'d> {
    let merged = super::clone_name(document, remote.name());

    for attribute in remote.attributes() {
        let name = attribute.name().local_part();
        if ignore_remote.contains(&name) {
            continue;
        }
        merged.set_attribute_value(name, attribute.value());
    }
    for attribute in local.attributes() {
        let name = attribute.name().local_part();
        if ignore_local.contains(&name) {
            continue;
        }
        merged.set_attribute_value(name, attribute.value());
    }

    // Text precedence: local when non-blank.
    let text = match leading_text(local) {
        Some(text) if !is_blank(&text) => Some(text),
        _ => leading_text(remote),
    };

    let remote_children = element_children(remote);
    let remote_keys: Vec<ChildKey> = remote_children
        .iter()
        .enumerate()
        .map(|(index, child)| child_key(*child, index))
        .collect();
    let remote_lookup: HashMap<&ChildKey, usize> = remote_keys
        .iter()
        .enumerate()
        .map(|(index, key)| (key, index))
        .collect();
    let mut consumed: HashSet<ChildKey> = HashSet::new();

    // (element, tail) pairs; tails are re-attached as text runs at assembly.
    let mut merged_children: Vec<(Element<'d>, Option<String>)> = Vec::new();

    let local_children = element_children(local);
    for (index, local_child) in local_children.iter().enumerate() {
        let key = child_key(*local_child, index);
        let mut matched = remote_lookup.get(&key).map(|index| (*index, key.clone()));

        if matched.is_none() {
            // Identity fallback: first unconsumed remote child with the same
            // signature.
            let signature = child_signature(*local_child);
            for (candidate_index, candidate) in remote_children.iter().enumerate() {
                let candidate_key = &remote_keys[candidate_index];
                if consumed.contains(candidate_key) {
                    continue;
                }
                if child_signature(*candidate) == signature {
                    matched = Some((candidate_index, candidate_key.clone()));
                    break;
                }
            }
        }

        let merged_child = match matched {
            Some((remote_index, matched_key)) => {
                consumed.insert(matched_key);
                merge_elements(
                    document,
                    *local_child,
                    remote_children[remote_index],
                    ignore_local,
                    ignore_remote,
                )
            }
            None => copy_subtree(document, *local_child),
        };
        merged_children.push((merged_child, tail_text(*local_child)));
    }

    let local_signatures: HashSet<ChildSignature> = local_children
        .iter()
        .map(|child| child_signature(*child))
        .collect();

    for (index, remote_child) in remote_children.iter().enumerate() {
        let key = child_key(*remote_child, index);
        if consumed.contains(&key) {
            continue;
        }
        // A remote child whose identity already appears locally was either
        // merged or deliberately overridden; appending it would duplicate.
        if local_signatures.contains(&child_signature(*remote_child)) {
            continue;
        }
        merged_children.push((copy_subtree(document, *remote_child), tail_text(*remote_child)));
    }

    if let Some(text) = text {
        merged.append_child(document.create_text(&text));
    }
    for (child, tail) in merged_children {
        merged.append_child(child);
        if let Some(tail) = tail {
            merged.append_child(document.create_text(&tail));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::super::XmlDocument;
    use super::super::find_child;
    use super::super::to_xml_string;
    use super::*;

    fn fragment<'d>(doc: &'d XmlDocument, path: &[&str]) -> Element<'d> {
        let mut current = doc.root_element().unwrap();
        for name in path {
            current = find_child(current, name).unwrap();
        }
        current
    }

    #[test]
    fn local_attributes_override_remote() {
        let doc = XmlDocument::parse(
            "<root><market name='Market1' attr='remote'/>\
             <valuation><market name='LocalMarket' date='2024-01-01'/></valuation></root>",
        )
        .unwrap();
        let local = fragment(&doc, &["valuation", "market"]);
        let remote = fragment(&doc, &["market"]);
        let merged = merge_elements(doc.dom(), local, remote, &[], &[]);
        assert_eq!(attribute_value(merged, "name"), Some("LocalMarket"));
        assert_eq!(attribute_value(merged, "date"), Some("2024-01-01"));
        assert_eq!(attribute_value(merged, "attr"), Some("remote"));
    }

    #[test]
    fn local_children_merge_into_remote() {
        let doc = XmlDocument::parse(
            "<root><market name='Market1'><rate>0.02</rate></market>\
             <valuation><market name='LocalMarket'>\
             <rate>0.03</rate><description>preferred</description>\
             </market></valuation></root>",
        )
        .unwrap();
        let local = fragment(&doc, &["valuation", "market"]);
        let remote = fragment(&doc, &["market"]);
        let merged = merge_elements(doc.dom(), local, remote, &[], &[]);
        let rate = find_child(merged, "rate").unwrap();
        assert_eq!(leading_text(rate).as_deref(), Some("0.03"));
        let description = find_child(merged, "description").unwrap();
        assert_eq!(leading_text(description).as_deref(), Some("preferred"));
    }

    #[test]
    fn remote_only_children_are_appended_once() {
        let doc = XmlDocument::parse(
            "<root><market><rate name='r1'>0.02</rate><spread>0.001</spread></market>\
             <valuation><market><rate name='r1'>0.03</rate></market></valuation></root>",
        )
        .unwrap();
        let local = fragment(&doc, &["valuation", "market"]);
        let remote = fragment(&doc, &["market"]);
        let merged = merge_elements(doc.dom(), local, remote, &[], &[]);
        let children = element_children(merged);
        assert_eq!(children.len(), 2);
        assert_eq!(local_name(children[0]), "rate");
        assert_eq!(leading_text(children[0]).as_deref(), Some("0.03"));
        assert_eq!(local_name(children[1]), "spread");
    }

    #[test]
    fn ignored_attributes_are_dropped() {
        let doc = XmlDocument::parse(
            "<root><m href='s3://b/k' a='r'/><v><m href='file://x' b='l'/></v></root>",
        )
        .unwrap();
        let local = fragment(&doc, &["v", "m"]);
        let remote = fragment(&doc, &["m"]);
        let merged = merge_elements(doc.dom(), local, remote, &["href"], &["href"]);
        assert_eq!(attribute_value(merged, "href"), None);
        assert_eq!(attribute_value(merged, "a"), Some("r"));
        assert_eq!(attribute_value(merged, "b"), Some("l"));
        assert!(!to_xml_string(merged).contains("href"));
    }
}
