//! Thin layer over `sxd-document` used by the hydration engine and the
//! orchestrator.
//!
//! All nodes live in a per-request arena ([`XmlDocument`] owns the backing
//! `Package`); element values are cheap copyable handles into it. Helpers here
//! follow the text model of the source documents: an element's "text" is the
//! run of character data before its first child element, and its "tail" is the
//! run following its end tag, owned positionally by the parent.

pub mod merge;
pub mod path;

use sxd_document::Package;
use sxd_document::QName;
use sxd_document::dom::ChildOfElement;
use sxd_document::dom::ChildOfRoot;
use sxd_document::dom::Document;
use sxd_document::dom::Element;
use sxd_document::dom::ParentOfChild;
use sxd_document::parser;

/// Parse failure for a document that should have been well-formed XML.
#[derive(Debug, thiserror::Error)]
#[error("XML is not well-formed: {message}")]
pub struct XmlError {
    pub message: String,
}

/// An owned XML document arena. One instance is created per request and every
/// element handle produced during hydration points into it (or into a cached
/// remote document, until imported).
pub struct XmlDocument {
    package: Package,
}

impl XmlDocument {
    pub fn parse(text: &str) -> Result<Self, XmlError> {
        let package = parser::parse(text).map_err(|error| XmlError {
            message: error.to_string(),
        })?;
        Ok(Self { package })
    }

    pub fn new() -> Self {
        Self {
            package: Package::new(),
        }
    }

    pub fn dom(&self) -> Document<'_> {
        self.package.as_document()
    }

    /// The document element, when one exists.
    pub fn root_element(&self) -> Option<Element<'_>> {
        self.dom()
            .root()
            .children()
            .into_iter()
            .find_map(|child| child.element())
    }
}

impl Default for XmlDocument {
    fn default() -> Self {
        Self::new()
    }
}

pub fn local_name(element: Element<'_>) -> &str {
    element.name().local_part()
}

pub fn attribute_value<'d>(element: Element<'d>, name: &str) -> Option<&'d str> {
    element.attribute(name).map(|attribute| attribute.value())
}

pub fn parent_element(element: Element<'_>) -> Option<Element<'_>> {
    match element.parent() {
        Some(ParentOfChild::Element(parent)) => Some(parent),
        _ => None,
    }
}

/// Child elements in document order.
pub fn element_children(element: Element<'_>) -> Vec<Element<'_>> {
    element
        .children()
        .into_iter()
        .filter_map(|child| child.element())
        .collect()
}

/// First child element with the given local name.
pub fn find_child<'d>(element: Element<'d>, name: &str) -> Option<Element<'d>> {
    element_children(element)
        .into_iter()
        .find(|child| local_name(*child) == name)
}

/// All descendant elements in document order, excluding `element` itself.
pub fn descendants(element: Element<'_>) -> Vec<Element<'_>> {
    let mut collected = Vec::new();
    collect_descendants(element, &mut collected);
    collected
}

fn collect_descendants<'d>(element: Element<'d>, collected: &mut Vec<Element<'d>>) {
    for child in element_children(element) {
        collected.push(child);
        collect_descendants(child, collected);
    }
}

pub fn self_and_descendants(element: Element<'_>) -> Vec<Element<'_>> {
    let mut collected = vec![element];
    collect_descendants(element, &mut collected);
    collected
}

/// The text run before the first child element, or `None` when empty.
pub fn leading_text(element: Element<'_>) -> Option<String> {
    let mut buffer = String::new();
    for child in element.children() {
        match child {
            ChildOfElement::Text(text) => buffer.push_str(text.text()),
            ChildOfElement::Element(_) => break,
            _ => {}
        }
    }
    if buffer.is_empty() { None } else { Some(buffer) }
}

/// The text run between `element`'s end tag and the next sibling element.
pub fn tail_text(element: Element<'_>) -> Option<String> {
    // Character data cannot appear directly under the document root, so only
    // element parents can carry a tail.
    let parent_children = match element.parent() {
        Some(ParentOfChild::Element(parent)) => parent.children(),
        _ => return None,
    };

    let mut buffer = String::new();
    let mut seen = false;
    for child in parent_children {
        match child {
            ChildOfElement::Element(sibling) => {
                if seen {
                    break;
                }
                seen = sibling == element;
            }
            ChildOfElement::Text(text) if seen => buffer.push_str(text.text()),
            _ => {}
        }
    }
    if buffer.is_empty() { None } else { Some(buffer) }
}

/// Make `element` the document element, replacing the current one. Absolute
/// XPath expressions resolve through the document root, so a hydrated copy
/// must be installed before it can serve as the tree they run against.
pub fn install_root<'d>(document: Document<'d>, element: Element<'d>) {
    let root = document.root();
    for child in root.children() {
        if let ChildOfRoot::Element(existing) = child {
            existing.remove_from_parent();
        }
    }
    root.append_child(element);
}

/// Replace the text run before the first child element.
pub fn set_leading_text<'d>(document: Document<'d>, element: Element<'d>, text: &str) {
    let mut rest = Vec::new();
    let mut seen_element = false;
    for child in element.children() {
        match child {
            ChildOfElement::Text(existing) if !seen_element => existing.remove_from_parent(),
            ChildOfElement::Element(_) => {
                seen_element = true;
                rest.push(child);
            }
            other => rest.push(other),
        }
    }
    element.append_child(document.create_text(text));
    for child in rest {
        element.append_child(child);
    }
}

fn clone_name<'s, 'd>(document: Document<'d>, name: QName<'s>) -> Element<'d> {
    match name.namespace_uri() {
        Some(uri) => {
            document.create_element(QName::with_namespace_uri(Some(uri), name.local_part()))
        }
        None => document.create_element(name.local_part()),
    }
}

/// Deep copy of `source` as a detached element of `document`. Works across
/// arenas, which is how cached remote documents are imported into the request
/// document.
pub fn copy_subtree<'d>(document: Document<'d>, source: Element<'_>) -> Element<'d> {
    let copy = clone_name(document, source.name());
    for attribute in source.attributes() {
        let name = attribute.name();
        match name.namespace_uri() {
            Some(uri) => copy.set_attribute_value(
                QName::with_namespace_uri(Some(uri), name.local_part()),
                attribute.value(),
            ),
            None => copy.set_attribute_value(name.local_part(), attribute.value()),
        };
    }
    copy_children_into(document, source, copy);
    copy
}

fn copy_children_into<'d>(document: Document<'d>, source: Element<'_>, target: Element<'d>) {
    for child in source.children() {
        match child {
            ChildOfElement::Element(element) => {
                let copied = copy_subtree(document, element);
                target.append_child(copied);
            }
            ChildOfElement::Text(text) => {
                target.append_child(document.create_text(text.text()));
            }
            ChildOfElement::Comment(comment) => {
                target.append_child(document.create_comment(comment.text()));
            }
            ChildOfElement::ProcessingInstruction(pi) => {
                target.append_child(document.create_processing_instruction(pi.target(), pi.value()));
            }
        }
    }
}

/// Splice `replacements` into `parent` at `old`'s position, in order. Text
/// runs around the position (including `old`'s tail) stay where they are.
pub fn replace_with_many<'d>(parent: Element<'d>, old: Element<'d>, replacements: &[Element<'d>]) {
    let original = parent.children();
    for child in original {
        match child {
            ChildOfElement::Element(element) if element == old => {
                for replacement in replacements {
                    parent.append_child(*replacement);
                }
            }
            other => parent.append_child(other),
        }
    }
    old.remove_from_parent();
}

/// Replace `target`'s attributes, text, and children with `source`'s,
/// in place. Used when the node being hydrated has no parent to splice into.
pub fn replace_contents<'d>(target: Element<'d>, source: Element<'d>) {
    for attribute in target.attributes() {
        let name = attribute.name();
        target.remove_attribute(name);
    }
    for child in target.children() {
        match child {
            ChildOfElement::Element(element) => element.remove_from_parent(),
            ChildOfElement::Text(text) => text.remove_from_parent(),
            ChildOfElement::Comment(comment) => comment.remove_from_parent(),
            ChildOfElement::ProcessingInstruction(pi) => pi.remove_from_parent(),
        }
    }
    for attribute in source.attributes() {
        let name = attribute.name();
        match name.namespace_uri() {
            Some(uri) => target.set_attribute_value(
                QName::with_namespace_uri(Some(uri), name.local_part()),
                attribute.value(),
            ),
            None => target.set_attribute_value(name.local_part(), attribute.value()),
        };
    }
    for child in source.children() {
        target.append_child(child);
    }
}

fn escape_text(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
}

fn escape_attribute(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
}

fn write_open_tag(element: Element<'_>, out: &mut String) {
    out.push('<');
    out.push_str(local_name(element));
    // Attribute order is arena order, which is not stable; sort for
    // deterministic output.
    let mut attributes = element.attributes();
    attributes.sort_by(|a, b| a.name().local_part().cmp(b.name().local_part()));
    for attribute in attributes {
        out.push(' ');
        out.push_str(attribute.name().local_part());
        out.push_str("=\"");
        escape_attribute(attribute.value(), out);
        out.push('"');
    }
}

fn is_blank(text: &str) -> bool {
    text.chars().all(char::is_whitespace)
}

fn write_element(element: Element<'_>, out: &mut String, indent: Option<usize>) {
    if let Some(depth) = indent {
        for _ in 0..depth {
            out.push_str("  ");
        }
    }
    write_open_tag(element, out);

    let children = element.children();
    let has_element_child = children.iter().any(|c| c.element().is_some());
    let has_significant_text = children.iter().any(|c| match c {
        ChildOfElement::Text(text) => !is_blank(text.text()),
        _ => false,
    });

    if children.is_empty() || (indent.is_some() && !has_element_child && !has_significant_text) {
        out.push_str("/>");
        if indent.is_some() {
            out.push('\n');
        }
        return;
    }

    if indent.is_some() && has_element_child && !has_significant_text {
        // Element-only content: reindent, dropping inter-element whitespace.
        out.push_str(">\n");
        let depth = indent.unwrap_or(0);
        for child in children {
            if let ChildOfElement::Element(inner) = child {
                write_element(inner, out, Some(depth + 1));
            }
        }
        for _ in 0..depth {
            out.push_str("  ");
        }
    } else {
        // Mixed or text content: preserve it exactly, inline.
        out.push('>');
        for child in children {
            match child {
                ChildOfElement::Element(inner) => write_element(inner, out, None),
                ChildOfElement::Text(text) => escape_text(text.text(), out),
                ChildOfElement::Comment(comment) => {
                    out.push_str("<!--");
                    out.push_str(comment.text());
                    out.push_str("-->");
                }
                ChildOfElement::ProcessingInstruction(pi) => {
                    out.push_str("<?");
                    out.push_str(pi.target());
                    if let Some(value) = pi.value() {
                        out.push(' ');
                        out.push_str(value);
                    }
                    out.push_str("?>");
                }
            }
        }
    }

    out.push_str("</");
    out.push_str(local_name(element));
    out.push('>');
    if indent.is_some() {
        out.push('\n');
    }
}

/// Compact single-line serialization of an element subtree.
pub fn to_xml_string(element: Element<'_>) -> String {
    let mut out = String::new();
    write_element(element, &mut out, None);
    out
}

/// Pretty-printed serialization (two-space indent); whitespace-only runs in
/// element-only content are normalized, text content is preserved verbatim.
pub fn to_pretty_xml(element: Element<'_>) -> String {
    let mut out = String::new();
    write_element(element, &mut out, Some(0));
    out
}
