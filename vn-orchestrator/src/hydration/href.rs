//! Resolves nodes with `href` attributes by fetching and merging external XML.
//!
//! The local element's attributes and children take precedence over the
//! remote content. Fetched documents are cached per strategy instance, which
//! is scoped to one request.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use sxd_document::dom::Element;

use crate::error::HydrationError;
use crate::hydration::HydrationEngine;
use crate::hydration::HydrationItem;
use crate::hydration::HydrationStrategy;
use crate::hydration::fetchers::ResourceFetcher;
use crate::xml::XmlDocument;
use crate::xml::attribute_value;
use crate::xml::copy_subtree;
use crate::xml::descendants;
use crate::xml::local_name;
use crate::xml::merge::merge_elements;
use crate::xml::parent_element;
use crate::xml::path::element_path;
use crate::xml::path::select_elements;
use crate::xml::replace_contents;
use crate::xml::replace_with_many;
use crate::xml::self_and_descendants;

const IDENTITY_ATTRIBUTES: [&str; 2] = ["name", "id"];

pub struct HrefHydrationStrategy {
    fetcher: Rc<dyn ResourceFetcher>,
    documents: RefCell<HashMap<String, XmlDocument>>,
}

impl HrefHydrationStrategy {
    pub fn new(fetcher: Rc<dyn ResourceFetcher>) -> Self {
        Self {
            fetcher,
            documents: RefCell::new(HashMap::new()),
        }
    }

    async fn hydrate_href_nodes<'d>(
        &self,
        document: &'d XmlDocument,
        element: Element<'d>,
    ) -> Result<(), HydrationError> {
        // Resolving one node can splice in content that itself carries hrefs;
        // rescan until none remain.
        loop {
            let nodes: Vec<Element<'d>> = descendants(element)
                .into_iter()
                .filter(|node| node.attribute("href").is_some())
                .collect();
            if nodes.is_empty() {
                return Ok(());
            }
            for node in nodes {
                self.hydrate_single_node(document, node).await?;
            }
        }
    }

    async fn hydrate_single_node<'d>(
        &self,
        document: &'d XmlDocument,
        node: Element<'d>,
    ) -> Result<(), HydrationError> {
        let href = attribute_value(node, "href").unwrap_or_default().to_string();
        if href.is_empty() {
            return Err(HydrationError::EmptyHref {
                tag: local_name(node).to_string(),
            });
        }

        let path = element_path(node);
        self.ensure_cached(&href).await?;
        let remote = self.locate_and_import(document, node, &href, &path)?;
        let merged = merge_elements(document.dom(), node, remote, &["href"], &["href"]);

        match parent_element(node) {
            Some(parent) => replace_with_many(parent, node, &[merged]),
            None => replace_contents(node, merged),
        }
        Ok(())
    }

    async fn ensure_cached(&self, uri: &str) -> Result<(), HydrationError> {
        if self.documents.borrow().contains_key(uri) {
            return Ok(());
        }
        let bytes = self.fetcher.fetch(uri).await?;
        let text = String::from_utf8(bytes).map_err(|_| HydrationError::RemoteParse {
            uri: uri.to_string(),
        })?;
        let parsed = XmlDocument::parse(&text).map_err(|_| HydrationError::RemoteParse {
            uri: uri.to_string(),
        })?;
        self.documents.borrow_mut().insert(uri.to_string(), parsed);
        Ok(())
    }

    /// Locate the node in the cached remote document that corresponds to
    /// `local`, and import a copy of it into the request document.
    fn locate_and_import<'d>(
        &self,
        document: &'d XmlDocument,
        local: Element<'d>,
        uri: &str,
        path: &str,
    ) -> Result<Element<'d>, HydrationError> {
        let cache = self.documents.borrow();
        let remote_document = cache.get(uri).ok_or_else(|| HydrationError::RemoteParse {
            uri: uri.to_string(),
        })?;
        let remote_root =
            remote_document
                .root_element()
                .ok_or_else(|| HydrationError::RemoteParse {
                    uri: uri.to_string(),
                })?;

        // (a) the local node's own path, (b) identity attributes, (c) unique tag.
        let by_path = select_elements(path, remote_root).map_err(HydrationError::from)?;
        if by_path.len() == 1 {
            return Ok(copy_subtree(document.dom(), by_path[0]));
        }

        let tag = local_name(local);
        for attribute in IDENTITY_ATTRIBUTES {
            let Some(wanted) = attribute_value(local, attribute) else {
                continue;
            };
            let matches: Vec<Element<'_>> = self_and_descendants(remote_root)
                .into_iter()
                .filter(|candidate| {
                    local_name(*candidate) == tag
                        && attribute_value(*candidate, attribute) == Some(wanted)
                })
                .collect();
            if matches.len() == 1 {
                return Ok(copy_subtree(document.dom(), matches[0]));
            }
        }

        let by_tag: Vec<Element<'_>> = self_and_descendants(remote_root)
            .into_iter()
            .filter(|candidate| local_name(*candidate) == tag)
            .collect();
        if by_tag.len() == 1 {
            return Ok(copy_subtree(document.dom(), by_tag[0]));
        }

        Err(HydrationError::AmbiguousRemoteMatch {
            uri: uri.to_string(),
            path: path.to_string(),
        })
    }
}

#[async_trait(?Send)]
impl<'d> HydrationStrategy<'d> for HrefHydrationStrategy {
    async fn apply(
        &self,
        items: Vec<HydrationItem<'d>>,
        _document_root: Element<'d>,
        engine: &HydrationEngine<'d>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError> {
        for item in &items {
            self.hydrate_href_nodes(engine.document(), item.element)
                .await?;
        }
        Ok(items)
    }
}
