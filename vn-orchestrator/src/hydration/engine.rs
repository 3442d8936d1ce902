//! The multi-pass expansion pipeline.
//!
//! The engine owns an ordered strategy list and threads a work-item list
//! through each pass; the output of pass *k* is the input of pass *k+1*.
//! Inputs are deep-copied once on entry, so callers keep their trees.

use std::rc::Rc;

use async_trait::async_trait;
use sxd_document::dom::Element;

use crate::error::HydrationError;
use crate::hydration::AttributeSelectHydrationStrategy;
use crate::hydration::HrefHydrationStrategy;
use crate::hydration::SelectHydrationStrategy;
use crate::hydration::UseFunctionHydrationStrategy;
use crate::hydration::fetchers::ResourceFetcher;
use crate::xml::XmlDocument;
use crate::xml::copy_subtree;

/// A node undergoing hydration, with the context it was bound to.
///
/// The element is owned by the engine's output (a detached subtree the caller
/// may reparent). The context is a non-owning handle into the document a
/// `vn:link` iteration bound the clone to; it is only ever queried by
/// relative XPath.
#[derive(Clone, Copy, Debug)]
pub struct HydrationItem<'d> {
    pub element: Element<'d>,
    pub context: Option<Element<'d>>,
}

/// One pass of the pipeline. Strategies may grow or shrink the item list but
/// never mutate their inputs' source trees.
#[async_trait(?Send)]
pub trait HydrationStrategy<'d> {
    async fn apply(
        &self,
        items: Vec<HydrationItem<'d>>,
        document_root: Element<'d>,
        engine: &HydrationEngine<'d>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError>;
}

pub struct HydrationEngine<'d> {
    document: &'d XmlDocument,
    strategies: Vec<Rc<dyn HydrationStrategy<'d> + 'd>>,
}

impl<'d> HydrationEngine<'d> {
    pub fn new(document: &'d XmlDocument, strategies: Vec<Rc<dyn HydrationStrategy<'d> + 'd>>) -> Self {
        Self {
            document,
            strategies,
        }
    }

    /// The canonical pipeline. The href pass runs again at the end to resolve
    /// any `href` attributes introduced by a select that pulled in a node
    /// which itself contained one; both positions share one strategy instance
    /// and therefore one document cache.
    pub fn with_default_pipeline(
        document: &'d XmlDocument,
        fetcher: Rc<dyn ResourceFetcher>,
    ) -> Self {
        let href = Rc::new(HrefHydrationStrategy::new(fetcher));
        Self::new(
            document,
            vec![
                href.clone(),
                Rc::new(UseFunctionHydrationStrategy),
                Rc::new(AttributeSelectHydrationStrategy),
                Rc::new(SelectHydrationStrategy),
                href,
            ],
        )
    }

    pub fn document(&self) -> &'d XmlDocument {
        self.document
    }

    /// Return fully hydrated copies of `element`.
    ///
    /// The returned items are detached deep copies; strategies may return
    /// multiple items when duplication is required (e.g. `vn:link`).
    pub async fn hydrate(
        &self,
        element: Element<'d>,
        document_root: Element<'d>,
        context: Option<Element<'d>>,
    ) -> Result<Vec<HydrationItem<'d>>, HydrationError> {
        let copy = copy_subtree(self.document.dom(), element);
        let mut items = vec![HydrationItem {
            element: copy,
            context,
        }];
        for strategy in &self.strategies {
            items = strategy.apply(items, document_root, self).await?;
        }
        Ok(items)
    }
}
