//! Hydration pipeline behavior: merge precedence, fan-out, placeholders,
//! purity of the output, and the strategy failure modes.

use std::io::Write;
use std::rc::Rc;

use vn_orchestrator::error::HydrationError;
use vn_orchestrator::hydration::AttributeSelectHydrationStrategy;
use vn_orchestrator::hydration::HydrationEngine;
use vn_orchestrator::hydration::SelectHydrationStrategy;
use vn_orchestrator::hydration::UseFunctionHydrationStrategy;
use vn_orchestrator::hydration::fetchers::CompositeResourceFetcher;
use vn_orchestrator::hydration::fetchers::FileResourceFetcher;
use vn_orchestrator::xml::XmlDocument;
use vn_orchestrator::xml::attribute_value;
use vn_orchestrator::xml::element_children;
use vn_orchestrator::xml::find_child;
use vn_orchestrator::xml::leading_text;
use vn_orchestrator::xml::local_name;
use vn_orchestrator::xml::self_and_descendants;
use vn_orchestrator::xml::to_xml_string;

fn default_engine(document: &XmlDocument) -> HydrationEngine<'_> {
    HydrationEngine::with_default_pipeline(
        document,
        Rc::new(CompositeResourceFetcher::new(vec![Box::new(
            FileResourceFetcher,
        )])),
    )
}

fn select_only_engine(document: &XmlDocument) -> HydrationEngine<'_> {
    HydrationEngine::new(document, vec![Rc::new(SelectHydrationStrategy)])
}

/// No `href`, `use`, `select`, nor `${select(...)}` anywhere in the subtree.
fn assert_fully_hydrated(element: sxd_document::dom::Element<'_>) {
    for node in self_and_descendants(element) {
        for reference in ["href", "use", "select"] {
            assert!(
                attribute_value(node, reference).is_none(),
                "<{}> still carries {reference}",
                local_name(node)
            );
        }
        for attribute in node.attributes() {
            assert!(
                !attribute.value().starts_with("${select("),
                "<{}> still carries a placeholder",
                local_name(node)
            );
        }
    }
}

#[tokio::test]
async fn select_local_attributes_override_remote() {
    let doc = XmlDocument::parse(
        "<root>\
         <market name=\"Market1\" attr=\"remote\"/>\
         <valuation><market name=\"LocalMarket\" date=\"2024-01-01\" select=\"/root/market\"/></valuation>\
         </root>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = select_only_engine(&doc);
    let items = engine.hydrate(valuation, root, None).await.unwrap();
    assert_eq!(items.len(), 1);
    let market = find_child(items[0].element, "market").unwrap();

    assert_eq!(attribute_value(market, "name"), Some("LocalMarket"));
    assert_eq!(attribute_value(market, "date"), Some("2024-01-01"));
    assert_eq!(attribute_value(market, "attr"), Some("remote"));
    assert_fully_hydrated(market);
}

#[tokio::test]
async fn select_local_children_merge_into_remote() {
    let doc = XmlDocument::parse(
        "<root>\
         <market name=\"Market1\"><rate>0.02</rate></market>\
         <valuation><market name=\"LocalMarket\" select=\"/root/market\">\
         <rate>0.03</rate><description>preferred</description>\
         </market></valuation>\
         </root>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = select_only_engine(&doc);
    let items = engine.hydrate(valuation, root, None).await.unwrap();
    let market = find_child(items[0].element, "market").unwrap();

    let rate = find_child(market, "rate").unwrap();
    assert_eq!(leading_text(rate).as_deref(), Some("0.03"));
    let description = find_child(market, "description").unwrap();
    assert_eq!(leading_text(description).as_deref(), Some("preferred"));
}

#[tokio::test]
async fn select_requires_exactly_one_match() {
    let doc = XmlDocument::parse(
        "<root><m/><m/>\
         <ambiguous><x select=\"/root/m\"/></ambiguous>\
         <unmatched><y select=\"/root/absent\"/></unmatched></root>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let engine = select_only_engine(&doc);

    let ambiguous = find_child(root, "ambiguous").unwrap();
    let error = engine.hydrate(ambiguous, root, None).await.unwrap_err();
    assert!(matches!(
        error,
        HydrationError::SelectCardinality { count: 2, .. }
    ));

    let unmatched = find_child(root, "unmatched").unwrap();
    let error = engine.hydrate(unmatched, root, None).await.unwrap_err();
    assert!(matches!(
        error,
        HydrationError::SelectCardinality { count: 0, .. }
    ));
}

#[tokio::test]
async fn select_relative_requires_context() {
    let doc =
        XmlDocument::parse("<root><valuation><x select=\"./m\"/></valuation></root>").unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = select_only_engine(&doc);
    let error = engine.hydrate(valuation, root, None).await.unwrap_err();
    assert!(matches!(error, HydrationError::MissingContext { .. }));
}

#[tokio::test]
async fn use_link_multiplies_items_and_binds_contexts() {
    let doc = XmlDocument::parse(
        "<req>\
         <portfolio><position id=\"p1\"/><position id=\"p2\"/><position id=\"p3\"/></portfolio>\
         <valuation name=\"npv\" use=\"vn:link(/req/portfolio/position, .)\">\
         <instrument ref=\"${select(./@id)}\"/>\
         </valuation>\
         </req>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = HydrationEngine::new(
        &doc,
        vec![
            Rc::new(UseFunctionHydrationStrategy),
            Rc::new(AttributeSelectHydrationStrategy),
            Rc::new(SelectHydrationStrategy),
        ],
    );
    let items = engine.hydrate(valuation, root, None).await.unwrap();
    assert_eq!(items.len(), 3);

    let refs: Vec<String> = items
        .iter()
        .map(|item| {
            assert!(item.context.is_some());
            let instrument = find_child(item.element, "instrument").unwrap();
            attribute_value(instrument, "ref").unwrap().to_string()
        })
        .collect();
    assert_eq!(refs, ["p1", "p2", "p3"]);
    for item in &items {
        assert_fully_hydrated(item.element);
    }
}

#[tokio::test]
async fn use_link_context_resolves_dot_select() {
    // select="." clones the bound context node itself into each expansion.
    let doc = XmlDocument::parse(
        "<req>\
         <portfolio><position id=\"p1\"><qty>5</qty></position></portfolio>\
         <valuation use=\"vn:link(/req/portfolio/position, .)\">\
         <position select=\".\"/>\
         </valuation>\
         </req>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = HydrationEngine::new(
        &doc,
        vec![
            Rc::new(UseFunctionHydrationStrategy),
            Rc::new(SelectHydrationStrategy),
        ],
    );
    let items = engine.hydrate(valuation, root, None).await.unwrap();
    assert_eq!(items.len(), 1);
    let position = find_child(items[0].element, "position").unwrap();
    assert_eq!(attribute_value(position, "id"), Some("p1"));
    let qty = find_child(position, "qty").unwrap();
    assert_eq!(leading_text(qty).as_deref(), Some("5"));
}

#[tokio::test]
async fn use_link_with_zero_matches_fails() {
    let doc = XmlDocument::parse(
        "<req><valuation use=\"vn:link(/req/portfolio/position, .)\"/></req>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = HydrationEngine::new(&doc, vec![Rc::new(UseFunctionHydrationStrategy)]);
    let error = engine.hydrate(valuation, root, None).await.unwrap_err();
    assert!(matches!(error, HydrationError::EmptyLinkSource { .. }));
}

#[tokio::test]
async fn use_rejects_foreign_namespaces_and_functions() {
    let doc = XmlDocument::parse(
        "<req><p/><a use=\"xx:link(/req/p, .)\"/><b use=\"vn:map(/req/p, .)\"/></req>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let engine = HydrationEngine::new(&doc, vec![Rc::new(UseFunctionHydrationStrategy)]);

    let a = find_child(root, "a").unwrap();
    let error = engine.hydrate(a, root, None).await.unwrap_err();
    assert!(matches!(error, HydrationError::UnsupportedNamespace { .. }));

    let b = find_child(root, "b").unwrap();
    let error = engine.hydrate(b, root, None).await.unwrap_err();
    assert!(matches!(error, HydrationError::UnsupportedFunction { .. }));
}

#[tokio::test]
async fn attribute_select_resolves_absolute_paths() {
    let doc = XmlDocument::parse(
        "<root><config version=\"v7\"/>\
         <valuation model=\"${select(/root/config/@version)}\" plain=\"left-alone\"/></root>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = HydrationEngine::new(&doc, vec![Rc::new(AttributeSelectHydrationStrategy)]);
    let items = engine.hydrate(valuation, root, None).await.unwrap();
    let hydrated = items[0].element;
    assert_eq!(attribute_value(hydrated, "model"), Some("v7"));
    assert_eq!(attribute_value(hydrated, "plain"), Some("left-alone"));
}

#[tokio::test]
async fn attribute_select_rejects_ambiguity_and_missing_context() {
    let doc = XmlDocument::parse(
        "<root><m v=\"1\"/><m v=\"2\"/>\
         <a x=\"${select(/root/m/@v)}\"/>\
         <b x=\"${select(./@v)}\"/>\
         <c x=\"${select(relative-ish)}\"/></root>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let engine = HydrationEngine::new(&doc, vec![Rc::new(AttributeSelectHydrationStrategy)]);

    let a = find_child(root, "a").unwrap();
    let error = engine.hydrate(a, root, None).await.unwrap_err();
    assert!(matches!(
        error,
        HydrationError::AttributeSelectCardinality { count: 2, .. }
    ));

    let b = find_child(root, "b").unwrap();
    let error = engine.hydrate(b, root, None).await.unwrap_err();
    assert!(matches!(error, HydrationError::MissingContext { .. }));

    let c = find_child(root, "c").unwrap();
    let error = engine.hydrate(c, root, None).await.unwrap_err();
    assert!(matches!(error, HydrationError::InvalidAttributeSelect { .. }));
}

fn write_fixture(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "{content}").unwrap();
    file
}

#[tokio::test]
async fn href_merges_remote_content_with_local_precedence() {
    let remote = write_fixture(
        "<defs><market name=\"Market1\" attr=\"remote\"><rate>0.02</rate><spread>0.001</spread></market></defs>",
    );
    let uri = format!("file://{}", remote.path().display());

    let doc = XmlDocument::parse(&format!(
        "<root><valuation><market name=\"Market1\" date=\"2024-01-01\" href=\"{uri}\">\
         <rate>0.03</rate></market></valuation></root>"
    ))
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = default_engine(&doc);
    let items = engine.hydrate(valuation, root, None).await.unwrap();
    let market = find_child(items[0].element, "market").unwrap();

    assert_eq!(attribute_value(market, "href"), None);
    assert_eq!(attribute_value(market, "name"), Some("Market1"));
    assert_eq!(attribute_value(market, "date"), Some("2024-01-01"));
    assert_eq!(attribute_value(market, "attr"), Some("remote"));
    let rate = find_child(market, "rate").unwrap();
    assert_eq!(leading_text(rate).as_deref(), Some("0.03"));
    assert!(find_child(market, "spread").is_some());
    assert_fully_hydrated(items[0].element);
}

#[tokio::test]
async fn href_resolves_content_brought_in_by_another_href() {
    let inner = write_fixture("<defs><rate name=\"r1\">0.04</rate></defs>");
    let inner_uri = format!("file://{}", inner.path().display());
    let outer = write_fixture(&format!(
        "<defs><market name=\"m\"><rate name=\"r1\" href=\"{inner_uri}\"/></market></defs>"
    ));
    let outer_uri = format!("file://{}", outer.path().display());

    let doc = XmlDocument::parse(&format!(
        "<root><v><market name=\"m\" href=\"{outer_uri}\"/></v></root>"
    ))
    .unwrap();
    let root = doc.root_element().unwrap();
    let v = find_child(root, "v").unwrap();

    let engine = default_engine(&doc);
    let items = engine.hydrate(v, root, None).await.unwrap();
    let market = find_child(items[0].element, "market").unwrap();
    let rate = find_child(market, "rate").unwrap();
    assert_eq!(leading_text(rate).as_deref(), Some("0.04"));
    assert_fully_hydrated(items[0].element);
}

#[tokio::test]
async fn href_missing_target_names_the_uri() {
    let doc = XmlDocument::parse(
        "<root><v><market href=\"file:///definitely/not/here.xml\"/></v></root>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let v = find_child(root, "v").unwrap();

    let engine = default_engine(&doc);
    let error = engine.hydrate(v, root, None).await.unwrap_err();
    assert!(error.to_string().contains("file:///definitely/not/here.xml"));
}

#[tokio::test]
async fn hydration_without_references_is_a_round_trip() {
    let doc = XmlDocument::parse(
        "<req><project><market name=\"m1\"/><group name=\"g1\">\
         <valuation name=\"security\"><instrument ref-name=\"i1\"/></valuation>\
         </group></project></req>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();

    let engine = default_engine(&doc);
    let items = engine.hydrate(root, root, None).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(to_xml_string(items[0].element), to_xml_string(root));
}

#[tokio::test]
async fn hydration_is_idempotent() {
    let doc = XmlDocument::parse(
        "<root><market name=\"Market1\"/>\
         <valuation><market select=\"/root/market\"/></valuation></root>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let valuation = find_child(root, "valuation").unwrap();

    let engine = select_only_engine(&doc);
    let once = engine.hydrate(valuation, root, None).await.unwrap();
    let twice = engine
        .hydrate(once[0].element, root, None)
        .await
        .unwrap();
    assert_eq!(
        to_xml_string(once[0].element),
        to_xml_string(twice[0].element)
    );
}

#[tokio::test]
async fn hydrated_output_is_a_fresh_tree() {
    let doc = XmlDocument::parse("<root><v name=\"before\"><child/></v></root>").unwrap();
    let root = doc.root_element().unwrap();
    let v = find_child(root, "v").unwrap();

    let engine = default_engine(&doc);
    let items = engine.hydrate(v, root, None).await.unwrap();
    let hydrated = items[0].element;

    hydrated.set_attribute_value("name", "after");
    find_child(hydrated, "child").unwrap().remove_from_parent();

    assert_eq!(attribute_value(v, "name"), Some("before"));
    assert!(find_child(v, "child").is_some());
}

#[tokio::test]
async fn group_hydration_prefers_selects_outside_use_scopes() {
    // A select under a use-carrying ancestor is deferred until that ancestor
    // is expanded; one sitting outside is resolved immediately.
    let doc = XmlDocument::parse(
        "<req><portfolio><position id=\"p1\"/></portfolio><market name=\"m1\" region=\"emea\"/>\
         <group><market select=\"/req/market\"/>\
         <valuation use=\"vn:link(/req/portfolio/position, .)\"><position select=\".\"/></valuation>\
         </group></req>",
    )
    .unwrap();
    let root = doc.root_element().unwrap();
    let group = find_child(root, "group").unwrap();

    let engine = HydrationEngine::new(
        &doc,
        vec![
            Rc::new(UseFunctionHydrationStrategy),
            Rc::new(SelectHydrationStrategy),
        ],
    );
    let items = engine.hydrate(group, root, None).await.unwrap();
    let hydrated = items[0].element;

    let market = find_child(hydrated, "market").unwrap();
    assert_eq!(attribute_value(market, "region"), Some("emea"));

    // The valuation kept its use attribute and its inner select untouched.
    let valuation = find_child(hydrated, "valuation").unwrap();
    assert!(attribute_value(valuation, "use").is_some());
    let position = find_child(valuation, "position").unwrap();
    assert_eq!(attribute_value(position, "select"), Some("."));
}
