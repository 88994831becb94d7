use crossrun_core_types::{Pattern, Thing};
use crossrun_dom::{Document, NodeId, Rect, Visibility};
use crossrun_perceiver::{find, reach, resolve, Resolved, Strictness};
use serde_json::json;

fn page() -> (Document, NodeId) {
    let mut doc = Document::new("http://localhost/form");
    doc.title = "Checkout".into();
    let body = doc.body();
    let form = doc.append_element(body, "form", &[("id", "checkout")]);
    let button = doc.append_element(form, "button", &[("id", "submit")]);
    doc.append_text(button, "Submit");
    (doc, button)
}

#[test]
fn finds_single_visible_match() {
    let (doc, button) = page();
    let hits = find(&doc, &Thing::text("Submit"), None, Strictness::Loose).unwrap();
    assert_eq!(hits, vec![button]);
    assert_eq!(reach(&doc, &hits, Strictness::Loose).unwrap(), button);
}

#[test]
fn zero_matches_are_not_found() {
    let (doc, _) = page();
    let err = find(&doc, &Thing::text("Cancel"), None, Strictness::Loose).unwrap_err();
    assert_eq!(err.name(), "NotFoundError");
}

#[test]
fn containers_yield_to_matching_descendants() {
    let (mut doc, button) = page();
    let form = doc.query_selector(doc.root(), "#checkout").unwrap().unwrap();
    let hint = doc.append_element(form, "p", &[]);
    doc.append_text(hint, "Press submit when done");

    let hits = find(&doc, &Thing::text("submit"), None, Strictness::Loose).unwrap();
    assert_eq!(hits, vec![button, hint]);
    assert!(!hits.contains(&form));
}

#[test]
fn strict_requires_exact_text() {
    let (doc, button) = page();
    assert!(find(&doc, &Thing::text("Sub"), None, Strictness::Strict).is_err());
    assert_eq!(
        find(&doc, &Thing::text("Submit"), None, Strictness::Strict).unwrap(),
        vec![button]
    );
    let pattern = Thing::text(Pattern::new("^sub", "i"));
    assert_eq!(find(&doc, &pattern, None, Strictness::Loose).unwrap(), vec![button]);
}

#[test]
fn hidden_nodes_only_match_when_visibility_is_off() {
    let (mut doc, button) = page();
    doc.set_style(button, |s| s.visibility = Visibility::Hidden);
    assert!(find(&doc, &Thing::text("Submit"), None, Strictness::Loose).is_err());
    assert_eq!(
        find(&doc, &Thing::text("Submit"), None, Strictness::Off).unwrap(),
        vec![button]
    );
}

#[test]
fn where_scopes_the_search() {
    let (mut doc, button) = page();
    let body = doc.body();
    let footer = doc.append_element(body, "footer", &[]);
    let other = doc.append_element(footer, "button", &[]);
    doc.append_text(other, "Submit");

    let scoped = find(
        &doc,
        &Thing::text("Submit"),
        Some(&Thing::node("footer")),
        Strictness::Loose,
    )
    .unwrap();
    assert_eq!(scoped, vec![other]);

    let selectors = find(
        &doc,
        &Thing::node("button"),
        Some(&Thing::node("#checkout")),
        Strictness::Loose,
    )
    .unwrap();
    assert_eq!(selectors, vec![button]);
}

#[test]
fn occluded_target_reports_covered() {
    let (mut doc, _) = page();
    let body = doc.body();
    let modal = doc.append_element(body, "div", &[("class", "modal")]);
    doc.place(modal, Rect::new(0.0, 0.0, 1024.0, 300.0));

    let hits = find(&doc, &Thing::text("Submit"), None, Strictness::Loose).unwrap();
    let err = reach(&doc, &hits, Strictness::Loose).unwrap_err();
    assert_eq!(err.name(), "CoveredError");
    assert!(err.to_string().contains("<button id=\"submit\">"));
    assert!(err.to_string().contains("modal"));
}

#[test]
fn unoccluded_alternate_is_preferred() {
    let (mut doc, button) = page();
    let body = doc.body();
    let banner = doc.append_element(body, "div", &[("class", "banner")]);
    doc.place(banner, Rect::new(0.0, 0.0, 1024.0, 20.0));
    let lower = doc.append_element(body, "section", &[]);
    doc.place(lower, Rect::new(0.0, 400.0, 1024.0, 40.0));
    let second = doc.append_element(lower, "button", &[]);
    doc.append_text(second, "Submit");

    let hits = find(&doc, &Thing::text("Submit"), None, Strictness::Loose).unwrap();
    assert_eq!(hits, vec![button, second]);
    assert_eq!(reach(&doc, &hits, Strictness::Loose).unwrap(), second);
}

#[test]
fn off_viewport_target_is_not_visible() {
    let (mut doc, button) = page();
    doc.place(button, Rect::new(0.0, 2000.0, 100.0, 20.0));
    let err = reach(&doc, &[button], Strictness::Loose).unwrap_err();
    assert_eq!(err.name(), "NotVisibleError");
}

#[test]
fn matches_scrolled_out_of_view_are_not_found() {
    let (mut doc, button) = page();
    doc.place(button, Rect::new(0.0, 2000.0, 100.0, 20.0));

    let err = find(&doc, &Thing::text("Submit"), None, Strictness::Loose).unwrap_err();
    assert_eq!(err.name(), "NotFoundError");
    let err = find(&doc, &Thing::node("#submit"), None, Strictness::Loose).unwrap_err();
    assert_eq!(err.name(), "NotFoundError");
    assert_eq!(
        find(&doc, &Thing::text("Submit"), None, Strictness::Off).unwrap(),
        vec![button]
    );
}

#[test]
fn strict_lookups_want_the_whole_box_on_screen() {
    let (mut doc, button) = page();
    doc.place(button, Rect::new(0.0, 760.0, 100.0, 20.0));

    assert_eq!(
        find(&doc, &Thing::text("Submit"), None, Strictness::Loose).unwrap(),
        vec![button]
    );
    let err = find(&doc, &Thing::text("Submit"), None, Strictness::Strict).unwrap_err();
    assert_eq!(err.name(), "NotFoundError");
}

#[test]
fn images_match_on_src() {
    let (mut doc, _) = page();
    let body = doc.body();
    let logo = doc.append_element(body, "img", &[("src", "/img/logo.png")]);
    let hits = find(&doc, &Thing::Image("logo.png".into()), None, Strictness::Loose).unwrap();
    assert_eq!(hits, vec![logo]);
    let any = find(&doc, &Thing::Any("logo".into()), None, Strictness::Loose).unwrap();
    assert_eq!(any, vec![logo]);
}

#[test]
fn empty_matches_blank_controls() {
    let (mut doc, _) = page();
    let body = doc.body();
    let filled = doc.append_element(body, "input", &[("value", "x")]);
    let blank = doc.append_element(body, "input", &[]);
    let hits = find(&doc, &Thing::Empty, Some(&Thing::node("body")), Strictness::Loose).unwrap();
    assert!(hits.contains(&blank));
    assert!(!hits.contains(&filled));
}

#[test]
fn scalar_things_resolve_to_values() {
    let (mut doc, _) = page();
    doc.stylesheets.push("/css/site.css".into());
    doc.windows
        .insert("popup".into(), Document::new("http://localhost/popup"));

    assert_eq!(
        resolve(&doc, &Thing::Title("check".into()), None, Strictness::Loose).unwrap(),
        Resolved::Value(json!("Checkout"))
    );
    assert_eq!(
        resolve(&doc, &Thing::Css("site.css".into()), None, Strictness::Loose).unwrap(),
        Resolved::Value(json!("/css/site.css"))
    );
    assert_eq!(
        resolve(&doc, &Thing::Window(Some("popup".into())), None, Strictness::Loose).unwrap(),
        Resolved::Value(json!("http://localhost/popup"))
    );
    let missing = resolve(&doc, &Thing::Script("app.js".into()), None, Strictness::Loose);
    assert!(missing.unwrap_err().is_not_found());
}

#[test]
fn named_window_scopes_node_search() {
    let (mut doc, _) = page();
    let mut popup = Document::new("http://localhost/popup");
    let body = popup.body();
    let ok = popup.append_element(body, "button", &[]);
    popup.append_text(ok, "OK");
    doc.windows.insert("popup".into(), popup);

    let within = Thing::Window(Some("popup".into()));
    assert_eq!(
        find(&doc, &Thing::text("OK"), Some(&within), Strictness::Loose).unwrap(),
        vec![ok]
    );
    assert!(find(&doc, &Thing::text("OK"), None, Strictness::Loose).is_err());
}
