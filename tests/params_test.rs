//! Integration tests for parameter resolution, views and copies

use std::rc::Rc;

use psyexp_model::param::{sort_params, unsort_params, ParamMap, UNKNOWN_CATEGORY};
use psyexp_model::{Component, Element, Param, TemplateRegistry, VisualColor};

fn registry() -> TemplateRegistry {
    TemplateRegistry::from_json_str(include_str!("fixtures/components.json")).unwrap()
}

#[test]
fn test_component_from_template_resolves_every_param() {
    let registry = registry();
    let text = Component::from_template(&registry, "TextComponent").unwrap();

    assert_eq!(text.params.len(), 9);
    assert_eq!(text.name().as_deref(), Some("text"));
    let color = text.params.get("color").unwrap();
    assert_eq!(color.borrow().categ.as_deref(), Some("Appearance"));
    assert_eq!(color.borrow().updates.as_deref(), Some("constant"));
}

#[test]
fn test_sorted_view_shares_params_with_flat_view() {
    let registry = registry();
    let text = Component::from_template(&registry, "TextComponent").unwrap();
    let sorted = text.sorted_params();

    assert!(sorted.is_sorted());
    assert_eq!(
        sorted.entries().map(|(categ, _)| categ.to_string()).collect::<Vec<_>>(),
        ["Basic", "Appearance", "Formatting", "Testing"]
    );

    let color = sorted.category("Appearance").unwrap().get("color").unwrap();
    color.borrow_mut().set_val("red");

    assert_eq!(text.params.get("color").unwrap().borrow().val_str(), "red");
    assert!(Rc::ptr_eq(&color, &sorted.unsorted().get("color").unwrap()));
}

#[test]
fn test_copy_params_is_independent() {
    let registry = registry();
    let text = Component::from_template(&registry, "TextComponent").unwrap();
    let copy = text.copy_params();

    copy.get("color").unwrap().borrow_mut().set_val("green");

    assert_eq!(text.params.get("color").unwrap().borrow().val_str(), "white");
    assert_eq!(copy.get("color").unwrap().borrow().val_str(), "green");
}

#[test]
fn test_sort_then_unsort_preserves_handles() {
    let registry = registry();
    let text = Component::from_template(&registry, "TextComponent").unwrap();
    let flat: ParamMap = text.params.params().into_iter().collect();

    let back = unsort_params(&sort_params(&flat));

    assert_eq!(back.len(), flat.len());
    for (name, param) in &flat {
        assert!(Rc::ptr_eq(param, &back[name]), "{name} was copied");
    }
}

#[test]
fn test_unknown_param_survives_markup_read() {
    let registry = registry();
    let node = Element::new("TextComponent")
        .with_attribute("name", "stimulus")
        .with_child(
            Element::new("Param")
                .with_attribute("name", "letterSpacing")
                .with_attribute("val", "1.2")
                .with_attribute("valType", "num"),
        );

    let text = Component::from_xml(&registry, &node).unwrap();
    let spacing = text.params.get("letterSpacing").unwrap();

    assert_eq!(spacing.borrow().categ.as_deref(), Some(UNKNOWN_CATEGORY));
    assert_eq!(spacing.borrow().val_str(), "1.2");
    assert_eq!(spacing.borrow().val_type.as_deref(), Some("num"));

    let written = text.to_xml();
    let param = written
        .children_named("Param")
        .find(|param| param.attribute("name") == Some("letterSpacing"))
        .unwrap();
    assert_eq!(param.attribute("val"), Some("1.2"));
}

#[test]
fn test_explicit_empty_attribute_is_kept() {
    let registry = registry();
    let node = Element::new("TextComponent").with_child(
        Element::new("Param")
            .with_attribute("name", "color")
            .with_attribute("val", ""),
    );

    let text = Component::from_xml(&registry, &node).unwrap();
    assert_eq!(text.params.get("color").unwrap().borrow().val_str(), "");
    // absent attributes fall back to the template
    assert_eq!(
        text.params.get("color").unwrap().borrow().updates.as_deref(),
        Some("constant")
    );
}

#[test]
fn test_visual_timing_attributes() {
    let registry = registry();
    let mut text = Component::from_template(&registry, "TextComponent").unwrap();
    text.params.get("startVal").unwrap().borrow_mut().set_val("0.5");
    text.params.get("stopVal").unwrap().borrow_mut().set_val("2");

    assert_eq!(text.visual_start(), Some(0.5));
    assert_eq!(text.visual_stop(), Some(2.5));

    text.params.get("stopType").unwrap().borrow_mut().set_val("frames");
    text.params.get("stopVal").unwrap().borrow_mut().set_val("120");
    assert_eq!(text.visual_stop(), Some(2.0));

    text.params.get("startVal").unwrap().borrow_mut().set_val("$onset");
    assert_eq!(text.visual_start(), None);

    text.params.remove("stopVal");
    assert_eq!(text.visual_stop(), None);
}

#[test]
fn test_visual_color() {
    let registry = registry();
    let text = Component::from_template(&registry, "TextComponent").unwrap();
    let keys = Component::from_template(&registry, "KeyboardComponent").unwrap();

    assert_eq!(text.visual_color(), VisualColor::Blue);
    assert!(keys.force_end());
    assert_eq!(keys.visual_color(), VisualColor::Orange);

    keys.params.get("disabled").unwrap().borrow_mut().set_val("True");
    assert_eq!(keys.visual_color(), VisualColor::Overlay);
}

#[test]
fn test_param_json_keeps_non_string_value() {
    let registry = registry();
    let n_reps = Param::from_template(&registry, "TrialHandler", "nReps");
    let json = serde_json::to_value(&n_reps).unwrap();

    assert_eq!(json["val"], serde_json::json!(5));
    assert_eq!(json["valType"], "num");
    let back: Param = serde_json::from_value(json).unwrap();
    assert_eq!(back, n_reps);
}
