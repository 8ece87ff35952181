//! Integration tests for flow editing and the derived loop tree

use std::cell::RefCell;
use std::rc::Rc;

use psyexp_model::flow::{FlowNode, LoopParent};
use psyexp_model::{DocumentEvent, Error, Experiment, FlowElement, LoopInitiator, Routine, TemplateRegistry};

fn registry() -> Rc<TemplateRegistry> {
    Rc::new(TemplateRegistry::from_json_str(include_str!("fixtures/components.json")).unwrap())
}

/// Experiment whose flow is the placeholder `trial` followed by `names`.
fn experiment_with_routines(names: &[&str]) -> Experiment {
    let mut exp = Experiment::new("flow.psyexp", registry());
    for name in names {
        let mut routine = Routine::new(exp.registry()).unwrap();
        routine.set_name(exp.registry(), name).unwrap();
        exp.add_routine(routine).unwrap();
        exp.insert_routine(name, -1).unwrap();
    }
    exp
}

fn flat_names(exp: &Experiment) -> Vec<String> {
    exp.flow()
        .flat()
        .iter()
        .map(|element| element.name().unwrap_or_default())
        .collect()
}

#[test]
fn test_new_experiment_flow_is_single_trial() {
    let exp = Experiment::new("new.psyexp", registry());
    assert_eq!(flat_names(&exp), ["trial"]);
    assert_eq!(exp.flow().dynamic().root().len(), 1);
    assert!(exp.flow().dynamic().loops().is_empty());
}

#[test]
fn test_relocate_forward_and_backward() {
    let mut exp = experiment_with_routines(&["a", "b", "c"]);

    let to = exp.relocate_element(0, 3).unwrap();
    assert_eq!(to, 2);
    assert_eq!(flat_names(&exp), ["a", "b", "trial", "c"]);

    let to = exp.relocate_element(3, 0).unwrap();
    assert_eq!(to, 0);
    assert_eq!(flat_names(&exp), ["c", "a", "b", "trial"]);

    let to = exp.relocate_element(0, -1).unwrap();
    assert_eq!(to, 3);
    assert_eq!(flat_names(&exp), ["a", "b", "trial", "c"]);
}

#[test]
fn test_same_routine_can_appear_twice() {
    let mut exp = Experiment::new("repeat.psyexp", registry());
    exp.insert_routine("trial", -1).unwrap();

    let flat = exp.flow().flat();
    assert_eq!(flat.len(), 2);
    assert_eq!(flat[0], flat[1]);
    assert_eq!(exp.flow().index_of(&flat[1]), Some(0));
}

#[test]
fn test_loop_wraps_routines_and_tree_follows_edits() {
    let mut exp = experiment_with_routines(&["a", "b"]);
    let mut initiator = LoopInitiator::from_template(exp.registry(), "TrialHandler").unwrap();
    initiator.set_name(exp.registry(), "blocks").unwrap();
    exp.insert_loop(initiator, 1, 3).unwrap();

    assert_eq!(flat_names(&exp), ["trial", "blocks", "a", "b", "blocks"]);
    let tree = exp.flow().dynamic();
    assert_eq!(tree.root().len(), 2);
    let blocks = &tree.loops()[0];
    assert_eq!(blocks.name().as_deref(), Some("blocks"));
    assert_eq!(blocks.loop_type(), "TrialHandler");
    assert_eq!(blocks.body().len(), 2);
    assert_eq!(blocks.parent(), LoopParent::Flow);

    // pull "b" out of the loop, to the end of the flow
    exp.relocate_element(3, -1).unwrap();
    assert_eq!(flat_names(&exp), ["trial", "blocks", "a", "blocks", "b"]);
    let tree = exp.flow().dynamic();
    assert_eq!(tree.root().len(), 3);
    assert_eq!(tree.loops()[0].body().len(), 1);
}

#[test]
fn test_nested_loop_parent_and_depth() {
    let mut exp = experiment_with_routines(&["a"]);
    let mut outer = LoopInitiator::from_template(exp.registry(), "TrialHandler").unwrap();
    outer.set_name(exp.registry(), "outer").unwrap();
    let mut inner = LoopInitiator::from_template(exp.registry(), "StairHandler").unwrap();
    inner.set_name(exp.registry(), "inner").unwrap();

    exp.insert_loop(inner, 1, 2).unwrap();
    exp.insert_loop(outer, 0, -1).unwrap();

    assert_eq!(flat_names(&exp), ["outer", "trial", "inner", "a", "inner", "outer"]);
    let tree = exp.flow().dynamic();
    assert_eq!(tree.root().len(), 1);

    let FlowNode::Loop(outer_id) = tree.root()[0] else {
        panic!("expected the outer loop at the root");
    };
    let outer = tree.get(outer_id).unwrap();
    let FlowNode::Loop(inner_id) = outer.body()[1] else {
        panic!("expected the inner loop inside the outer loop");
    };
    assert_eq!(tree.depth(inner_id), 1);
    assert_eq!(tree.get(inner_id).unwrap().parent(), LoopParent::Loop(outer_id));
    assert_eq!(tree.flatten(), exp.flow().flat());
}

#[test]
fn test_loop_params_are_shared_with_initiator() {
    let mut exp = experiment_with_routines(&[]);
    let initiator = LoopInitiator::from_template(exp.registry(), "TrialHandler").unwrap();
    let initiator = exp.insert_loop(initiator, 0, -1).unwrap();

    let params = exp.flow().dynamic().loops()[0].params();
    params.get("nReps").unwrap().borrow_mut().set_val("12");

    assert_eq!(initiator.borrow().params.get("nReps").unwrap().borrow().val_str(), "12");
}

#[test]
fn test_failed_edit_restores_state_and_is_silent() {
    let mut exp = experiment_with_routines(&["a"]);
    let initiator = LoopInitiator::from_template(exp.registry(), "TrialHandler").unwrap();
    exp.insert_loop(initiator, 0, -1).unwrap();

    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    exp.subscribe(Box::new(move |event| sink.borrow_mut().push(event.clone())));

    let before: Vec<FlowElement> = exp.flow().flat().to_vec();
    let err = exp.relocate_element(3, 0).unwrap_err();

    assert!(matches!(err, Error::UnmatchedTerminator { ref name } if name == "trials"));
    assert_eq!(exp.flow().flat(), before.as_slice());
    assert_eq!(exp.flow().dynamic().loops()[0].body().len(), 2);
    assert!(events.borrow().is_empty());

    exp.remove_element(1).unwrap();
    assert_eq!(*events.borrow(), [DocumentEvent::ElementRemoved { index: 1 }]);
}

#[test]
fn test_flow_only_accepts_elements_of_the_experiment() {
    let mut exp = experiment_with_routines(&["a"]);
    let mut ghost = Routine::new(exp.registry()).unwrap();
    ghost.set_name(exp.registry(), "ghost").unwrap();

    let err = exp
        .insert_element(FlowElement::Routine(ghost.shared()), -1)
        .unwrap_err();
    assert!(matches!(err, Error::UnknownRoutine { ref name } if name == "ghost"));
    assert_eq!(flat_names(&exp), ["trial", "a"]);

    let text = exp.to_json_string().unwrap();
    let reloaded = Experiment::from_json_str(registry(), &text).unwrap();
    assert_eq!(flat_names(&reloaded), ["trial", "a"]);
}

#[test]
fn test_nested_loops_need_distinct_names() {
    let mut exp = experiment_with_routines(&["a"]);
    let outer = LoopInitiator::from_template(exp.registry(), "TrialHandler").unwrap();
    exp.insert_loop(outer, 0, -1).unwrap();

    let inner = LoopInitiator::from_template(exp.registry(), "TrialHandler").unwrap();
    let err = exp.insert_loop(inner, 1, 2).unwrap_err();
    assert!(matches!(err, Error::DuplicateLoop { ref name } if name == "trials"));

    let mut inner = LoopInitiator::from_template(exp.registry(), "TrialHandler").unwrap();
    inner.set_name(exp.registry(), "practice").unwrap();
    exp.insert_loop(inner, 1, 2).unwrap();

    let text = exp.to_xml_string().unwrap();
    let reloaded = Experiment::from_xml_str(registry(), "flow.psyexp", &text).unwrap();
    assert_eq!(
        flat_names(&reloaded),
        ["trials", "practice", "trial", "practice", "a", "trials"]
    );
    assert_eq!(reloaded.flow().dynamic().loops().len(), 2);
}
