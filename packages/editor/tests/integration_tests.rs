//! Integration tests for the editor update core

use folio_editor::{
    add_update_tag, create_paragraph, create_text, get_root, get_selection, set_selection,
    Command, CommandPriority, Editor, EditorError, MutatedNodes, NodeKey, Point, RangeSelection,
    ReconcileContext, RenderError, Renderer, Selection, TreeDiffRenderer, UpdateOptions,
};
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Delegates to [`TreeDiffRenderer`], counting calls and failing on demand
#[derive(Default)]
struct CountingRenderer {
    inner: TreeDiffRenderer,
    calls: Rc<Cell<u32>>,
    fail_next: Rc<Cell<bool>>,
}

impl Renderer for CountingRenderer {
    fn reconcile(&mut self, cx: ReconcileContext<'_>) -> Result<Option<MutatedNodes>, RenderError> {
        self.calls.set(self.calls.get() + 1);
        if self.fail_next.replace(false) {
            return Err(RenderError::Reconcile("view went away".to_string()));
        }
        self.inner.reconcile(cx)
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

struct Keys {
    paragraph: NodeKey,
    text: NodeKey,
}

fn insert_paragraph(text: &'static str, out: Rc<RefCell<Option<Keys>>>) -> Result<(), EditorError> {
    let paragraph = create_paragraph()?;
    let node = create_text(text)?;
    paragraph.append(node)?;
    get_root()?.append(paragraph)?;
    *out.borrow_mut() = Some(Keys {
        paragraph,
        text: node,
    });
    Ok(())
}

#[test]
fn test_hi_end_to_end() -> anyhow::Result<()> {
    init_tracing();
    let calls = Rc::new(Cell::new(0));
    let editor = Editor::builder()
        .renderer(CountingRenderer {
            calls: calls.clone(),
            ..Default::default()
        })
        .build()?;

    let payloads = Rc::new(RefCell::new(Vec::new()));
    let log = payloads.clone();
    let _subscription = editor.register_update_listener(move |payload| {
        log.borrow_mut().push((
            payload.dirty_elements.keys().copied().collect::<HashSet<_>>(),
            payload.dirty_leaves.iter().copied().collect::<Vec<_>>(),
        ));
    });

    let keys = Rc::new(RefCell::new(None));
    let out = keys.clone();
    editor.update(move || insert_paragraph("hi", out))?;

    // Commit is batched until the task queue drains
    assert!(editor.has_pending_update());
    assert_eq!(editor.editor_state().text_content(), "");

    editor.task_queue().run_until_idle()?;

    let keys = keys.borrow();
    let keys = keys.as_ref().expect("update ran");
    assert_eq!(editor.editor_state().text_content(), "hi");
    assert_eq!(calls.get(), 2);

    let payloads = payloads.borrow();
    assert_eq!(payloads.len(), 1);
    let (elements, leaves) = &payloads[0];
    assert!(elements.contains(&keys.paragraph));
    assert!(elements.contains(&NodeKey::ROOT));
    assert!(leaves.contains(&keys.text));
    assert!(editor.element_by_key(keys.text).is_some());
    Ok(())
}

#[test]
fn test_nested_update_tags_are_merged_in_order() -> anyhow::Result<()> {
    let editor = Editor::builder().build()?;
    let order = Rc::new(RefCell::new(Vec::new()));
    let passes = order.clone();
    // Queued updates drain before transforms, so both share one pass
    let _root = editor.register_node_transform(
        "root",
        Rc::new(move |key: NodeKey| {
            let children = key.children()?.len();
            passes.borrow_mut().push(format!("transform:{children}"));
            Ok(())
        }),
    )?;
    editor.task_queue().run_until_idle()?;
    order.borrow_mut().clear();

    let tags = Rc::new(RefCell::new(Vec::new()));
    let seen = tags.clone();
    let _subscription = editor.register_update_listener(move |payload| {
        let mut tags: Vec<String> = payload.tags.iter().cloned().collect();
        tags.sort();
        seen.borrow_mut().push(tags);
    });

    let first = order.clone();
    let second = order.clone();
    let handle = editor.clone();
    editor.update(move || {
        add_update_tag("a")?;
        handle.update(move || {
            second.borrow_mut().push("u2".to_string());
            add_update_tag("b")?;
            get_root()?.append(create_paragraph()?)
        })?;
        get_root()?.append(create_paragraph()?)?;
        first.borrow_mut().push("u1".to_string());
        Ok(())
    })?;
    editor.task_queue().run_until_idle()?;

    assert_eq!(*order.borrow(), vec!["u1", "u2", "transform:2"]);
    assert_eq!(*tags.borrow(), vec![vec!["a".to_string(), "b".to_string()]]);
    assert_eq!(editor.editor_state().len(), 3);
    Ok(())
}

#[test]
fn test_updates_in_one_turn_share_a_commit() -> anyhow::Result<()> {
    let editor = Editor::builder().build()?;
    let commits = Rc::new(Cell::new(0));
    let counter = commits.clone();
    let _subscription = editor.register_update_listener(move |_| counter.set(counter.get() + 1));

    editor.update(|| get_root()?.append(create_paragraph()?))?;
    editor.update(|| get_root()?.append(create_paragraph()?))?;
    assert_eq!(editor.task_queue().len(), 1);

    editor.task_queue().run_until_idle()?;
    assert_eq!(commits.get(), 1);
    assert_eq!(editor.editor_state().len(), 3);
    Ok(())
}

#[test]
fn test_no_op_update_is_discarded() -> anyhow::Result<()> {
    let calls = Rc::new(Cell::new(0));
    let editor = Editor::builder()
        .renderer(CountingRenderer {
            calls: calls.clone(),
            ..Default::default()
        })
        .build()?;
    let after_build = calls.get();
    let commits = Rc::new(Cell::new(0));
    let counter = commits.clone();
    let _subscription = editor.register_update_listener(move |_| counter.set(counter.get() + 1));

    editor.update(|| Ok(()))?;
    editor.task_queue().run_until_idle()?;
    editor.update_with(|| Ok(()), UpdateOptions::new().discrete())?;

    assert_eq!(calls.get(), after_build);
    assert_eq!(commits.get(), 0);
    assert!(!editor.has_pending_update());
    Ok(())
}

#[test]
fn test_dirty_tracker_is_empty_after_each_commit() -> anyhow::Result<()> {
    let editor = Editor::builder().build()?;
    let keys = Rc::new(RefCell::new(None));
    let out = keys.clone();
    editor.update_with(move || insert_paragraph("one", out), UpdateOptions::new().discrete())?;
    assert!(!editor.has_dirty_nodes());

    let text = keys.borrow().as_ref().map(|keys| keys.text).expect("update ran");
    editor.update(move || text.set_text("two"))?;
    assert!(editor.has_dirty_nodes());
    editor.task_queue().run_until_idle()?;
    assert!(!editor.has_dirty_nodes());
    assert_eq!(editor.editor_state().text_content(), "two");
    Ok(())
}

#[test]
fn test_transforms_reach_a_fixed_point() -> anyhow::Result<()> {
    let editor = Editor::builder().build()?;
    let _transform = editor.register_node_transform(
        "text",
        Rc::new(|key: NodeKey| {
            let text = key.text()?;
            let upper = text.to_uppercase();
            if text != upper {
                key.set_text(upper)?;
            }
            Ok(())
        }),
    )?;

    let keys = Rc::new(RefCell::new(None));
    let out = keys.clone();
    editor.update_with(move || insert_paragraph("shout", out), UpdateOptions::new().discrete())?;
    assert_eq!(editor.editor_state().text_content(), "SHOUT");
    let converged = editor.editor_state();

    // Re-running over converged output only revisits what was marked
    let text = keys.borrow().as_ref().map(|keys| keys.text).expect("update ran");
    let dirty = Rc::new(RefCell::new(Vec::new()));
    let log = dirty.clone();
    let _listener = editor.register_update_listener(move |payload| {
        log.borrow_mut()
            .extend(payload.dirty_leaves.iter().copied().collect::<Vec<_>>());
    });
    editor.update_with(move || text.mark_dirty(), UpdateOptions::new().discrete())?;

    assert_eq!(*dirty.borrow(), vec![text]);
    assert_eq!(
        editor.editor_state().node(text).map(|node| node.data().clone()),
        converged.node(text).map(|node| node.data().clone())
    );
    Ok(())
}

#[test]
fn test_root_transform_runs_last() -> anyhow::Result<()> {
    let editor = Editor::builder().build()?;
    let _paragraph = editor.register_node_transform(
        "paragraph",
        Rc::new(|key: NodeKey| {
            if key.children()?.is_empty() {
                key.append(create_text("filled")?)?;
            }
            Ok(())
        }),
    )?;

    let observed = Rc::new(RefCell::new(Vec::new()));
    let log = observed.clone();
    let _root = editor.register_node_transform(
        "root",
        Rc::new(move |key: NodeKey| {
            log.borrow_mut().push(key.text_content()?);
            Ok(())
        }),
    )?;
    // Registering re-dirties the existing root once
    editor.task_queue().run_until_idle()?;
    observed.borrow_mut().clear();

    editor.update_with(
        || get_root()?.append(create_paragraph()?),
        UpdateOptions::new().discrete(),
    )?;

    let observed = observed.borrow();
    assert!(!observed.is_empty());
    assert!(observed.iter().all(|text| text == "filled"));
    Ok(())
}

#[test]
fn test_runaway_transform_is_stopped() -> anyhow::Result<()> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let editor = Editor::builder()
        .on_error(move |error| {
            sink.borrow_mut()
                .push(matches!(error, EditorError::InfiniteTransformLoop))
        })
        .build()?;
    let _transform = editor.register_node_transform("paragraph", Rc::new(|key: NodeKey| key.mark_dirty()))?;

    editor.update_with(
        || get_root()?.append(create_paragraph()?),
        UpdateOptions::new().discrete(),
    )?;

    assert_eq!(*errors.borrow(), vec![true]);
    assert!(editor.editor_state().is_empty());
    Ok(())
}

#[test]
fn test_removing_selected_nodes_loses_selection() -> anyhow::Result<()> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let editor = Editor::builder()
        .on_error(move |error| sink.borrow_mut().push(error.to_string()))
        .build()?;

    let keys = Rc::new(RefCell::new(None));
    let out = keys.clone();
    editor.update_with(
        move || {
            insert_paragraph("gone", out.clone())?;
            let text = out.borrow().as_ref().map(|keys| keys.text);
            let Some(text) = text else {
                return Ok(());
            };
            set_selection(Some(Selection::Range(RangeSelection::new(
                Point::text(text, 0),
                Point::text(text, 4),
            ))))
        },
        UpdateOptions::new().discrete(),
    )?;
    let paragraph = keys.borrow().as_ref().map(|keys| keys.paragraph).expect("update ran");
    let before = editor.editor_state();

    editor.update_with(move || paragraph.remove(), UpdateOptions::new().discrete())?;

    assert_eq!(*errors.borrow(), vec![EditorError::SelectionLost.to_string()]);
    assert_eq!(editor.editor_state().text_content(), before.text_content());
    Ok(())
}

#[test]
fn test_relocated_selection_survives_removal() -> anyhow::Result<()> {
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    let editor = Editor::builder()
        .on_error(move |error| sink.borrow_mut().push(error.to_string()))
        .build()?;

    let first = Rc::new(RefCell::new(None));
    let second = Rc::new(RefCell::new(None));
    let (out_first, out_second) = (first.clone(), second.clone());
    editor.update_with(
        move || {
            insert_paragraph("gone", out_first.clone())?;
            insert_paragraph("kept", out_second)?;
            let text = out_first.borrow().as_ref().map(|keys| keys.text);
            let Some(text) = text else {
                return Ok(());
            };
            set_selection(Some(Selection::Range(RangeSelection::collapsed(Point::text(text, 2)))))
        },
        UpdateOptions::new().discrete(),
    )?;
    let doomed = first.borrow().as_ref().map(|keys| keys.paragraph).expect("update ran");
    let survivor = second.borrow().as_ref().map(|keys| keys.text).expect("update ran");

    editor.update_with(
        move || {
            doomed.remove()?;
            set_selection(Some(Selection::Range(RangeSelection::collapsed(Point::text(
                survivor, 0,
            )))))
        },
        UpdateOptions::new().discrete(),
    )?;

    assert!(errors.borrow().is_empty());
    assert_eq!(editor.editor_state().text_content(), "kept");
    let selection = editor.read(get_selection)??;
    assert!(selection.is_some_and(|selection| selection.references(survivor)));
    Ok(())
}

#[test]
fn test_render_fault_reverts_to_previous_document() -> anyhow::Result<()> {
    let fail_next = Rc::new(Cell::new(false));
    let errors = Rc::new(Cell::new(0));
    let sink = errors.clone();
    let editor = Editor::builder()
        .renderer(CountingRenderer {
            fail_next: fail_next.clone(),
            ..Default::default()
        })
        .on_error(move |_| sink.set(sink.get() + 1))
        .build()?;

    editor.update_with(
        move || insert_paragraph("stable", Rc::new(RefCell::new(None))),
        UpdateOptions::new().discrete(),
    )?;

    fail_next.set(true);
    editor.update_with(
        move || insert_paragraph("lost", Rc::new(RefCell::new(None))),
        UpdateOptions::new().discrete(),
    )?;

    assert_eq!(errors.get(), 1);
    assert_eq!(editor.editor_state().text_content(), "stable");
    for node in editor.editor_state().nodes() {
        assert!(editor.element_by_key(node.key()).is_some());
    }
    Ok(())
}

#[test]
fn test_read_commits_pending_update() -> anyhow::Result<()> {
    let editor = Editor::builder().build()?;
    editor.update(move || insert_paragraph("flushed", Rc::new(RefCell::new(None))))?;

    let text = editor.read(|| get_root().and_then(|root| root.text_content()))??;
    assert_eq!(text, "flushed");
    assert!(!editor.has_pending_update());
    Ok(())
}

#[test]
fn test_state_survives_json_round_trip() -> anyhow::Result<()> {
    let source = Editor::builder().build()?;
    source.update_with(
        move || insert_paragraph("portable", Rc::new(RefCell::new(None))),
        UpdateOptions::new().discrete(),
    )?;
    let json = serde_json::to_string(&source.export_editor_state(&source.editor_state())?)?;

    let target = Editor::builder().build()?;
    let parsed = target.parse_editor_state(&json)?;
    target.set_editor_state(parsed, None)?;

    assert_eq!(target.editor_state().text_content(), "portable");
    assert_eq!(target.editor_state().len(), source.editor_state().len());
    Ok(())
}

const INSERT: Command<&'static str> = Command::new("INSERT");

#[test]
fn test_commands_reach_parent_first_at_equal_priority() -> anyhow::Result<()> {
    let parent = Editor::builder().build()?;
    let child = Editor::builder().parent(&parent).build()?;
    let log = Rc::new(RefCell::new(Vec::new()));

    let parent_log = log.clone();
    let _parent = parent.register_command(
        INSERT,
        Rc::new(move |payload: &&'static str, _: &Editor| {
            parent_log.borrow_mut().push(format!("parent:{payload}"));
            Ok(false)
        }),
        CommandPriority::Normal,
    );
    let child_log = log.clone();
    let _child = child.register_command(
        INSERT,
        Rc::new(move |payload: &&'static str, target: &Editor| {
            child_log.borrow_mut().push(format!("child:{payload}"));
            target.update(|| get_root()?.append(create_paragraph()?))?;
            Ok(true)
        }),
        CommandPriority::Normal,
    );

    assert!(child.dispatch_command(INSERT, "x")?);
    assert_eq!(*log.borrow(), vec!["parent:x", "child:x"]);

    // The listener's update joined the command's own cycle
    child.task_queue().run_until_idle()?;
    assert_eq!(child.editor_state().len(), 2);
    Ok(())
}

#[test]
fn test_higher_priority_anywhere_in_chain_wins() -> anyhow::Result<()> {
    let parent = Editor::builder().build()?;
    let child = Editor::builder().parent(&parent).build()?;
    let log = Rc::new(RefCell::new(Vec::new()));

    let parent_log = log.clone();
    let _parent = parent.register_command(
        INSERT,
        Rc::new(move |_: &&'static str, _: &Editor| {
            parent_log.borrow_mut().push("parent");
            Ok(true)
        }),
        CommandPriority::Low,
    );
    let child_log = log.clone();
    let _child = child.register_command(
        INSERT,
        Rc::new(move |_: &&'static str, _: &Editor| {
            child_log.borrow_mut().push("child");
            Ok(true)
        }),
        CommandPriority::Critical,
    );

    assert!(child.dispatch_command(INSERT, "y")?);
    assert_eq!(*log.borrow(), vec!["child"]);
    Ok(())
}
