//! # Commands
//!
//! Typed command identifiers and the priority-bucketed dispatch table.
//!
//! ## Dispatch order
//!
//! ```text
//! for priority in Critical..=Editor:
//!     for editor in outermost parent ..= target:
//!         run a snapshot of that bucket inside update_sync(editor)
//!         first listener returning true stops everything
//! ```
//!
//! Ancestors therefore see a command before the target editor at the same
//! priority, and any higher priority anywhere in the chain wins over a lower
//! one.

use crate::editor::Editor;
use crate::errors::EditorError;
use crate::update;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::debug;

/// Identifier of a command carrying a payload of type `P`
pub struct Command<P> {
    name: &'static str,
    _payload: PhantomData<fn(P)>,
}

impl<P> Command<P> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<P> Clone for Command<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Command<P> {}

impl<P> fmt::Debug for Command<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self.name)
    }
}

/// Dispatched by the commit pipeline when a non-range selection changes
pub const SELECTION_CHANGE_COMMAND: Command<()> = Command::new("SELECTION_CHANGE_COMMAND");

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CommandPriority {
    Editor = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Critical = 4,
}

impl CommandPriority {
    const DESCENDING: [CommandPriority; 5] = [
        CommandPriority::Critical,
        CommandPriority::High,
        CommandPriority::Normal,
        CommandPriority::Low,
        CommandPriority::Editor,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Returns `Ok(true)` when the command was handled
pub type CommandListener<P> = Rc<dyn Fn(&P, &Editor) -> Result<bool, EditorError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct CommandId {
    name: &'static str,
    payload: TypeId,
}

impl CommandId {
    fn of<P: 'static>(command: Command<P>) -> Self {
        Self {
            name: command.name,
            payload: TypeId::of::<P>(),
        }
    }
}

#[derive(Clone)]
struct RegisteredListener {
    identity: *const (),
    listener: Rc<dyn Any>,
}

/// Command → five priority buckets
#[derive(Default)]
pub(crate) struct CommandTable {
    commands: HashMap<CommandId, [Vec<RegisteredListener>; 5]>,
}

impl CommandTable {
    /// Add a listener; returns `false` if it is already in this bucket
    pub(crate) fn register<P: 'static>(
        &mut self,
        command: Command<P>,
        listener: CommandListener<P>,
        priority: CommandPriority,
    ) -> bool {
        let identity = Rc::as_ptr(&listener) as *const ();
        let bucket = &mut self.commands.entry(CommandId::of(command)).or_default()[priority.index()];
        if bucket.iter().any(|entry| entry.identity == identity) {
            return false;
        }
        bucket.push(RegisteredListener {
            identity,
            listener: Rc::new(listener),
        });
        true
    }

    pub(crate) fn unregister<P: 'static>(
        &mut self,
        command: Command<P>,
        listener: &CommandListener<P>,
        priority: CommandPriority,
    ) {
        let id = CommandId::of(command);
        let identity = Rc::as_ptr(listener) as *const ();
        let Some(buckets) = self.commands.get_mut(&id) else {
            return;
        };
        buckets[priority.index()].retain(|entry| entry.identity != identity);
        if buckets.iter().all(Vec::is_empty) {
            self.commands.remove(&id);
        }
    }

    fn listeners<P: 'static>(
        &self,
        command: Command<P>,
        priority: CommandPriority,
    ) -> Vec<CommandListener<P>> {
        self.commands
            .get(&CommandId::of(command))
            .map(|buckets| {
                buckets[priority.index()]
                    .iter()
                    .filter_map(|entry| entry.listener.downcast_ref::<CommandListener<P>>())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn has(&self, name: &str) -> bool {
        self.commands.keys().any(|id| id.name == name)
    }
}

/// Dispatch `command` to `editor` and its ancestors
pub(crate) fn dispatch_command<P: 'static>(
    editor: &Editor,
    command: Command<P>,
    payload: P,
) -> Result<bool, EditorError> {
    let chain = editor.propagation_chain();

    for priority in CommandPriority::DESCENDING {
        for current in &chain {
            let listeners = current.inner.commands.borrow().listeners(command, priority);
            if listeners.is_empty() {
                continue;
            }

            let mut handled = false;
            update::update_editor_sync(
                current,
                || {
                    for listener in &listeners {
                        if listener(&payload, editor)? {
                            handled = true;
                            break;
                        }
                    }
                    Ok(())
                },
                None,
            )?;

            if handled {
                debug!(command = command.name(), ?priority, "Command handled");
                return Ok(true);
            }
        }
    }

    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_COMMAND: Command<u32> = Command::new("TEST_COMMAND");

    #[test]
    fn test_register_is_deduplicated_per_bucket() {
        let mut table = CommandTable::default();
        let listener: CommandListener<u32> = Rc::new(|_: &u32, _: &Editor| Ok(false));

        assert!(table.register(TEST_COMMAND, listener.clone(), CommandPriority::Low));
        assert!(!table.register(TEST_COMMAND, listener.clone(), CommandPriority::Low));
        assert!(table.register(TEST_COMMAND, listener.clone(), CommandPriority::High));

        assert_eq!(table.listeners(TEST_COMMAND, CommandPriority::Low).len(), 1);
        assert_eq!(table.listeners(TEST_COMMAND, CommandPriority::High).len(), 1);
    }

    #[test]
    fn test_unregister_drops_empty_command() {
        let mut table = CommandTable::default();
        let listener: CommandListener<u32> = Rc::new(|_: &u32, _: &Editor| Ok(false));
        table.register(TEST_COMMAND, listener.clone(), CommandPriority::Editor);
        assert!(table.has("TEST_COMMAND"));

        table.unregister(TEST_COMMAND, &listener, CommandPriority::Editor);
        assert!(!table.has("TEST_COMMAND"));
    }

    #[test]
    fn test_same_name_different_payload_is_distinct() {
        const OTHER: Command<String> = Command::new("TEST_COMMAND");
        let mut table = CommandTable::default();
        table.register(TEST_COMMAND, Rc::new(|_: &u32, _: &Editor| Ok(true)), CommandPriority::Normal);

        assert!(table.listeners(OTHER, CommandPriority::Normal).is_empty());
    }

    #[test]
    fn test_higher_priority_handles_first() {
        let editor = Editor::builder().build().unwrap();
        let log = Rc::new(std::cell::RefCell::new(Vec::new()));

        let low_log = log.clone();
        let _low = editor.register_command(
            TEST_COMMAND,
            Rc::new(move |payload: &u32, _: &Editor| {
                low_log.borrow_mut().push(("low", *payload));
                Ok(true)
            }),
            CommandPriority::Low,
        );
        let high_log = log.clone();
        let _high = editor.register_command(
            TEST_COMMAND,
            Rc::new(move |payload: &u32, _: &Editor| {
                high_log.borrow_mut().push(("high", *payload));
                Ok(*payload > 10)
            }),
            CommandPriority::High,
        );

        assert!(editor.dispatch_command(TEST_COMMAND, 42).unwrap());
        assert_eq!(*log.borrow(), vec![("high", 42)]);

        assert!(editor.dispatch_command(TEST_COMMAND, 1).unwrap());
        assert_eq!(log.borrow().len(), 3);
        assert_eq!(log.borrow()[2], ("low", 1));
    }

    #[test]
    fn test_unhandled_command_returns_false() {
        let editor = Editor::builder().build().unwrap();
        assert!(!editor.dispatch_command(TEST_COMMAND, 0).unwrap());
    }
}
