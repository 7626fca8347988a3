//! Marshallable, executable operation queue.
//!
//! The rework engine expresses every step it takes as a queued item naming a
//! registered operation plus string arguments. The queue serializes to a
//! plain text format so it can be persisted between invocations:
//!
//! ```text
//! Begin
//! CheckoutBase
//! Rework feature-x
//! UpdateHead
//! ```
//!
//! One item per line, space-separated tokens, first token the operation
//! name. Guarantees:
//!
//! - Round-trip: parsing the serialization yields an equal queue, modulo
//!   empty lines (which are ignored).
//! - Arguments must not contain whitespace; callers only enqueue commit ids,
//!   ref names, and patchset names, which satisfy this.

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Item and Queue
// ---------------------------------------------------------------------------

/// A queued operation invocation: name plus arguments.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Item {
    pub operation: String,
    pub args: Vec<String>,
}

impl Item {
    #[must_use]
    pub fn new(operation: impl Into<String>, args: impl IntoIterator<Item = String>) -> Self {
        Self {
            operation: operation.into(),
            args: args.into_iter().collect(),
        }
    }

    /// Serialize to a single line, without trailing newline.
    #[must_use]
    pub fn marshal_text(&self) -> String {
        let mut line = self.operation.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Parse one line. Blank lines yield `None`.
    #[must_use]
    pub fn unmarshal_text(line: &str) -> Option<Self> {
        let mut tokens = line.split_whitespace();
        let operation = tokens.next()?.to_string();
        Some(Self {
            operation,
            args: tokens.map(str::to_string).collect(),
        })
    }
}

/// FIFO queue of operation items.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Queue {
    items: VecDeque<Item>,
}

impl Queue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.items.iter()
    }

    /// Append an operation and its arguments to the tail.
    pub fn enqueue(&mut self, name: &str, args: &[&str]) {
        self.items.push_back(Item {
            operation: name.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        });
    }

    pub fn push(&mut self, item: Item) {
        self.items.push_back(item);
    }

    /// Remove and return the head item, or fail with [`Error::Empty`].
    pub fn pop(&mut self) -> Result<Item> {
        self.items.pop_front().ok_or(Error::Empty)
    }

    #[must_use]
    pub fn peek(&self) -> Option<&Item> {
        self.items.front()
    }

    /// Serialize the queue, one item per line.
    #[must_use]
    pub fn marshal_text(&self) -> String {
        let mut text = String::new();
        for item in &self.items {
            text.push_str(&item.marshal_text());
            text.push('\n');
        }
        text
    }

    /// Parse items from `text`, appending them after any existing items.
    /// Empty lines are skipped.
    pub fn unmarshal_text(&mut self, text: &str) {
        for line in text.lines() {
            if let Some(item) = Item::unmarshal_text(line) {
                self.items.push_back(item);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Operations and the executor
// ---------------------------------------------------------------------------

type OpFn = Box<dyn Fn(&[String]) -> Result<()>>;

/// A registerable piece of work.
///
/// `resumable` marks operations whose in-flight item is persisted to the
/// current-file before execution, so an interrupted run re-attempts them.
pub struct Operation {
    name: String,
    resumable: bool,
    run: OpFn,
}

impl Operation {
    pub fn new(
        name: impl Into<String>,
        resumable: bool,
        run: impl Fn(&[String]) -> Result<()> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            resumable,
            run: Box::new(run),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("resumable", &self.resumable)
            .finish_non_exhaustive()
    }
}

/// Executes a queue of items against a table of registered operations.
#[derive(Debug, Default)]
pub struct Executor {
    registered: HashMap<String, Operation>,
    queue: Queue,
}

impl Executor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an operation, replacing any previous registration with the
    /// same name.
    pub fn register(&mut self, op: Operation) {
        self.registered.insert(op.name.clone(), op);
    }

    /// Whether the named operation is resumable. Unknown names are not.
    #[must_use]
    pub fn resumable(&self, name: &str) -> bool {
        self.registered.get(name).is_some_and(|op| op.resumable)
    }

    /// Append an item for a registered operation.
    pub fn enqueue(&mut self, name: &str, args: &[&str]) -> Result<()> {
        if !self.registered.contains_key(name) {
            return Err(Error::UnknownOperation(name.to_string()));
        }
        self.queue.enqueue(name, args);
        Ok(())
    }

    /// Append the items of `queue` after the current tail.
    pub fn load_queue(&mut self, queue: Queue) {
        for item in queue.items {
            self.queue.push(item);
        }
    }

    /// The head item, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<&Item> {
        self.queue.peek()
    }

    /// The remaining queue.
    #[must_use]
    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    fn apply(&self, name: &str, args: &[String]) -> Result<()> {
        let op = self
            .registered
            .get(name)
            .ok_or_else(|| Error::UnknownOperation(name.to_string()))?;
        (op.run)(args)
    }

    /// Pop and execute a single item.
    pub fn execute(&mut self) -> Result<()> {
        let item = self.queue.pop()?;
        self.apply(&item.operation, &item.args)
    }

    /// Execute items until the queue drains or an operation fails.
    pub fn execute_all(&mut self) -> Result<()> {
        loop {
            match self.execute() {
                Ok(()) => {}
                Err(Error::Empty) => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
