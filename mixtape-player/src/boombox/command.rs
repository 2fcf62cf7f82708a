//! Commands and the command/property context

use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::Result;

type Invoke = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;
type Availability = Arc<dyn Fn() -> bool + Send + Sync>;

/// Named zero-argument async operation with an optional availability check
#[derive(Clone)]
pub struct Command {
    name: String,
    invoke: Invoke,
    availability: Option<Availability>,
}

impl Command {
    pub fn new<F, Fut>(name: impl Into<String>, invoke: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            name: name.into(),
            invoke: Arc::new(move || -> BoxFuture<'static, Result<()>> { Box::pin(invoke()) }),
            availability: None,
        }
    }

    /// Only offer the command while `check` returns true
    pub fn available_when<P>(mut self, check: P) -> Self
    where
        P: Fn() -> bool + Send + Sync + 'static,
    {
        self.availability = Some(Arc::new(check));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Commands without a check are always available
    pub fn is_available(&self) -> bool {
        self.availability.as_ref().map_or(true, |check| check())
    }

    pub fn call(&self) -> BoxFuture<'static, Result<()>> {
        (self.invoke)()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("conditional", &self.availability.is_some())
            .finish()
    }
}

/// Result of a merged lookup
#[derive(Debug, Clone)]
pub enum Entry {
    Property(Value),
    Command(Command),
}

/// Properties and commands visible to plugins and callers
#[derive(Debug, Default)]
pub struct Context {
    properties: HashMap<String, Value>,
    commands: HashMap<String, Command>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_property(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove_property(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn command(&self, name: &str) -> Option<&Command> {
        self.commands.get(name)
    }

    /// Sorted property names
    pub fn property_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.properties.keys().cloned().collect();
        names.sort();
        names
    }

    /// Sorted command names
    pub fn command_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort();
        names
    }

    /// Property or command by name; properties shadow commands
    pub fn get(&self, name: &str) -> Option<Entry> {
        if let Some(value) = self.properties.get(name) {
            return Some(Entry::Property(value.clone()));
        }
        self.commands.get(name).cloned().map(Entry::Command)
    }

    /// Swap in a freshly built command registry
    pub(crate) fn replace_commands(&mut self, commands: HashMap<String, Command>) {
        self.commands = commands;
    }
}
