//! Typed event-callback registry
//!
//! Each parser owns one registry. Handlers are keyed by event kind; the two
//! pseudo-kinds `ELSE` (fires when no type-specific handler exists) and
//! `ALL` (fires for every event, last) complete the protocol. Handler
//! panics are not caught; they propagate to whoever pumped the parser.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::parse::result::TapEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Version,
    Plan,
    Test,
    Comment,
    Bailout,
    Yaml,
    Unknown,
    Else,
    All,
}

impl EventKind {
    /// Resolve the stringly-typed names accepted in harness configuration.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "version" => Ok(EventKind::Version),
            "plan" => Ok(EventKind::Plan),
            "test" => Ok(EventKind::Test),
            "comment" => Ok(EventKind::Comment),
            "bailout" => Ok(EventKind::Bailout),
            "yaml" => Ok(EventKind::Yaml),
            "unknown" => Ok(EventKind::Unknown),
            "ELSE" => Ok(EventKind::Else),
            "ALL" => Ok(EventKind::All),
            other => Err(Error::Callback(other.to_string())),
        }
    }

    fn of(event: &TapEvent) -> Self {
        match event {
            TapEvent::Version { .. } => EventKind::Version,
            TapEvent::Plan { .. } => EventKind::Plan,
            TapEvent::Test(_) => EventKind::Test,
            TapEvent::Comment { .. } => EventKind::Comment,
            TapEvent::Bailout { .. } => EventKind::Bailout,
            TapEvent::Yaml { .. } => EventKind::Yaml,
            TapEvent::Unknown { .. } => EventKind::Unknown,
        }
    }
}

pub type Callback = Box<dyn FnMut(&TapEvent) + Send>;

#[derive(Default)]
pub struct CallbackRegistry {
    handlers: HashMap<EventKind, Vec<Callback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn register<F>(&mut self, kind: EventKind, callback: F)
    where
        F: FnMut(&TapEvent) + Send + 'static,
    {
        self.handlers
            .entry(kind)
            .or_default()
            .push(Box::new(callback));
    }

    /// Register under a configuration-supplied name, validating it.
    pub fn register_named<F>(&mut self, name: &str, callback: F) -> Result<()>
    where
        F: FnMut(&TapEvent) + Send + 'static,
    {
        let kind = EventKind::from_name(name)?;
        self.register(kind, callback);
        Ok(())
    }

    /// Fire handlers for one event: type-specific, else `ELSE`, then `ALL`.
    pub fn dispatch(&mut self, event: &TapEvent) {
        let kind = EventKind::of(event);
        let had_specific = match self.handlers.get_mut(&kind) {
            Some(handlers) if !handlers.is_empty() => {
                for handler in handlers.iter_mut() {
                    handler(event);
                }
                true
            }
            _ => false,
        };
        if !had_specific {
            if let Some(handlers) = self.handlers.get_mut(&EventKind::Else) {
                for handler in handlers.iter_mut() {
                    handler(event);
                }
            }
        }
        if let Some(handlers) = self.handlers.get_mut(&EventKind::All) {
            for handler in handlers.iter_mut() {
                handler(event);
            }
        }
    }
}
