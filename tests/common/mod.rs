//! Scripted in-memory control connection for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use rustonion::tor::{ControlConnection, EventListeners, EventSubscription, HS_DESC_EVENT};
use rustonion::{OnionError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Reply to one expected command, plus HS_DESC events Tor would emit after it
#[derive(Debug, Clone)]
pub struct Step {
    prefix: String,
    reply: std::result::Result<String, String>,
    events: Vec<String>,
}

impl Step {
    pub fn ok(prefix: &str, reply: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            reply: Ok(reply.to_string()),
            events: Vec::new(),
        }
    }

    pub fn error(prefix: &str, message: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            reply: Err(message.to_string()),
            events: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|e| (*e).to_string()).collect();
        self
    }
}

/// Control connection that replays a script and records what was sent
pub struct MockControl {
    version: String,
    script: Mutex<VecDeque<Step>>,
    commands: Mutex<Vec<String>>,
    listeners: Mutex<EventListeners>,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl MockControl {
    pub fn new(version: &str, script: Vec<Step>) -> Self {
        Self {
            version: version.to_string(),
            script: Mutex::new(script.into()),
            commands: Mutex::new(Vec::new()),
            listeners: Mutex::new(EventListeners::new()),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        }
    }

    /// A current Tor
    pub fn current(script: Vec<Step>) -> Self {
        Self::new("0.4.8.12", script)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribes(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn hs_desc_listeners(&self) -> usize {
        self.listeners.lock().unwrap().listener_count(HS_DESC_EVENT)
    }

    pub fn remaining_steps(&self) -> usize {
        self.script.lock().unwrap().len()
    }

    /// Deliver an HS_DESC event outside of any command
    pub fn emit(&self, body: &str) {
        self.listeners.lock().unwrap().dispatch(HS_DESC_EVENT, body);
    }
}

#[async_trait]
impl ControlConnection for MockControl {
    async fn send_command(&self, command: &str) -> Result<String> {
        self.commands.lock().unwrap().push(command.to_string());

        let step = {
            let mut script = self.script.lock().unwrap();
            match script.front() {
                Some(step) if command.starts_with(&step.prefix) => script.pop_front(),
                Some(step) => {
                    return Err(OnionError::Control(format!(
                        "unexpected command {:?}, expected {:?}",
                        command, step.prefix
                    )))
                },
                None => None,
            }
        };
        let Some(step) = step else {
            return Err(OnionError::Control(format!("unscripted command {:?}", command)));
        };

        for event in &step.events {
            self.emit(event);
        }
        step.reply.map_err(OnionError::Control)
    }

    async fn subscribe(&self, event: &str) -> Result<EventSubscription> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(self.listeners.lock().unwrap().add(event))
    }

    async fn unsubscribe(&self, subscription: EventSubscription) -> Result<()> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .remove(subscription.event(), subscription.id());
        Ok(())
    }

    fn version(&self) -> &str {
        &self.version
    }
}

