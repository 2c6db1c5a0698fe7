//! Telemetry bus: ordered `Event` emission shared by every runtime
//! subsystem, plus plugin fan-out. Generalizes codegraph-orchestration's
//! `tracing`-based ad-hoc log lines into a structured, queryable `Event`
//! stream that registered plugins also observe.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::model::{Event, EventType};

#[cfg(feature = "metrics")]
use prometheus::{IntCounterVec, Opts, Registry};

/// A registered observer of the event stream. Implementations are invoked
/// synchronously from `emit`, after the event is copied out from under the
/// event-log mutex (lock held only long enough to append and clone).
/// `on_event` failures are caught and logged, never propagated — the
/// fail-stop policy keeps a misbehaving plugin from affecting engine
/// execution.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, event: &Event) -> Result<()>;

    /// Called once, after the bus and the rest of the runtime stack are
    /// wired. Default is a no-op.
    fn on_startup(&self) -> Result<()> {
        Ok(())
    }

    /// Called once as the engine winds down. Default is a no-op.
    fn on_shutdown(&self) -> Result<()> {
        Ok(())
    }

    /// Named capabilities this plugin contributes to the typed factory
    /// registry (tool handlers, context retrievers, and the like) it wants
    /// considered alongside the ones wired directly through the engine
    /// façade. Default contributes nothing.
    fn register_extensions(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Ordered, in-process event log plus optional Prometheus counters and
/// registered plugin fan-out.
pub struct TelemetryBus {
    events: Mutex<Vec<Event>>,
    plugins: Vec<Arc<dyn Plugin>>,
    #[cfg(feature = "metrics")]
    events_total: Option<IntCounterVec>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            plugins: Vec::new(),
            #[cfg(feature = "metrics")]
            events_total: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_registry(registry: &Registry) -> Self {
        let opts = Opts::new("agent_weave_events_total", "Total engine events by type");
        let counter = IntCounterVec::new(opts, &["event_type"]).expect("valid counter opts");
        let _ = registry.register(Box::new(counter.clone()));
        Self {
            events: Mutex::new(Vec::new()),
            plugins: Vec::new(),
            events_total: Some(counter),
        }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.push(plugin);
    }

    /// Run every registered plugin's `on_startup`. A failing plugin is
    /// logged and skipped; the rest still start.
    pub fn start_plugins(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_startup() {
                warn!(plugin = plugin.name(), error = %e, "plugin on_startup failed");
            }
        }
    }

    /// Run every registered plugin's `on_shutdown`, in registration order.
    pub fn shutdown_plugins(&self) {
        for plugin in &self.plugins {
            if let Err(e) = plugin.on_shutdown() {
                warn!(plugin = plugin.name(), error = %e, "plugin on_shutdown failed");
            }
        }
    }

    /// Record an event and fan it out to every registered plugin. Errors
    /// during emission are logged and swallowed, never returned to the
    /// caller — neither the event log append nor a plugin's `on_event` can
    /// fail the call.
    pub fn emit(&self, event: Event) {
        info!(
            event_type = ?event.event_type,
            task_id = ?event.task_id,
            stage_id = ?event.stage_id,
            "engine event"
        );

        #[cfg(feature = "metrics")]
        if let Some(counter) = &self.events_total {
            counter.with_label_values(&[event_type_label(event.event_type)]).inc();
        }

        // Append and copy out under the lock, then release before fanning
        // out to plugins, so a slow or misbehaving plugin never blocks
        // other threads appending events.
        let copy = {
            let mut events = self.events.lock();
            events.push(event);
            events.last().unwrap().clone()
        };

        for plugin in &self.plugins {
            if let Err(e) = plugin.on_event(&copy) {
                warn!(plugin = plugin.name(), error = %e, "plugin on_event failed");
            }
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn events_of_type(&self, event_type: EventType) -> Vec<Event> {
        self.events.lock().iter().filter(|e| e.event_type == event_type).cloned().collect()
    }

    pub fn events_of_task(&self, task_id: &str) -> Vec<Event> {
        self.events.lock().iter().filter(|e| e.task_id.as_deref() == Some(task_id)).cloned().collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TelemetryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
fn event_type_label(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Task => "task",
        EventType::Stage => "stage",
        EventType::Agent => "agent",
        EventType::Tool => "tool",
        EventType::Routing => "routing",
        EventType::Memory => "memory",
        EventType::Error => "error",
        EventType::Telemetry => "telemetry",
    }
}
