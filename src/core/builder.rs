use std::sync::Arc;

use crate::alarms::{AlarmDeps, AlarmEngine, AlarmEngineConfig, EmergencySignalConfig};
use crate::events::Bus;
use crate::plan::BehaviorCatalog;
use crate::subscribers::{SlotMonitor, Subscribe, SubscriberSet};

use super::config::Config;
use super::orchestrator::CycleDeps;
use super::registry::SlotCycleRegistry;
use super::station::Station;

struct AlarmSetup {
    cfg: AlarmEngineConfig,
    deps: AlarmDeps,
    signals: Vec<EmergencySignalConfig>,
}

/// Builder for a [`Station`] with optional alarm engine and subscribers.
pub struct StationBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    registry: Option<Arc<SlotCycleRegistry>>,
    deps: Option<CycleDeps>,
    alarms: Option<AlarmSetup>,
}

impl StationBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            registry: None,
            deps: None,
            alarms: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (cycle lifecycle, actions, alarms)
    /// through dedicated workers with bounded queues. A [`SlotMonitor`] is
    /// always added.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Uses `registry` instead of a private one (e.g. [`SlotCycleRegistry::global`]).
    pub fn with_registry(mut self, registry: Arc<SlotCycleRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Collaborators of every cycle; defaults to in-memory ones with an empty catalog.
    pub fn with_cycle_deps(mut self, deps: CycleDeps) -> Self {
        self.deps = Some(deps);
        self
    }

    /// Adds an alarm engine watching `signals` for emergency stops.
    pub fn with_alarm_engine(
        mut self,
        cfg: AlarmEngineConfig,
        deps: AlarmDeps,
        signals: Vec<EmergencySignalConfig>,
    ) -> Self {
        self.alarms = Some(AlarmSetup { cfg, deps, signals });
        self
    }

    /// Builds the station and starts its bus listener.
    ///
    /// Must be called inside a tokio runtime. The alarm engine is created but not
    /// started; call [`Station::start_alarms`].
    pub fn build(self) -> Arc<Station> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let monitor = Arc::new(SlotMonitor::new());

        let mut subscribers = self.subscribers;
        subscribers.push(monitor.clone());
        let subs = Arc::new(SubscriberSet::new(subscribers, bus.clone()));

        let registry = self.registry.unwrap_or_else(SlotCycleRegistry::new);
        let deps = self
            .deps
            .unwrap_or_else(|| CycleDeps::in_memory(Arc::new(BehaviorCatalog::new())));
        let alarms = self.alarms.map(|a| {
            let engine = AlarmEngine::new(a.cfg, a.deps, Arc::clone(&registry), bus.clone());
            (engine, a.signals)
        });

        let station = Arc::new(Station::new_internal(
            self.cfg, bus, subs, monitor, registry, deps, alarms,
        ));
        station.spawn_listener();
        station
    }
}
