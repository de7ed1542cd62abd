//! Partition state
//!
//! Everything the processors read lives here, and it only changes through
//! [`EventAppliers`]: the same events always rebuild the same state. Maps are
//! ordered so that iteration (and therefore the records derived from it) is
//! deterministic.

mod appliers;
mod element;

pub use appliers::EventAppliers;
pub use element::{ElementInstance, ElementLifecycle, EventTrigger};

use crate::record::{IncidentRecord, JobRecord, MessageSubscriptionRecord, TimerRecord, Variables};
use crate::types::{Key, KeyGenerator, PartitionId, Timestamp};
use std::collections::BTreeMap;

/// In-memory state of one partition. Owned by its stream processor task;
/// cloned as a checkpoint before every command.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingState {
    key_generator: KeyGenerator,
    element_instances: BTreeMap<Key, ElementInstance>,
    timers: BTreeMap<Key, TimerRecord>,
    message_subscriptions: BTreeMap<Key, MessageSubscriptionRecord>,
    jobs: BTreeMap<Key, JobRecord>,
    incidents: BTreeMap<Key, IncidentRecord>,
    /// One document per process instance key.
    variables: BTreeMap<Key, Variables>,
    /// Tokens on taken sequence flows not yet consumed by their target:
    /// (flow scope key, sequence flow id).
    taken_flows: BTreeMap<(Key, String), u32>,
    /// Complete token sets of parallel joins whose activation is pending:
    /// (flow scope key, join element id).
    reserved_joins: BTreeMap<(Key, String), u32>,
    event_triggers: BTreeMap<Key, EventTrigger>,
}

impl ProcessingState {
    pub fn new(partition_id: PartitionId) -> Self {
        Self {
            key_generator: KeyGenerator::new(partition_id),
            element_instances: BTreeMap::new(),
            timers: BTreeMap::new(),
            message_subscriptions: BTreeMap::new(),
            jobs: BTreeMap::new(),
            incidents: BTreeMap::new(),
            variables: BTreeMap::new(),
            taken_flows: BTreeMap::new(),
            reserved_joins: BTreeMap::new(),
            event_triggers: BTreeMap::new(),
        }
    }

    pub fn partition_id(&self) -> PartitionId {
        self.key_generator.partition_id()
    }

    pub fn next_key(&mut self) -> Key {
        self.key_generator.next_key()
    }

    /// Never hand out `key` again. Used while replaying.
    pub fn observe_key(&mut self, key: Key) {
        self.key_generator.set_key_if_higher(key);
    }

    // ── element instances ──

    pub fn element_instance(&self, key: Key) -> Option<&ElementInstance> {
        self.element_instances.get(&key)
    }

    pub fn element_instances(&self) -> impl Iterator<Item = &ElementInstance> {
        self.element_instances.values()
    }

    /// Direct children of `scope_key`, in key order.
    pub fn child_instances(&self, scope_key: Key) -> Vec<&ElementInstance> {
        self.element_instances
            .values()
            .filter(|instance| instance.flow_scope_key() == scope_key)
            .collect()
    }

    pub fn event_trigger(&self, element_instance_key: Key) -> Option<&EventTrigger> {
        self.event_triggers.get(&element_instance_key)
    }

    /// Unconsumed tokens on `flow_id` inside `scope_key`.
    pub fn taken_flow_count(&self, scope_key: Key, flow_id: &str) -> u32 {
        self.taken_flows
            .get(&(scope_key, flow_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Flows of `scope_key` holding unconsumed tokens, with their count.
    pub fn pending_flows(&self, scope_key: Key) -> impl Iterator<Item = (&str, u32)> {
        scoped(&self.taken_flows, scope_key)
    }

    /// Parallel joins of `scope_key` with a complete token set reserved.
    pub fn reserved_joins(&self, scope_key: Key) -> impl Iterator<Item = &str> {
        scoped(&self.reserved_joins, scope_key).map(|(join_id, _)| join_id)
    }

    // ── timers ──

    pub fn timer(&self, key: Key) -> Option<&TimerRecord> {
        self.timers.get(&key)
    }

    pub fn timers(&self) -> impl Iterator<Item = (Key, &TimerRecord)> {
        self.timers.iter().map(|(k, v)| (*k, v))
    }

    pub fn timers_of(&self, element_instance_key: Key) -> Vec<(Key, TimerRecord)> {
        self.timers
            .iter()
            .filter(|(_, t)| t.element_instance_key == element_instance_key)
            .map(|(k, t)| (*k, t.clone()))
            .collect()
    }

    /// Timers due at `now`, ordered by due date then key.
    pub fn due_timers(&self, now: Timestamp) -> Vec<(Key, TimerRecord)> {
        let mut due: Vec<_> = self
            .timers
            .iter()
            .filter(|(_, t)| t.due_date <= now)
            .map(|(k, t)| (*k, t.clone()))
            .collect();
        due.sort_by_key(|(key, t)| (t.due_date, *key));
        due
    }

    // ── message subscriptions ──

    pub fn message_subscription(&self, key: Key) -> Option<&MessageSubscriptionRecord> {
        self.message_subscriptions.get(&key)
    }

    pub fn message_subscriptions_of(
        &self,
        element_instance_key: Key,
    ) -> Vec<(Key, MessageSubscriptionRecord)> {
        self.message_subscriptions
            .iter()
            .filter(|(_, s)| s.element_instance_key == element_instance_key)
            .map(|(k, s)| (*k, s.clone()))
            .collect()
    }

    /// Open subscriptions waiting for `name` with `correlation_key`, oldest
    /// first.
    pub fn correlating_subscriptions(
        &self,
        name: &str,
        correlation_key: &str,
    ) -> Vec<(Key, MessageSubscriptionRecord)> {
        self.message_subscriptions
            .iter()
            .filter(|(_, s)| s.message_name == name && s.correlation_key == correlation_key)
            .map(|(k, s)| (*k, s.clone()))
            .collect()
    }

    // ── jobs & incidents ──

    pub fn job(&self, key: Key) -> Option<&JobRecord> {
        self.jobs.get(&key)
    }

    pub fn jobs(&self) -> impl Iterator<Item = (Key, &JobRecord)> {
        self.jobs.iter().map(|(k, v)| (*k, v))
    }

    pub fn jobs_of(&self, element_instance_key: Key) -> Vec<(Key, JobRecord)> {
        self.jobs
            .iter()
            .filter(|(_, j)| j.element_instance_key == element_instance_key)
            .map(|(k, j)| (*k, j.clone()))
            .collect()
    }

    pub fn incident(&self, key: Key) -> Option<&IncidentRecord> {
        self.incidents.get(&key)
    }

    pub fn incidents(&self) -> impl Iterator<Item = (Key, &IncidentRecord)> {
        self.incidents.iter().map(|(k, v)| (*k, v))
    }

    pub fn incidents_of(&self, element_instance_key: Key) -> Vec<(Key, IncidentRecord)> {
        self.incidents
            .iter()
            .filter(|(_, i)| i.element_instance_key == element_instance_key)
            .map(|(k, i)| (*k, i.clone()))
            .collect()
    }

    // ── variables ──

    pub fn variables(&self, process_instance_key: Key) -> Option<&Variables> {
        self.variables.get(&process_instance_key)
    }
}

fn scoped(
    map: &BTreeMap<(Key, String), u32>,
    scope_key: Key,
) -> impl Iterator<Item = (&str, u32)> {
    map.range((scope_key, String::new())..)
        .take_while(move |((scope, _), _)| *scope == scope_key)
        .map(|((_, id), count)| (id.as_str(), *count))
}
