//! Persistable snapshots of a machine.

use super::error::CheckpointError;
use crate::core::{Event, HistoryRecord, Message, State};
use crate::graph::{RegionId, StateGraph};
use crate::runtime::ActiveConfiguration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Snapshot of one machine: the active state of a region, one child context
/// per region of that state, and (at the top level) history, the last event
/// and the extended state.
///
/// Does NOT include anything in flight: a snapshot is taken between steps.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct StateMachineContext<S: State, E: Event> {
    pub machine_id: String,

    /// Active state of the region this context describes, `None` for a
    /// machine that was never started.
    pub state: Option<S>,

    /// One context per region of `state`, in declaration order.
    #[serde(default)]
    pub children: Vec<StateMachineContext<S, E>>,

    #[serde(default)]
    pub history: Vec<HistoryEntry<S>>,

    /// Last event processed, if any.
    pub event: Option<E>,

    #[serde(default, with = "json_text")]
    pub event_headers: BTreeMap<String, Value>,

    #[serde(default, with = "json_text")]
    pub extended_state: BTreeMap<String, Value>,
}

/// One history record, keyed by its history pseudostate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct HistoryEntry<S: State> {
    pub pseudostate: S,
    pub states: Vec<S>,
    pub recorded_at: DateTime<Utc>,
}

impl<S: State, E: Event> StateMachineContext<S, E> {
    /// Context of a machine that has not entered any state.
    pub fn new(machine_id: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            state: None,
            children: Vec::new(),
            history: Vec::new(),
            event: None,
            event_headers: BTreeMap::new(),
            extended_state: BTreeMap::new(),
        }
    }

    /// Every active state id, pre-order.
    pub fn active_states(&self) -> Vec<S> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<S>) {
        if let Some(state) = &self.state {
            out.push(state.clone());
        }
        for child in &self.children {
            child.collect(out);
        }
    }

    /// Extended state variables in the form `ExtendedState` stores them.
    pub fn variables(&self) -> HashMap<String, Value> {
        self.extended_state
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Capture `config` (plus extended state and the last message) as a context.
pub fn snapshot<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    machine_id: &str,
    config: &ActiveConfiguration<S>,
    variables: HashMap<String, Value>,
    message: Option<&Message<E>>,
) -> StateMachineContext<S, E> {
    let mut context = region_context(graph, machine_id, config, graph.root());

    let mut history: Vec<HistoryEntry<S>> = config
        .history()
        .iter()
        .map(|(pseudostate, record)| HistoryEntry {
            pseudostate: pseudostate.clone(),
            states: record.states.clone(),
            recorded_at: record.recorded_at,
        })
        .collect();
    history.sort_by(|a, b| a.pseudostate.name().cmp(b.pseudostate.name()));
    context.history = history;

    context.event = message.map(|m| m.payload.clone());
    context.event_headers = message
        .map(|m| m.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default();
    context.extended_state = variables.into_iter().collect();
    context
}

fn region_context<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    machine_id: &str,
    config: &ActiveConfiguration<S>,
    region: RegionId,
) -> StateMachineContext<S, E> {
    let mut context = StateMachineContext::new(machine_id);
    if let Some(node) = config.active_in(region) {
        let state = graph.node(node);
        context.state = Some(state.id().clone());
        context.children = state
            .regions()
            .iter()
            .map(|r| region_context(graph, machine_id, config, *r))
            .collect();
    }
    context
}

/// Rebuild an active configuration from a context, checking it against the
/// graph.
pub fn restore<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    context: &StateMachineContext<S, E>,
) -> Result<ActiveConfiguration<S>, CheckpointError> {
    let mut config = ActiveConfiguration::new();
    if context.state.is_some() {
        restore_region(graph, graph.root(), context, &mut config)?;
    }

    for entry in &context.history {
        let node = graph
            .lookup(&entry.pseudostate)
            .ok_or_else(|| CheckpointError::UnknownState(entry.pseudostate.name().to_string()))?;
        if !graph.node(node).kind().is_history() {
            return Err(CheckpointError::NotHistory(
                entry.pseudostate.name().to_string(),
            ));
        }
        if let Some(unknown) = entry.states.iter().find(|s| graph.lookup(s).is_none()) {
            return Err(CheckpointError::UnknownState(unknown.name().to_string()));
        }
        config.history_mut().insert(
            entry.pseudostate.clone(),
            HistoryRecord {
                states: entry.states.clone(),
                recorded_at: entry.recorded_at,
            },
        );
    }

    Ok(config)
}

fn restore_region<S: State, E: Event>(
    graph: &StateGraph<S, E>,
    region: RegionId,
    context: &StateMachineContext<S, E>,
    config: &mut ActiveConfiguration<S>,
) -> Result<(), CheckpointError> {
    let state = context
        .state
        .as_ref()
        .ok_or_else(|| CheckpointError::MissingState(graph.region_label(region)))?;
    let node = graph
        .lookup(state)
        .ok_or_else(|| CheckpointError::UnknownState(state.name().to_string()))?;
    let declared = graph.node(node);

    if declared.region() != region {
        return Err(CheckpointError::RegionMismatch {
            state: state.name().to_string(),
            region: graph.region_label(region),
        });
    }
    if !declared.kind().is_resting() {
        return Err(CheckpointError::NotResting(state.name().to_string()));
    }
    if declared.regions().len() != context.children.len() {
        return Err(CheckpointError::ChildCount {
            state: state.name().to_string(),
            expected: declared.regions().len(),
            found: context.children.len(),
        });
    }

    config.set(region, node);
    for (child_region, child) in declared.regions().iter().zip(&context.children) {
        restore_region(graph, *child_region, child, config)?;
    }
    Ok(())
}

/// JSON values stored as JSON text, so binary formats without
/// self-description can carry them.
mod json_text {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use serde_json::Value;
    use std::collections::BTreeMap;

    pub fn serialize<Ser: Serializer>(
        values: &BTreeMap<String, Value>,
        serializer: Ser,
    ) -> Result<Ser::Ok, Ser::Error> {
        let text: BTreeMap<&String, String> =
            values.iter().map(|(k, v)| (k, v.to_string())).collect();
        text.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<String, Value>, D::Error> {
        let text = BTreeMap::<String, String>::deserialize(deserializer)?;
        text.into_iter()
            .map(|(k, v)| {
                serde_json::from_str(&v)
                    .map(|value| (k, value))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{on_event, RegionBuilder, StateGraphBuilder};
    use crate::graph::HistoryKind;
    use crate::{event_enum, state_enum};
    use serde_json::json;

    state_enum! {
        enum S { Idle, Busy, X1, X2, Y1, H }
    }

    event_enum! {
        enum E { Go }
    }

    fn graph() -> StateGraph<S, E> {
        StateGraphBuilder::new()
            .region(RegionBuilder::top().initial(S::Idle).state(S::Idle).state(S::Busy))
            .region(
                RegionBuilder::within(S::Busy)
                    .initial(S::X1)
                    .state(S::X1)
                    .state(S::X2)
                    .history(S::H, HistoryKind::Shallow),
            )
            .region(RegionBuilder::within(S::Busy).initial(S::Y1).state(S::Y1))
            .transition(on_event(S::Idle, S::Busy, E::Go))
            .transition(on_event(S::X1, S::X2, E::Go))
            .build()
            .unwrap()
    }

    fn activate(graph: &StateGraph<S, E>, ids: &[S]) -> ActiveConfiguration<S> {
        let mut config = ActiveConfiguration::new();
        for id in ids {
            let node = graph.lookup(id).unwrap();
            config.set(graph.node(node).region(), node);
        }
        config
    }

    #[test]
    fn snapshot_nests_one_child_per_region() {
        let graph = graph();
        let config = activate(&graph, &[S::Busy, S::X2, S::Y1]);
        let context = snapshot(&graph, "m", &config, HashMap::new(), None);

        assert_eq!(context.state, Some(S::Busy));
        assert_eq!(context.children.len(), 2);
        assert_eq!(context.children[0].state, Some(S::X2));
        assert_eq!(context.children[1].state, Some(S::Y1));
        assert_eq!(context.active_states(), vec![S::Busy, S::X2, S::Y1]);
    }

    #[test]
    fn restore_inverts_snapshot() {
        let graph = graph();
        let mut config = activate(&graph, &[S::Idle]);
        config.history_mut().record(S::H, vec![S::X2]);
        let variables = HashMap::from([("count".to_string(), json!(3))]);
        let message = Message::new(E::Go).with_header("source", "test");

        let context = snapshot(&graph, "m", &config, variables.clone(), Some(&message));
        assert_eq!(context.event, Some(E::Go));
        assert_eq!(context.event_headers.get("source"), Some(&json!("test")));
        assert_eq!(context.variables(), variables);
        assert_eq!(restore(&graph, &context).unwrap(), config);
    }

    #[test]
    fn restore_rejects_mismatched_children() {
        let graph = graph();
        let mut context = StateMachineContext::<S, E>::new("m");
        context.state = Some(S::Busy);

        assert!(matches!(
            restore(&graph, &context),
            Err(CheckpointError::ChildCount { expected: 2, found: 0, .. })
        ));
    }

    #[test]
    fn restore_rejects_states_in_the_wrong_region() {
        let graph = graph();
        let mut context = StateMachineContext::<S, E>::new("m");
        context.state = Some(S::X1);

        assert!(matches!(
            restore(&graph, &context),
            Err(CheckpointError::RegionMismatch { .. })
        ));
    }

    #[test]
    fn restore_rejects_history_on_plain_states() {
        let graph = graph();
        let mut context = StateMachineContext::<S, E>::new("m");
        context.history.push(HistoryEntry {
            pseudostate: S::Idle,
            states: vec![S::X1],
            recorded_at: Utc::now(),
        });

        assert!(matches!(
            restore(&graph, &context),
            Err(CheckpointError::NotHistory(_))
        ));
    }

    #[test]
    fn empty_context_restores_empty_configuration() {
        let graph = graph();
        let context = StateMachineContext::<S, E>::new("m");
        assert!(restore(&graph, &context).unwrap().is_empty());
    }
}
