//! Shared handler state map: tunables and heartbeats, namespaced
//! `"<handler>.<key>"` (spec.md §4.5, §5 — single writer per key, no
//! locking needed beyond the map's own atomicity).

use std::sync::Arc;

use dashmap::DashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl StateValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(n) => Some(*n),
            StateValue::Float(f) => Some(*f as i64),
            StateValue::Text(_) => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Int(n) => Some(*n as f64),
            StateValue::Float(f) => Some(*f),
            StateValue::Text(_) => None,
        }
    }
}

/// Cloning a `HandlerState` shares the underlying map — every stage holds
/// a handle to the same table, matching the original's manager-owned
/// shared dict without needing a separate manager process.
#[derive(Clone, Default)]
pub struct HandlerState {
    inner: Arc<DashMap<String, StateValue>>,
}

impl HandlerState {
    pub fn new() -> Self {
        Self { inner: Arc::new(DashMap::new()) }
    }

    pub fn set(&self, handler: &str, key: &str, value: StateValue) {
        self.inner.insert(format!("{handler}.{key}"), value);
    }

    pub fn get(&self, handler: &str, key: &str) -> Option<StateValue> {
        self.inner.get(&format!("{handler}.{key}")).map(|v| v.clone())
    }

    /// Called once per worker loop iteration by every handler, matching
    /// `IHandler.loop()`'s `state["<name>.heartbeat"] = utcepochnow()`.
    pub fn heartbeat(&self, handler: &str, now: i64) {
        self.set(handler, "heartbeat", StateValue::Int(now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_handler() {
        let state = HandlerState::new();
        state.set("batch", "batch_on", StateValue::Int(4));
        state.set("pitcher", "batch_on", StateValue::Int(99));
        assert_eq!(state.get("batch", "batch_on").unwrap().as_i64(), Some(4));
        assert_eq!(state.get("pitcher", "batch_on").unwrap().as_i64(), Some(99));
    }

    #[test]
    fn clones_share_the_same_underlying_map() {
        let state = HandlerState::new();
        let cloned = state.clone();
        cloned.set("batch", "heartbeat", StateValue::Int(123));
        assert_eq!(state.get("batch", "heartbeat").unwrap().as_i64(), Some(123));
    }
}
