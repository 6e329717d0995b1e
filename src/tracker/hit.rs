//! Hit types and their wire encoding.
//!
//! A hit is encoded into a flat map of short measurement-protocol keys.
//! Encoding is pure: no I/O, no errors, no allocation beyond the map itself.

use std::collections::BTreeMap;

/// Flat wire parameters, keyed by measurement-protocol abbreviation.
pub type Params = BTreeMap<String, String>;

/// Sentinel event value meaning "no value". Anything below zero is omitted.
pub const NO_VALUE: i64 = -1;

/// Kind of hit, sent as `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HitType {
    Event,
    Timing,
}

impl HitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitType::Event => "event",
            HitType::Timing => "timing",
        }
    }
}

impl std::fmt::Display for HitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event hit: category, action, optional label and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHit {
    pub category: String,
    pub action: String,
    pub label: Option<String>,
    /// Only sent when greater than [`NO_VALUE`].
    pub value: i64,
    /// Extra parameters, merged before the standard fields.
    pub extra: Params,
}

impl EventHit {
    pub fn new(category: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            action: action.into(),
            label: None,
            value: NO_VALUE,
            extra: Params::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    pub fn with_params(mut self, extra: Params) -> Self {
        self.extra = extra;
        self
    }

    /// Encode into `ec`/`ea`/`el`/`ev`, on top of the extra parameters.
    pub fn encode(&self) -> Params {
        let mut params = self.extra.clone();
        params.insert("ec".to_string(), self.category.clone());
        params.insert("ea".to_string(), self.action.clone());
        if let Some(ref label) = self.label {
            params.insert("el".to_string(), label.clone());
        }
        if self.value > NO_VALUE {
            params.insert("ev".to_string(), self.value.to_string());
        }
        params
    }
}

/// A user timing hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingHit {
    pub category: String,
    pub variable: String,
    pub duration_ms: u64,
    /// Defaults to `<category>.<variable>` when `None`.
    pub label: Option<String>,
    pub extra: Params,
}

impl TimingHit {
    pub fn new(category: impl Into<String>, variable: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            category: category.into(),
            variable: variable.into(),
            duration_ms,
            label: None,
            extra: Params::new(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_params(mut self, extra: Params) -> Self {
        self.extra = extra;
        self
    }

    /// Encode into `utc`/`utv`/`utt`/`utl`, on top of the extra parameters.
    pub fn encode(&self) -> Params {
        let mut params = self.extra.clone();
        params.insert("utc".to_string(), self.category.clone());
        params.insert("utv".to_string(), self.variable.clone());
        params.insert("utt".to_string(), self.duration_ms.to_string());
        let label = match self.label {
            Some(ref label) => label.clone(),
            None => format!("{}.{}", self.category, self.variable),
        };
        params.insert("utl".to_string(), label);
        params
    }
}

/// One reportable occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hit {
    Event(EventHit),
    Timing(TimingHit),
}

impl Hit {
    pub fn hit_type(&self) -> HitType {
        match self {
            Hit::Event(_) => HitType::Event,
            Hit::Timing(_) => HitType::Timing,
        }
    }

    /// Encode the hit-specific fields (no session fields, no `t`).
    pub fn encode(&self) -> Params {
        match self {
            Hit::Event(event) => event.encode(),
            Hit::Timing(timing) => timing.encode(),
        }
    }
}

impl From<EventHit> for Hit {
    fn from(event: EventHit) -> Self {
        Hit::Event(event)
    }
}

impl From<TimingHit> for Hit {
    fn from(timing: TimingHit) -> Self {
        Hit::Timing(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_encoding() {
        let params = EventHit::new("coffee", "make")
            .with_label("machine")
            .with_value(1)
            .encode();

        assert_eq!(params["ec"], "coffee");
        assert_eq!(params["ea"], "make");
        assert_eq!(params["el"], "machine");
        assert_eq!(params["ev"], "1");
    }

    #[test]
    fn test_event_value_sentinel() {
        let params = EventHit::new("button", "press").encode();
        assert!(!params.contains_key("ev"));
        assert!(!params.contains_key("el"));

        let params = EventHit::new("button", "press").with_value(0).encode();
        assert_eq!(params["ev"], "0");

        // Negative values are indistinguishable from "absent" on the wire
        let params = EventHit::new("button", "press").with_value(-5).encode();
        assert!(!params.contains_key("ev"));
    }

    #[test]
    fn test_event_extra_params_are_overwritten() {
        let mut extra = Params::new();
        extra.insert("ec".to_string(), "ignored".to_string());
        extra.insert("cd1".to_string(), "custom".to_string());

        let params = EventHit::new("button", "press").with_params(extra).encode();
        assert_eq!(params["ec"], "button");
        assert_eq!(params["cd1"], "custom");
    }

    #[test]
    fn test_timing_default_label() {
        let params = TimingHit::new("render", "paint", 250).encode();
        assert_eq!(params["utc"], "render");
        assert_eq!(params["utv"], "paint");
        assert_eq!(params["utt"], "250");
        assert_eq!(params["utl"], "render.paint");
    }

    #[test]
    fn test_timing_empty_label_is_kept() {
        let params = TimingHit::new("render", "paint", 250)
            .with_label("")
            .encode();
        assert_eq!(params["utl"], "");
    }

    #[test]
    fn test_hit_type() {
        let hit: Hit = EventHit::new("a", "b").into();
        assert_eq!(hit.hit_type(), HitType::Event);
        assert_eq!(hit.hit_type().to_string(), "event");

        let hit: Hit = TimingHit::new("a", "b", 1).into();
        assert_eq!(hit.hit_type().as_str(), "timing");
    }
}
