/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Relay configuration.
//!
//! [`RelayConfig`] is assembled once and handed to [`crate::Relay::new`]; the
//! relay never exposes it for mutation afterwards. The serialisable subset lives
//! in [`RelaySettings`] and can be loaded from a JSON5 file.

use crate::contract::{DataAccess, TagValue};
use crate::error::RelayError;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Decides whether a freshly observed value is the same as the cached one.
pub type EqualityFn = Arc<dyn Fn(&TagValue, &TagValue) -> bool + Send + Sync>;

/// Receives errors that cannot be returned to a caller.
pub type ErrorHook = Arc<dyn Fn(&RelayError) + Send + Sync>;

/// What happens to a node once it has no subscribers and no upstream link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Keep the node and its cached value for the lifetime of the relay.
    #[default]
    Retain,
    /// Drop the node after the upstream subscription is released. Reads and
    /// writes then only refresh nodes that still have subscribers.
    EvictWhenIdle,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub unsubscribe_delay_ms: u64,
    #[serde(default)]
    pub eviction: EvictionPolicy,
}

impl RelaySettings {
    pub fn from_json5_str(text: &str) -> Result<Self, RelayError> {
        let settings: RelaySettings =
            json5::from_str(text).map_err(|err| RelayError::InvalidConfig {
                reason: format!("unable to parse relay settings: {err}"),
            })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| RelayError::InvalidConfig {
            reason: format!("unable to read {}: {err}", path.display()),
        })?;
        Self::from_json5_str(&text)
    }

    fn validate(&self) -> Result<(), RelayError> {
        validate_name(self.name.as_deref())
    }
}

fn validate_name(name: Option<&str>) -> Result<(), RelayError> {
    match name {
        Some(name) if name.trim().is_empty() => Err(RelayError::InvalidConfig {
            reason: "relay name must not be blank".to_string(),
        }),
        _ => Ok(()),
    }
}

pub struct RelayConfig {
    pub(crate) name: Option<String>,
    pub(crate) upstream: Arc<dyn DataAccess>,
    pub(crate) equal: EqualityFn,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) unsubscribe_delay: Duration,
    pub(crate) eviction: EvictionPolicy,
}

impl RelayConfig {
    pub fn new(upstream: Arc<dyn DataAccess>) -> Self {
        Self {
            name: None,
            upstream,
            equal: Arc::new(|a: &TagValue, b: &TagValue| a == b),
            on_error: None,
            unsubscribe_delay: Duration::ZERO,
            eviction: EvictionPolicy::default(),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_equality<F>(mut self, equal: F) -> Self
    where
        F: Fn(&TagValue, &TagValue) -> bool + Send + Sync + 'static,
    {
        self.equal = Arc::new(equal);
        self
    }

    pub fn with_error_hook<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&RelayError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    pub fn with_unsubscribe_delay(mut self, delay: Duration) -> Self {
        self.unsubscribe_delay = delay;
        self
    }

    pub fn with_eviction_policy(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    /// Applies file-based settings on top of the current configuration.
    pub fn with_settings(mut self, settings: &RelaySettings) -> Self {
        if let Some(name) = &settings.name {
            self.name = Some(name.clone());
        }
        self.unsubscribe_delay = Duration::from_millis(settings.unsubscribe_delay_ms);
        self.eviction = settings.eviction;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), RelayError> {
        validate_name(self.name.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::{EvictionPolicy, RelaySettings};
    use crate::error::RelayError;

    #[test]
    fn settings_parse_json5_with_comments() {
        let settings = RelaySettings::from_json5_str(
            r#"{
                // closer to the field bus, absorb reconnect churn
                name: "edge",
                unsubscribe_delay_ms: 500,
                eviction: "evict_when_idle",
            }"#,
        )
        .expect("valid settings");

        assert_eq!(settings.name.as_deref(), Some("edge"));
        assert_eq!(settings.unsubscribe_delay_ms, 500);
        assert_eq!(settings.eviction, EvictionPolicy::EvictWhenIdle);
    }

    #[test]
    fn settings_default_to_immediate_retaining_relay() {
        let settings = RelaySettings::from_json5_str("{}").expect("empty settings");

        assert_eq!(settings, RelaySettings::default());
        assert_eq!(settings.eviction, EvictionPolicy::Retain);
    }

    #[test]
    fn settings_reject_unknown_fields_and_blank_names() {
        assert!(matches!(
            RelaySettings::from_json5_str("{ delay: 5 }"),
            Err(RelayError::InvalidConfig { .. })
        ));
        assert!(matches!(
            RelaySettings::from_json5_str(r#"{ name: "  " }"#),
            Err(RelayError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn missing_settings_file_is_a_config_error() {
        let err = RelaySettings::from_file("/nonexistent/relay.json5").unwrap_err();

        assert!(matches!(err, RelayError::InvalidConfig { .. }));
    }
}
