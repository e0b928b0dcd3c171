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

//! Stable event names emitted through `tracing`.
//!
//! Every event carries `event = <name>` and `component = <module>` fields so log
//! pipelines can filter on them without parsing messages.

pub mod events {
    pub const RELAY_CREATED: &str = "relay_created";
    pub const RELAY_UPSTREAM_SUBSCRIBE: &str = "relay_upstream_subscribe";
    pub const RELAY_UPSTREAM_SUBSCRIBE_FAILED: &str = "relay_upstream_subscribe_failed";
    pub const RELAY_UPSTREAM_UNSUBSCRIBE: &str = "relay_upstream_unsubscribe";
    pub const RELAY_UPSTREAM_UNSUBSCRIBE_FAILED: &str = "relay_upstream_unsubscribe_failed";
    pub const RELAY_UPSTREAM_REUSED: &str = "relay_upstream_reused";
    pub const RELAY_UNSUBSCRIBE_SCHEDULED: &str = "relay_unsubscribe_scheduled";
    pub const RELAY_NODE_EVICTED: &str = "relay_node_evicted";
    pub const RELAY_WRITE_FORWARD_FAILED: &str = "relay_write_forward_failed";
    pub const RELAY_WRITE_WORKER_STOPPED: &str = "relay_write_worker_stopped";
    pub const RELAY_NOTIFICATION_FAILED: &str = "relay_notification_failed";
    pub const RELAY_ERROR_REPORTED: &str = "relay_error_reported";

    pub const ROUTER_TARGET_REGISTERED: &str = "router_target_registered";
    pub const ROUTER_TARGET_UNREGISTERED: &str = "router_target_unregistered";
    pub const ROUTER_REGISTRATION_REJECTED: &str = "router_registration_rejected";
    pub const ROUTER_UNROUTABLE_ID: &str = "router_unroutable_id";

    pub const GATE_STATE_CHANGED: &str = "gate_state_changed";
    pub const GATE_LISTENER_FAILED: &str = "gate_listener_failed";
}

pub mod fields {
    use std::any::Any;

    /// Renders a caught panic payload for log fields.
    pub fn format_panic(payload: &(dyn Any + Send)) -> String {
        if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "listener panicked".to_string()
        }
    }
}
