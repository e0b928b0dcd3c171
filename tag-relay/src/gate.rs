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

//! Single-listener liveness flag.
//!
//! Unlike a relay, an [`OperationalGate`] accepts exactly one listener at a time.
//! The owner of a connection flips the flag; whoever watches the connection
//! attaches the listener.

use crate::contract::arc_address;
use crate::error::{ListenerError, RelayError};
use crate::observability::{events, fields};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

const COMPONENT: &str = "operational_gate";

pub trait OperationalStateListener: Send + Sync {
    fn on_operational_state_changed(&self, operational: bool) -> Result<(), ListenerError>;
}

impl<F> OperationalStateListener for F
where
    F: Fn(bool) -> Result<(), ListenerError> + Send + Sync,
{
    fn on_operational_state_changed(&self, operational: bool) -> Result<(), ListenerError> {
        self(operational)
    }
}

#[derive(Default)]
struct GateState {
    operational: bool,
    listener: Option<Arc<dyn OperationalStateListener>>,
}

pub struct OperationalGate {
    name: String,
    state: Mutex<GateState>,
}

impl OperationalGate {
    /// Creates a gate in the non-operational state.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_operational(&self) -> bool {
        self.lock_state().operational
    }

    /// Sets the flag. The attached listener is called synchronously, and only
    /// on an actual transition.
    pub fn set_operational(&self, operational: bool) {
        let listener = {
            let mut state = self.lock_state();
            if state.operational == operational {
                return;
            }
            state.operational = operational;
            state.listener.clone()
        };

        debug!(
            event = events::GATE_STATE_CHANGED,
            component = COMPONENT,
            gate = %self.name,
            operational,
            "operational state changed"
        );

        let Some(listener) = listener else {
            return;
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            listener.on_operational_state_changed(operational)
        }));
        let reason = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err.to_string(),
            Err(payload) => fields::format_panic(payload.as_ref()),
        };
        error!(
            event = events::GATE_LISTENER_FAILED,
            component = COMPONENT,
            gate = %self.name,
            operational,
            reason = %reason,
            "operational state listener failed"
        );
    }

    pub fn subscribe_operational_state(
        &self,
        listener: Arc<dyn OperationalStateListener>,
    ) -> Result<(), RelayError> {
        let mut state = self.lock_state();
        if state.listener.is_some() {
            return Err(RelayError::OperationalListenerAttached {
                gate: self.name.clone(),
            });
        }
        state.listener = Some(listener);
        Ok(())
    }

    pub fn unsubscribe_operational_state(
        &self,
        listener: &Arc<dyn OperationalStateListener>,
    ) -> Result<(), RelayError> {
        let mut state = self.lock_state();
        match &state.listener {
            Some(attached) if arc_address(attached) == arc_address(listener) => {
                state.listener = None;
                Ok(())
            }
            _ => Err(RelayError::OperationalListenerMismatch {
                gate: self.name.clone(),
            }),
        }
    }
}
