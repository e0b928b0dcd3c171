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

//! # tag-relay
//!
//! `tag-relay` builds trees of data sources that all speak one contract,
//! [`DataAccess`]. Three building blocks can be stacked freely:
//!
//! - [`Relay`] folds many subscribers of one identifier into a single upstream
//!   subscription, caches the last value, suppresses unchanged values and delays
//!   releasing the upstream subscription after the last subscriber leaves.
//! - [`Router`] dispatches `<target>:<rest>` identifiers to the backend
//!   registered as `target`.
//! - [`OperationalGate`] carries a connection liveness flag to exactly one
//!   listener.
//!
//! ## Fan-in through a relay
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tag_relay::{listener_fn, DataAccess, Relay, RelayConfig, Router};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let router = Arc::new(Router::new("plant"));
//! let relay = Relay::new(
//!     RelayConfig::new(router.clone())
//!         .with_name("hmi")
//!         .with_unsubscribe_delay(Duration::ZERO),
//! )
//! .unwrap();
//!
//! // Nothing is registered under `plc1`, so the upstream subscribe fails and
//! // the relay rolls the subscriber back out.
//! let listener = listener_fn(|_value| Ok(()));
//! assert!(relay.subscribe("plc1:TANK.LEVEL", listener).await.is_err());
//! assert_eq!(relay.subscriber_count("plc1:TANK.LEVEL").await, 0);
//! # });
//! ```
//!
//! ## Liveness
//!
//! ```
//! use std::sync::Arc;
//! use tag_relay::{ListenerError, OperationalGate, OperationalStateListener};
//!
//! let gate = OperationalGate::new("plc1");
//! let listener: Arc<dyn OperationalStateListener> =
//!     Arc::new(|up: bool| -> Result<(), ListenerError> {
//!         println!("plc1 operational: {up}");
//!         Ok(())
//!     });
//!
//! gate.subscribe_operational_state(listener.clone()).unwrap();
//! gate.set_operational(true);
//! assert!(gate.is_operational());
//! gate.unsubscribe_operational_state(&listener).unwrap();
//! ```
//!
//! ## Observability model
//!
//! The crate uses `tracing` for logs/events. Library code emits events and does
//! not initialize a global subscriber; binaries and tests are responsible for
//! one-time `tracing_subscriber` initialization.

mod contract;
pub use contract::{listener_fn, ComparableListener, DataAccess, TagValue, ValueListener};

mod error;
pub use error::{ErrorKind, ListenerError, RelayError};

mod gate;
pub use gate::{OperationalGate, OperationalStateListener};

#[doc(hidden)]
pub mod observability;

mod relay;
pub use relay::config::{EqualityFn, ErrorHook, EvictionPolicy, RelayConfig, RelaySettings};
pub use relay::Relay;

mod router;
pub use router::target_id::TargetId;
pub use router::Router;
