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

//! Prefix router.
//!
//! A [`Router`] owns a table of named backends and dispatches every contract
//! call for `<target>:<rest>` to the backend registered as `target`, passing
//! `rest` along as the backend's own identifier.
//!
//! ```
//! use tag_relay::{DataAccess, Router, TargetId};
//!
//! let parsed = TargetId::parse("plc1:TANK.LEVEL");
//! assert_eq!(parsed.target, Some("plc1"));
//! assert_eq!(parsed.node_id, "TANK.LEVEL");
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let router = Router::new("plant");
//! let err = router.read("missing:X").await.unwrap_err();
//! assert!(err.to_string().contains("missing"));
//! # });
//! ```

pub(crate) mod target_id;
pub(crate) mod target_table;

use crate::contract::{DataAccess, TagValue, ValueListener};
use crate::error::RelayError;
use crate::observability::events;
use crate::router::target_id::{is_valid_target_name, TargetId};
use crate::router::target_table::TargetTable;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

const COMPONENT: &str = "router";

pub struct Router {
    name: String,
    targets: TargetTable,
}

impl Router {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            targets: TargetTable::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn register(
        &self,
        target: &str,
        backend: Arc<dyn DataAccess>,
    ) -> Result<(), RelayError> {
        if !is_valid_target_name(target) {
            return Err(self.rejected(RelayError::InvalidTarget {
                target: target.to_string(),
            }));
        }

        self.targets
            .insert(target, backend)
            .await
            .map_err(|err| self.rejected(err))?;

        info!(
            event = events::ROUTER_TARGET_REGISTERED,
            component = COMPONENT,
            router = %self.name,
            route_target = target,
            "backend registered"
        );
        Ok(())
    }

    /// Removes `target`. `backend` must be the very instance that was registered.
    pub async fn unregister(
        &self,
        target: &str,
        backend: &Arc<dyn DataAccess>,
    ) -> Result<(), RelayError> {
        self.targets
            .remove(target, backend)
            .await
            .map_err(|err| self.rejected(err))?;

        info!(
            event = events::ROUTER_TARGET_UNREGISTERED,
            component = COMPONENT,
            router = %self.name,
            route_target = target,
            "backend unregistered"
        );
        Ok(())
    }

    /// Registered target names, sorted.
    pub fn targets(&self) -> Vec<String> {
        self.targets.names()
    }

    fn rejected(&self, err: RelayError) -> RelayError {
        warn!(
            event = events::ROUTER_REGISTRATION_REJECTED,
            component = COMPONENT,
            router = %self.name,
            err = %err,
            "target registration change rejected"
        );
        err
    }

    /// Resolves `id` to its backend and the identifier that backend expects.
    fn route<'a>(&self, id: &'a str) -> Result<(Arc<dyn DataAccess>, &'a str), RelayError> {
        let parsed = TargetId::parse(id);
        let backend = parsed.target.and_then(|target| self.targets.get(target));

        match backend {
            Some(backend) => {
                debug!(
                    component = COMPONENT,
                    router = %self.name,
                    id,
                    node_id = parsed.node_id,
                    "routing"
                );
                Ok((backend, parsed.node_id))
            }
            None => {
                debug!(
                    event = events::ROUTER_UNROUTABLE_ID,
                    component = COMPONENT,
                    router = %self.name,
                    id,
                    route_target = ?parsed.target,
                    "no backend for id"
                );
                Err(RelayError::UnroutableId {
                    id: id.to_string(),
                    target: parsed.target.map(str::to_string),
                })
            }
        }
    }
}

#[async_trait]
impl DataAccess for Router {
    async fn subscribe(&self, id: &str, listener: Arc<dyn ValueListener>) -> Result<(), RelayError> {
        let (backend, node_id) = self.route(id)?;
        backend.subscribe(node_id, listener).await
    }

    async fn unsubscribe(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        let (backend, node_id) = self.route(id)?;
        backend.unsubscribe(node_id, listener).await
    }

    async fn read(&self, id: &str) -> Result<TagValue, RelayError> {
        let (backend, node_id) = self.route(id)?;
        backend.read(node_id).await
    }

    async fn write(&self, id: &str, value: TagValue) -> Result<(), RelayError> {
        let (backend, node_id) = self.route(id)?;
        backend.write(node_id, value).await
    }

    async fn get_type(&self, id: &str) -> Result<String, RelayError> {
        let (backend, node_id) = self.route(id)?;
        backend.get_type(node_id).await
    }

    async fn subscribe_event(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        let (backend, node_id) = self.route(id)?;
        backend.subscribe_event(node_id, listener).await
    }

    async fn unsubscribe_event(
        &self,
        id: &str,
        listener: Arc<dyn ValueListener>,
    ) -> Result<(), RelayError> {
        let (backend, node_id) = self.route(id)?;
        backend.unsubscribe_event(node_id, listener).await
    }
}

#[cfg(test)]
mod tests {
    use super::Router;
    use crate::contract::{listener_fn, DataAccess, TagValue, ValueListener};
    use crate::error::{ErrorKind, RelayError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingBackend {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingBackend {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataAccess for RecordingBackend {
        async fn subscribe(
            &self,
            id: &str,
            _listener: Arc<dyn ValueListener>,
        ) -> Result<(), RelayError> {
            self.record(format!("subscribe {id}"));
            Ok(())
        }

        async fn unsubscribe(
            &self,
            id: &str,
            _listener: Arc<dyn ValueListener>,
        ) -> Result<(), RelayError> {
            self.record(format!("unsubscribe {id}"));
            Ok(())
        }

        async fn read(&self, id: &str) -> Result<TagValue, RelayError> {
            self.record(format!("read {id}"));
            Ok(json!(id))
        }

        async fn write(&self, id: &str, value: TagValue) -> Result<(), RelayError> {
            self.record(format!("write {id} {value}"));
            Ok(())
        }

        async fn get_type(&self, id: &str) -> Result<String, RelayError> {
            self.record(format!("get_type {id}"));
            Ok("Int32".to_string())
        }

        async fn subscribe_event(
            &self,
            id: &str,
            _listener: Arc<dyn ValueListener>,
        ) -> Result<(), RelayError> {
            self.record(format!("subscribe_event {id}"));
            Ok(())
        }
    }

    async fn router_with(targets: &[(&str, Arc<RecordingBackend>)]) -> Router {
        let router = Router::new("test");
        for (target, backend) in targets {
            router.register(target, backend.clone()).await.unwrap();
        }
        router
    }

    #[tokio::test]
    async fn every_operation_is_dispatched_with_prefix_stripped() {
        let opc = Arc::new(RecordingBackend::default());
        let sim = Arc::new(RecordingBackend::default());
        let router = router_with(&[("opc", opc.clone()), ("sim", sim.clone())]).await;
        let listener = listener_fn(|_| Ok(()));

        assert_eq!(router.read("opc:Tag1").await, Ok(json!("Tag1")));
        router.write("opc:Tag1", json!(5)).await.unwrap();
        router.subscribe("opc:Tag1", listener.clone()).await.unwrap();
        router.unsubscribe("opc:Tag1", listener.clone()).await.unwrap();
        router.subscribe_event("opc:Alarm", listener).await.unwrap();
        assert_eq!(router.get_type("opc:Tag1").await, Ok("Int32".to_string()));

        assert_eq!(
            opc.calls(),
            vec![
                "read Tag1",
                "write Tag1 5",
                "subscribe Tag1",
                "unsubscribe Tag1",
                "subscribe_event Alarm",
                "get_type Tag1",
            ]
        );
        assert!(sim.calls().is_empty());
    }

    #[tokio::test]
    async fn unknown_target_error_names_the_target() {
        let opc = Arc::new(RecordingBackend::default());
        let router = router_with(&[("opc", opc)]).await;

        let err = router.read("unknown:Tag1").await.unwrap_err();

        assert_eq!(
            err,
            RelayError::UnroutableId {
                id: "unknown:Tag1".into(),
                target: Some("unknown".into())
            }
        );
        assert!(err.to_string().contains("'unknown'"));
        assert_eq!(err.kind(), ErrorKind::ContractViolation);
    }

    #[tokio::test]
    async fn id_without_prefix_is_rejected_by_every_operation() {
        let opc = Arc::new(RecordingBackend::default());
        let router = router_with(&[("opc", opc.clone())]).await;
        let listener = listener_fn(|_| Ok(()));

        assert!(router.read("Tag1").await.is_err());
        assert!(router.write("Tag1", json!(1)).await.is_err());
        assert!(router.subscribe("Tag1", listener.clone()).await.is_err());
        assert!(router.unsubscribe("Tag1", listener).await.is_err());
        assert!(router.get_type("Tag1").await.is_err());
        assert!(opc.calls().is_empty());
    }

    #[tokio::test]
    async fn registration_rules() {
        let router = Router::new("test");
        let backend: Arc<dyn DataAccess> = Arc::new(RecordingBackend::default());
        let other: Arc<dyn DataAccess> = Arc::new(RecordingBackend::default());

        assert!(matches!(
            router.register("", backend.clone()).await,
            Err(RelayError::InvalidTarget { .. })
        ));
        assert!(matches!(
            router.register("plc:1", backend.clone()).await,
            Err(RelayError::InvalidTarget { .. })
        ));

        router.register("plc1", backend.clone()).await.unwrap();
        assert!(matches!(
            router.register("plc1", other.clone()).await,
            Err(RelayError::TargetAlreadyRegistered { .. })
        ));
        assert!(matches!(
            router.unregister("plc1", &other).await,
            Err(RelayError::BackendMismatch { .. })
        ));
        assert!(matches!(
            router.unregister("plc2", &backend).await,
            Err(RelayError::TargetNotRegistered { .. })
        ));

        router.unregister("plc1", &backend).await.unwrap();
        assert!(router.targets().is_empty());
        assert!(router.read("plc1:X").await.is_err());
    }

    #[tokio::test]
    async fn routers_nest_under_routers() {
        let leaf = Arc::new(RecordingBackend::default());
        let inner = Arc::new(router_with(&[("plc1", leaf.clone())]).await);
        let outer = Router::new("outer");
        outer.register("site", inner).await.unwrap();

        outer.read("site:plc1:TANK.LEVEL").await.unwrap();

        assert_eq!(leaf.calls(), vec!["read TANK.LEVEL"]);
    }
}
