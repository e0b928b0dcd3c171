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

use relay_test_utils::{init_logging, RecordingUpstream};
use std::sync::{Arc, Mutex};
use tag_relay::{ListenerError, OperationalStateListener, RelayError};

fn recorder() -> (Arc<dyn OperationalStateListener>, Arc<Mutex<Vec<bool>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn OperationalStateListener> =
        Arc::new(move |operational: bool| -> Result<(), ListenerError> {
            sink.lock().unwrap().push(operational);
            Ok(())
        });
    (listener, seen)
}

#[test]
fn connection_owner_drives_a_single_watcher() {
    init_logging();
    let plc = RecordingUpstream::new("plc1");
    let gate = plc.gate();
    let (watcher, seen) = recorder();
    let (second, _) = recorder();

    gate.subscribe_operational_state(watcher.clone()).unwrap();
    assert!(matches!(
        gate.subscribe_operational_state(second.clone()),
        Err(RelayError::OperationalListenerAttached { .. })
    ));

    gate.set_operational(true);
    gate.set_operational(true);
    gate.set_operational(false);
    assert_eq!(*seen.lock().unwrap(), vec![true, false]);

    assert!(matches!(
        gate.unsubscribe_operational_state(&second),
        Err(RelayError::OperationalListenerMismatch { .. })
    ));
    gate.unsubscribe_operational_state(&watcher).unwrap();
    gate.subscribe_operational_state(second).unwrap();
}

#[test]
fn failing_watcher_does_not_block_state_changes() {
    let plc = RecordingUpstream::new("plc1");
    let gate = plc.gate();
    let watcher: Arc<dyn OperationalStateListener> =
        Arc::new(|_: bool| -> Result<(), ListenerError> { panic!("watcher crashed") });
    gate.subscribe_operational_state(watcher).unwrap();

    gate.set_operational(true);

    assert!(gate.is_operational());
    assert_eq!(gate.name(), "plc1");
}
