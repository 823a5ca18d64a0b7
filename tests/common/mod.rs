//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use adsparams_rs::{AdsParamDriver, DriverConfig, ParamNotification, SimulatedTarget};

pub const NET_ID : &str = "10.1.2.3.1.1";
pub const PLC_PORT : u16 = 851;
pub const TIMEOUT : Duration = Duration::from_secs(5);


pub fn config() -> DriverConfig {
    DriverConfig {
        target_net_id : NET_ID.to_string(),
        poll_period_ms : 20,
        reconnect_threshold : 3,
        ..DriverConfig::default()
    }
}

pub fn simulated_plc() -> Arc<SimulatedTarget> {
    let sim = Arc::new(SimulatedTarget::new(NET_ID.parse().unwrap()));
    sim.add_port(PLC_PORT);
    sim
}

/// A connected driver on a simulated PLC.
pub fn connected(config : DriverConfig) -> (Arc<SimulatedTarget>, AdsParamDriver, mpsc::Receiver<ParamNotification>) {
    let sim = simulated_plc();
    let (driver, rx) = AdsParamDriver::new(config, sim.clone()).unwrap();
    driver.connect().unwrap();
    (sim, driver, rx)
}

/// Poll until `check` holds or the timeout passes.
pub fn wait_until<F : FnMut() -> bool>(timeout : Duration, mut check : F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Everything currently queued on the republish channel.
pub fn drain(rx : &mut mpsc::Receiver<ParamNotification>) -> Vec<ParamNotification> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

/// Wait for a republished notification matching `pred`.
pub fn wait_for<P : FnMut(&ParamNotification) -> bool>(
    rx : &mut mpsc::Receiver<ParamNotification>,
    timeout : Duration,
    mut pred : P
) -> Option<ParamNotification> {
    let deadline = Instant::now() + timeout;
    loop {
        while let Ok(n) = rx.try_recv() {
            if pred(&n) {
                return Some(n);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(Duration::from_millis(5));
    }
}
