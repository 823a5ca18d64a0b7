//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Connection supervision. Each tick observes every port, raises alarms on
//! lost ports, drives the reconnect policy and re-resolves what needs it.

use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::client::client_types::AdsState;

use super::convert::{commit_value, set_alarm};
use super::descriptor::{AlarmSeverity, AlarmStatus, ParamValue};
use super::driver::DriverInner;


/// Upper bound of the not-connected counter.
pub const NOT_CONNECTED_LIMIT : u32 = 100;


/// Reconnect bookkeeping.
#[derive(Debug, Default)]
pub(crate) struct SupervisorState {
    /// Consecutive ticks with no reachable port.
    pub not_connected : u32,
    /// The local ADS port was closed by the supervisor.
    pub disconnected : bool,
    /// The host disconnected. No automatic reconnect.
    pub manual_disconnect : bool
}


#[derive(Debug, Default)]
struct ControlFlags {
    kick : bool,
    stop : bool
}

/// Wakes the supervisor thread early, or stops it.
#[derive(Debug, Default)]
pub(crate) struct SupervisorControl {
    flags : Mutex<ControlFlags>,
    cond : Condvar
}

impl SupervisorControl {

    /// Request a tick as soon as possible.
    pub fn kick(&self) {
        self.flags.lock().kick = true;
        self.cond.notify_all();
    }

    pub fn stop(&self) {
        self.flags.lock().stop = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.flags.lock() = ControlFlags::default();
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.lock().stop
    }

    /// Wait for the period to elapse or a kick. Returns true if stopped.
    pub fn wait(&self, period : Duration) -> bool {
        let mut flags = self.flags.lock();
        let _ = self.cond.wait_while_for(&mut flags, |f| !f.kick && !f.stop, period);
        flags.kick = false;
        flags.stop
    }
}


/// Start the supervisor thread. It holds only a weak reference, so it ends
/// on its own once the driver is gone.
pub(crate) fn spawn(inner : Weak<DriverInner>, period : Duration) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("ads-supervisor".to_string())
        .spawn(move || {
            log::info!("Connection supervisor started.");
            loop {
                let Some(driver) = inner.upgrade() else { break };
                if driver.control.is_stopped() {
                    break;
                }

                driver.tick();

                if driver.control.wait(period) {
                    break;
                }
            }
            log::info!("Connection supervisor stopped.");
        })
}


impl DriverInner {

    /// One supervision pass.
    pub(crate) fn tick(&self) {
        if !self.is_host_ready() {
            return;
        }

        self.catch_up_republish();

        let ports = self.with_table(|t| t.port_numbers());
        let mut any_reachable = false;
        for ads_port in &ports {
            any_reachable |= self.observe_port(*ads_port);
        }

        // With no port configured there is nothing to lose.
        if !ports.is_empty() {
            self.apply_reconnect_policy(any_reachable);
        }

        let ready : Vec<u16> = self.with_table(|t| {
            t.port_numbers().into_iter()
                .filter(|p| t.port(*p).map_or(false, |info| info.params_ok))
                .collect()
        });
        for ads_port in ready {
            self.refresh(Some(ads_port));
        }
    }

    /// Republish every value buffered before the host became ready. Runs
    /// once; afterwards commits are republished as they happen.
    pub(crate) fn catch_up_republish(&self) {
        self.with_table(|t| {
            if t.publishing {
                return;
            }
            t.publishing = true;

            let mut count = 0;
            for p in t.params().filter(|p| p.value.is_defined()) {
                self.republisher.publish(p);
                count += 1;
            }
            log::info!("Host ready, republished {} buffered values", count);
        });
    }

    /// Read the state of one port and act on transitions. Returns true if
    /// the port is reachable.
    fn observe_port(&self, ads_port : u16) -> bool {
        let target = self.target(ads_port);

        let (reachable, ads_state) = match self.connection.read_state(&target) {
            Ok(state) => (true, state.ads_state),
            Err(err) => {
                log::trace!("read state of {} failed: {}", target, err);
                (false, AdsState::Invalid)
            }
        };

        let (was_reachable, was_params_ok, params_ok) = self.with_table(|t| {
            let port = t.ensure_port(ads_port);
            let (was_reachable, was_params_ok) = port.observe(reachable, ads_state);
            (was_reachable, was_params_ok, port.params_ok)
        });

        if was_reachable && !reachable {
            log::warn!("Lost connection to {}", target);
        }
        else if !was_reachable && reachable {
            log::info!("Connected to {} ({})", target, ads_state);
            match self.connection.read_device_info(&target) {
                Ok(info) => {
                    log::info!("{}: {} v{}.{}.{}", target, info.name, info.version.version, info.version.revision, info.version.build);
                    self.with_table(|t| t.ensure_port(ads_port).device_info = Some(info));
                },
                Err(err) => log::warn!("Failed to read device info of {}: {}", target, err),
            }
        }

        if was_params_ok && !params_ok {
            log::info!("{} left run state ({}), invalidating parameters", target, ads_state);
            self.invalidate(Some(ads_port));
        }

        if was_reachable && !reachable {
            self.raise_port_alarm(ads_port, AlarmStatus::Comm, AlarmSeverity::Invalid);
        }

        self.update_local_state(ads_port);
        reachable
    }

    fn raise_port_alarm(&self, ads_port : u16, status : AlarmStatus, severity : AlarmSeverity) {
        self.with_table(|t| {
            let publishing = t.publishing;
            for p in t.params_mut().filter(|p| p.ads_port == ads_port && !p.is_local()) {
                if set_alarm(p, status, severity) && publishing {
                    self.republisher.publish(p);
                }
            }
        });
    }

    /// Mirror the port's ADS state into its local-state parameter.
    fn update_local_state(&self, ads_port : u16) {
        self.with_table(|t| {
            let publishing = t.publishing;
            let Some((index, state)) = t.port(ads_port)
                .and_then(|port| port.local_state_param.map(|index| (index, port.ads_state as i32)))
            else {
                return;
            };

            if let Ok(p) = t.get_mut(index) {
                let value = ParamValue::Int32(state);
                if p.value != value {
                    commit_value(p, value, None);
                    if publishing {
                        self.republisher.publish(p);
                    }
                }
            }
        });
    }

    /// Close the local port when nothing is reachable, and reopen it once the
    /// counter passes the reconnect threshold.
    fn apply_reconnect_policy(&self, any_reachable : bool) {
        let mut state = self.supervisor.lock();

        if any_reachable {
            if state.not_connected > 0 {
                log::debug!("Target reachable after {} ticks", state.not_connected);
            }
            state.not_connected = 0;
            return;
        }

        state.not_connected = (state.not_connected + 1).min(NOT_CONNECTED_LIMIT);

        if state.not_connected == 1 && !state.disconnected {
            log::info!("No ADS port reachable, closing connection to {}", self.net_id);
            if let Err(err) = self.connection.close() {
                log::warn!("Failed to close connection: {}", err);
            }
            state.disconnected = true;
            return;
        }

        if state.disconnected && !state.manual_disconnect && state.not_connected > self.config.reconnect_threshold {
            log::info!("Reconnecting to {}", self.net_id);
            match self.connection.open() {
                Ok(local_port) => {
                    log::info!("Reconnected on local port {}", local_port);
                    state.disconnected = false;
                },
                Err(err) => log::warn!("Reconnect failed: {}", err),
            }
        }
    }
}
