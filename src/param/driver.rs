//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! The driver instance: owns the connection, the parameter table and the
//! supervisor, and serves the host's read and write requests.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use anyhow::Context;
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;

use crate::client::client_types::{AmsAddr, AmsNetId};
use crate::client::{AdsConnection, AdsTransport};
use crate::config::DriverConfig;
use crate::error::ParamError;
use crate::notification::{DispatcherState, NotificationDispatcher};

use super::convert::{commit_value, decode_value, encode_value, set_alarm, ParamNotification, Republisher};
use super::descriptor::{AdsParamInfo, AlarmSeverity, AlarmStatus, ParamType, ParamValue};
use super::drv_info::{AddressSpec, DrvInfo};
use super::port_info::AmsPortInfo;
use super::supervisor::{self, SupervisorControl, SupervisorState};
use super::table::ParamTable;


/// State shared between the host-facing driver, the dispatcher callbacks
/// and the supervisor thread.
pub(crate) struct DriverInner {
    pub config : DriverConfig,
    pub net_id : AmsNetId,
    pub connection : Arc<AdsConnection>,
    /// Never held across a wire request.
    pub table : ReentrantMutex<RefCell<ParamTable>>,
    pub republisher : Republisher,
    /// Serializes refresh passes and teardown.
    pub lifecycle : Mutex<()>,
    pub host_ready : AtomicBool,
    pub supervisor : Mutex<SupervisorState>,
    pub control : SupervisorControl,
    pub shut_down : AtomicBool,
    pub weak_self : Weak<DriverInner>
}

impl DriverInner {

    /// Run `f` with the table locked.
    pub(crate) fn with_table<R>(&self, f : impl FnOnce(&mut ParamTable) -> R) -> R {
        let guard = self.table.lock();
        let mut table = guard.borrow_mut();
        f(&mut table)
    }

    pub(crate) fn is_host_ready(&self) -> bool {
        self.host_ready.load(Ordering::SeqCst)
    }
}


enum ReadPlan {
    Buffered(ParamValue),
    Wire { target : AmsAddr, handle : Option<u32>, group : u32, offset : u32, size : u32 }
}

struct WritePlan {
    target : AmsAddr,
    handle : Option<u32>,
    group : u32,
    offset : u32,
    bytes : Vec<u8>
}


/// Maps host value slots onto PLC variables over ADS.
///
/// Values of input parameters arrive through change notifications and are
/// sent on the channel returned by [`AdsParamDriver::new`]. Output
/// parameters are written on request. A supervisor keeps the connection
/// and the subscriptions alive across PLC restarts and network loss.
pub struct AdsParamDriver {
    inner : Arc<DriverInner>,
    supervisor_thread : Mutex<Option<JoinHandle<()>>>
}

impl AdsParamDriver {

    /// Create a driver and the channel on which committed values are
    /// republished. Nothing is sent on the channel before the host is ready.
    pub fn new(
        config : DriverConfig,
        transport : Arc<dyn AdsTransport>
    ) -> Result<(Self, mpsc::Receiver<ParamNotification>), ParamError> {
        let net_id : AmsNetId = config.target_net_id.parse()?;
        let (tx, rx) = mpsc::channel(config.notification_channel_size.max(1));
        let connection = Arc::new(AdsConnection::new(transport, config.wire_timeout()));
        let table = ParamTable::new(config.param_table_size);

        let inner = Arc::new_cyclic(|weak| DriverInner {
            config,
            net_id,
            connection,
            table : ReentrantMutex::new(RefCell::new(table)),
            republisher : Republisher::new(tx),
            lifecycle : Mutex::new(()),
            host_ready : AtomicBool::new(false),
            supervisor : Mutex::new(SupervisorState::default()),
            control : SupervisorControl::default(),
            shut_down : AtomicBool::new(false),
            weak_self : weak.clone()
        });

        Ok((Self { inner, supervisor_thread : Mutex::new(None) }, rx))
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    pub fn net_id(&self) -> AmsNetId {
        self.inner.net_id
    }

    pub fn connection(&self) -> &Arc<AdsConnection> {
        &self.inner.connection
    }

    /// Add the route, if a target host is configured, and open the local
    /// ADS port.
    pub fn connect(&self) -> Result<(), ParamError> {
        let inner = &self.inner;

        if let Some(host) = inner.config.target_host.as_deref() {
            inner.connection.add_route(&inner.net_id, host)?;
            log::info!("Added route to {} via {}", inner.net_id, host);
        }

        let local_port = inner.connection.open()?;
        {
            let mut state = inner.supervisor.lock();
            state.not_connected = 0;
            state.disconnected = false;
            state.manual_disconnect = false;
        }

        log::info!("Connected to {} on local port {}", inner.net_id, local_port);
        inner.control.kick();
        Ok(())
    }

    /// Release every subscription and close the local port. The supervisor
    /// does not reconnect until [`connect`](Self::connect) is called again.
    pub fn disconnect(&self) -> Result<(), ParamError> {
        let inner = &self.inner;
        {
            let mut state = inner.supervisor.lock();
            state.manual_disconnect = true;
            state.disconnected = true;
        }

        inner.release_all();
        inner.connection.close()?;
        log::info!("Disconnected from {}", inner.net_id);
        Ok(())
    }

    /// Create the parameter for a drvInfo key, or return the index of the
    /// existing one. The first parameter on an ADS port starts that port's
    /// notification dispatcher.
    pub fn create_param(&self, drv_info : &str, param_type : ParamType) -> Result<usize, ParamError> {
        self.create_param_for_record(drv_info, param_type, None)
    }

    pub(crate) fn create_param_for_record(
        &self,
        drv_info : &str,
        param_type : ParamType,
        record : Option<&str>
    ) -> Result<usize, ParamError> {
        let inner = &self.inner;
        let config = &inner.config;
        let parsed : DrvInfo = drv_info.parse()?;
        let ads_port = parsed.ads_port.unwrap_or(config.default_ads_port);

        if parsed.address == AddressSpec::LocalState && param_type != ParamType::Int32 {
            return Err(ParamError::Config(format!("{} needs an Int32 slot, not {}", drv_info.trim(), param_type)));
        }

        inner.with_table(|t| {
            if let Some(index) = t.find(drv_info) {
                let existing = t.get(index)?;
                if existing.param_type != param_type {
                    return Err(ParamError::WrongType {
                        index,
                        actual : existing.param_type.to_string(),
                        requested : param_type.to_string()
                    });
                }
                return Ok(index);
            }

            if t.len() >= t.capacity() {
                return Err(ParamError::TableFull(t.capacity()));
            }

            if t.dispatcher(ads_port).is_none() {
                let target = inner.target(ads_port);
                let dispatcher = NotificationDispatcher::new(target, inner.connection.clone(), config.ring_capacity)
                    .map_err(|err| ParamError::Config(format!("Failed to start notification dispatcher for {}: {}", target, err)))?;
                inner.connection.attach(&target, dispatcher.producer());
                t.add_dispatcher(ads_port, Arc::new(dispatcher));
            }

            let mut param = AdsParamInfo::new(
                t.next_index(),
                drv_info,
                &parsed,
                param_type,
                ads_port,
                parsed.sample_time_ms.unwrap_or(config.default_sample_time_ms),
                parsed.max_delay_ms.unwrap_or(config.default_max_delay_ms),
                parsed.time_base.unwrap_or(config.default_time_base)
            );
            param.record_name = record.map(str::to_string);
            let is_local = param.is_local();

            let index = t.insert(param)?;
            let port = t.ensure_port(ads_port);

            if is_local {
                port.local_state_param = Some(index);
                let state = port.ads_state as i32;
                let p = t.get_mut(index)?;
                commit_value(p, ParamValue::Int32(state), None);
            }

            log::debug!("Created parameter {} '{}' ({}) on ADS port {}", index, drv_info.trim(), param_type, ads_port);
            Ok(index)
        })
    }

    pub fn find_param(&self, drv_info : &str) -> Option<usize> {
        self.inner.with_table(|t| t.find(drv_info))
    }

    pub fn param_count(&self) -> usize {
        self.inner.with_table(|t| t.len())
    }

    /// Snapshot of a parameter.
    pub fn param(&self, index : usize) -> Option<AdsParamInfo> {
        self.inner.with_table(|t| t.get(index).ok().cloned())
    }

    /// Snapshot of an ADS port's state.
    pub fn port_info(&self, ads_port : u16) -> Option<AmsPortInfo> {
        self.inner.with_table(|t| t.port(ads_port).cloned())
    }

    pub fn dispatcher_state(&self, ads_port : u16) -> Option<DispatcherState> {
        self.inner.with_table(|t| t.dispatcher(ads_port)).map(|d| d.state())
    }

    pub fn read_int32(&self, index : usize) -> Result<i32, ParamError> {
        match self.read_value(index, Some(ParamType::Int32))? {
            ParamValue::Int32(v) => Ok(v),
            other => Err(unexpected(index, &other, ParamType::Int32)),
        }
    }

    pub fn read_float64(&self, index : usize) -> Result<f64, ParamError> {
        match self.read_value(index, Some(ParamType::Float64))? {
            ParamValue::Float64(v) => Ok(v),
            other => Err(unexpected(index, &other, ParamType::Float64)),
        }
    }

    /// Read an array parameter. The returned value has the parameter's slot
    /// type.
    pub fn read_array(&self, index : usize) -> Result<ParamValue, ParamError> {
        self.read_value(index, None)
    }

    pub fn write_int32(&self, index : usize, value : i32) -> Result<(), ParamError> {
        self.write_value(index, ParamValue::Int32(value))
    }

    pub fn write_float64(&self, index : usize, value : f64) -> Result<(), ParamError> {
        self.write_value(index, ParamValue::Float64(value))
    }

    /// Write an array parameter. A shorter array than the PLC variable
    /// writes only the leading elements.
    pub fn write_array(&self, index : usize, value : ParamValue) -> Result<(), ParamError> {
        if !value.param_type().map_or(false, |t| t.is_array()) {
            return Err(ParamError::WrongType {
                index,
                actual : "array".to_string(),
                requested : value.param_type().map_or("undefined".to_string(), |t| t.to_string())
            });
        }
        self.write_value(index, value)
    }

    /// Subscribed and local parameters are served from their buffered
    /// value; anything else is read from the PLC.
    fn read_value(&self, index : usize, requested : Option<ParamType>) -> Result<ParamValue, ParamError> {
        let inner = &self.inner;

        let plan = inner.with_table(|t| -> Result<ReadPlan, ParamError> {
            let p = t.get(index)?;

            let type_ok = match requested {
                Some(requested) => p.param_type == requested,
                None => p.param_type.is_array(),
            };
            if !type_ok {
                return Err(ParamError::WrongType {
                    index,
                    actual : p.param_type.to_string(),
                    requested : requested.map_or("array".to_string(), |t| t.to_string())
                });
            }

            if p.is_local() || p.is_subscribed() {
                if !p.value.is_defined() {
                    return Err(ParamError::NotResolved(index));
                }
                return Ok(ReadPlan::Buffered(p.value.clone()));
            }

            if !p.address_valid || p.plc_type.is_none() {
                return Err(ParamError::NotResolved(index));
            }

            Ok(ReadPlan::Wire {
                target : inner.target(p.ads_port),
                handle : p.symbol_handle,
                group : p.group,
                offset : p.offset,
                size : p.plc_size
            })
        })?;

        let (target, handle, group, offset, size) = match plan {
            ReadPlan::Buffered(value) => return Ok(value),
            ReadPlan::Wire { target, handle, group, offset, size } => (target, handle, group, offset, size),
        };

        let mut data = vec![0u8; size as usize];
        let result = match handle {
            Some(handle) => inner.connection.read_by_handle(&target, handle, &mut data),
            None => inner.connection.read(&target, group, offset, &mut data),
        };

        inner.with_table(|t| {
            let publishing = t.publishing;
            let p = t.get_mut(index)?;

            let decoded = result.map_err(ParamError::from).and_then(|_| decode_value(p, &data));
            match decoded {
                Ok(value) => {
                    commit_value(p, value.clone(), None);
                    if publishing {
                        inner.republisher.publish(p);
                    }
                    Ok(value)
                },
                Err(err) => {
                    log::warn!("Read of {} failed: {}", p.address(), err);
                    if set_alarm(p, AlarmStatus::Read, AlarmSeverity::Invalid) && publishing {
                        inner.republisher.publish(p);
                    }
                    Err(err)
                }
            }
        })
    }

    fn write_value(&self, index : usize, value : ParamValue) -> Result<(), ParamError> {
        let inner = &self.inner;

        let plan = inner.with_table(|t| -> Result<WritePlan, ParamError> {
            let publishing = t.publishing;
            let p = t.get_mut(index)?;

            if p.is_local() {
                return Err(ParamError::Config(format!("{} is read-only", p.drv_info)));
            }
            if !p.address_valid || p.plc_type.is_none() {
                return Err(ParamError::NotResolved(index));
            }

            match encode_value(p, &value) {
                Ok(bytes) => Ok(WritePlan {
                    target : inner.target(p.ads_port),
                    handle : p.symbol_handle,
                    group : p.group,
                    offset : p.offset,
                    bytes
                }),
                Err(err) => {
                    // A slot of the wrong type is a configuration error, not a PLC fault.
                    if !matches!(err, ParamError::WrongType { .. })
                        && set_alarm(p, AlarmStatus::Write, AlarmSeverity::Invalid)
                        && publishing {
                        inner.republisher.publish(p);
                    }
                    Err(err)
                }
            }
        })?;

        let result = match plan.handle {
            Some(handle) => inner.connection.write_by_handle(&plan.target, handle, &plan.bytes),
            None => inner.connection.write(&plan.target, plan.group, plan.offset, &plan.bytes),
        };

        inner.with_table(|t| {
            let publishing = t.publishing;
            let p = t.get_mut(index)?;

            if let Err(err) = result {
                log::warn!("Write of {} failed: {}", p.address(), err);
                if set_alarm(p, AlarmStatus::Write, AlarmSeverity::Invalid) && publishing {
                    inner.republisher.publish(p);
                }
                return Err(ParamError::from(err));
            }

            let committed = if p.param_type.is_array() && plan.bytes.len() <= p.buffer.len() {
                p.buffer[..plan.bytes.len()].copy_from_slice(&plan.bytes);
                let data = p.buffer.clone();
                decode_value(p, &data).unwrap_or(value)
            }
            else {
                value
            };

            commit_value(p, committed, None);
            if publishing {
                inner.republisher.publish(p);
            }
            Ok(())
        })
    }

    /// Resolve every parameter that needs it. Returns the number resolved.
    pub fn refresh(&self) -> usize {
        self.inner.refresh(None)
    }

    /// Mark the parameters of a port, or of every port, for refresh.
    pub fn invalidate(&self, ads_port : Option<u16>) -> usize {
        let count = self.inner.invalidate(ads_port);
        self.inner.control.kick();
        count
    }

    /// Run one supervision pass on the calling thread.
    pub fn tick(&self) {
        self.inner.tick();
    }

    /// The host is ready for values. Buffered values are republished on the
    /// next supervision pass, and every commit after that.
    pub fn set_host_ready(&self) {
        self.inner.host_ready.store(true, Ordering::SeqCst);
        self.inner.control.kick();
    }

    pub fn is_host_ready(&self) -> bool {
        self.inner.is_host_ready()
    }

    /// Start the supervisor thread. Does nothing if already running.
    pub fn start_supervisor(&self) -> Result<(), anyhow::Error> {
        let mut slot = self.supervisor_thread.lock();
        if slot.is_some() {
            return Ok(());
        }

        self.inner.control.reset();
        let handle = supervisor::spawn(Arc::downgrade(&self.inner), self.inner.config.poll_period())
            .context("Failed to spawn supervisor thread")?;
        *slot = Some(handle);
        Ok(())
    }

    pub fn stop_supervisor(&self) {
        self.inner.control.stop();
        if let Some(handle) = self.supervisor_thread.lock().take() {
            if handle.join().is_err() {
                log::error!("Supervisor thread panicked.");
            }
        }
    }

    /// Stop the supervisor, release every handle, stop the dispatchers and
    /// close the local port. Idempotent; also run on drop.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.stop_supervisor();
        self.inner.release_all();

        // Joining waits for callbacks that need the table lock.
        let dispatchers = self.inner.with_table(|t| t.take_dispatchers());
        for dispatcher in &dispatchers {
            dispatcher.close();
        }
        drop(dispatchers);

        if let Err(err) = self.inner.connection.close() {
            log::warn!("Failed to close connection: {}", err);
        }
        log::info!("ADS parameter driver for {} shut down.", self.inner.net_id);
    }
}

impl Drop for AdsParamDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}


fn unexpected(index : usize, value : &ParamValue, requested : ParamType) -> ParamError {
    ParamError::WrongType {
        index,
        actual : value.param_type().map_or("undefined".to_string(), |t| t.to_string()),
        requested : requested.to_string()
    }
}
