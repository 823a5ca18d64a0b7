//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Resolving parameters against the PLC, and taking them back down.
//!
//! Wire requests are never issued while the parameter table is locked; the
//! table lock only guards reading a snapshot and committing the result. A
//! resolve that races with an invalidation notices it through the
//! descriptor's generation and does not commit.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, bail, Context};

use crate::client::ads_data::{AdsDataTypeId, AdsTypeInfo};
use crate::client::client_types::{AmsAddr, NotificationAttrib, ADSIGRP_SYM_VERSION};
use crate::error::ParamError;
use crate::notification::{Notification, NotificationDispatcher};

use super::convert::{commit_value, decode_value, set_alarm};
use super::descriptor::{AlarmSeverity, AlarmStatus, ParamType};
use super::driver::DriverInner;


/// What a resolve needs from the descriptor, copied out under the lock.
struct ResolveSnapshot {
    ads_port : u16,
    address : String,
    symbol_name : Option<String>,
    is_address_command : bool,
    group : u32,
    offset : u32,
    plc_size : u32,
    plc_type : Option<AdsDataTypeId>,
    param_type : ParamType,
    is_input : bool,
    sample_time_ms : f64,
    max_delay_ms : f64,
    generation : u64,
    stale_notifications : Vec<u32>,
    stale_symbol_handles : Vec<u32>
}

/// Handles obtained by a resolve in progress. On failure they become stale.
#[derive(Default)]
struct Acquired {
    symbol_handle : Option<u32>,
    notification : Option<u32>
}

struct Location {
    group : u32,
    offset : u32,
    size : u32,
    info : &'static AdsTypeInfo
}


impl DriverInner {

    pub(crate) fn target(&self, ads_port : u16) -> AmsAddr {
        AmsAddr::new(self.net_id, ads_port)
    }

    fn dispatcher_for(&self, ads_port : u16) -> anyhow::Result<Arc<NotificationDispatcher>> {
        self.with_table(|t| t.dispatcher(ads_port))
            .ok_or_else(|| anyhow!("No notification dispatcher for ADS port {}", ads_port))
    }

    /// Mark parameters, and the symbol version subscription of their ports,
    /// for refresh.
    pub(crate) fn invalidate(&self, filter : Option<u16>) -> usize {
        let count = self.invalidate_params(filter);
        self.with_table(|t| {
            for port in t.ports_mut().filter(|p| p.matches_port(filter)) {
                port.invalidate();
            }
        });
        count
    }

    /// Mark parameters for refresh. Existing subscriptions are left in place
    /// until the next resolve replaces them.
    pub(crate) fn invalidate_params(&self, filter : Option<u16>) -> usize {
        self.with_table(|t| {
            let mut count = 0;
            for param in t.params_mut().filter(|p| p.matches_port(filter) && !p.is_local()) {
                param.invalidate();
                count += 1;
            }
            log::debug!("Invalidated {} parameters on port {:?}", count, filter);
            count
        })
    }

    /// Resolve every parameter that needs it, then (re)subscribe the symbol
    /// version of ports that need it. Returns the number of parameters
    /// resolved.
    pub(crate) fn refresh(&self, filter : Option<u16>) -> usize {
        let _serial = self.lifecycle.lock();
        if self.shut_down.load(Ordering::SeqCst) {
            return 0;
        }

        let pending : Vec<usize> = self.with_table(|t| {
            t.params()
                .filter(|p| p.matches_port(filter) && p.refresh_needed && !p.is_local())
                .map(|p| p.index)
                .collect()
        });

        let mut resolved = 0;
        for index in pending {
            match self.resolve(index) {
                Ok(()) => resolved += 1,
                Err(err) => log::warn!("Failed to resolve parameter {}: {:#}", index, err),
            }
        }

        let ports : Vec<u16> = self.with_table(|t| {
            t.port_numbers().into_iter()
                .filter(|p| filter.map_or(true, |f| f == *p))
                .filter(|p| t.port(*p).map_or(false, |info| info.refresh_needed))
                .collect()
        });

        for ads_port in ports {
            if let Err(err) = self.subscribe_symbol_version(ads_port) {
                log::warn!("Failed to subscribe symbol version of port {}: {:#}", ads_port, err);
            }
        }

        if resolved > 0 {
            log::info!("Resolved {} parameters", resolved);
        }
        resolved
    }

    /// Resolve one parameter: locate it, acquire its handles, subscribe it
    /// and seed its value with a read. On failure the parameter keeps
    /// `refresh_needed` and any handle acquired here is released on the
    /// next attempt.
    pub(crate) fn resolve(&self, index : usize) -> anyhow::Result<()> {
        let snap = self.with_table(|t| -> Result<ResolveSnapshot, ParamError> {
            let p = t.get_mut(index)?;
            Ok(ResolveSnapshot {
                ads_port : p.ads_port,
                address : p.address(),
                symbol_name : p.symbol_name.clone(),
                is_address_command : p.is_address_command,
                group : p.group,
                offset : p.offset,
                plc_size : p.plc_size,
                plc_type : p.plc_type,
                param_type : p.param_type,
                is_input : p.is_input(),
                sample_time_ms : p.sample_time_ms,
                max_delay_ms : p.max_delay_ms,
                generation : p.generation,
                stale_notifications : std::mem::take(&mut p.stale_notifications),
                stale_symbol_handles : std::mem::take(&mut p.stale_symbol_handles)
            })
        })?;

        let target = self.target(snap.ads_port);
        let dispatcher = self.dispatcher_for(snap.ads_port)?;

        // The previous handles may already be gone after a reconnect.
        for handle in &snap.stale_notifications {
            if let Err(err) = dispatcher.remove_subscription(*handle, self.config.drain_timeout()) {
                log::debug!("Ignoring error deleting notification {} of {}: {}", handle, snap.address, err);
            }
        }
        for handle in &snap.stale_symbol_handles {
            if let Err(err) = self.connection.release_handle(&target, *handle) {
                log::debug!("Ignoring error releasing handle {} of {}: {}", handle, snap.address, err);
            }
        }

        let mut acquired = Acquired::default();
        let result = self.acquire_and_commit(index, &snap, &target, &dispatcher, &mut acquired);

        if result.is_err() {
            self.with_table(|t| {
                if let Ok(p) = t.get_mut(index) {
                    p.pending_notification = None;
                    p.pending_sample = None;
                    p.stale_notifications.extend(acquired.notification.take());
                    p.stale_symbol_handles.extend(acquired.symbol_handle.take());
                    p.refresh_needed = true;
                }
            });
        }

        result
    }

    fn locate(&self, snap : &ResolveSnapshot, target : &AmsAddr) -> anyhow::Result<Location> {
        let (group, offset, size, info) = if snap.is_address_command {
            let id = snap.plc_type.ok_or_else(|| anyhow!("{} has no data type", snap.address))?;
            (snap.group, snap.offset, snap.plc_size, AdsTypeInfo::for_id(id))
        }
        else {
            let name = snap.symbol_name.as_deref().ok_or_else(|| anyhow!("Parameter has no symbol name"))?;
            let symbol = self.connection.get_symbol_info(target, name)
                .with_context(|| format!("Symbol {} not found on {}", name, target))?;
            (symbol.group_index, symbol.index_offset, symbol.size, AdsTypeInfo::lookup(symbol.type_id))
        };

        let info = info.ok_or_else(|| anyhow!("{} has an unsupported data type", snap.address))?;
        if size == 0 {
            bail!("{} has size 0", snap.address);
        }

        Ok(Location { group, offset, size, info })
    }

    fn acquire_and_commit(
        &self,
        index : usize,
        snap : &ResolveSnapshot,
        target : &AmsAddr,
        dispatcher : &NotificationDispatcher,
        acquired : &mut Acquired
    ) -> anyhow::Result<()> {
        let location = self.locate(snap, target)?;

        if let Some(name) = snap.symbol_name.as_deref() {
            let handle = self.connection.get_handle_by_name(target, name)
                .with_context(|| format!("Failed to get handle of {}", name))?;
            acquired.symbol_handle = Some(handle);
        }

        if snap.is_input {
            let attrib = NotificationAttrib::on_change(location.size, snap.sample_time_ms, snap.max_delay_ms);
            let handle = self.connection.add_device_notification(target, location.group, location.offset, &attrib)
                .with_context(|| format!("Failed to add notification for {}", snap.address))?;
            acquired.notification = Some(handle);

            // Samples delivered before the commit are held, not dropped.
            self.with_table(|t| -> anyhow::Result<()> {
                let p = t.get_mut(index)?;
                if p.generation != snap.generation {
                    bail!("{} was invalidated while resolving", snap.address);
                }
                p.pending_notification = Some(handle);
                p.pending_sample = None;
                Ok(())
            })?;

            let weak = self.weak_self.clone();
            let notification = Notification::new(location.size, move |handle, timestamp, data| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_sample(index, handle, timestamp, data);
                }
            });

            if !dispatcher.add_subscription(handle, notification) {
                bail!("Notification dispatcher for {} is not running", target);
            }
        }

        let mut data = vec![0u8; location.size as usize];
        let seeded = match acquired.symbol_handle {
            Some(handle) => self.connection.read_by_handle(target, handle, &mut data),
            None => self.connection.read(target, location.group, location.offset, &mut data),
        };
        seeded.with_context(|| format!("Failed to read initial value of {}", snap.address))?;

        self.with_table(|t| -> anyhow::Result<()> {
            let publishing = t.publishing;
            let p = t.get_mut(index)?;

            if p.generation != snap.generation {
                bail!("{} was invalidated while resolving", snap.address);
            }

            if p.plc_size != location.size && p.address_valid {
                log::info!("{}: size changed from {} to {} bytes", snap.address, p.plc_size, location.size);
            }
            p.group = location.group;
            p.offset = location.offset;
            p.plc_size = location.size;
            p.plc_type = Some(location.info.id);
            p.plc_type_name = location.info.name.to_string();
            p.plc_is_array = location.info.is_array(location.size as usize);
            if p.plc_is_array || snap.param_type.is_array() {
                p.resize_buffer(location.size);
            }
            p.address_valid = true;
            p.symbol_handle = acquired.symbol_handle.take();
            p.notification = acquired.notification.take();
            p.pending_notification = None;
            p.refresh_needed = false;
            let held = p.pending_sample.take();

            match decode_value(p, &data) {
                Ok(value) => commit_value(p, value, None),
                Err(err) => {
                    log::warn!("{}: {}", snap.address, err);
                    set_alarm(p, AlarmStatus::Read, AlarmSeverity::Invalid);
                }
            }

            // The held sample follows the seed read in stream order.
            if let Some((timestamp, sample)) = held {
                match decode_value(p, &sample) {
                    Ok(value) => commit_value(p, value, Some(timestamp)),
                    Err(err) => log::debug!("{}: dropping sample held during resolve: {}", snap.address, err),
                }
            }

            if publishing {
                self.republisher.publish(p);
            }
            Ok(())
        })?;

        log::debug!("Resolved {} at {:#x}:{:#x} ({} bytes)", snap.address, location.group, location.offset, location.size);
        Ok(())
    }

    /// Subscribe to the symbol version of a port. The version is read first,
    /// so the subscription's initial sample is only a change if the PLC
    /// reloaded in between.
    fn subscribe_symbol_version(&self, ads_port : u16) -> anyhow::Result<()> {
        let target = self.target(ads_port);
        let dispatcher = self.dispatcher_for(ads_port)?;

        let stale = self.with_table(|t| {
            t.port_mut(ads_port)
                .map(|port| std::mem::take(&mut port.stale_version_notifications))
                .unwrap_or_default()
        });
        for handle in stale {
            if let Err(err) = dispatcher.remove_subscription(handle, self.config.drain_timeout()) {
                log::debug!("Ignoring error deleting symbol version notification {}: {}", handle, err);
            }
        }

        let mut version = [0u8; 1];
        let current = self.connection.read(&target, ADSIGRP_SYM_VERSION, 0, &mut version).ok().map(|_| version[0]);

        let attrib = NotificationAttrib::on_change(1, 0.0, 0.0);
        let handle = self.connection.add_device_notification(&target, ADSIGRP_SYM_VERSION, 0, &attrib)
            .context("Failed to add symbol version notification")?;

        self.with_table(|t| {
            let port = t.ensure_port(ads_port);
            port.symbol_version = current;
            port.version_notification = Some(handle);
            port.refresh_needed = false;
        });

        let weak = self.weak_self.clone();
        let notification = Notification::new(1, move |handle, _timestamp, data| {
            if let Some(inner) = weak.upgrade() {
                inner.on_symbol_version(ads_port, handle, data);
            }
        });

        if !dispatcher.add_subscription(handle, notification) {
            self.with_table(|t| t.ensure_port(ads_port).invalidate());
            bail!("Notification dispatcher for {} is not running", target);
        }

        log::debug!("Subscribed symbol version of {} (version {:?})", target, current);
        Ok(())
    }

    /// Sample callback of a parameter subscription. Runs on the dispatcher thread.
    pub(crate) fn on_sample(&self, index : usize, handle : u32, timestamp : u64, data : &[u8]) {
        let resync = self.with_table(|t| {
            let publishing = t.publishing;
            let Ok(p) = t.get_mut(index) else { return false };

            if p.pending_notification == Some(handle) {
                p.pending_sample = Some((timestamp, data.to_vec()));
                return false;
            }

            // Late sample of a subscription that has been replaced.
            if p.notification != Some(handle) {
                log::trace!("Ignoring sample of stale notification {} for {}", handle, p.address());
                return false;
            }

            let mut resync = false;
            match decode_value(p, data) {
                Ok(value) => commit_value(p, value, Some(timestamp)),
                Err(err) => {
                    log::warn!("{}: {}", p.address(), err);
                    if matches!(err, ParamError::SizeMismatch { .. }) {
                        p.invalidate();
                        resync = true;
                    }
                    if !set_alarm(p, AlarmStatus::Read, AlarmSeverity::Invalid) {
                        return resync;
                    }
                }
            }

            if publishing {
                self.republisher.publish(p);
            }
            resync
        });

        if resync {
            if let Ok(ads_port) = self.with_table(|t| t.get(index).map(|p| p.ads_port)) {
                self.request_refresh(ads_port);
            }
        }
    }

    /// Symbol version callback. A changed version means the PLC program was
    /// reloaded: every parameter on the port is re-resolved.
    pub(crate) fn on_symbol_version(&self, ads_port : u16, handle : u32, data : &[u8]) {
        let Some(&version) = data.first() else { return };

        let changed = self.with_table(|t| {
            let Some(port) = t.port_mut(ads_port) else { return false };
            if port.version_notification != Some(handle) {
                return false;
            }

            match port.symbol_version {
                Some(known) if known == version => false,
                None => {
                    port.symbol_version = Some(version);
                    false
                },
                Some(known) => {
                    log::info!("Symbol version of port {} changed from {} to {}", ads_port, known, version);
                    port.symbol_version = Some(version);
                    true
                }
            }
        });

        if changed {
            self.invalidate_params(Some(ads_port));
            self.request_refresh(ads_port);
        }
    }

    /// Re-resolve a port on a thread of its own. Dispatcher callbacks use
    /// this, since they must not issue wire requests. Does not wait for the
    /// host or the supervisor.
    pub(crate) fn request_refresh(&self, ads_port : u16) {
        self.control.kick();
        if self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let weak = self.weak_self.clone();
        let spawned = thread::Builder::new()
            .name(format!("ads-refresh-{}", ads_port))
            .spawn(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.refresh(Some(ads_port));
                }
            });

        if let Err(err) = spawned {
            log::warn!("Failed to start refresh of ADS port {}: {}", ads_port, err);
        }
    }

    /// Release every handle and subscription. Parameters end up needing
    /// refresh.
    pub(crate) fn release_all(&self) {
        let _serial = self.lifecycle.lock();

        let (notifications, handles) = self.with_table(|t| {
            let mut notifications = Vec::new();
            let mut handles = Vec::new();

            for p in t.params_mut().filter(|p| !p.is_local()) {
                let ads_port = p.ads_port;
                p.invalidate();
                notifications.extend(p.stale_notifications.drain(..).map(|h| (ads_port, h)));
                handles.extend(p.stale_symbol_handles.drain(..).map(|h| (ads_port, h)));
            }
            for port in t.ports_mut() {
                let ads_port = port.ads_port;
                port.invalidate();
                notifications.extend(port.stale_version_notifications.drain(..).map(|h| (ads_port, h)));
            }
            (notifications, handles)
        });

        for (ads_port, handle) in notifications {
            if let Ok(dispatcher) = self.dispatcher_for(ads_port) {
                if let Err(err) = dispatcher.remove_subscription(handle, self.config.drain_timeout()) {
                    log::debug!("Ignoring error deleting notification {}: {}", handle, err);
                }
            }
        }
        for (ads_port, handle) in handles {
            if let Err(err) = self.connection.release_handle(&self.target(ads_port), handle) {
                log::debug!("Ignoring error releasing handle {}: {}", handle, err);
            }
        }
    }
}
