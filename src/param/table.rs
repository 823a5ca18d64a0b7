//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! The parameter table. Owns every descriptor by index, the per-port state
//! and the per-port notification dispatchers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::ParamError;
use crate::notification::NotificationDispatcher;

use super::descriptor::AdsParamInfo;
use super::port_info::AmsPortInfo;


pub struct ParamTable {
    capacity : usize,
    params : Vec<AdsParamInfo>,
    by_key : HashMap<String, usize>,
    ports : BTreeMap<u16, AmsPortInfo>,
    dispatchers : HashMap<u16, Arc<NotificationDispatcher>>,
    /// Commits are republished. False until the catch-up republish ran.
    pub publishing : bool
}

impl ParamTable {

    pub fn new(capacity : usize) -> Self {
        Self {
            capacity,
            params : Vec::new(),
            by_key : HashMap::new(),
            ports : BTreeMap::new(),
            dispatchers : HashMap::new(),
            publishing : false
        }
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Index the next inserted parameter will get.
    pub fn next_index(&self) -> usize {
        self.params.len()
    }

    pub fn find(&self, drv_info : &str) -> Option<usize> {
        self.by_key.get(drv_info.trim()).copied()
    }

    /// Add a parameter under its drvInfo key.
    pub fn insert(&mut self, mut param : AdsParamInfo) -> Result<usize, ParamError> {
        if self.params.len() >= self.capacity {
            return Err(ParamError::TableFull(self.capacity));
        }

        let index = self.params.len();
        param.index = index;
        self.by_key.insert(param.drv_info.clone(), index);
        self.params.push(param);
        Ok(index)
    }

    pub fn get(&self, index : usize) -> Result<&AdsParamInfo, ParamError> {
        self.params.get(index).ok_or(ParamError::NoSuchParam(index))
    }

    pub fn get_mut(&mut self, index : usize) -> Result<&mut AdsParamInfo, ParamError> {
        self.params.get_mut(index).ok_or(ParamError::NoSuchParam(index))
    }

    pub fn params(&self) -> impl Iterator<Item = &AdsParamInfo> {
        self.params.iter()
    }

    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut AdsParamInfo> {
        self.params.iter_mut()
    }

    pub fn port(&self, ads_port : u16) -> Option<&AmsPortInfo> {
        self.ports.get(&ads_port)
    }

    pub fn port_mut(&mut self, ads_port : u16) -> Option<&mut AmsPortInfo> {
        self.ports.get_mut(&ads_port)
    }

    /// Port state for `ads_port`, created on first reference.
    pub fn ensure_port(&mut self, ads_port : u16) -> &mut AmsPortInfo {
        self.ports.entry(ads_port).or_insert_with(|| AmsPortInfo::new(ads_port))
    }

    pub fn port_numbers(&self) -> Vec<u16> {
        self.ports.keys().copied().collect()
    }

    pub fn ports_mut(&mut self) -> impl Iterator<Item = &mut AmsPortInfo> {
        self.ports.values_mut()
    }

    pub fn dispatcher(&self, ads_port : u16) -> Option<Arc<NotificationDispatcher>> {
        self.dispatchers.get(&ads_port).cloned()
    }

    pub fn add_dispatcher(&mut self, ads_port : u16, dispatcher : Arc<NotificationDispatcher>) {
        self.dispatchers.insert(ads_port, dispatcher);
    }

    /// Remove every dispatcher. The caller drops them outside the table lock.
    pub fn take_dispatchers(&mut self) -> Vec<Arc<NotificationDispatcher>> {
        self.dispatchers.drain().map(|(_, d)| d).collect()
    }
}
