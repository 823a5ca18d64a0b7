//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Per ADS port connection state, as tracked by the supervisor.

use crate::client::client_types::{AdsState, DeviceInfo};


#[derive(Debug, Clone)]
pub struct AmsPortInfo {
    pub ads_port : u16,
    pub ads_state : AdsState,
    pub previous_ads_state : AdsState,
    pub reachable : bool,
    pub previous_reachable : bool,
    /// Reachable and running. Parameters are only resolved while true.
    pub params_ok : bool,
    /// The symbol version subscription must be (re)registered.
    pub refresh_needed : bool,
    pub device_info : Option<DeviceInfo>,
    /// Index of the local-state parameter exposing this port's state.
    pub local_state_param : Option<usize>,
    /// Symbol version last reported by the PLC.
    pub symbol_version : Option<u8>,
    pub version_notification : Option<u32>,
    pub stale_version_notifications : Vec<u32>
}

impl AmsPortInfo {

    pub fn new(ads_port : u16) -> Self {
        Self {
            ads_port,
            ads_state : AdsState::Invalid,
            previous_ads_state : AdsState::Invalid,
            reachable : false,
            previous_reachable : false,
            params_ok : false,
            refresh_needed : true,
            device_info : None,
            local_state_param : None,
            symbol_version : None,
            version_notification : None,
            stale_version_notifications : Vec::new()
        }
    }

    pub fn matches_port(&self, filter : Option<u16>) -> bool {
        filter.map_or(true, |port| port == self.ads_port)
    }

    /// Record a new observation. Returns (was_reachable, was_params_ok).
    pub fn observe(&mut self, reachable : bool, ads_state : AdsState) -> (bool, bool) {
        let was_reachable = self.reachable;
        let was_params_ok = self.params_ok;

        self.previous_reachable = self.reachable;
        self.previous_ads_state = self.ads_state;
        self.reachable = reachable;
        self.ads_state = if reachable { ads_state } else { AdsState::Invalid };
        self.params_ok = reachable && ads_state == AdsState::Run;

        (was_reachable, was_params_ok)
    }

    /// Mark the symbol version subscription for re-registration.
    pub fn invalidate(&mut self) {
        if let Some(handle) = self.version_notification.take() {
            self.stale_version_notifications.push(handle);
        }
        self.refresh_needed = true;
    }
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_ok_needs_run() {
        let mut port = AmsPortInfo::new(851);
        assert_eq!(port.observe(true, AdsState::Stop), (false, false));
        assert!(port.reachable);
        assert!(!port.params_ok);

        assert_eq!(port.observe(true, AdsState::Run), (true, false));
        assert!(port.params_ok);

        assert_eq!(port.observe(false, AdsState::Run), (true, true));
        assert!(!port.params_ok);
        assert_eq!(port.ads_state, AdsState::Invalid);
        assert_eq!(port.previous_ads_state, AdsState::Run);
    }

    #[test]
    fn invalidate_keeps_stale_handle() {
        let mut port = AmsPortInfo::new(851);
        port.version_notification = Some(12);
        port.refresh_needed = false;
        port.invalidate();
        assert!(port.refresh_needed);
        assert_eq!(port.stale_version_notifications, vec![12]);
    }
}
