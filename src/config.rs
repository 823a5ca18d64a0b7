//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Driver configuration. Every field has a default, so a configuration file
//! only needs to name what differs.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::client::client_types::AMSPORT_R0_PLC_TC3;
use crate::notification::DEFAULT_RING_CAPACITY;
use crate::param::TimeBase;


#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Name of the driver port. Record links naming another port are ignored.
    pub port_name : String,
    /// AMS Net ID of the controller, e.g. "192.168.1.10.1.1".
    pub target_net_id : String,
    /// Host name or IP of the controller. When set, a route is added on connect.
    pub target_host : Option<String>,
    /// ADS port used when a drvInfo key does not name one.
    pub default_ads_port : u16,
    pub param_table_size : usize,
    pub default_sample_time_ms : f64,
    pub default_max_delay_ms : f64,
    pub default_time_base : TimeBase,
    pub poll_period_ms : u64,
    /// Supervisor ticks without any reachable port before a reconnect is tried.
    pub reconnect_threshold : u32,
    pub wire_timeout_ms : u64,
    pub drain_timeout_ms : u64,
    /// Capacity in bytes of each per-port notification ring.
    pub ring_capacity : usize,
    pub notification_channel_size : usize
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            port_name : "ADS_1".to_string(),
            target_net_id : "127.0.0.1.1.1".to_string(),
            target_host : None,
            default_ads_port : AMSPORT_R0_PLC_TC3,
            param_table_size : 1000,
            default_sample_time_ms : 50.0,
            default_max_delay_ms : 100.0,
            default_time_base : TimeBase::Epics,
            poll_period_ms : 500,
            reconnect_threshold : 5,
            wire_timeout_ms : 1000,
            drain_timeout_ms : 500,
            ring_capacity : DEFAULT_RING_CAPACITY,
            notification_channel_size : 1000
        }
    }
}

impl DriverConfig {

    pub fn from_json_str(json : &str) -> Result<Self, anyhow::Error> {
        let config : DriverConfig = serde_json::from_str(json).context("Invalid driver configuration")?;
        Ok(config)
    }

    pub fn from_json_file<P : AsRef<Path>>(path : P) -> Result<Self, anyhow::Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("In configuration file {}", path.display()))
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_millis(self.poll_period_ms)
    }

    pub fn wire_timeout(&self) -> Duration {
        Duration::from_millis(self.wire_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
