//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Bridges host value slots to the variables of a TwinCAT PLC over ADS.
//!
//! Each parameter is created from a drvInfo key naming a PLC symbol (or an
//! absolute address), resolved into ADS addressing and, for inputs,
//! subscribed for change notifications. Notifications arrive on a
//! per-port ring buffer and are dispatched on a dedicated thread. A
//! supervisor re-resolves everything after PLC restarts, symbol reloads
//! and connection loss.
//!
//! ```no_run
//! use std::sync::Arc;
//! use adsparams_rs::{AdsParamDriver, DriverConfig, ParamType, SimulatedTarget};
//!
//! let sim = Arc::new(SimulatedTarget::new("127.0.0.1.1.1".parse().unwrap()));
//! let (driver, _rx) = AdsParamDriver::new(DriverConfig::default(), sim).unwrap();
//! driver.connect().unwrap();
//! let _index = driver.create_param("MAIN.nCounter?", ParamType::Int32).unwrap();
//! driver.set_host_ready();
//! driver.start_supervisor().unwrap();
//! ```

pub mod client;
pub mod notification;
pub mod param;
pub mod config;
pub mod error;

pub use client::{AdsConnection, AdsTransport, AmsAddr, AmsNetId, SimulatedTarget};
pub use config::DriverConfig;
pub use error::{AdsError, ParamError};
pub use param::{AdsParamDriver, Alarm, AlarmSeverity, AlarmStatus, ParamNotification, ParamType, ParamValue, TimeBase};
