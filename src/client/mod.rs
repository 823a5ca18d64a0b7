//
// (C) Copyright 2022-2024 Automated Design Corp. All Rights Reserved.
//

//! Wrappers around the ADS services. `transport` is the seam to the router
//! library; `adsclient` puts a typed, lock-guarded connection on top of it.
//! `sim` provides an in-process target for tests and the demo binary.

pub mod client_types;
pub mod ads_data;
pub mod transport;
pub mod adsclient;
pub mod sim;

pub use client_types::{AdsState, AmsAddr, AmsNetId, DeviceInfo, DeviceState, NotificationAttrib};
pub use ads_data::AdsDataTypeId;
pub use transport::AdsTransport;
pub use adsclient::{AdsConnection, AdsSymbolInfo};
pub use sim::{SimCounters, SimulatedTarget};
