// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

#[cfg(not(unix))]
compile_error!("procvisor supervises processes through unix signals and only builds on unix");

pub mod config;
pub mod daemon;
pub mod error;
pub mod format;
pub mod master;
pub mod preparable;
pub mod process;
pub mod rpc;
pub mod sampler;
pub mod status;
pub mod store;
pub mod watcher;

pub use error::{ErrorKind, Result, SupervisorError};
pub use master::Master;
pub use rpc::{RemoteClient, RemoteMaster};
