// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the neasmart-gateway project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Best-effort mirroring of zone writes onto the physical secondary device

mod client;
mod queue;

pub use client::{
    WriteThroughClient, WriteThroughError, WriteThroughOptions, WriteThroughStatus,
};
pub use queue::{WriteRequest, WriteThroughQueue, WriteThroughWorker};
