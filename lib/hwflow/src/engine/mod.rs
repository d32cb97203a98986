// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2025 Oxide Computer Company

//! The offload engine.
//!
//! Requests enter through [`queue::OffloadQueue`]; the single worker
//! thread classifies each flow's actions ([`classify`]), then either
//! composes it against the per-vport tunnel tables ([`aux`],
//! [`offload`]) or programs it directly through the [`netdev`] driver
//! seam.
pub mod aux;
pub mod classify;
pub mod flow;
pub mod ioctl;
pub mod netdev;
pub mod offload;
pub mod queue;
pub mod stats;
