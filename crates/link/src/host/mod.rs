// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Interfaces to the host application: cluster registry and notifications.

pub mod notify;
pub mod registry;
