// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session credentials: the token aggregate, the OIDC client, and the SSO
//! browser round trip.

pub mod access;
pub mod jwt;
pub mod oauth;
pub mod persist;
pub mod sso;
