// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! ignis gateway - job submission with admission control and webhook delivery
//!
//! The gateway accepts code-execution jobs over HTTP, publishes them to
//! workers over a message bus, tracks their status, and notifies subscribed
//! callback URLs when a job completes or fails.
//!
//! # Architecture
//!
//! ```text
//!   HTTP clients (users, API keys)
//!              │
//!              ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │  server: global limit → auth → identity limit → handler  │
//! │                 │                                        │
//! │                 ▼                                        │
//! │          AdmissionControl ── Redis (sliding window)      │
//! │                 └────────── local token buckets          │
//! │                                                          │
//! │  jobs::JobService ──publish──► bus ("jobs")              │
//! │        ▲                                                 │
//! │        └──── StatusListener ◄── bus ("job_status.*")     │
//! │        │                                                 │
//! │        ▼ completed / failed                              │
//! │  WebhookDispatcher → DeliveryPool → WebhookSender ──► subscriber URLs
//! │                                         │                │
//! │                     DeliveryRetrySweeper┘                │
//! └──────────────────────────────────────────────────────────┘
//!              │
//!              ▼
//!        Store (PostgreSQL or SQLite)
//! ```
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`rate_limit`] | Admission control and rate-limit key fingerprints |
//! | [`webhooks`] | Signing, dispatch, delivery with retries, deferred retry |
//! | [`jobs`] | Job submission and worker status handling |
//! | [`subscriptions`] | Callback subscription management |
//! | [`api_keys`] | API key issuance and revocation |
//! | [`bus`] | Worker message bus |
//! | [`persistence`] | Record store over PostgreSQL or SQLite |
//! | [`server`] | HTTP router, auth and admission middleware |
//! | [`runtime`] | Task ownership and graceful shutdown |
//!
//! # Configuration
//!
//! See [`config::Config`] for the environment variables read at startup.

#![deny(missing_docs)]

pub mod api_keys;
pub mod bus;
pub mod config;
pub mod error;
pub mod jobs;
pub mod models;
pub mod persistence;
pub mod rate_limit;
pub mod runtime;
pub mod server;
pub mod subscriptions;
pub mod webhooks;

pub use error::{Error, Result};
