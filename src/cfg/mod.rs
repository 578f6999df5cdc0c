// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Configuration and logging bootstrap.

pub mod config;
pub mod logger;

pub use config::{Limits, ServerConfig};
pub use logger::{init_default_logger, init_logger};
