// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

// All modules should be declared below
mod config_sanitizer;
mod error;
mod execution_config;
mod persistable_config;

// All public usage statements should be declared below
pub use config_sanitizer::*;
pub use error::*;
pub use execution_config::*;
pub use persistable_config::*;
