// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::config::Error;

/// A trait for validating a config before it is used.
pub trait ConfigSanitizer {
    /// Get the name of the sanitizer (e.g., for logging and error reporting)
    fn get_sanitizer_name() -> String {
        let config_name = std::any::type_name::<Self>().split("::").last().unwrap_or("");
        format!("{}Sanitizer", config_name)
    }

    /// Validate and process the config. Returns an error if the config is invalid.
    fn sanitize(&self) -> Result<(), Error>;
}
