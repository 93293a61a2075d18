// Copyright © Octopus Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::config::{ConfigSanitizer, Error, ExecutionConfig};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

/// A config kept on disk as YAML. Errors name the file they came from.
pub trait PersistableConfig: Serialize + DeserializeOwned {
    fn load_config<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let contents =
            fs::read_to_string(path).map_err(|error| Error::IO(path.display().to_string(), error))?;
        serde_yaml::from_str(&contents)
            .map_err(|error| Error::Yaml(path.display().to_string(), error))
    }

    fn save_config<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let path = path.as_ref();
        let contents = serde_yaml::to_string(self)
            .map_err(|error| Error::Yaml(path.display().to_string(), error))?;
        fs::write(path, contents).map_err(|error| Error::IO(path.display().to_string(), error))
    }

    /// Parses a config that did not come from a file, e.g. one embedded in a test.
    fn parse_serialized_config(serialized_config: &str) -> Result<Self, Error> {
        serde_yaml::from_str(serialized_config)
            .map_err(|error| Error::Yaml("inline config".to_string(), error))
    }
}

impl PersistableConfig for ExecutionConfig {}

impl ExecutionConfig {
    /// Loads the config from disk and rejects it unless it sanitizes.
    pub fn load_sanitized<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let config = Self::load_config(path)?;
        config.sanitize()?;
        Ok(config)
    }
}
