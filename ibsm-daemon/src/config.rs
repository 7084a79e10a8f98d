//
// Copyright (c) The ibsm Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use ibsm_sm::config::SmConfig;
use ibsm_utils::ib::Guid;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub logging: Logging,
    pub transport: Transport,
    pub sm: SmConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Transport {
    pub backend: TransportBackend,
    // Identity the loopback backend emulates.
    pub node_guid: Guid,
    pub port_guid: Guid,
}

#[derive(Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TransportBackend {
    #[default]
    Loopback,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/ibsmd.toml";

    // Parses the configuration file, terminating with the option-parse
    // exit code when it is malformed.
    pub(crate) fn load(config_file: Option<&str>) -> Config {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => match toml::from_str(&config_str) {
                Ok(config) => config,
                Err(error) => {
                    eprintln!("failed to parse configuration: {}", error);
                    std::process::exit(4);
                }
            },
            Err(_) => {
                eprintln!(
                    "failed to read {}, using default parameters",
                    config_file
                );
                Config::default()
            }
        }
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            logging: Logging::default(),
            transport: Transport::default(),
            sm: SmConfig::default(),
        }
    }
}

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            style: LoggingFmtStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

impl Default for Transport {
    fn default() -> Transport {
        Transport {
            backend: TransportBackend::Loopback,
            node_guid: Guid(0x0002_c902_0000_0001),
            port_guid: Guid(0x0002_c902_0000_0002),
        }
    }
}
