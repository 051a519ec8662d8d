// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

const ENV_NAME_ENVIRONMENT: &str = "SRV_ENVIRONMENT";
const ENV_NAME_CLUSTER: &str = "SRV_CLUSTER";
const ENV_NAME_TIMEZONE: &str = "SRV_TIMEZONE";

/// Deployment environment of the running service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Environment {
    Local,
    Development,
    Test,
    Product,
}

impl Environment {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "local" => Environment::Local,
            "dev" => Environment::Development,
            "test" => Environment::Test,
            "pro" => Environment::Product,
            other => bail!("unknown running environment: {other:?}"),
        })
    }
}

/// Environment data resolved from process variables at startup.
#[derive(Debug, Clone)]
pub struct RuntimeEnv {
    pub environment: Environment,
    pub cluster: String,
    /// IANA location name; empty means the process default.
    pub timezone: String,
}

impl RuntimeEnv {
    pub fn from_os() -> Result<Self> {
        let environment = Environment::from_name(
            &std::env::var(ENV_NAME_ENVIRONMENT).unwrap_or_default(),
        )?;
        Ok(Self {
            environment,
            cluster: std::env::var(ENV_NAME_CLUSTER).unwrap_or_default(),
            timezone: std::env::var(ENV_NAME_TIMEZONE).unwrap_or_default(),
        })
    }
}
