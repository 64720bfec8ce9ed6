// Copyright 2022 ComposableFi
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::error::Error;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr, time::Duration};

pub const DEFAULT_MAX_MSG_NUM: usize = 30;
pub const DEFAULT_GAS_LIMIT: u64 = 400_000;

/// Price paid per unit of gas, written as `<amount><denom>`, e.g. `0.025ustake`.
#[derive(Clone, Debug, PartialEq)]
pub struct GasPrice {
    pub price: f64,
    pub denom: String,
}

impl GasPrice {
    pub fn new(price: f64, denom: impl Into<String>) -> Self {
        Self {
            price,
            denom: denom.into(),
        }
    }
}

impl Default for GasPrice {
    fn default() -> Self {
        Self::new(0.025, "stake")
    }
}

impl fmt::Display for GasPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.price, self.denom)
    }
}

impl FromStr for GasPrice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| Error::Parse(format!("gas price `{}` has no denom", s)))?;
        let (amount, denom) = s.split_at(split);
        let price = amount
            .parse::<f64>()
            .map_err(|e| Error::Parse(format!("invalid gas price `{}`: {}", s, e)))?;
        Ok(Self::new(price, denom))
    }
}

impl Serialize for GasPrice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GasPrice {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per chain settings handed to a chain adapter and read by the link.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Chain name, used in logs
    pub name: String,
    /// Chain id, e.g. `simd-1`
    pub chain_id: String,
    /// Bech32 account prefix
    pub account_prefix: String,
    /// IBC store prefix
    pub store_prefix: String,
    pub gas_price: GasPrice,
    pub gas_limit: u64,
    /// Maximum number of messages in a single transaction
    pub max_msg_num: usize,
    /// Expected time between two blocks
    #[serde(with = "duration_secs")]
    pub block_time: Duration,
    /// Overrides the trusting period of clients tracking this chain, in seconds
    pub trusting_period: Option<u64>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            chain_id: String::new(),
            account_prefix: "cosmos".to_string(),
            store_prefix: "ibc".to_string(),
            gas_price: GasPrice::default(),
            gas_limit: DEFAULT_GAS_LIMIT,
            max_msg_num: DEFAULT_MAX_MSG_NUM,
            block_time: Duration::from_secs(5),
            trusting_period: None,
        }
    }
}

impl ChainConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.chain_id.is_empty() {
            return Err(Error::Custom("chain id must not be empty".to_string()));
        }
        if self.max_msg_num == 0 {
            return Err(Error::Custom(format!(
                "[{}] max_msg_num must be greater than zero",
                self.chain_id
            )));
        }
        if !self.gas_price.price.is_finite() || self.gas_price.price < 0.0 {
            return Err(Error::Custom(format!(
                "[{}] invalid gas price {}",
                self.chain_id, self.gas_price
            )));
        }
        if self.trusting_period == Some(0) {
            return Err(Error::Custom(format!(
                "[{}] trusting period must be greater than zero",
                self.chain_id
            )));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gas_price() {
        let price: GasPrice = "0.025ustake".parse().unwrap();
        assert_eq!(price, GasPrice::new(0.025, "ustake"));
        assert_eq!(price.to_string(), "0.025ustake");
        assert!("ustake".parse::<GasPrice>().is_err());
        assert!("100".parse::<GasPrice>().is_err());
    }

    #[test]
    fn loads_from_json_with_defaults() {
        let config: ChainConfig = serde_json::from_str(
            r#"{
                "name": "gaia",
                "chain_id": "gaia-4",
                "gas_price": "0.1uatom",
                "block_time": 2
            }"#,
        )
        .unwrap();
        assert_eq!(config.gas_price, GasPrice::new(0.1, "uatom"));
        assert_eq!(config.block_time, Duration::from_secs(2));
        assert_eq!(config.max_msg_num, DEFAULT_MAX_MSG_NUM);
        assert_eq!(config.store_prefix, "ibc");
        config.validate().unwrap();
    }

    #[test]
    fn rejects_invalid_config() {
        assert!(ChainConfig::default().validate().is_err());
        let config = ChainConfig {
            chain_id: "simd-1".into(),
            max_msg_num: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
