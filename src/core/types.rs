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

use ibc_proto::ibc::core::{
    channel::v1::{Channel as RawChannel, Counterparty as RawChannelCounterparty},
    connection::v1::Version as RawVersion,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handshake state shared by connection and channel ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    #[default]
    Uninitialized,
    Init,
    TryOpen,
    Open,
    Closed,
}

impl State {
    pub fn is_open(&self) -> bool {
        *self == State::Open
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            State::Uninitialized => 0,
            State::Init => 1,
            State::TryOpen => 2,
            State::Open => 3,
            State::Closed => 4,
        }
    }

    pub fn from_i32(value: i32) -> Self {
        match value {
            1 => State::Init,
            2 => State::TryOpen,
            3 => State::Open,
            4 => State::Closed,
            _ => State::Uninitialized,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Uninitialized => "UNINITIALIZED",
            State::Init => "INIT",
            State::TryOpen => "TRYOPEN",
            State::Open => "OPEN",
            State::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Order {
    #[default]
    Unordered,
    Ordered,
}

impl Order {
    pub fn as_i32(&self) -> i32 {
        match self {
            Order::Unordered => 1,
            Order::Ordered => 2,
        }
    }
}

/// A connection version as negotiated during the connection handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionVersion {
    pub identifier: String,
    pub features: Vec<String>,
}

impl Default for ConnectionVersion {
    fn default() -> Self {
        Self {
            identifier: "1".to_string(),
            features: vec!["ORDER_ORDERED".to_string(), "ORDER_UNORDERED".to_string()],
        }
    }
}

impl From<ConnectionVersion> for RawVersion {
    fn from(version: ConnectionVersion) -> Self {
        RawVersion {
            identifier: version.identifier,
            features: version.features,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionCounterparty {
    pub client_id: String,
    /// Unset until the counterparty end exists
    pub connection_id: Option<String>,
    pub prefix: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionEnd {
    pub state: State,
    pub client_id: String,
    pub counterparty: ConnectionCounterparty,
    pub versions: Vec<ConnectionVersion>,
    pub delay_period: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounterparty {
    pub port_id: String,
    /// Unset until the counterparty end exists
    pub channel_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEnd {
    pub state: State,
    pub ordering: Order,
    pub counterparty: ChannelCounterparty,
    pub connection_hops: Vec<String>,
    pub version: String,
}

impl From<ChannelEnd> for RawChannel {
    fn from(channel: ChannelEnd) -> Self {
        RawChannel {
            state: channel.state.as_i32(),
            ordering: channel.ordering.as_i32(),
            counterparty: Some(RawChannelCounterparty {
                port_id: channel.counterparty.port_id,
                channel_id: channel.counterparty.channel_id.unwrap_or_default(),
            }),
            connection_hops: channel.connection_hops,
            version: channel.version,
            ..Default::default()
        }
    }
}

/// Both ends of an open channel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub port_id: String,
    pub channel_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPair {
    pub src: ChannelInfo,
    pub dest: ChannelInfo,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_wire_values() {
        for state in [State::Init, State::TryOpen, State::Open, State::Closed] {
            assert_eq!(State::from_i32(state.as_i32()), state);
        }
        assert_eq!(State::from_i32(42), State::Uninitialized);
        assert_eq!(State::TryOpen.to_string(), "TRYOPEN");
    }

    #[test]
    fn channel_end_converts_to_raw() {
        let raw: RawChannel = ChannelEnd {
            state: State::Init,
            ordering: Order::Ordered,
            counterparty: ChannelCounterparty {
                port_id: "transfer".into(),
                channel_id: None,
            },
            connection_hops: vec!["connection-0".into()],
            version: "ics20-1".into(),
        }
        .into();
        assert_eq!(raw.state, 1);
        assert_eq!(raw.ordering, 2);
        assert_eq!(raw.counterparty.unwrap().channel_id, "");
        assert_eq!(raw.version, "ics20-1");
    }
}
