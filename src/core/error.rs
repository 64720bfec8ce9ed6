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

/// Errors surfaced by the link engine. None of them are retried internally.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed event or attribute data
    #[error("parse error: {0}")]
    Parse(String),
    /// A handshake step was rejected, or the two ends disagree
    #[error("[{chain_id}] {step} failed: {reason}")]
    Protocol {
        chain_id: String,
        step: String,
        reason: String,
    },
    /// Query or broadcast failure, including chain level rejection of a transaction
    #[error("[{chain_id}] chain error: {reason}")]
    Chain { chain_id: String, reason: String },
    /// A referenced client, connection or channel does not exist
    #[error("[{chain_id}] {what} not found")]
    NotFound { chain_id: String, what: String },
    /// Anything else
    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn protocol(
        chain_id: impl Into<String>,
        step: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Error::Protocol {
            chain_id: chain_id.into(),
            step: step.into(),
            reason: reason.to_string(),
        }
    }

    pub fn chain(chain_id: impl Into<String>, reason: impl ToString) -> Self {
        Error::Chain {
            chain_id: chain_id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn not_found(chain_id: impl Into<String>, what: impl Into<String>) -> Self {
        Error::NotFound {
            chain_id: chain_id.into(),
            what: what.into(),
        }
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Self::Custom(error)
    }
}

impl From<prost::EncodeError> for Error {
    fn from(error: prost::EncodeError) -> Self {
        Self::Custom(format!("protobuf encoding failed: {}", error))
    }
}
