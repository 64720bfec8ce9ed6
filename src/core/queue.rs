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

use crate::{
    core::{error::Error, msgs::IbcMsg},
    primitives::{Chain, TxResponse},
};

/// SDK error codes that describe the submitting account or fee rather than the message.
fn chain_rejection(code: u32) -> Option<&'static str> {
    match code {
        5 => Some("insufficient funds"),
        11 => Some("out of gas"),
        13 => Some("insufficient fee"),
        19 => Some("tx already in mempool"),
        32 => Some("account sequence mismatch"),
        _ => None,
    }
}

/// Maps a rejected transaction onto the crate error. Fee, gas and sequence failures are
/// [`Error::Chain`], anything else means `step` itself was refused.
pub fn check_tx_response(chain_id: &str, step: &str, response: &TxResponse) -> Result<(), Error> {
    if response.code == 0 {
        return Ok(());
    }
    match chain_rejection(response.code) {
        Some(reason) => Err(Error::chain(
            chain_id,
            format!(
                "{} rejected with code {} ({}): {}",
                step, response.code, reason, response.raw_log
            ),
        )),
        None => Err(Error::protocol(
            chain_id,
            step,
            format!("code {}: {}", response.code, response.raw_log),
        )),
    }
}

/// Sends messages to the sink chain in transactions of at most `max_msg_num` messages,
/// one after the other. Stops at the first rejected transaction.
pub async fn flush_message_batch(
    msgs: Vec<IbcMsg>,
    sink: &impl Chain,
    step: &str,
) -> Result<Vec<TxResponse>, Error> {
    if msgs.is_empty() {
        return Ok(vec![]);
    }
    let chunk = sink.config().max_msg_num.max(1);
    if msgs.len() > chunk {
        log::info!(
            target: "ibc-link",
            "🏗️ Splitting batch of {} messages into {} transactions for {}",
            msgs.len(),
            (msgs.len() + chunk - 1) / chunk,
            sink.name()
        );
    }

    let mut responses = Vec::with_capacity((msgs.len() + chunk - 1) / chunk);
    for batch in msgs.chunks(chunk) {
        log::info!(target: "ibc-link", "📡 Sending {} {} message(s) to {}", batch.len(), step, sink.name());
        let response = sink.submit(batch.to_vec()).await?;
        if let Err(e) = check_tx_response(sink.chain_id(), step, &response) {
            log::error!(target: "ibc-link", "{}", e);
            return Err(e);
        }
        log::info!(
            target: "ibc-link",
            "🤝 Transaction confirmed at height {} with hash: {}",
            response.height,
            response.transaction_hash
        );
        responses.push(response);
    }

    Ok(responses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(code: u32) -> TxResponse {
        TxResponse {
            code,
            raw_log: "rejected".into(),
            ..Default::default()
        }
    }

    #[test]
    fn classifies_rejections() {
        assert!(check_tx_response("a-1", "recv_packet", &response(0)).is_ok());
        match check_tx_response("a-1", "connection_open_try", &response(13)) {
            Err(Error::Chain { chain_id, reason }) => {
                assert_eq!(chain_id, "a-1");
                assert!(reason.contains("insufficient fee"), "{}", reason);
            }
            other => panic!("unexpected {:?}", other),
        }
        match check_tx_response("b-1", "connection_open_try", &response(18)) {
            Err(Error::Protocol { step, .. }) => assert_eq!(step, "connection_open_try"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
