// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use ethers::utils::keccak256;

use seda_relayer_utils::Result;

use crate::types::PostDataRequestArgs;

/// Derive the deterministic identifier of a data request.
///
/// The layout must stay bit-exact with the chain and with every SDK that
/// derives the same id:
///
/// ```text
/// keccak256(
///     keccak256(version)
///   ‖ exec_program_id
///   ‖ keccak256(exec_inputs)
///   ‖ exec_gas_limit     (u64, big endian)
///   ‖ tally_program_id
///   ‖ keccak256(tally_inputs)
///   ‖ tally_gas_limit    (u64, big endian)
///   ‖ replication_factor (u16, big endian)
///   ‖ keccak256(consensus_filter)
///   ‖ gas_price          (u128, big endian)
///   ‖ keccak256(memo)
/// )
/// ```
///
/// The program ids are hex strings on the wire and are decoded to raw bytes
/// before hashing. The returned id is lowercase hex without a `0x` prefix.
pub fn derive_data_request_id(args: &PostDataRequestArgs) -> Result<String> {
    let exec_program_id =
        hex::decode(args.exec_program_id.trim_start_matches("0x"))?;
    let tally_program_id =
        hex::decode(args.tally_program_id.trim_start_matches("0x"))?;

    let mut data = Vec::with_capacity(32 * 6 + exec_program_id.len() + tally_program_id.len() + 8 + 8 + 2 + 16);
    data.extend_from_slice(&keccak256(args.version.as_bytes()));
    data.extend_from_slice(&exec_program_id);
    data.extend_from_slice(&keccak256(&args.exec_inputs));
    data.extend_from_slice(&args.exec_gas_limit.to_be_bytes());
    data.extend_from_slice(&tally_program_id);
    data.extend_from_slice(&keccak256(&args.tally_inputs));
    data.extend_from_slice(&args.tally_gas_limit.to_be_bytes());
    data.extend_from_slice(&args.replication_factor.to_be_bytes());
    data.extend_from_slice(&keccak256(&args.consensus_filter));
    data.extend_from_slice(&args.gas_price.to_be_bytes());
    data.extend_from_slice(&keccak256(&args.memo));

    Ok(hex::encode(keccak256(&data)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeeSchedule;

    fn reference_args() -> PostDataRequestArgs {
        PostDataRequestArgs {
            version: "0.0.1".to_string(),
            exec_program_id:
                "0000000000000000000000000000000000000000000000000000000000000001"
                    .to_string(),
            exec_inputs: Vec::new(),
            exec_gas_limit: 10,
            tally_program_id:
                "0000000000000000000000000000000000000000000000000000000000000002"
                    .to_string(),
            tally_inputs: Vec::new(),
            tally_gas_limit: 11,
            replication_factor: 1,
            consensus_filter: vec![0x00],
            gas_price: 10,
            memo: Vec::new(),
            payback_address: Vec::new(),
            fees: FeeSchedule::default(),
        }
    }

    #[test]
    fn id_matches_the_reference_vector() {
        let id = derive_data_request_id(&reference_args()).unwrap();
        assert_eq!(
            id,
            "c280ab5bb44023cdc61eff83b36255250d31179c111da96083ea3023a51b33f6"
        );
    }

    #[test]
    fn bumping_the_gas_price_changes_the_id() {
        let mut args = reference_args();
        args.gas_price = 11;
        let id = derive_data_request_id(&args).unwrap();
        assert_eq!(
            id,
            "3c4765b2088f86c0b119045161e6ef92863f546dfa9c1cb3c5ac4721f4a2a005"
        );
    }

    #[test]
    fn id_is_deterministic() {
        let a = derive_data_request_id(&reference_args()).unwrap();
        let b = derive_data_request_id(&reference_args()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn every_identity_field_feeds_the_id() {
        let base = derive_data_request_id(&reference_args()).unwrap();
        let mutations: Vec<Box<dyn Fn(&mut PostDataRequestArgs)>> = vec![
            Box::new(|a| a.version = "0.0.2".to_string()),
            Box::new(|a| {
                a.exec_program_id = a.tally_program_id.clone();
            }),
            Box::new(|a| a.exec_inputs = vec![1]),
            Box::new(|a| a.exec_gas_limit += 1),
            Box::new(|a| {
                a.tally_program_id = a.exec_program_id.clone();
            }),
            Box::new(|a| a.tally_inputs = vec![1]),
            Box::new(|a| a.tally_gas_limit += 1),
            Box::new(|a| a.replication_factor += 1),
            Box::new(|a| a.consensus_filter = vec![0x01]),
            Box::new(|a| a.gas_price += 1),
            Box::new(|a| a.memo = vec![1]),
        ];
        for mutate in mutations {
            let mut args = reference_args();
            mutate(&mut args);
            let id = derive_data_request_id(&args).unwrap();
            assert_ne!(id, base, "mutated args produced an unchanged id");
        }
    }

    #[test]
    fn fees_are_not_part_of_the_identity() {
        let mut args = reference_args();
        args.fees.request_fee = 1_000;
        args.payback_address = vec![0xAA; 20];
        let id = derive_data_request_id(&args).unwrap();
        assert_eq!(id, derive_data_request_id(&reference_args()).unwrap());
    }

    #[test]
    fn rejects_non_hex_program_ids() {
        let mut args = reference_args();
        args.exec_program_id = "not-hex".to_string();
        assert!(derive_data_request_id(&args).is_err());
    }
}
