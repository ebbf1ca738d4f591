//! ABI-driven call decoding and packing

use crate::error::{RelayerError, RelayerResult};

use ethers::abi::{Abi, Token};
use ethers::types::{Bytes, U256};
use std::path::Path;

/// Source-chain bridge contract: payable deposits in, releases out.
pub const SOURCE_BRIDGE_ABI: &str = r#"[
    {"type":"function","name":"deposit","inputs":[],"outputs":[],"stateMutability":"payable"},
    {"type":"function","name":"depositTo","inputs":[{"name":"receiver","type":"address"}],"outputs":[],"stateMutability":"payable"},
    {"type":"function","name":"release","inputs":[{"name":"receiver","type":"address"},{"name":"amount","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
]"#;

/// Destination-chain bridge master: tracks the external balance awaiting release.
pub const BRIDGE_MASTER_ABI: &str = r#"[
    {"type":"function","name":"getEthToSend","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"},
    {"type":"function","name":"addEth","inputs":[{"name":"amount","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"},
    {"type":"function","name":"removeEth","inputs":[{"name":"amount","type":"uint256"}],"outputs":[],"stateMutability":"nonpayable"}
]"#;

/// Parsed contract ABI
#[derive(Debug, Clone)]
pub struct BridgeAbi {
    abi: Abi,
}

impl BridgeAbi {
    /// Parse an ABI from its JSON description
    pub fn from_json(json: &str) -> RelayerResult<Self> {
        let abi: Abi = serde_json::from_str(json)
            .map_err(|e| RelayerError::Config(format!("Invalid contract ABI: {}", e)))?;
        Ok(Self { abi })
    }

    /// Load an ABI file, or fall back to the built-in description
    pub fn load(path: Option<&Path>, builtin: &str) -> RelayerResult<Self> {
        match path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    RelayerError::Config(format!("Failed to read ABI {:?}: {}", path, e))
                })?;
                Self::from_json(&json)
            }
            None => Self::from_json(builtin),
        }
    }

    /// Name of the method a call input invokes.
    ///
    /// The arguments must decode against the matched function, otherwise the
    /// input is rejected even if the selector is known.
    pub fn input_method_name(&self, input: &[u8]) -> RelayerResult<String> {
        if input.len() < 4 {
            return Err(RelayerError::Contract(format!(
                "Call input too short for a selector ({} bytes)",
                input.len()
            )));
        }
        let (selector, args) = input.split_at(4);

        let function = self
            .abi
            .functions()
            .find(|f| f.short_signature() == selector)
            .ok_or_else(|| {
                RelayerError::Contract(format!("Unknown method selector 0x{}", hex::encode(selector)))
            })?;

        function
            .decode_input(args)
            .map_err(|e| RelayerError::Contract(format!("Bad {} arguments: {}", function.name, e)))?;

        Ok(function.name.clone())
    }

    /// Encode a call to `method` with the given arguments
    pub fn pack_call(&self, method: &str, args: &[Token]) -> RelayerResult<Bytes> {
        let function = self
            .abi
            .function(method)
            .map_err(|e| RelayerError::Contract(format!("Unknown method {}: {}", method, e)))?;

        function
            .encode_input(args)
            .map(Bytes::from)
            .map_err(|e| RelayerError::Contract(format!("Failed to pack {}: {}", method, e)))
    }

    /// Decode a single unsigned integer returned by `method`.
    ///
    /// An empty return buffer reads as zero.
    pub fn decode_uint_output(&self, method: &str, output: &[u8]) -> RelayerResult<U256> {
        if output.is_empty() {
            return Ok(U256::zero());
        }

        let function = self
            .abi
            .function(method)
            .map_err(|e| RelayerError::Contract(format!("Unknown method {}: {}", method, e)))?;

        let tokens = function
            .decode_output(output)
            .map_err(|e| RelayerError::Contract(format!("Bad {} output: {}", method, e)))?;

        tokens
            .into_iter()
            .next()
            .and_then(Token::into_uint)
            .ok_or_else(|| RelayerError::Contract(format!("{} did not return a uint", method)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    fn source_abi() -> BridgeAbi {
        BridgeAbi::from_json(SOURCE_BRIDGE_ABI).unwrap()
    }

    #[test]
    fn test_decode_packed_method() {
        let abi = source_abi();
        let input = abi.pack_call("deposit", &[]).unwrap();
        assert_eq!(abi.input_method_name(&input).unwrap(), "deposit");

        let input = abi
            .pack_call("depositTo", &[Token::Address(Address::repeat_byte(1))])
            .unwrap();
        assert_eq!(abi.input_method_name(&input).unwrap(), "depositTo");
    }

    #[test]
    fn test_unknown_selector_rejected() {
        let abi = source_abi();
        let err = abi.input_method_name(&[0xde, 0xad, 0xbe, 0xef]).unwrap_err();
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn test_short_input_rejected() {
        assert!(source_abi().input_method_name(&[0x01, 0x02]).is_err());
        assert!(source_abi().input_method_name(&[]).is_err());
    }

    #[test]
    fn test_truncated_arguments_rejected() {
        let abi = source_abi();
        let input = abi
            .pack_call("depositTo", &[Token::Address(Address::repeat_byte(1))])
            .unwrap();
        assert!(abi.input_method_name(&input[..10]).is_err());
    }

    #[test]
    fn test_decode_uint_output() {
        let abi = BridgeAbi::from_json(BRIDGE_MASTER_ABI).unwrap();
        let encoded = ethers::abi::encode(&[Token::Uint(U256::from(500))]);

        assert_eq!(abi.decode_uint_output("getEthToSend", &encoded).unwrap(), U256::from(500));
        assert_eq!(abi.decode_uint_output("getEthToSend", &[]).unwrap(), U256::zero());
    }

    #[test]
    fn test_pack_rejects_wrong_arity() {
        let abi = BridgeAbi::from_json(BRIDGE_MASTER_ABI).unwrap();
        assert!(abi.pack_call("removeEth", &[]).is_err());
        assert!(abi.pack_call("noSuchMethod", &[]).is_err());
    }
}
