//! Trezor wire protocol messages
//!
//! Generated protobuf types plus a `Message` enum that pairs every type with
//! its numeric wire id.

use prost::Message as _;

use crate::errors::{CosignError, Result};

#[allow(clippy::all)]
pub mod protos {
    include!(concat!(env!("OUT_DIR"), "/hw.rs"));
}

pub use protos::*;

/// Failure codes that mean the operator backed out on the device.
pub const FAILURE_ACTION_CANCELLED: u32 = 4;
pub const FAILURE_PIN_CANCELLED: u32 = 6;

macro_rules! messages {
    ($($name:ident = $id:literal),* $(,)?) => {
        /// A decoded message together with its wire type
        #[derive(Debug, Clone, PartialEq)]
        pub enum Message {
            $($name($name),)*
        }

        impl Message {
            /// Numeric message type used in the packet header
            pub fn message_type(&self) -> u16 {
                match self {
                    $(Message::$name(_) => $id,)*
                }
            }

            /// Protobuf encoding of the message body
            pub fn encode_body(&self) -> Vec<u8> {
                match self {
                    $(Message::$name(m) => m.encode_to_vec(),)*
                }
            }

            /// Decode a message body received under `message_type`
            pub fn decode(message_type: u16, body: &[u8]) -> Result<Self> {
                match message_type {
                    $($id => Ok(Message::$name($name::decode(body)?)),)*
                    other => Err(CosignError::Protocol(format!(
                        "Unknown message type {}",
                        other
                    ))),
                }
            }

            /// Short name for logging
            pub fn name(&self) -> &'static str {
                match self {
                    $(Message::$name(_) => stringify!($name),)*
                }
            }
        }
    };
}

messages! {
    Initialize = 0,
    Success = 2,
    Failure = 3,
    Features = 17,
    PinMatrixRequest = 18,
    PinMatrixAck = 19,
    Cancel = 20,
    ButtonRequest = 26,
    ButtonAck = 27,
    PassphraseRequest = 41,
    PassphraseAck = 42,
    GetFeatures = 55,
    EthereumGetAddress = 56,
    EthereumAddress = 57,
    EthereumSignTx = 58,
    EthereumTxRequest = 59,
    EthereumTxAck = 60,
}

/// KeepKey reuses type 58 with its own field layout, so it is encoded
/// separately from the `Message` table.
pub const KEEPKEY_ETHEREUM_SIGN_TX: u16 = 58;
