//! Packet framing for the two device protocols

pub mod ledger_apdu;
pub mod trezor_wire;
