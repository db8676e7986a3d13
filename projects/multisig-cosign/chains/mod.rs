//! Chain support for hardware co-signing

pub mod ethereum;

pub use ethereum::EthereumSupport;
