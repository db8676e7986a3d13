use std::path::Path;

use ethereum_types::{Address, U256};
use ethers_core::abi::{Abi, Function, Token};

use super::{MultisigAction, PendingTransaction, TxParams};
use crate::chains::ethereum::UnsignedTransaction;
use crate::errors::{CosignError, Result};
use crate::rpc::{EthClient, EthRpc};

const BUNDLED_ABI: &str = include_str!("../abi/multisig_wallet.json");

/// A deployed multisig wallet and the ABI used to talk to it
#[derive(Debug, Clone)]
pub struct MultisigContract {
    pub address: Address,
    abi: Abi,
}

impl MultisigContract {
    /// Contract at `address` using the bundled `MultiSigWallet` ABI
    pub fn bundled(address: Address) -> Result<Self> {
        Self::from_abi_json(address, BUNDLED_ABI)
    }

    pub fn from_abi_json(address: Address, json: &str) -> Result<Self> {
        let abi: Abi = serde_json::from_str(json)?;
        let contract = Self { address, abi };
        for action in [MultisigAction::Confirm, MultisigAction::Revoke, MultisigAction::Execute] {
            contract.function(action.function_name())?;
        }
        Ok(contract)
    }

    pub fn from_abi_file(address: Address, path: &Path) -> Result<Self> {
        log::debug!("📄 Loading ABI from {}", path.display());
        let json = std::fs::read_to_string(path)?;
        Self::from_abi_json(address, &json)
    }

    fn function(&self, name: &str) -> Result<&Function> {
        Ok(self.abi.function(name)?)
    }

    pub fn encode_call(&self, name: &str, args: &[Token]) -> Result<Vec<u8>> {
        Ok(self.function(name)?.encode_input(args)?)
    }

    /// Calldata for an owner action on transaction `id`
    pub fn action_data(&self, action: MultisigAction, id: U256) -> Result<Vec<u8>> {
        self.encode_call(action.function_name(), &[Token::Uint(id)])
    }

    /// Unsigned call to the multisig itself; owner calls never carry value
    pub fn build_call_transaction(
        &self,
        action: MultisigAction,
        id: U256,
        params: &TxParams,
    ) -> Result<UnsignedTransaction> {
        Ok(UnsignedTransaction {
            nonce: params.nonce,
            gas_price: params.gas_price,
            gas_limit: params.gas_limit,
            to: self.address,
            value: U256::zero(),
            data: self.action_data(action, id)?,
            chain_id: params.chain_id,
        })
    }

    async fn view<R: EthRpc>(
        &self,
        client: &EthClient<R>,
        name: &str,
        args: &[Token],
    ) -> Result<Vec<Token>> {
        let function = self.function(name)?;
        let output = client
            .call(self.address, &function.encode_input(args)?)
            .await?;
        if output.is_empty() {
            return Err(CosignError::Protocol(format!(
                "{} returned no data; is {:?} a multisig contract?",
                name, self.address
            )));
        }
        Ok(function.decode_output(&output)?)
    }

    pub async fn is_owner<R: EthRpc>(&self, client: &EthClient<R>, owner: Address) -> Result<bool> {
        let tokens = self.view(client, "isOwner", &[Token::Address(owner)]).await?;
        single(tokens, "isOwner")?.into_bool().ok_or_else(|| malformed("isOwner"))
    }

    pub async fn transaction<R: EthRpc>(
        &self,
        client: &EthClient<R>,
        id: U256,
    ) -> Result<PendingTransaction> {
        let mut tokens = self
            .view(client, "transactions", &[Token::Uint(id)])
            .await?
            .into_iter();
        let mut next = || tokens.next().ok_or_else(|| malformed("transactions"));

        Ok(PendingTransaction {
            destination: next()?.into_address().ok_or_else(|| malformed("transactions"))?,
            value: next()?.into_uint().ok_or_else(|| malformed("transactions"))?,
            data: next()?.into_bytes().ok_or_else(|| malformed("transactions"))?,
            executed: next()?.into_bool().ok_or_else(|| malformed("transactions"))?,
        })
    }

    pub async fn confirmed_by<R: EthRpc>(
        &self,
        client: &EthClient<R>,
        id: U256,
        owner: Address,
    ) -> Result<bool> {
        let tokens = self
            .view(client, "confirmations", &[Token::Uint(id), Token::Address(owner)])
            .await?;
        single(tokens, "confirmations")?
            .into_bool()
            .ok_or_else(|| malformed("confirmations"))
    }

    pub async fn confirmation_count<R: EthRpc>(&self, client: &EthClient<R>, id: U256) -> Result<U256> {
        let tokens = self
            .view(client, "getConfirmationCount", &[Token::Uint(id)])
            .await?;
        uint(tokens, "getConfirmationCount")
    }

    pub async fn required<R: EthRpc>(&self, client: &EthClient<R>) -> Result<U256> {
        uint(self.view(client, "required", &[]).await?, "required")
    }

    pub async fn is_confirmed<R: EthRpc>(&self, client: &EthClient<R>, id: U256) -> Result<bool> {
        let tokens = self.view(client, "isConfirmed", &[Token::Uint(id)]).await?;
        single(tokens, "isConfirmed")?
            .into_bool()
            .ok_or_else(|| malformed("isConfirmed"))
    }

    pub async fn transaction_count<R: EthRpc>(&self, client: &EthClient<R>) -> Result<U256> {
        uint(self.view(client, "transactionCount", &[]).await?, "transactionCount")
    }

    pub async fn owners<R: EthRpc>(&self, client: &EthClient<R>) -> Result<Vec<Address>> {
        single(self.view(client, "getOwners", &[]).await?, "getOwners")?
            .into_array()
            .ok_or_else(|| malformed("getOwners"))?
            .into_iter()
            .map(|token| token.into_address().ok_or_else(|| malformed("getOwners")))
            .collect()
    }
}

fn malformed(name: &str) -> CosignError {
    CosignError::Protocol(format!("Unexpected output from {}", name))
}

fn single(tokens: Vec<Token>, name: &str) -> Result<Token> {
    tokens.into_iter().next().ok_or_else(|| malformed(name))
}

fn uint(tokens: Vec<Token>, name: &str) -> Result<U256> {
    single(tokens, name)?.into_uint().ok_or_else(|| malformed(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::mock::FnRpc;
    use ethers_core::abi::{encode, short_signature, ParamType};
    use serde_json::json;

    fn multisig() -> MultisigContract {
        MultisigContract::bundled("0x16A0772b17AE004E6645E0e95BF50aD69498a34e".parse().unwrap())
            .unwrap()
    }

    fn params() -> TxParams {
        TxParams {
            nonce: U256::from(12),
            gas_price: U256::from(25_000_000_000u64),
            gas_limit: U256::from(200_000),
            chain_id: 1,
        }
    }

    #[test]
    fn test_confirm_calldata() {
        let data = multisig()
            .action_data(MultisigAction::Confirm, U256::from(106))
            .unwrap();
        assert_eq!(
            hex::encode(data),
            "c01a8c84000000000000000000000000000000000000000000000000000000000000006a"
        );
    }

    #[test]
    fn test_revoke_and_execute_selectors() {
        let contract = multisig();
        for (action, name) in [
            (MultisigAction::Revoke, "revokeConfirmation"),
            (MultisigAction::Execute, "executeTransaction"),
        ] {
            let data = contract.action_data(action, U256::zero()).unwrap();
            assert_eq!(data[..4], short_signature(name, &[ParamType::Uint(256)]));
            assert_eq!(data.len(), 36);
        }
    }

    #[test]
    fn test_build_call_transaction() {
        let contract = multisig();
        let tx = contract
            .build_call_transaction(MultisigAction::Confirm, U256::from(47), &params())
            .unwrap();
        assert_eq!(tx.to, contract.address);
        assert_eq!(tx.value, U256::zero());
        assert_eq!(tx.nonce, U256::from(12));
        assert_eq!(tx.chain_id, 1);
        assert_eq!(tx.data[35], 47);
    }

    #[test]
    fn test_abi_without_owner_calls_is_rejected() {
        let abi = r#"[{"type":"function","name":"required","inputs":[],"outputs":[{"name":"","type":"uint256"}],"stateMutability":"view"}]"#;
        assert!(MultisigContract::from_abi_json(Address::zero(), abi).is_err());
    }

    #[tokio::test]
    async fn test_transaction_view() {
        let destination = Address::repeat_byte(0x42);
        let output = encode(&[
            Token::Address(destination),
            Token::Uint(U256::from(1_000)),
            Token::Bytes(vec![0xde, 0xad]),
            Token::Bool(false),
        ]);
        let client = EthClient::new(FnRpc::new(move |method, _| {
            assert_eq!(method, "eth_call");
            Ok(json!(format!("0x{}", hex::encode(&output))))
        }));

        let pending = multisig().transaction(&client, U256::from(3)).await.unwrap();
        assert_eq!(pending.destination, destination);
        assert_eq!(pending.value, U256::from(1_000));
        assert_eq!(pending.data, vec![0xde, 0xad]);
        assert!(!pending.executed);
    }

    #[tokio::test]
    async fn test_owners_view() {
        let owners = vec![Address::repeat_byte(1), Address::repeat_byte(2)];
        let output = encode(&[Token::Array(
            owners.iter().copied().map(Token::Address).collect(),
        )]);
        let client = EthClient::new(FnRpc::new(move |_, _| {
            Ok(json!(format!("0x{}", hex::encode(&output))))
        }));
        assert_eq!(multisig().owners(&client).await.unwrap(), owners);
    }

    #[tokio::test]
    async fn test_empty_call_result_is_error() {
        let client = EthClient::new(FnRpc::new(|_, _| Ok(json!("0x"))));
        assert!(multisig().required(&client).await.is_err());
    }
}
