//! Co-signing workflow: validate against the contract, build, sign, submit

use ethereum_types::{Address, H256, U256};
use ethers_core::utils::to_checksum;
use serde::Serialize;
use serde_json::{json, Value};

use crate::chains::ethereum::transaction::check_chain_id;
use crate::chains::ethereum::{DerivationPath, EthereumSupport, SignedTransaction, UnsignedTransaction};
use crate::device::HardwareSigner;
use crate::device_check::check_compatibility;
use crate::errors::{CosignError, Result};
use crate::features::DeviceKind;
use crate::multisig::{MultisigAction, MultisigContract, PendingTransaction, TxParams, DEFAULT_GAS_LIMIT};
use crate::protocol::ledger_apdu::status_reason;
use crate::rpc::{EthClient, EthRpc};

const SW_CONTRACT_DATA_DISABLED: u16 = 0x6a80;

/// Envelope values supplied by the operator; anything missing comes from the node
#[derive(Debug, Clone, Default)]
pub struct TxOverrides {
    pub nonce: Option<U256>,
    pub gas_price: Option<U256>,
    pub gas_limit: Option<U256>,
    pub chain_id: Option<u64>,
}

/// Everything needed to sign, plus the multisig state it was checked against
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CosignPlan {
    pub action: MultisigAction,
    pub transaction_id: U256,
    pub owner: Address,
    pub multisig: Address,
    pub pending: PendingTransaction,
    pub confirmations: U256,
    pub required: U256,
    pub transaction: UnsignedTransaction,
}

/// Check the action against the contract and build the unsigned call
pub async fn prepare<R: EthRpc>(
    client: &EthClient<R>,
    contract: &MultisigContract,
    owner: Address,
    action: MultisigAction,
    id: U256,
    overrides: &TxOverrides,
) -> Result<CosignPlan> {
    if !contract.is_owner(client, owner).await? {
        return Err(CosignError::NotOwner(owner));
    }

    let count = contract.transaction_count(client).await?;
    if id >= count {
        return Err(CosignError::UnknownTransaction(id));
    }

    let pending = contract.transaction(client, id).await?;
    if pending.executed {
        return Err(CosignError::AlreadyExecuted(id));
    }

    match action {
        MultisigAction::Confirm => {
            if contract.confirmed_by(client, id, owner).await? {
                return Err(CosignError::AlreadyConfirmed { id, owner });
            }
        }
        MultisigAction::Revoke => {
            if !contract.confirmed_by(client, id, owner).await? {
                return Err(CosignError::NotConfirmed(id));
            }
        }
        MultisigAction::Execute => {
            if !contract.is_confirmed(client, id).await? {
                return Err(CosignError::NotConfirmed(id));
            }
        }
    }

    let confirmations = contract.confirmation_count(client, id).await?;
    let required = contract.required(client).await?;

    let chain_id = match overrides.chain_id {
        Some(chain_id) => check_chain_id(chain_id)?,
        None => client.chain_id().await?,
    };
    let nonce = match overrides.nonce {
        Some(nonce) => nonce,
        None => client.transaction_count(owner).await?,
    };
    let gas_price = match overrides.gas_price {
        Some(gas_price) => gas_price,
        None => client.gas_price().await?,
    };
    let params = TxParams {
        nonce,
        gas_price,
        gas_limit: overrides.gas_limit.unwrap_or_else(|| U256::from(DEFAULT_GAS_LIMIT)),
        chain_id,
    };

    let transaction = contract.build_call_transaction(action, id, &params)?;
    log::info!(
        "📝 {} #{} on {} ({}/{} confirmations), nonce {}, chain {}",
        action,
        id,
        to_checksum(&contract.address, None),
        confirmations,
        required,
        params.nonce,
        params.chain_id
    );

    Ok(CosignPlan {
        action,
        transaction_id: id,
        owner,
        multisig: contract.address,
        pending,
        confirmations,
        required,
        transaction,
    })
}

/// Have the device sign the planned call and assemble the raw transaction
pub fn sign_plan(
    signer: &mut dyn HardwareSigner,
    path: &DerivationPath,
    plan: &CosignPlan,
) -> Result<SignedTransaction> {
    let kind = signer.kind();
    let features = signer.features()?;
    let check = check_compatibility(kind, &features);
    if check.needs_update {
        log::warn!(
            "⚠️  {} version {} is older than {}; signing may fail",
            kind,
            check.current_version,
            check.minimum_version
        );
    }
    if check.bootloader_mode {
        return Err(CosignError::Protocol(format!("{} is in bootloader mode", kind)));
    }
    if !check.can_sign_contract_calls() && !plan.transaction.data.is_empty() {
        return Err(CosignError::LedgerStatus {
            status: SW_CONTRACT_DATA_DISABLED,
            reason: status_reason(SW_CONTRACT_DATA_DISABLED),
        });
    }
    if kind == DeviceKind::Ledger {
        log::info!("ℹ️  The Ledger shows the raw contract data for this call");
    }

    let signed = EthereumSupport::sign_transaction(signer, path, plan.transaction.clone(), plan.owner)?;
    log::info!("✅ Signed transaction {:?}", signed.hash);
    Ok(signed)
}

/// Broadcast a signed transaction
pub async fn submit<R: EthRpc>(client: &EthClient<R>, signed: &SignedTransaction) -> Result<H256> {
    let hash = client.send_raw_transaction(&signed.raw).await?;
    if hash != signed.hash {
        log::warn!("⚠️  Node reported hash {:?}, expected {:?}", hash, signed.hash);
    }
    log::info!("📡 Broadcast {:?}", hash);
    Ok(hash)
}

/// Output printed instead of broadcasting
pub fn raw_output(signed: &SignedTransaction) -> Value {
    json!({ "hex": signed.raw_hex() })
}

/// State of one multisig transaction, for the `status` command
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    pub transaction_id: U256,
    pub pending: PendingTransaction,
    pub confirmations: U256,
    pub required: U256,
    pub confirmed: bool,
    pub confirmed_by: Vec<Address>,
    pub owners: Vec<Address>,
}

pub async fn transaction_status<R: EthRpc>(
    client: &EthClient<R>,
    contract: &MultisigContract,
    id: U256,
) -> Result<TransactionStatus> {
    if id >= contract.transaction_count(client).await? {
        return Err(CosignError::UnknownTransaction(id));
    }
    let pending = contract.transaction(client, id).await?;
    let owners = contract.owners(client).await?;
    let mut confirmed_by = Vec::new();
    for owner in &owners {
        if contract.confirmed_by(client, id, *owner).await? {
            confirmed_by.push(*owner);
        }
    }

    Ok(TransactionStatus {
        transaction_id: id,
        pending,
        confirmations: contract.confirmation_count(client, id).await?,
        required: contract.required(client).await?,
        confirmed: contract.is_confirmed(client, id).await?,
        confirmed_by,
        owners,
    })
}
