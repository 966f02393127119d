//! Serialized-transaction helpers: base64 wire form, partial signing,
//! instruction decompilation, and transfer validation against recorded
//! balance deltas.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use solana_instruction::{AccountMeta, Instruction};
use solana_keypair::Keypair;
use solana_message::VersionedMessage;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;

use crate::error::LedgerError;
use crate::types::TransferMeta;

/// Serializes a transaction into its base64 wire form.
///
/// # Errors
///
/// Returns [`LedgerError::Encoding`] if serialization fails.
pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String, LedgerError> {
    let bytes = bincode::serialize(tx).map_err(|e| LedgerError::Encoding(e.to_string()))?;
    Ok(BASE64.encode(bytes))
}

/// Decodes a transaction from its base64 wire form.
///
/// # Errors
///
/// Returns [`LedgerError::Encoding`] if the input is not valid base64 or
/// does not deserialize into a transaction.
pub fn decode_transaction(base64_tx: &str) -> Result<VersionedTransaction, LedgerError> {
    let bytes = BASE64
        .decode(base64_tx)
        .map_err(|e| LedgerError::Encoding(e.to_string()))?;
    bincode::deserialize(&bytes).map_err(|e| LedgerError::Encoding(e.to_string()))
}

/// Signs the transaction with every keypair that occupies a required
/// signature slot, leaving the remaining slots untouched.
///
/// The buyer-facing flow hands out transactions that still miss the buyer's
/// own signature, so a partially signed result is the expected outcome.
///
/// # Errors
///
/// Returns [`LedgerError::Composer`] if a keypair does not correspond to
/// any required signer of the message.
pub fn partially_sign(
    tx: &mut VersionedTransaction,
    signers: &[&Keypair],
) -> Result<(), LedgerError> {
    let message_bytes = tx.message.serialize();
    let num_required = tx.message.header().num_required_signatures as usize;
    let keys = tx.message.static_account_keys();
    if tx.signatures.len() < num_required {
        tx.signatures.resize(num_required, Signature::default());
    }
    for keypair in signers {
        let pubkey = keypair.pubkey();
        let position = keys
            .iter()
            .take(num_required)
            .position(|key| *key == pubkey)
            .ok_or_else(|| {
                LedgerError::Composer(format!("{pubkey} is not a required signer"))
            })?;
        tx.signatures[position] = keypair.sign_message(&message_bytes);
    }
    Ok(())
}

/// Reconstructs owned [`Instruction`]s from a compiled message.
///
/// Used to carry a swap provider's ready-made transaction into a composed
/// payment transaction: the decompiled instructions are prepended verbatim.
///
/// # Errors
///
/// Returns [`LedgerError::Encoding`] if an instruction references an
/// account index outside the static account table (lookup-table addresses
/// cannot be decompiled without resolving the tables first).
pub fn decompile_instructions(
    message: &VersionedMessage,
) -> Result<Vec<Instruction>, LedgerError> {
    let keys = message.static_account_keys();
    let mut instructions = Vec::with_capacity(message.instructions().len());
    for compiled in message.instructions() {
        let program_id = *keys
            .get(compiled.program_id_index as usize)
            .ok_or_else(|| LedgerError::Encoding("program id index out of range".into()))?;
        let mut accounts = Vec::with_capacity(compiled.accounts.len());
        for &index in &compiled.accounts {
            let index = index as usize;
            let pubkey = *keys
                .get(index)
                .ok_or_else(|| LedgerError::Encoding("account index out of range".into()))?;
            accounts.push(AccountMeta {
                pubkey,
                is_signer: message.is_signer(index),
                is_writable: message.is_maybe_writable(index, None),
            });
        }
        instructions.push(Instruction {
            program_id,
            accounts,
            data: compiled.data.clone(),
        });
    }
    Ok(instructions)
}

/// Asserts that `destination` was credited exactly `amount` lamports.
///
/// # Errors
///
/// Returns [`LedgerError::Mismatch`] if the destination is not present in
/// the account table or its balance delta differs from `amount`.
pub fn validate_native_transfer(
    meta: &TransferMeta,
    tx: &VersionedTransaction,
    destination: &Pubkey,
    amount: u64,
) -> Result<(), LedgerError> {
    let index = tx
        .message
        .static_account_keys()
        .iter()
        .position(|key| key == destination)
        .ok_or_else(|| {
            LedgerError::Mismatch(format!("destination {destination} not in transaction"))
        })?;
    let pre = meta.pre_balances.get(index).copied().unwrap_or(0);
    let post = meta.post_balances.get(index).copied().unwrap_or(0);
    let credited = post.saturating_sub(pre);
    if credited != amount {
        return Err(LedgerError::Mismatch(format!(
            "expected {amount} lamports credited, found {credited}"
        )));
    }
    Ok(())
}

/// Asserts that `destination` was credited exactly `amount` of `mint`.
///
/// A missing pre-balance row is treated as zero: the destination
/// sub-account may have been created inside the validated transaction.
///
/// # Errors
///
/// Returns [`LedgerError::Mismatch`] if the recorded token balance delta
/// for `(destination, mint)` differs from `amount`.
pub fn validate_token_transfer(
    meta: &TransferMeta,
    mint: &Pubkey,
    destination: &Pubkey,
    amount: u64,
) -> Result<(), LedgerError> {
    let mint = mint.to_string();
    let destination = destination.to_string();
    let find = |balances: &[crate::types::TokenBalance]| {
        balances
            .iter()
            .find(|b| b.mint == mint && b.owner == destination)
            .map(|b| b.amount)
    };
    let pre = find(&meta.pre_token_balances).unwrap_or(0);
    let post = find(&meta.post_token_balances).ok_or_else(|| {
        LedgerError::Mismatch(format!("no post balance for {destination} in {mint}"))
    })?;
    let credited = post.saturating_sub(pre);
    if credited != amount {
        return Err(LedgerError::Mismatch(format!(
            "expected {amount} of {mint} credited, found {credited}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenBalance;
    use solana_message::{Message, v0};
    use solana_system_interface::instruction as system_instruction;

    fn transfer_tx(from: &Keypair, to: &Pubkey, lamports: u64) -> VersionedTransaction {
        let ix = system_instruction::transfer(&from.pubkey(), to, lamports);
        let message = Message::new(&[ix], Some(&from.pubkey()));
        VersionedTransaction {
            signatures: vec![Signature::default(); 1],
            message: VersionedMessage::Legacy(message),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let from = Keypair::new();
        let to = Pubkey::new_unique();
        let tx = transfer_tx(&from, &to, 42);
        let encoded = encode_transaction(&tx).unwrap();
        let decoded = decode_transaction(&encoded).unwrap();
        assert_eq!(decoded.message.static_account_keys(), tx.message.static_account_keys());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_transaction("not-base64!!").is_err());
        assert!(decode_transaction("aGVsbG8=").is_err());
    }

    #[test]
    fn partially_sign_fills_only_known_slots() {
        let from = Keypair::new();
        let to = Pubkey::new_unique();
        let mut tx = transfer_tx(&from, &to, 42);
        partially_sign(&mut tx, &[&from]).unwrap();
        assert_ne!(tx.signatures[0], Signature::default());
    }

    #[test]
    fn partially_sign_rejects_foreign_keypair() {
        let from = Keypair::new();
        let stranger = Keypair::new();
        let mut tx = transfer_tx(&from, &Pubkey::new_unique(), 42);
        assert!(partially_sign(&mut tx, &[&stranger]).is_err());
    }

    #[test]
    fn decompile_preserves_order_and_accounts() {
        let from = Keypair::new();
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let ixs = vec![
            system_instruction::transfer(&from.pubkey(), &a, 1),
            system_instruction::transfer(&from.pubkey(), &b, 2),
        ];
        let message = v0::Message::try_compile(
            &from.pubkey(),
            &ixs,
            &[],
            solana_hash::Hash::default(),
        )
        .unwrap();
        let decompiled = decompile_instructions(&VersionedMessage::V0(message)).unwrap();
        assert_eq!(decompiled.len(), 2);
        assert_eq!(decompiled[0].data, ixs[0].data);
        assert_eq!(decompiled[1].accounts[1].pubkey, b);
        assert!(decompiled[0].accounts[0].is_signer);
        assert!(!decompiled[0].accounts[1].is_signer);
    }

    #[test]
    fn native_validation_checks_credited_amount() {
        let from = Keypair::new();
        let to = Pubkey::new_unique();
        let tx = transfer_tx(&from, &to, 2_500_000);
        let meta = TransferMeta {
            pre_balances: vec![10_000_000, 0, 1],
            post_balances: vec![7_495_000, 2_500_000, 1],
            ..TransferMeta::default()
        };
        validate_native_transfer(&meta, &tx, &to, 2_500_000).unwrap();
        assert!(validate_native_transfer(&meta, &tx, &to, 2_400_000).is_err());
        assert!(
            validate_native_transfer(&meta, &tx, &Pubkey::new_unique(), 2_500_000).is_err()
        );
    }

    #[test]
    fn token_validation_checks_owner_and_mint_delta() {
        let mint = Pubkey::new_unique();
        let merchant = Pubkey::new_unique();
        let meta = TransferMeta {
            pre_token_balances: vec![TokenBalance {
                mint: mint.to_string(),
                owner: merchant.to_string(),
                amount: 100,
            }],
            post_token_balances: vec![TokenBalance {
                mint: mint.to_string(),
                owner: merchant.to_string(),
                amount: 900_100,
            }],
            ..TransferMeta::default()
        };
        validate_token_transfer(&meta, &mint, &merchant, 900_000).unwrap();
        assert!(validate_token_transfer(&meta, &mint, &merchant, 1).is_err());
    }

    #[test]
    fn token_validation_accepts_account_created_in_transaction() {
        let mint = Pubkey::new_unique();
        let merchant = Pubkey::new_unique();
        let meta = TransferMeta {
            pre_token_balances: vec![],
            post_token_balances: vec![TokenBalance {
                mint: mint.to_string(),
                owner: merchant.to_string(),
                amount: 900_000,
            }],
            ..TransferMeta::default()
        };
        validate_token_transfer(&meta, &mint, &merchant, 900_000).unwrap();
    }

    #[test]
    fn token_validation_requires_post_row() {
        let mint = Pubkey::new_unique();
        let merchant = Pubkey::new_unique();
        let meta = TransferMeta::default();
        assert!(validate_token_transfer(&meta, &mint, &merchant, 1).is_err());
    }
}
