//! Solana ledger layer for the checkout service.
//!
//! This crate contains everything that touches the chain:
//!
//! - [`client`] — the [`client::LedgerClient`] capability trait and its
//!   JSON-RPC implementation. The payment core only ever sees this trait.
//! - [`instructions`] — pure builders for the primitive on-chain actions
//!   (native/token transfer, mint, burn, close, memo, sub-account setup).
//! - [`composer`] — accumulates instruction builders, raw instruction
//!   buffers and signers into a base64-encoded partially signed transaction.
//! - [`transaction`] — wire form helpers and transfer validators.
//! - [`swap`] — the external swap quote capability.
//! - [`testing`] — deterministic in-memory doubles (behind the
//!   `test-util` feature).

pub mod client;
pub mod composer;
pub mod error;
pub mod instructions;
pub mod swap;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transaction;
pub mod types;

pub use client::{LedgerClient, SolanaRpcClient};
pub use composer::TransactionComposer;
pub use error::{LedgerError, SwapError};
pub use swap::{JupiterClient, SwapClient};
pub use types::{Balance, ConfirmedTransaction, MintInfo, TokenMetadata, TransferMeta, TxStatus};

#[cfg(test)]
mod tests {
    use solana_keypair::Keypair;
    use solana_pubkey::Pubkey;
    use solana_signature::Signature;
    use solana_signer::Signer;
    use spl_associated_token_account::get_associated_token_address_with_program_id;

    use crate::composer::TransactionComposer;
    use crate::error::LedgerError;
    use crate::instructions::{BurnToken, MintToken, TransferNative, TransferToken};
    use crate::testing::MemoryLedger;
    use crate::transaction::decode_transaction;

    fn ledger_with_mint(mint: Pubkey, decimals: u8) -> MemoryLedger {
        let ledger = MemoryLedger::new();
        ledger.add_mint(mint, decimals, spl_token::id());
        ledger
    }

    #[tokio::test]
    async fn native_transfer_is_tagged_with_reference() {
        let ledger = MemoryLedger::new();
        let sender = Keypair::new();
        let recipient = Pubkey::new_unique();
        let reference = Pubkey::new_unique();

        let encoded = TransactionComposer::new()
            .fee_payer(sender.pubkey())
            .add_instruction(TransferNative {
                sender: sender.pubkey().to_string(),
                recipient: recipient.to_string(),
                amount: 2_500_000,
                reference: Some(reference.to_string()),
            })
            .build(&ledger)
            .await
            .unwrap();

        let tx = decode_transaction(&encoded).unwrap();
        let instructions = tx.message.instructions();
        assert_eq!(instructions.len(), 1);
        // One required signature (the buyer), still unsigned.
        assert_eq!(tx.message.header().num_required_signatures, 1);
        assert_eq!(tx.signatures, vec![Signature::default()]);
        // The reference rides the transfer as its last account.
        let keys = tx.message.static_account_keys();
        let last_account = *instructions[0].accounts.last().unwrap() as usize;
        assert_eq!(keys[last_account], reference);
        assert!(!tx.message.is_signer(last_account));
        assert!(!tx.message.is_maybe_writable(last_account, None));
    }

    #[tokio::test]
    async fn native_transfer_rejects_self_and_zero() {
        let ledger = MemoryLedger::new();
        let wallet = Pubkey::new_unique().to_string();
        let err = TransactionComposer::new()
            .fee_payer(Pubkey::new_unique())
            .add_instruction(TransferNative {
                sender: wallet.clone(),
                recipient: wallet,
                amount: 1,
                reference: None,
            })
            .build(&ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParameter(_)));

        let err = TransactionComposer::new()
            .fee_payer(Pubkey::new_unique())
            .add_instruction(TransferNative {
                sender: Pubkey::new_unique().to_string(),
                recipient: Pubkey::new_unique().to_string(),
                amount: 0,
                reference: None,
            })
            .build(&ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidParameter(_)));
    }

    #[tokio::test]
    async fn token_transfer_creates_missing_recipient_sub_account() {
        let mint = Pubkey::new_unique();
        let ledger = ledger_with_mint(mint, 6);
        let sender = Keypair::new();
        let recipient = Pubkey::new_unique();
        let sender_ata = get_associated_token_address_with_program_id(
            &sender.pubkey(),
            &mint,
            &spl_token::id(),
        );
        ledger.add_token_account(sender_ata);

        let encoded = TransactionComposer::new()
            .fee_payer(sender.pubkey())
            .add_instruction(TransferToken {
                sender: sender.pubkey().to_string(),
                recipient: recipient.to_string(),
                mint: mint.to_string(),
                amount: 900_000,
                reference: None,
            })
            .build(&ledger)
            .await
            .unwrap();

        let tx = decode_transaction(&encoded).unwrap();
        // create-sub-account precedes the transfer
        assert_eq!(tx.message.instructions().len(), 2);
        let keys = tx.message.static_account_keys();
        let ata_program = keys[tx.message.instructions()[0].program_id_index as usize];
        assert_eq!(ata_program, spl_associated_token_account::id());
        let token_program = keys[tx.message.instructions()[1].program_id_index as usize];
        assert_eq!(token_program, spl_token::id());
    }

    #[tokio::test]
    async fn token_transfer_skips_creation_when_sub_account_exists() {
        let mint = Pubkey::new_unique();
        let ledger = ledger_with_mint(mint, 6);
        let sender = Keypair::new();
        let recipient = Pubkey::new_unique();
        let recipient_ata = get_associated_token_address_with_program_id(
            &recipient,
            &mint,
            &spl_token::id(),
        );
        ledger.add_token_account(recipient_ata);

        let encoded = TransactionComposer::new()
            .fee_payer(sender.pubkey())
            .add_instruction(TransferToken {
                sender: sender.pubkey().to_string(),
                recipient: recipient.to_string(),
                mint: mint.to_string(),
                amount: 900_000,
                reference: None,
            })
            .build(&ledger)
            .await
            .unwrap();

        let tx = decode_transaction(&encoded).unwrap();
        assert_eq!(tx.message.instructions().len(), 1);
    }

    #[tokio::test]
    async fn composer_orders_prefix_builders_suffix_and_signs() {
        let mint = Pubkey::new_unique();
        let ledger = ledger_with_mint(mint, 0);
        let buyer = Keypair::new();
        let authority = std::sync::Arc::new(Keypair::new());
        let merchant = Pubkey::new_unique();

        let prefix = solana_system_interface::instruction::transfer(
            &buyer.pubkey(),
            &Pubkey::new_unique(),
            1,
        );

        let encoded = TransactionComposer::new()
            .fee_payer(buyer.pubkey())
            .add_raw_instructions_to_beginning([prefix.clone()])
            .add_instruction(BurnToken {
                mint: mint.to_string(),
                owner: buyer.pubkey().to_string(),
                amount: 5,
            })
            .add_instruction(TransferNative {
                sender: buyer.pubkey().to_string(),
                recipient: merchant.to_string(),
                amount: 10,
                reference: None,
            })
            .add_instruction(MintToken {
                funder: buyer.pubkey().to_string(),
                mint: mint.to_string(),
                mint_authority: authority.pubkey().to_string(),
                recipient: buyer.pubkey().to_string(),
                amount: 1,
            })
            .add_signer(authority.clone())
            .build(&ledger)
            .await
            .unwrap();

        let tx = decode_transaction(&encoded).unwrap();
        let keys = tx.message.static_account_keys();
        let programs: Vec<Pubkey> = tx
            .message
            .instructions()
            .iter()
            .map(|ix| keys[ix.program_id_index as usize])
            .collect();
        // prefix, burn, transfer, (create-ata), mint
        assert_eq!(programs[0], solana_system_interface::program::ID);
        assert_eq!(programs[1], spl_token::id());
        assert_eq!(programs[2], solana_system_interface::program::ID);
        assert_eq!(*programs.last().unwrap(), spl_token::id());

        // Two required signers: buyer (fee payer) and the mint authority;
        // only the authority signed at build time.
        assert_eq!(tx.message.header().num_required_signatures, 2);
        let authority_index = keys
            .iter()
            .position(|k| *k == authority.pubkey())
            .unwrap();
        assert_ne!(tx.signatures[authority_index], Signature::default());
        assert_eq!(tx.signatures[0], Signature::default());
    }

    #[tokio::test]
    async fn composer_requires_fee_payer_and_instructions() {
        let ledger = MemoryLedger::new();
        let err = TransactionComposer::new().build(&ledger).await.unwrap_err();
        assert!(matches!(err, LedgerError::Composer(_)));

        let err = TransactionComposer::new()
            .fee_payer(Pubkey::new_unique())
            .build(&ledger)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Composer(_)));
    }
}
