//! Payment attempt builder: applies the loyalty policy and composes the
//! swap, burn, transfer and accrual mint into one transaction.

use checkout_svm::instructions::{BurnToken, Memo, MintToken, TransferNative, TransferToken};
use checkout_svm::swap::BestSwapParams;
use checkout_svm::transaction::{decode_transaction, decompile_instructions};
use checkout_svm::{LedgerClient, SwapClient, TransactionComposer};
use solana_keypair::Keypair;
use solana_pubkey::Pubkey;
use solana_signer::Signer;
use uuid::Uuid;

use super::entity::{Attempt, AttemptDraft, AttemptStatus, Payment};
use super::{mints, PaymentConfig};
use crate::error::Error;

/// One-shot builder for a payment attempt.
///
/// A fresh reference keypair is generated per builder; only its public
/// address survives — it is injected into the transfer instruction and
/// written to the attempt record, the secret key is discarded.
pub struct PaymentBuilder<'a> {
    ledger: &'a dyn LedgerClient,
    swap: &'a dyn SwapClient,
    config: &'a PaymentConfig,
    reference: String,
}

impl std::fmt::Debug for PaymentBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentBuilder")
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

impl<'a> PaymentBuilder<'a> {
    /// Creates a builder with a freshly generated reference key.
    #[must_use]
    pub fn new(
        ledger: &'a dyn LedgerClient,
        swap: &'a dyn SwapClient,
        config: &'a PaymentConfig,
    ) -> Self {
        let reference = Keypair::new().pubkey().to_string();
        Self {
            ledger,
            swap,
            config,
            reference,
        }
    }

    /// The reference address embedded into the built transaction.
    #[must_use]
    pub fn reference_address(&self) -> &str {
        &self.reference
    }

    /// Builds the serialized transaction and the fully populated attempt
    /// record for `draft` against its parent `payment`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParameter`] for malformed inputs,
    /// [`Error::SwapUnavailable`] when a needed swap quote fails, and
    /// ledger failures verbatim.
    pub async fn build(
        &self,
        payment: &Payment,
        draft: &AttemptDraft,
    ) -> Result<(String, Attempt), Error> {
        let destination_mint =
            mints::mint_address(&payment.destination_mint, &self.config.destination_mint);
        let destination_wallet = if payment.destination_wallet.is_empty() {
            self.config.destination_wallet.clone()
        } else {
            payment.destination_wallet.clone()
        };
        let source_mint =
            mints::mint_address(draft.source_mint.as_deref().unwrap_or(""), &destination_mint);

        self.validate(draft, &destination_wallet, &destination_mint, payment.amount)?;
        let source_wallet: Pubkey = draft
            .source_wallet
            .parse()
            .map_err(|_| Error::InvalidParameter("source wallet is not a valid address".into()))?;

        let discount_amount = self.discount(&source_wallet, draft, payment.amount).await;
        let total_amount = payment.amount.saturating_sub(discount_amount);
        let accrued_bonus_amount = if self.config.accrue_bonus {
            total_amount * self.config.accrue_bonus_rate / 10_000
        } else {
            0
        };

        let mut composer = TransactionComposer::new().fee_payer(source_wallet);

        // Swap prefix: the decompiled provider instructions fund the
        // transfer that follows them.
        if source_mint != destination_mint {
            let swap_tx = self
                .swap
                .best_swap(BestSwapParams {
                    user_wallet: draft.source_wallet.clone(),
                    input_mint: source_mint.clone(),
                    output_mint: destination_mint.clone(),
                    amount: total_amount,
                })
                .await?;
            let swap_tx = decode_transaction(&swap_tx)?;
            composer = composer
                .add_raw_instructions_to_beginning(decompile_instructions(&swap_tx.message)?);
        }

        if discount_amount > 0 {
            composer = composer.add_instruction(BurnToken {
                mint: self.config.bonus_mint.clone(),
                owner: draft.source_wallet.clone(),
                amount: discount_amount,
            });
        }

        if mints::is_sol(&destination_mint) {
            composer = composer.add_instruction(TransferNative {
                sender: draft.source_wallet.clone(),
                recipient: destination_wallet.clone(),
                amount: total_amount,
                reference: Some(self.reference.clone()),
            });
        } else {
            composer = composer.add_instruction(TransferToken {
                sender: draft.source_wallet.clone(),
                recipient: destination_wallet.clone(),
                mint: destination_mint.clone(),
                amount: total_amount,
                reference: Some(self.reference.clone()),
            });
        }

        if accrued_bonus_amount > 0 {
            let authority = self
                .config
                .bonus_authority
                .as_ref()
                .ok_or_else(|| Error::Fatal("bonus mint authority is not configured".into()))?;
            composer = composer
                .add_instruction(MintToken {
                    funder: draft.source_wallet.clone(),
                    mint: self.config.bonus_mint.clone(),
                    mint_authority: authority.pubkey().to_string(),
                    recipient: draft.source_wallet.clone(),
                    amount: accrued_bonus_amount,
                })
                .add_signer(std::sync::Arc::clone(authority));
        }

        if let Some(memo) = payment.external_id.as_deref().filter(|m| !m.is_empty()) {
            composer = composer.add_instruction(Memo {
                memo: memo.to_owned(),
                signers: vec![],
            });
        }

        let serialized = composer.build(self.ledger).await?;

        let attempt = Attempt {
            id: Uuid::new_v4(),
            payment_id: payment.id,
            reference: self.reference.clone(),
            source_wallet: draft.source_wallet.clone(),
            source_mint,
            destination_wallet,
            destination_mint,
            amount: payment.amount,
            discount_amount,
            total_amount,
            accrued_bonus_amount,
            message: payment.message.clone(),
            memo: payment.external_id.clone(),
            apply_bonus: draft.apply_bonus,
            tx_signature: None,
            status: AttemptStatus::Pending,
        };
        Ok((serialized, attempt))
    }

    fn validate(
        &self,
        draft: &AttemptDraft,
        destination_wallet: &str,
        destination_mint: &str,
        amount: u64,
    ) -> Result<(), Error> {
        if draft.source_wallet.is_empty() {
            return Err(Error::InvalidParameter("source wallet is required".into()));
        }
        if destination_wallet.is_empty() {
            return Err(Error::InvalidParameter("destination wallet is required".into()));
        }
        if destination_mint.is_empty() {
            return Err(Error::InvalidParameter("destination mint is required".into()));
        }
        if amount == 0 {
            return Err(Error::InvalidParameter("amount is required".into()));
        }
        if draft.apply_bonus && self.config.apply_bonus && self.config.bonus_mint.is_empty() {
            return Err(Error::InvalidParameter("bonus mint is not configured".into()));
        }
        Ok(())
    }

    /// Discount from burning bonus, bounded by the buyer's balance, the
    /// payment amount, and the policy caps. A failed balance lookup means
    /// no discount; it never fails the build.
    async fn discount(&self, source_wallet: &Pubkey, draft: &AttemptDraft, amount: u64) -> u64 {
        if !(draft.apply_bonus && self.config.apply_bonus) {
            return 0;
        }
        let Ok(bonus_mint) = self.config.bonus_mint.parse::<Pubkey>() else {
            return 0;
        };
        let available = self
            .ledger
            .balance_token(source_wallet, &bonus_mint)
            .await
            .map(|balance| balance.amount)
            .unwrap_or(0);
        if available == 0 {
            return 0;
        }
        let mut cap = available.min(amount);
        if self.config.max_apply_bonus_amount > 0 {
            cap = cap.min(self.config.max_apply_bonus_amount);
        }
        if self.config.max_apply_bonus_percent > 0 {
            cap = cap.min(amount * u64::from(self.config.max_apply_bonus_percent) / 10_000);
        }
        cap
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::entity::PaymentStatus;
    use crate::payments::mints;
    use checkout_svm::testing::{MemoryLedger, MemorySwap};
    use checkout_svm::transaction::encode_transaction;
    use solana_message::{Message, VersionedMessage};
    use solana_signature::Signature;
    use solana_transaction::versioned::VersionedTransaction;
    use spl_associated_token_account::get_associated_token_address_with_program_id;
    use std::sync::Arc;

    const MERCHANT: &str = "8Kv5Nc2x1zUYGSHrmnPbhBPvsQbVRcH1zdAB6qZrK1cV";

    fn no_bonus_config() -> PaymentConfig {
        PaymentConfig {
            apply_bonus: false,
            bonus_mint: String::new(),
            bonus_authority: None,
            max_apply_bonus_amount: 0,
            max_apply_bonus_percent: 0,
            accrue_bonus: false,
            accrue_bonus_rate: 0,
            destination_wallet: MERCHANT.into(),
            destination_mint: "SOL".into(),
            payment_ttl: std::time::Duration::from_secs(900),
            pay_base_url: "https://pay.example.com".into(),
        }
    }

    fn payment(amount: u64, destination_mint: &str) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            external_id: None,
            destination_wallet: MERCHANT.into(),
            destination_mint: destination_mint.into(),
            amount,
            status: PaymentStatus::New,
            message: None,
            expires_at: None,
        }
    }

    fn draft(source_wallet: &Pubkey, source_mint: Option<&str>, apply_bonus: bool) -> AttemptDraft {
        AttemptDraft {
            payment_id: Uuid::new_v4(),
            source_wallet: source_wallet.to_string(),
            source_mint: source_mint.map(Into::into),
            apply_bonus,
        }
    }

    fn instruction_programs(tx: &VersionedTransaction) -> Vec<Pubkey> {
        let keys = tx.message.static_account_keys();
        tx.message
            .instructions()
            .iter()
            .map(|ix| keys[ix.program_id_index as usize])
            .collect()
    }

    #[tokio::test]
    async fn native_happy_path_builds_one_tagged_transfer() {
        let ledger = MemoryLedger::new();
        let swap = MemorySwap::new();
        let config = no_bonus_config();
        let buyer = Keypair::new();

        let builder = PaymentBuilder::new(&ledger, &swap, &config);
        let reference = builder.reference_address().to_owned();
        let (serialized, attempt) = builder
            .build(
                &payment(2_500_000, "SOL"),
                &draft(&buyer.pubkey(), None, false),
            )
            .await
            .unwrap();

        assert_eq!(attempt.reference, reference);
        assert_eq!(attempt.amount, 2_500_000);
        assert_eq!(attempt.discount_amount, 0);
        assert_eq!(attempt.total_amount, 2_500_000);
        assert_eq!(attempt.accrued_bonus_amount, 0);
        assert_eq!(attempt.destination_mint, mints::SOL);
        assert_eq!(attempt.status, AttemptStatus::Pending);

        let tx = decode_transaction(&serialized).unwrap();
        assert_eq!(tx.message.instructions().len(), 1);
        assert_eq!(tx.message.header().num_required_signatures, 1);
        let keys = tx.message.static_account_keys();
        assert_eq!(keys[0], buyer.pubkey());
        let reference_key: Pubkey = reference.parse().unwrap();
        let transfer = &tx.message.instructions()[0];
        let last = *transfer.accounts.last().unwrap() as usize;
        assert_eq!(keys[last], reference_key);
        // no swap was consulted
        assert!(swap.requests().is_empty());
    }

    #[tokio::test]
    async fn token_discount_respects_the_tightest_cap() {
        let ledger = MemoryLedger::new();
        let swap = MemorySwap::new();
        let buyer = Keypair::new();
        let bonus_mint = Pubkey::new_unique();
        let usdc: Pubkey = mints::USDC.parse().unwrap();
        ledger.add_mint(usdc, 6, spl_token::id());
        ledger.add_mint(bonus_mint, 6, spl_token::id());
        // buyer holds 500_000 bonus and both buyer-side sub-accounts exist
        ledger.set_token_balance(buyer.pubkey(), bonus_mint, 500_000, 6);
        ledger.add_token_account(get_associated_token_address_with_program_id(
            &buyer.pubkey(),
            &bonus_mint,
            &spl_token::id(),
        ));
        ledger.add_token_account(get_associated_token_address_with_program_id(
            &buyer.pubkey(),
            &usdc,
            &spl_token::id(),
        ));

        let authority = Arc::new(Keypair::new());
        let config = PaymentConfig {
            apply_bonus: true,
            bonus_mint: bonus_mint.to_string(),
            bonus_authority: Some(Arc::clone(&authority)),
            max_apply_bonus_amount: 200_000,
            max_apply_bonus_percent: 1_000,
            accrue_bonus: true,
            accrue_bonus_rate: 100,
            ..no_bonus_config()
        };

        let builder = PaymentBuilder::new(&ledger, &swap, &config);
        let (serialized, attempt) = builder
            .build(
                &payment(1_000_000, "USDC"),
                &draft(&buyer.pubkey(), Some("USDC"), true),
            )
            .await
            .unwrap();

        // percent cap (10% of 1_000_000) is the tightest bound
        assert_eq!(attempt.discount_amount, 100_000);
        assert_eq!(attempt.total_amount, 900_000);
        assert_eq!(attempt.total_amount + attempt.discount_amount, attempt.amount);
        // 1% accrual on the paid total
        assert_eq!(attempt.accrued_bonus_amount, 9_000);

        let tx = decode_transaction(&serialized).unwrap();
        let programs = instruction_programs(&tx);
        // burn, create merchant sub-account, transfer, mint accrual
        assert_eq!(
            programs,
            vec![
                spl_token::id(),
                spl_associated_token_account::id(),
                spl_token::id(),
                spl_token::id(),
            ]
        );
        let instructions = tx.message.instructions();
        // burn moves exactly the discount
        assert_eq!(instructions[0].data[0], 8);
        assert_eq!(
            u64::from_le_bytes(instructions[0].data[1..9].try_into().unwrap()),
            100_000
        );
        // transfer-checked moves exactly the total
        assert_eq!(instructions[2].data[0], 12);
        assert_eq!(
            u64::from_le_bytes(instructions[2].data[1..9].try_into().unwrap()),
            900_000
        );
        // accrual mint signs with the configured authority
        let keys = tx.message.static_account_keys();
        let authority_index = keys
            .iter()
            .position(|k| *k == authority.pubkey())
            .unwrap();
        assert_ne!(tx.signatures[authority_index], Signature::default());
    }

    #[tokio::test]
    async fn discount_defaults_to_zero_when_balance_lookup_fails() {
        let ledger = MemoryLedger::new();
        let swap = MemorySwap::new();
        let buyer = Keypair::new();
        let bonus_mint = Pubkey::new_unique();
        let usdc: Pubkey = mints::USDC.parse().unwrap();
        ledger.add_mint(usdc, 6, spl_token::id());
        ledger.fail_token_balances();

        let config = PaymentConfig {
            apply_bonus: true,
            bonus_mint: bonus_mint.to_string(),
            ..no_bonus_config()
        };
        let builder = PaymentBuilder::new(&ledger, &swap, &config);
        let (_, attempt) = builder
            .build(
                &payment(1_000_000, "USDC"),
                &draft(&buyer.pubkey(), Some("USDC"), true),
            )
            .await
            .unwrap();
        assert_eq!(attempt.discount_amount, 0);
        assert_eq!(attempt.total_amount, 1_000_000);
    }

    #[tokio::test]
    async fn swap_prefix_precedes_the_transfer_verbatim() {
        let ledger = MemoryLedger::new();
        let swap = MemorySwap::new();
        let buyer = Keypair::new();
        let usdc: Pubkey = mints::USDC.parse().unwrap();
        ledger.add_mint(usdc, 6, spl_token::id());

        // canned provider transaction with two recognizable instructions
        let swap_program = Pubkey::new_unique();
        let swap_ixs = vec![
            solana_instruction::Instruction {
                program_id: swap_program,
                accounts: vec![solana_instruction::AccountMeta::new(buyer.pubkey(), true)],
                data: vec![1, 2, 3],
            },
            solana_instruction::Instruction {
                program_id: swap_program,
                accounts: vec![solana_instruction::AccountMeta::new(buyer.pubkey(), true)],
                data: vec![4, 5, 6],
            },
        ];
        let swap_tx = VersionedTransaction {
            signatures: vec![Signature::default()],
            message: VersionedMessage::Legacy(Message::new(&swap_ixs, Some(&buyer.pubkey()))),
        };
        swap.set_transaction(encode_transaction(&swap_tx).unwrap());

        let config = no_bonus_config();
        let builder = PaymentBuilder::new(&ledger, &swap, &config);
        let (serialized, attempt) = builder
            .build(
                &payment(1_000_000, "USDC"),
                &draft(&buyer.pubkey(), Some("SOL"), false),
            )
            .await
            .unwrap();
        assert_eq!(attempt.source_mint, mints::SOL);
        assert_eq!(attempt.destination_mint, mints::USDC);

        // the swap was asked to produce exactly the transferred total
        let requests = swap.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].amount, attempt.total_amount);
        assert_eq!(requests[0].input_mint, mints::SOL);
        assert_eq!(requests[0].output_mint, mints::USDC);

        let tx = decode_transaction(&serialized).unwrap();
        let programs = instruction_programs(&tx);
        // both provider instructions first, untouched
        assert_eq!(programs[0], swap_program);
        assert_eq!(programs[1], swap_program);
        assert_eq!(tx.message.instructions()[0].data, vec![1, 2, 3]);
        assert_eq!(tx.message.instructions()[1].data, vec![4, 5, 6]);
        // then sub-account creation and the token transfer
        assert_eq!(programs[2], spl_associated_token_account::id());
        assert_eq!(programs[3], spl_token::id());
    }

    #[tokio::test]
    async fn each_builder_generates_a_fresh_reference() {
        let ledger = MemoryLedger::new();
        let swap = MemorySwap::new();
        let config = no_bonus_config();
        let first = PaymentBuilder::new(&ledger, &swap, &config);
        let second = PaymentBuilder::new(&ledger, &swap, &config);
        assert_ne!(first.reference_address(), second.reference_address());
    }
}
