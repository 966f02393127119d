//! Transaction composer: accumulates instruction builders, raw instruction
//! buffers and signers, then resolves everything against the ledger into a
//! base64-encoded, partially signed transaction.

use std::sync::Arc;

use solana_instruction::Instruction;
use solana_keypair::Keypair;
use solana_message::{AddressLookupTableAccount, VersionedMessage, v0};
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_transaction::versioned::VersionedTransaction;

use crate::client::LedgerClient;
use crate::error::LedgerError;
use crate::instructions::InstructionBuilder;
use crate::transaction::{encode_transaction, partially_sign};

/// Builder for a single payment transaction.
///
/// Instructions resolve in order: raw prefix, then the registered
/// [`InstructionBuilder`]s, then raw suffix. The composer makes no policy
/// decisions; callers own the ordering.
#[derive(Default)]
pub struct TransactionComposer {
    fee_payer: Option<Pubkey>,
    instructions: Vec<Box<dyn InstructionBuilder>>,
    raw_before: Vec<Instruction>,
    raw_after: Vec<Instruction>,
    signers: Vec<Arc<Keypair>>,
    lookup_tables: Vec<AddressLookupTableAccount>,
}

impl std::fmt::Debug for TransactionComposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionComposer")
            .field("fee_payer", &self.fee_payer)
            .field("instructions", &self.instructions.len())
            .field("raw_before", &self.raw_before.len())
            .field("raw_after", &self.raw_after.len())
            .field("signers", &self.signers.len())
            .finish_non_exhaustive()
    }
}

impl TransactionComposer {
    /// Creates an empty composer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction fee payer. Required before [`Self::build`].
    #[must_use]
    pub fn fee_payer(mut self, fee_payer: Pubkey) -> Self {
        self.fee_payer = Some(fee_payer);
        self
    }

    /// Appends an instruction builder.
    #[must_use]
    pub fn add_instruction(mut self, instruction: impl InstructionBuilder + 'static) -> Self {
        self.instructions.push(Box::new(instruction));
        self
    }

    /// Prepends raw instructions before everything else.
    #[must_use]
    pub fn add_raw_instructions_to_beginning(
        mut self,
        instructions: impl IntoIterator<Item = Instruction>,
    ) -> Self {
        self.raw_before.extend(instructions);
        self
    }

    /// Appends raw instructions after everything else.
    #[must_use]
    pub fn add_raw_instructions_to_end(
        mut self,
        instructions: impl IntoIterator<Item = Instruction>,
    ) -> Self {
        self.raw_after.extend(instructions);
        self
    }

    /// Registers a keypair whose signature is attached at build time.
    #[must_use]
    pub fn add_signer(mut self, signer: Arc<Keypair>) -> Self {
        self.signers.push(signer);
        self
    }

    /// Registers an address lookup table for message compilation.
    #[must_use]
    pub fn add_lookup_table(mut self, table: AddressLookupTableAccount) -> Self {
        self.lookup_tables.push(table);
        self
    }

    fn validate(&self) -> Result<Pubkey, LedgerError> {
        let fee_payer = self
            .fee_payer
            .ok_or_else(|| LedgerError::Composer("fee payer is not set".into()))?;
        if self.instructions.is_empty() {
            return Err(LedgerError::Composer("no instructions to build".into()));
        }
        Ok(fee_payer)
    }

    /// Resolves the accumulated builders in order.
    async fn prepare_instructions(
        &self,
        ledger: &dyn LedgerClient,
    ) -> Result<Vec<Instruction>, LedgerError> {
        let mut instructions = self.raw_before.clone();
        for builder in &self.instructions {
            instructions.extend(builder.build(ledger).await?);
        }
        instructions.extend(self.raw_after.iter().cloned());
        Ok(instructions)
    }

    /// Builds the transaction: resolve instructions, fetch a recent
    /// blockhash, compile the message, attach the registered signatures and
    /// return the base64 wire form.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Composer`] on missing fee payer or instructions, any
    /// builder error verbatim, [`LedgerError::Unavailable`] if the
    /// blockhash fetch fails.
    pub async fn build(&self, ledger: &dyn LedgerClient) -> Result<String, LedgerError> {
        let fee_payer = self.validate()?;
        let instructions = self.prepare_instructions(ledger).await?;
        let blockhash = ledger.latest_blockhash().await?;

        let message =
            v0::Message::try_compile(&fee_payer, &instructions, &self.lookup_tables, blockhash)
                .map_err(|e| LedgerError::Composer(e.to_string()))?;
        let message = VersionedMessage::V0(message);
        let num_required = message.header().num_required_signatures as usize;
        let mut tx = VersionedTransaction {
            signatures: vec![Signature::default(); num_required],
            message,
        };
        let signers: Vec<&Keypair> = self.signers.iter().map(Arc::as_ref).collect();
        partially_sign(&mut tx, &signers)?;
        encode_transaction(&tx)
    }
}
