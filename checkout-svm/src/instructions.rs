//! Instruction library: pure builders for the primitive on-chain actions a
//! payment transaction is stitched from.
//!
//! Each primitive is a typed parameter record implementing
//! [`InstructionBuilder`]: inputs are validated first, then the builder may
//! consult the ledger (existence checks, rent, mint facts) and returns zero
//! or more raw instructions. No builder performs any other I/O.

use async_trait::async_trait;
use solana_instruction::{AccountMeta, Instruction};
use solana_pubkey::Pubkey;
use solana_system_interface::instruction as system_instruction;
use spl_associated_token_account::get_associated_token_address_with_program_id;
use spl_associated_token_account::instruction::create_associated_token_account;
use spl_token_2022::extension::ExtensionType;
use spl_token_2022::state::Mint;
use spl_token_metadata_interface::state::{Field, TokenMetadata};

use crate::client::LedgerClient;
use crate::error::LedgerError;

/// A validated primitive that resolves into raw chain instructions.
#[async_trait]
pub trait InstructionBuilder: Send + Sync {
    /// Validates the parameters and produces the instructions.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidParameter`] for malformed inputs;
    /// [`LedgerError::Unavailable`] if a ledger lookup fails.
    async fn build(&self, ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError>;
}

fn parse_pubkey(value: &str, field: &str) -> Result<Pubkey, LedgerError> {
    value
        .parse()
        .map_err(|_| LedgerError::InvalidParameter(format!("{field} is not a valid address")))
}

fn require(condition: bool, message: &str) -> Result<(), LedgerError> {
    if condition {
        Ok(())
    } else {
        Err(LedgerError::InvalidParameter(message.into()))
    }
}

/// Appends the reference key as a read-only, non-signer account so the
/// transaction can be located by scanning the reference's history.
fn tag_with_reference(instruction: &mut Instruction, reference: Option<&Pubkey>) {
    if let Some(reference) = reference {
        instruction.accounts.push(AccountMeta {
            pubkey: *reference,
            is_signer: false,
            is_writable: false,
        });
    }
}

/// Attaches an attested note to the transaction.
#[derive(Debug, Clone)]
pub struct Memo {
    /// The note text. Must be non-empty.
    pub memo: String,
    /// Optional signer addresses attesting the note.
    pub signers: Vec<String>,
}

#[async_trait]
impl InstructionBuilder for Memo {
    async fn build(&self, _ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        require(!self.memo.is_empty(), "memo cannot be empty")?;
        let mut signers = Vec::with_capacity(self.signers.len());
        for signer in self.signers.iter().filter(|s| !s.is_empty()) {
            signers.push(parse_pubkey(signer, "memo signer")?);
        }
        let refs: Vec<&Pubkey> = signers.iter().collect();
        Ok(vec![spl_memo::build_memo(self.memo.as_bytes(), &refs)])
    }
}

/// Transfers lamports of the native coin.
#[derive(Debug, Clone)]
pub struct TransferNative {
    /// Base58 address of the sender. Must sign the transaction.
    pub sender: String,
    /// Base58 address of the recipient.
    pub recipient: String,
    /// Amount in lamports. Must be greater than zero.
    pub amount: u64,
    /// Optional reference key to tag the transfer with.
    pub reference: Option<String>,
}

impl TransferNative {
    fn validate(&self) -> Result<(Pubkey, Pubkey, Option<Pubkey>), LedgerError> {
        require(!self.sender.is_empty(), "sender is required")?;
        require(!self.recipient.is_empty(), "recipient is required")?;
        require(self.sender != self.recipient, "sender and recipient are the same")?;
        require(self.amount > 0, "amount must be greater than zero")?;
        let sender = parse_pubkey(&self.sender, "sender")?;
        let recipient = parse_pubkey(&self.recipient, "recipient")?;
        let reference = self
            .reference
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| parse_pubkey(r, "reference"))
            .transpose()?;
        Ok((sender, recipient, reference))
    }
}

#[async_trait]
impl InstructionBuilder for TransferNative {
    async fn build(&self, _ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        let (sender, recipient, reference) = self.validate()?;
        let mut instruction = system_instruction::transfer(&sender, &recipient, self.amount);
        tag_with_reference(&mut instruction, reference.as_ref());
        Ok(vec![instruction])
    }
}

/// Transfers SPL tokens between wallets, creating the recipient's
/// sub-account on the fly when it does not exist yet (funded by the sender).
#[derive(Debug, Clone)]
pub struct TransferToken {
    /// Base58 address of the sending wallet. Must sign the transaction.
    pub sender: String,
    /// Base58 address of the receiving wallet.
    pub recipient: String,
    /// Base58 mint address of the token to transfer.
    pub mint: String,
    /// Amount in the token's minimal units. Must be greater than zero.
    pub amount: u64,
    /// Optional reference key to tag the transfer with.
    pub reference: Option<String>,
}

#[async_trait]
impl InstructionBuilder for TransferToken {
    async fn build(&self, ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        require(!self.sender.is_empty(), "sender is required")?;
        require(!self.recipient.is_empty(), "recipient is required")?;
        require(self.sender != self.recipient, "sender and recipient are the same")?;
        require(!self.mint.is_empty(), "mint is required")?;
        require(self.amount > 0, "amount must be greater than zero")?;
        let sender = parse_pubkey(&self.sender, "sender")?;
        let recipient = parse_pubkey(&self.recipient, "recipient")?;
        let mint = parse_pubkey(&self.mint, "mint")?;
        let reference = self
            .reference
            .as_deref()
            .filter(|r| !r.is_empty())
            .map(|r| parse_pubkey(r, "reference"))
            .transpose()?;

        let info = ledger.mint_info(&mint).await?;
        let sender_ata =
            get_associated_token_address_with_program_id(&sender, &mint, &info.token_program);
        let recipient_ata =
            get_associated_token_address_with_program_id(&recipient, &mint, &info.token_program);

        let mut instructions = Vec::with_capacity(2);
        if !ledger.token_account_exists(&recipient_ata).await.unwrap_or(false) {
            instructions.push(create_associated_token_account(
                &sender,
                &recipient,
                &mint,
                &info.token_program,
            ));
        }

        let mut transfer = spl_token_2022::instruction::transfer_checked(
            &info.token_program,
            &sender_ata,
            &mint,
            &recipient_ata,
            &sender,
            &[],
            self.amount,
            info.decimals,
        )
        .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?;
        tag_with_reference(&mut transfer, reference.as_ref());
        instructions.push(transfer);
        Ok(instructions)
    }
}

/// Emits the sub-account creation instruction iff the derived sub-account
/// for `(owner, mint)` does not exist yet.
#[derive(Debug, Clone)]
pub struct EnsureSubAccount {
    /// Base58 address funding the account creation. Must sign.
    pub funder: String,
    /// Base58 address of the sub-account owner.
    pub owner: String,
    /// Base58 mint address.
    pub mint: String,
}

#[async_trait]
impl InstructionBuilder for EnsureSubAccount {
    async fn build(&self, ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        require(!self.funder.is_empty(), "funder is required")?;
        require(!self.owner.is_empty(), "owner is required")?;
        require(!self.mint.is_empty(), "mint is required")?;
        let funder = parse_pubkey(&self.funder, "funder")?;
        let owner = parse_pubkey(&self.owner, "owner")?;
        let mint = parse_pubkey(&self.mint, "mint")?;
        let info = ledger.mint_info(&mint).await?;
        let ata = get_associated_token_address_with_program_id(&owner, &mint, &info.token_program);
        if ledger.token_account_exists(&ata).await? {
            return Ok(vec![]);
        }
        Ok(vec![create_associated_token_account(
            &funder,
            &owner,
            &mint,
            &info.token_program,
        )])
    }
}

/// Creates a fungible token mint with inline metadata.
///
/// Allocates the mint account sized for the metadata-pointer extension,
/// initializes the mint and points its metadata at the mint account itself.
#[derive(Debug, Clone)]
pub struct CreateFungible {
    /// Base58 address of the new mint account. Must sign.
    pub mint: String,
    /// Base58 address of the mint and metadata authority. Must sign.
    pub owner: String,
    /// Base58 address paying rent and fees. Must sign.
    pub fee_payer: String,
    /// Number of decimals of the new token.
    pub decimals: u8,
    /// Token name, 2..=32 characters.
    pub name: String,
    /// Token symbol, 2..=10 characters.
    pub symbol: String,
    /// Optional off-chain metadata URI.
    pub metadata_uri: Option<String>,
}

impl CreateFungible {
    fn validate(&self) -> Result<(), LedgerError> {
        require(!self.mint.is_empty(), "mint is required")?;
        require(!self.owner.is_empty(), "owner is required")?;
        require(!self.fee_payer.is_empty(), "fee payer is required")?;
        require(
            (2..=32).contains(&self.name.len()),
            "token name must be between 2 and 32 characters",
        )?;
        require(
            (2..=10).contains(&self.symbol.len()),
            "token symbol must be between 2 and 10 characters",
        )?;
        if let Some(uri) = self.metadata_uri.as_deref() {
            require(
                uri.starts_with("http://") || uri.starts_with("https://"),
                "metadata uri must be a valid URI",
            )?;
        }
        Ok(())
    }
}

#[async_trait]
impl InstructionBuilder for CreateFungible {
    async fn build(&self, ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        self.validate()?;
        let mint = parse_pubkey(&self.mint, "mint")?;
        let owner = parse_pubkey(&self.owner, "owner")?;
        let fee_payer = parse_pubkey(&self.fee_payer, "fee_payer")?;
        let token_program = spl_token_2022::id();

        let metadata = TokenMetadata {
            name: self.name.clone(),
            symbol: self.symbol.clone(),
            uri: self.metadata_uri.clone().unwrap_or_default(),
            ..TokenMetadata::default()
        };
        let base_size =
            ExtensionType::try_calculate_account_len::<Mint>(&[ExtensionType::MetadataPointer])
                .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?;
        let metadata_size = metadata
            .tlv_size_of()
            .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?;
        let rent = ledger.rent_exempt_min(base_size + metadata_size).await?;

        Ok(vec![
            system_instruction::create_account(
                &fee_payer,
                &mint,
                rent,
                base_size as u64,
                &token_program,
            ),
            spl_token_2022::extension::metadata_pointer::instruction::initialize(
                &token_program,
                &mint,
                Some(owner),
                Some(mint),
            )
            .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?,
            spl_token_2022::instruction::initialize_mint2(
                &token_program,
                &mint,
                &owner,
                Some(&owner),
                self.decimals,
            )
            .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?,
            spl_token_metadata_interface::instruction::initialize(
                &token_program,
                &mint,
                &owner,
                &mint,
                &owner,
                self.name.clone(),
                self.symbol.clone(),
                self.metadata_uri.clone().unwrap_or_default(),
            ),
        ])
    }
}

/// Rewrites the inline metadata URI of a fungible token.
#[derive(Debug, Clone)]
pub struct UpdateFungibleMetadata {
    /// Base58 mint address of the token.
    pub mint: String,
    /// Base58 address of the metadata update authority. Must sign.
    pub update_authority: String,
    /// New off-chain metadata URI.
    pub metadata_uri: String,
}

#[async_trait]
impl InstructionBuilder for UpdateFungibleMetadata {
    async fn build(&self, _ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        require(!self.mint.is_empty(), "mint is required")?;
        require(!self.update_authority.is_empty(), "update authority is required")?;
        require(
            self.metadata_uri.starts_with("http://") || self.metadata_uri.starts_with("https://"),
            "metadata uri must be a valid URI",
        )?;
        let mint = parse_pubkey(&self.mint, "mint")?;
        let authority = parse_pubkey(&self.update_authority, "update_authority")?;
        Ok(vec![spl_token_metadata_interface::instruction::update_field(
            &spl_token_2022::id(),
            &mint,
            &authority,
            Field::Uri,
            self.metadata_uri.clone(),
        )])
    }
}

/// Mints tokens to a wallet, creating its sub-account when missing.
#[derive(Debug, Clone)]
pub struct MintToken {
    /// Base58 address funding a sub-account creation. Must sign.
    pub funder: String,
    /// Base58 mint address.
    pub mint: String,
    /// Base58 address of the mint authority. Must sign.
    pub mint_authority: String,
    /// Base58 address of the receiving wallet.
    pub recipient: String,
    /// Amount in minimal units. Must be greater than zero.
    pub amount: u64,
}

#[async_trait]
impl InstructionBuilder for MintToken {
    async fn build(&self, ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        require(!self.funder.is_empty(), "funder is required")?;
        require(!self.mint.is_empty(), "mint is required")?;
        require(!self.mint_authority.is_empty(), "mint authority is required")?;
        require(!self.recipient.is_empty(), "recipient is required")?;
        require(self.amount > 0, "amount must be greater than zero")?;
        let funder = parse_pubkey(&self.funder, "funder")?;
        let mint = parse_pubkey(&self.mint, "mint")?;
        let authority = parse_pubkey(&self.mint_authority, "mint_authority")?;
        let recipient = parse_pubkey(&self.recipient, "recipient")?;

        let info = ledger.mint_info(&mint).await?;
        let ata =
            get_associated_token_address_with_program_id(&recipient, &mint, &info.token_program);

        let mut instructions = Vec::with_capacity(2);
        if !ledger.token_account_exists(&ata).await.unwrap_or(false) {
            instructions.push(create_associated_token_account(
                &funder,
                &recipient,
                &mint,
                &info.token_program,
            ));
        }
        instructions.push(
            spl_token_2022::instruction::mint_to(
                &info.token_program,
                &mint,
                &ata,
                &authority,
                &[],
                self.amount,
            )
            .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?,
        );
        Ok(instructions)
    }
}

/// Burns tokens from the owner's sub-account.
#[derive(Debug, Clone)]
pub struct BurnToken {
    /// Base58 mint address.
    pub mint: String,
    /// Base58 address of the sub-account owner. Must sign.
    pub owner: String,
    /// Amount in minimal units. Must be greater than zero.
    pub amount: u64,
}

#[async_trait]
impl InstructionBuilder for BurnToken {
    async fn build(&self, ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        require(!self.mint.is_empty(), "mint is required")?;
        require(!self.owner.is_empty(), "owner is required")?;
        require(self.amount > 0, "amount must be greater than zero")?;
        let mint = parse_pubkey(&self.mint, "mint")?;
        let owner = parse_pubkey(&self.owner, "owner")?;
        let info = ledger.mint_info(&mint).await?;
        let ata = get_associated_token_address_with_program_id(&owner, &mint, &info.token_program);
        Ok(vec![
            spl_token_2022::instruction::burn(
                &info.token_program,
                &ata,
                &mint,
                &owner,
                &[],
                self.amount,
            )
            .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?,
        ])
    }
}

/// Closes a token sub-account, reclaiming its rent.
#[derive(Debug, Clone)]
pub struct CloseAccount {
    /// Base58 address of the account owner. Must sign.
    pub owner: String,
    /// Base58 address of the token account to close. Derived from
    /// `(owner, mint)` when unset.
    pub token_account: Option<String>,
    /// Base58 mint address; required when `token_account` is unset.
    pub mint: Option<String>,
    /// Base58 address receiving the reclaimed rent; the owner when unset.
    pub rent_recipient: Option<String>,
}

#[async_trait]
impl InstructionBuilder for CloseAccount {
    async fn build(&self, ledger: &dyn LedgerClient) -> Result<Vec<Instruction>, LedgerError> {
        require(!self.owner.is_empty(), "owner is required")?;
        require(
            self.token_account.is_some() || self.mint.is_some(),
            "token account or mint is required",
        )?;
        let owner = parse_pubkey(&self.owner, "owner")?;
        let rent_recipient = self
            .rent_recipient
            .as_deref()
            .map(|r| parse_pubkey(r, "rent_recipient"))
            .transpose()?
            .unwrap_or(owner);
        let (account, token_program) = match (&self.token_account, &self.mint) {
            (Some(account), _) => {
                (parse_pubkey(account, "token_account")?, spl_token::id())
            }
            (None, Some(mint)) => {
                let mint = parse_pubkey(mint, "mint")?;
                let info = ledger.mint_info(&mint).await?;
                (
                    get_associated_token_address_with_program_id(
                        &owner,
                        &mint,
                        &info.token_program,
                    ),
                    info.token_program,
                )
            }
            (None, None) => unreachable!("checked above"),
        };
        Ok(vec![
            spl_token_2022::instruction::close_account(
                &token_program,
                &account,
                &rent_recipient,
                &owner,
                &[],
            )
            .map_err(|e| LedgerError::InvalidParameter(e.to_string()))?,
        ])
    }
}
