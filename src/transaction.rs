//! Legacy transaction message layout: header, compact-u16 arrays, blockhash.

use thiserror::Error;

use crate::instruction::{AccountMeta, Instruction};
use crate::signing::{SignerError, TransactionSigner, verify_signature};
use crate::types::{Hash, Pubkey, TxSignature};

const MAX_ACCOUNT_KEYS: usize = 256;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction has no instructions")]
    Empty,
    #[error("transaction references {0} accounts, max is {MAX_ACCOUNT_KEYS}")]
    TooManyAccounts(usize),
    #[error("malformed transaction: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageHeader {
    pub num_required_signatures: u8,
    pub num_readonly_signed: u8,
    pub num_readonly_unsigned: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub accounts: Vec<u8>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: MessageHeader,
    pub account_keys: Vec<Pubkey>,
    pub recent_blockhash: Hash,
    pub instructions: Vec<CompiledInstruction>,
}

fn encode_len(out: &mut Vec<u8>, mut len: usize) {
    loop {
        let mut byte = (len & 0x7f) as u8;
        len >>= 7;
        if len == 0 {
            out.push(byte);
            return;
        }
        byte |= 0x80;
        out.push(byte);
    }
}

fn decode_len(input: &mut &[u8]) -> Result<usize, TransactionError> {
    let mut len = 0usize;
    for shift in [0, 7, 14] {
        let (&byte, rest) = input.split_first().ok_or_else(|| TransactionError::Malformed("truncated length".into()))?;
        *input = rest;
        len |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            return Ok(len);
        }
    }
    Err(TransactionError::Malformed("length prefix too long".into()))
}

fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8], TransactionError> {
    if input.len() < n {
        return Err(TransactionError::Malformed("truncated".into()));
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

impl Message {
    /// Orders keys payer first, then writable signers, readonly signers,
    /// writable non-signers and readonly non-signers, each in first-seen order.
    pub fn compile(instructions: &[Instruction], payer: &Pubkey, recent_blockhash: Hash) -> Result<Self, TransactionError> {
        if instructions.is_empty() {
            return Err(TransactionError::Empty);
        }
        let mut metas: Vec<AccountMeta> = vec![AccountMeta::writable(*payer, true)];
        let mut merge = |meta: AccountMeta| {
            if let Some(existing) = metas.iter_mut().find(|m| m.pubkey == meta.pubkey) {
                existing.is_signer |= meta.is_signer;
                existing.is_writable |= meta.is_writable;
            } else {
                metas.push(meta);
            }
        };
        for ix in instructions {
            for meta in &ix.accounts {
                merge(meta.clone());
            }
            merge(AccountMeta::readonly(ix.program_id, false));
        }

        let (payer_meta, rest) = metas.split_at(1);
        let group = |signer: bool, writable: bool| {
            rest.iter().filter(move |m| m.is_signer == signer && m.is_writable == writable).cloned()
        };
        let ordered: Vec<AccountMeta> = payer_meta
            .iter()
            .cloned()
            .chain(group(true, true))
            .chain(group(true, false))
            .chain(group(false, true))
            .chain(group(false, false))
            .collect();
        if ordered.len() > MAX_ACCOUNT_KEYS {
            return Err(TransactionError::TooManyAccounts(ordered.len()));
        }

        let header = MessageHeader {
            num_required_signatures: ordered.iter().filter(|m| m.is_signer).count() as u8,
            num_readonly_signed: ordered.iter().filter(|m| m.is_signer && !m.is_writable).count() as u8,
            num_readonly_unsigned: ordered.iter().filter(|m| !m.is_signer && !m.is_writable).count() as u8,
        };
        let account_keys: Vec<Pubkey> = ordered.iter().map(|m| m.pubkey).collect();
        let index_of = |key: &Pubkey| account_keys.iter().position(|k| k == key).unwrap_or(0) as u8;
        let compiled = instructions
            .iter()
            .map(|ix| CompiledInstruction {
                program_id_index: index_of(&ix.program_id),
                accounts: ix.accounts.iter().map(|m| index_of(&m.pubkey)).collect(),
                data: ix.data.clone(),
            })
            .collect();

        Ok(Self { header, account_keys, recent_blockhash, instructions: compiled })
    }

    pub fn signer_keys(&self) -> &[Pubkey] {
        let n = (self.header.num_required_signatures as usize).min(self.account_keys.len());
        &self.account_keys[..n]
    }

    pub fn is_signer(&self, index: usize) -> bool {
        index < self.header.num_required_signatures as usize
    }

    pub fn is_writable(&self, index: usize) -> bool {
        let h = &self.header;
        if self.is_signer(index) {
            index < (h.num_required_signatures - h.num_readonly_signed) as usize
        } else {
            index < self.account_keys.len().saturating_sub(h.num_readonly_unsigned as usize)
        }
    }

    /// Rebuilds instructions with their account metas, for replaying a message.
    pub fn decompile(&self) -> Result<Vec<Instruction>, TransactionError> {
        let key = |i: u8| {
            self.account_keys
                .get(i as usize)
                .copied()
                .ok_or_else(|| TransactionError::Malformed(format!("account index {i} out of range")))
        };
        self.instructions
            .iter()
            .map(|ci| {
                let accounts = ci
                    .accounts
                    .iter()
                    .map(|&i| {
                        Ok(AccountMeta {
                            pubkey: key(i)?,
                            is_signer: self.is_signer(i as usize),
                            is_writable: self.is_writable(i as usize),
                        })
                    })
                    .collect::<Result<Vec<_>, TransactionError>>()?;
                Ok(Instruction { program_id: key(ci.program_id_index)?, accounts, data: ci.data.clone() })
            })
            .collect()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = vec![
            self.header.num_required_signatures,
            self.header.num_readonly_signed,
            self.header.num_readonly_unsigned,
        ];
        encode_len(&mut out, self.account_keys.len());
        for key in &self.account_keys {
            out.extend_from_slice(key.as_bytes());
        }
        out.extend_from_slice(&self.recent_blockhash.0);
        encode_len(&mut out, self.instructions.len());
        for ix in &self.instructions {
            out.push(ix.program_id_index);
            encode_len(&mut out, ix.accounts.len());
            out.extend_from_slice(&ix.accounts);
            encode_len(&mut out, ix.data.len());
            out.extend_from_slice(&ix.data);
        }
        out
    }

    pub fn deserialize(input: &mut &[u8]) -> Result<Self, TransactionError> {
        let h = take(input, 3)?;
        let header = MessageHeader { num_required_signatures: h[0], num_readonly_signed: h[1], num_readonly_unsigned: h[2] };
        let key_count = decode_len(input)?;
        let mut account_keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let mut bytes = [0u8; 32];
            bytes.copy_from_slice(take(input, 32)?);
            account_keys.push(Pubkey::new_from_array(bytes));
        }
        let mut blockhash = [0u8; 32];
        blockhash.copy_from_slice(take(input, 32)?);
        let ix_count = decode_len(input)?;
        let mut instructions = Vec::with_capacity(ix_count);
        for _ in 0..ix_count {
            let program_id_index = take(input, 1)?[0];
            let n = decode_len(input)?;
            let accounts = take(input, n)?.to_vec();
            let n = decode_len(input)?;
            let data = take(input, n)?.to_vec();
            instructions.push(CompiledInstruction { program_id_index, accounts, data });
        }
        if header.num_required_signatures as usize > account_keys.len()
            || header.num_readonly_signed > header.num_required_signatures
        {
            return Err(TransactionError::Malformed("inconsistent header".into()));
        }
        Ok(Self { header, account_keys, recent_blockhash: Hash(blockhash), instructions })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub signatures: Vec<TxSignature>,
    pub message: Message,
}

impl Transaction {
    /// Collects a signature from every required signer, in key order.
    pub async fn sign(message: Message, signers: &[&dyn TransactionSigner]) -> Result<Self, SignerError> {
        let bytes = message.serialize();
        let mut signatures = Vec::with_capacity(message.signer_keys().len());
        for key in message.signer_keys() {
            let signer = signers
                .iter()
                .find(|s| s.pubkey() == *key)
                .ok_or_else(|| SignerError::InvalidKey(format!("no signer for required key {key}")))?;
            signatures.push(signer.sign_message(&bytes).await?);
        }
        Ok(Self { signatures, message })
    }

    /// Transaction id: the fee payer's signature.
    pub fn id(&self) -> TxSignature {
        self.signatures.first().copied().unwrap_or_default()
    }

    pub fn verify(&self) -> bool {
        let bytes = self.message.serialize();
        let keys = self.message.signer_keys();
        keys.len() == self.signatures.len()
            && keys.iter().zip(&self.signatures).all(|(k, s)| verify_signature(k, &bytes, s))
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_len(&mut out, self.signatures.len());
        for sig in &self.signatures {
            out.extend_from_slice(&sig.0);
        }
        out.extend_from_slice(&self.message.serialize());
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut input = bytes;
        let n = decode_len(&mut input)?;
        let mut signatures = Vec::with_capacity(n);
        for _ in 0..n {
            let mut sig = [0u8; 64];
            sig.copy_from_slice(take(&mut input, 64)?);
            signatures.push(TxSignature(sig));
        }
        let message = Message::deserialize(&mut input)?;
        Ok(Self { signatures, message })
    }
}
