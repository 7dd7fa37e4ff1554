//! Gas-station wallet: key derivation and signed wallet-v4 transfers
//!
//! State-mutating contract calls are internal messages sent from this
//! wallet. The wallet accepts them wrapped in an external message signed
//! with its Ed25519 key.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha512;

use crate::cell::{Cell, CellBuilder, TonAddress};
use crate::error::{ConfigError, EncodingError};

const MNEMONIC_WORDS: usize = 24;
const SEED_SALT: &[u8] = b"TON default seed";
const SEED_ROUNDS: u32 = 100_000;

/// Send mode: pay forwarding fees separately, ignore action errors
pub const SEND_MODE_PAY_FEES_SEPARATELY: u8 = 3;

/// Ed25519 key of the gas-station wallet
#[derive(Clone)]
pub struct WalletKey {
    signing: SigningKey,
}

impl WalletKey {
    /// Derive the key from a 24-word mnemonic without password
    pub fn from_mnemonic(phrase: &str) -> Result<Self, ConfigError> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.len() != MNEMONIC_WORDS {
            return Err(ConfigError::InvalidMnemonic(format!(
                "expected {} words, got {}",
                MNEMONIC_WORDS,
                words.len()
            )));
        }
        let normalized = words.join(" ").to_lowercase();

        let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(normalized.as_bytes())
            .map_err(|e| ConfigError::InvalidMnemonic(e.to_string()))?;
        mac.update(b"");
        let entropy = mac.finalize().into_bytes();

        let mut seed = [0u8; 64];
        pbkdf2_hmac::<Sha512>(&entropy, SEED_SALT, SEED_ROUNDS, &mut seed);

        let mut secret = [0u8; 32];
        secret.copy_from_slice(&seed[..32]);
        Ok(Self::from_seed(secret))
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(&seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

/// Internal message from the wallet to a contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalMessage {
    pub destination: TonAddress,
    /// Attached value in nanotons
    pub value: u128,
    pub bounce: bool,
    pub body: Cell,
}

impl InternalMessage {
    pub fn to_cell(&self) -> Result<Cell, EncodingError> {
        let mut b = CellBuilder::new();
        b.store_bit(false)? // int_msg_info$0
            .store_bit(true)? // ihr_disabled
            .store_bit(self.bounce)?
            .store_bit(false)? // bounced
            .store_address(None)?
            .store_address(Some(&self.destination))?
            .store_coins(self.value)?
            .store_bit(false)? // no extra currencies
            .store_coins(0)? // ihr_fee
            .store_coins(0)? // fwd_fee
            .store_uint(0, 64)? // created_lt
            .store_uint(0, 32)? // created_at
            .store_bit(false)? // no state init
            .store_bit(true)? // body by reference
            .store_ref(self.body.clone())?;
        Ok(b.build())
    }

    pub fn from_cell(cell: &Cell) -> Result<Self, EncodingError> {
        let mut s = cell.parse();
        if s.load_bit()? {
            return Err(EncodingError::InvalidBoc("not an internal message".into()));
        }
        let _ihr_disabled = s.load_bit()?;
        let bounce = s.load_bit()?;
        let _bounced = s.load_bit()?;
        let _src = s.load_address()?;
        let destination = s
            .load_address()?
            .ok_or_else(|| EncodingError::InvalidAddress("missing destination".into()))?;
        let value = s.load_coins()?;
        if s.load_bit()? {
            return Err(EncodingError::InvalidBoc("extra currencies are not supported".into()));
        }
        s.load_coins()?;
        s.load_coins()?;
        s.load_uint(64)?;
        s.load_uint(32)?;
        if s.load_bit()? {
            return Err(EncodingError::InvalidBoc("state init is not supported".into()));
        }
        let body = if s.load_bit()? {
            s.load_ref()?.clone()
        } else {
            let mut rest = CellBuilder::new();
            while s.remaining_bits() > 0 {
                rest.store_bit(s.load_bit()?)?;
            }
            while s.remaining_refs() > 0 {
                rest.store_ref(s.load_ref()?.clone())?;
            }
            rest.build()
        };

        Ok(Self {
            destination,
            value,
            bounce,
            body,
        })
    }
}

/// A signed wallet-v4 transfer, as decoded from an external message
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub wallet: TonAddress,
    pub signature: [u8; 64],
    pub subwallet_id: u32,
    pub valid_until: u32,
    pub seqno: u32,
    pub send_mode: u8,
    pub message: InternalMessage,
    signed_hash: [u8; 32],
}

impl SignedTransfer {
    pub fn parse(external: &Cell) -> Result<Self, EncodingError> {
        let mut s = external.parse();
        if s.load_uint(2)? != 0b10 {
            return Err(EncodingError::InvalidBoc("not an external inbound message".into()));
        }
        let _src = s.load_address()?;
        let wallet = s
            .load_address()?
            .ok_or_else(|| EncodingError::InvalidAddress("missing wallet address".into()))?;
        s.load_coins()?;
        if s.load_bit()? {
            return Err(EncodingError::InvalidBoc("state init is not supported".into()));
        }
        if !s.load_bit()? {
            return Err(EncodingError::InvalidBoc("expected body by reference".into()));
        }
        let body = s.load_ref()?;

        let mut b = body.parse();
        let signature: [u8; 64] = b
            .load_bytes(64)?
            .try_into()
            .map_err(|_| EncodingError::InvalidBoc("short signature".into()))?;

        // Everything after the signature is what was signed
        let mut signed = CellBuilder::new();
        let mut rest = b.clone();
        while rest.remaining_bits() > 0 {
            signed.store_bit(rest.load_bit()?)?;
        }
        while rest.remaining_refs() > 0 {
            signed.store_ref(rest.load_ref()?.clone())?;
        }
        let signed_hash = signed.build().hash();

        let subwallet_id = b.load_uint(32)? as u32;
        let valid_until = b.load_uint(32)? as u32;
        let seqno = b.load_uint(32)? as u32;
        let op = b.load_uint(8)?;
        if op != 0 {
            return Err(EncodingError::InvalidBoc(format!("unsupported wallet op {}", op)));
        }
        let send_mode = b.load_uint(8)? as u8;
        let message = InternalMessage::from_cell(b.load_ref()?)?;

        Ok(Self {
            wallet,
            signature,
            subwallet_id,
            valid_until,
            seqno,
            send_mode,
            message,
            signed_hash,
        })
    }

    /// Check the signature against the wallet's public key
    pub fn verify(&self, public_key: &[u8; 32]) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(public_key) else {
            return false;
        };
        key.verify(&self.signed_hash, &Signature::from_bytes(&self.signature))
            .is_ok()
    }
}

/// Wallet v4 that pays for contract messages
#[derive(Clone)]
pub struct GasStationWallet {
    address: TonAddress,
    subwallet_id: u32,
    key: WalletKey,
}

impl GasStationWallet {
    pub fn new(address: TonAddress, subwallet_id: u32, key: WalletKey) -> Self {
        Self {
            address,
            subwallet_id,
            key,
        }
    }

    pub fn address(&self) -> &TonAddress {
        &self.address
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.public_key()
    }

    /// Build the signed external message carrying `message`
    pub fn transfer(
        &self,
        seqno: u32,
        valid_until: u32,
        message: &InternalMessage,
    ) -> Result<Cell, EncodingError> {
        let mut signing = CellBuilder::new();
        signing
            .store_uint(self.subwallet_id as u64, 32)?
            .store_uint(valid_until as u64, 32)?
            .store_uint(seqno as u64, 32)?
            .store_uint(0, 8)? // simple send
            .store_uint(SEND_MODE_PAY_FEES_SEPARATELY as u64, 8)?
            .store_ref(message.to_cell()?)?;
        let signing = signing.build();
        let signature = self.key.sign(&signing.hash());

        let mut body = CellBuilder::new();
        body.store_bytes(&signature)?.store_cell_contents(&signing)?;

        let mut external = CellBuilder::new();
        external
            .store_uint(0b10, 2)? // ext_in_msg_info
            .store_address(None)?
            .store_address(Some(&self.address))?
            .store_coins(0)? // import_fee
            .store_bit(false)? // no state init
            .store_bit(true)? // body by reference
            .store_ref(body.build())?;
        Ok(external.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHRASE: &str = "abandon ability able about above absent absorb abstract absurd abuse access accident \
                          account accuse achieve acid acoustic acquire across act action actor actress actual";

    fn wallet() -> GasStationWallet {
        GasStationWallet::new(
            TonAddress {
                workchain: 0,
                hash: [0x42; 32],
            },
            698_983_191,
            WalletKey::from_seed([7; 32]),
        )
    }

    fn message() -> InternalMessage {
        let mut body = CellBuilder::new();
        body.store_uint(0x1d2a_77e3, 32).unwrap().store_uint(99, 64).unwrap();
        InternalMessage {
            destination: TonAddress {
                workchain: 0,
                hash: [0x99; 32],
            },
            value: 50_000_000,
            bounce: true,
            body: body.build(),
        }
    }

    #[test]
    fn test_mnemonic_derivation_is_deterministic() {
        let a = WalletKey::from_mnemonic(PHRASE).unwrap();
        let spaced = format!("  {}  ", PHRASE.replace(' ', "\n"));
        let b = WalletKey::from_mnemonic(&spaced).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_ne!(a.public_key(), WalletKey::from_seed([0; 32]).public_key());
    }

    #[test]
    fn test_mnemonic_word_count() {
        assert!(matches!(
            WalletKey::from_mnemonic("abandon ability able"),
            Err(ConfigError::InvalidMnemonic(_))
        ));
    }

    #[test]
    fn test_internal_message_roundtrip() {
        let msg = message();
        let parsed = InternalMessage::from_cell(&msg.to_cell().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_transfer_is_signed_and_parseable() {
        let wallet = wallet();
        let external = wallet.transfer(17, 1_700_000_060, &message()).unwrap();

        let boc = Cell::from_boc(&external.to_boc()).unwrap();
        let transfer = SignedTransfer::parse(&boc).unwrap();

        assert_eq!(&transfer.wallet, wallet.address());
        assert_eq!(transfer.seqno, 17);
        assert_eq!(transfer.valid_until, 1_700_000_060);
        assert_eq!(transfer.subwallet_id, 698_983_191);
        assert_eq!(transfer.send_mode, SEND_MODE_PAY_FEES_SEPARATELY);
        assert_eq!(transfer.message, message());
        assert!(transfer.verify(&wallet.public_key()));
        assert!(!transfer.verify(&WalletKey::from_seed([8; 32]).public_key()));
    }
}
