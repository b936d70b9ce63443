//! EIP-712 signing of verified transfers
//!
//! The NFT contract recovers the signer from the typed-data hash, so the
//! struct layout and domain fields here must match the contract exactly.

use alloy::primitives::{Address, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use eyre::{eyre, Result, WrapErr};

pub const DOMAIN_NAME: &str = "FerryBridgeAttestation";
pub const DOMAIN_VERSION: &str = "1";

sol! {
    /// Typed payload signed for each issued attestation
    #[derive(Debug, PartialEq, Eq)]
    struct BridgeAttestation {
        address bridger;
        bytes32 messageId;
        uint256 amount;
        uint256 timestamp;
        uint16 sourceChain;
        uint16 destChain;
        bytes32 txHash;
        uint256 logIndex;
    }
}

/// Signs [`BridgeAttestation`]s under the NFT contract's domain
pub struct AttestationSigner {
    signer: PrivateKeySigner,
    domain: Eip712Domain,
}

impl AttestationSigner {
    pub fn new(private_key: &str, nft_chain_id: u64, nft_contract: Address) -> Result<Self> {
        let signer: PrivateKeySigner = private_key
            .parse()
            .wrap_err("Invalid attestation private key")?;

        let domain = Eip712Domain::new(
            Some(DOMAIN_NAME.into()),
            Some(DOMAIN_VERSION.into()),
            Some(U256::from(nft_chain_id)),
            Some(nft_contract),
            None,
        );

        Ok(Self { signer, domain })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// Digest the contract recovers the signer from
    pub fn signing_hash(&self, attestation: &BridgeAttestation) -> B256 {
        attestation.eip712_signing_hash(&self.domain)
    }

    /// 65-byte `r || s || v` signature with `v` in {27, 28}
    pub fn sign(&self, attestation: &BridgeAttestation) -> Result<[u8; 65]> {
        let hash = self.signing_hash(attestation);
        let signature = self
            .signer
            .sign_hash_sync(&hash)
            .map_err(|e| eyre!("Failed to sign attestation: {}", e))?;
        Ok(signature.as_bytes())
    }
}

impl std::fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("address", &self.signer.address())
            .field("domain", &self.domain)
            .finish()
    }
}
