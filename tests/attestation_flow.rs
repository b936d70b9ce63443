//! Attestation pipeline against in-memory chains

mod common;

use std::sync::Arc;

use alloy::primitives::{Address, PrimitiveSignature, B256, U256};

use common::*;
use ferry::attestation::{
    AttestationClaim, AttestationSigner, AttestationVerifier, BridgeAttestation, FieldValue,
    VerifierSettings,
};
use ferry::db::{MemoryReplayGuard, ReplayGuard};
use ferry::error::AttestationError;
use ferry::events::decode_transfer_log;
use ferry::hash::MessageIdScheme;

const NFT_CHAIN: u64 = 47763;
const TOLERANCE: u64 = 60;

struct Harness {
    chain_a: Arc<FakeLedger>,
    guard: Arc<MemoryReplayGuard>,
    verifier: Arc<AttestationVerifier>,
}

fn signer() -> AttestationSigner {
    AttestationSigner::new(ATTESTATION_KEY, NFT_CHAIN, NFT).unwrap()
}

fn harness_with(scheme: MessageIdScheme, signed: bool) -> Harness {
    let chain_a = FakeLedger::new();
    let chain_b = FakeLedger::new();
    chain_a.add_receipt(
        tx_hash(0x0a),
        BRIDGER,
        990,
        vec![transfer_log(FERRY_A, &scenario_event(), 990, tx_hash(0x0a), 0)],
    );

    let guard = Arc::new(MemoryReplayGuard::new());
    let settings = VerifierSettings {
        scheme,
        timestamp_tolerance_secs: TOLERANCE,
    };
    let mut verifier = AttestationVerifier::new(settings, guard.clone() as Arc<dyn ReplayGuard>)
        .with_pair(
            endpoint(SRC_CHAIN, FERRY_A, &chain_a),
            endpoint(DST_CHAIN, FERRY_B, &chain_b),
        );
    if signed {
        verifier = verifier.with_signer(signer());
    }

    Harness {
        chain_a,
        guard,
        verifier: Arc::new(verifier),
    }
}

fn harness() -> Harness {
    harness_with(MessageIdScheme::V2, true)
}

fn scenario_claim() -> AttestationClaim {
    AttestationClaim {
        message_id: Some(SCENARIO_ID_V2.to_string()),
        bridger: Some(format!("{:#x}", BRIDGER)),
        amount: Some(FieldValue::Text(ether(99).to_string())),
        timestamp: Some(FieldValue::Number(BLOCK_TIME)),
        source_chain: Some(FieldValue::Number(u64::from(SRC_CHAIN))),
        dest_chain: Some(FieldValue::Number(u64::from(DST_CHAIN))),
        tx_hash: Some(format!("{:#x}", tx_hash(0x0a))),
    }
}

async fn expect_rejection(h: &Harness, claim: &AttestationClaim) -> AttestationError {
    let err = h.verifier.attest(claim).await.unwrap_err();
    assert!(h.guard.is_empty(), "rejected claim left a record: {err}");
    err
}

#[tokio::test]
async fn test_valid_claim_is_signed_once() {
    let h = harness();

    let response = h.verifier.attest(&scenario_claim()).await.unwrap();
    assert_eq!(response.message_id, SCENARIO_ID_V2);
    assert_eq!(response.log_index, 0);
    assert_eq!(response.signer, signer().address().to_string());
    assert_eq!(h.guard.len(), 1);

    // Signature covers the verified fields under the NFT domain
    let attestation = BridgeAttestation {
        bridger: BRIDGER,
        messageId: B256::from(ferry::hash::parse_bytes32(SCENARIO_ID_V2).unwrap()),
        amount: ether(99),
        timestamp: U256::from(BLOCK_TIME),
        sourceChain: SRC_CHAIN,
        destChain: DST_CHAIN,
        txHash: tx_hash(0x0a),
        logIndex: U256::ZERO,
    };
    let bytes = hex::decode(response.signature.trim_start_matches("0x")).unwrap();
    assert_eq!(bytes.len(), 65);
    assert!(bytes[64] == 27 || bytes[64] == 28);
    let sig = PrimitiveSignature::try_from(&bytes[..]).unwrap();
    let recovered = sig
        .recover_address_from_prehash(&signer().signing_hash(&attestation))
        .unwrap();
    assert_eq!(recovered, signer().address());

    let replay = h.verifier.attest(&scenario_claim()).await.unwrap_err();
    assert_eq!(replay, AttestationError::AlreadyAttested);
    assert_eq!(h.guard.len(), 1);

    let records = h
        .guard
        .find_by_tx(&format!("{:#x}", tx_hash(0x0a)))
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message_id, SCENARIO_ID_V2);
    assert_eq!(records[0].amount, ether(99).to_string());
}

#[tokio::test]
async fn test_forged_amount_rejected() {
    let h = harness();
    let mut claim = scenario_claim();
    claim.amount = Some(FieldValue::Text((ether(99) + U256::from(1u64)).to_string()));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err, AttestationError::NoMatchingEvent);
}

#[tokio::test]
async fn test_wrong_message_id_rejected() {
    let h = harness();
    let mut claim = scenario_claim();
    claim.message_id = Some(format!("0x{}", "11".repeat(32)));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err, AttestationError::NoMatchingEvent);
}

#[tokio::test]
async fn test_claim_for_someone_elses_transaction_rejected() {
    let h = harness();
    h.chain_a.add_receipt(
        tx_hash(0x0b),
        RELAYER,
        990,
        vec![transfer_log(FERRY_A, &scenario_event(), 990, tx_hash(0x0b), 0)],
    );
    let mut claim = scenario_claim();
    claim.tx_hash = Some(format!("{:#x}", tx_hash(0x0b)));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err.code(), "Unauthorized");
    assert_eq!(err.status().as_u16(), 403);
}

#[tokio::test]
async fn test_event_from_other_sender_does_not_match() {
    let h = harness();
    let mut relayed = scenario_event();
    relayed.from = RELAYER;
    let log = transfer_log(FERRY_A, &relayed, 992, tx_hash(0x0f), 0);

    // Claimed id and amount agree with the log; only its sender differs
    let id = decode_transfer_log(&log, FERRY_A, SRC_CHAIN)
        .unwrap()
        .message_id(MessageIdScheme::V2, DST_CHAIN);
    h.chain_a.add_receipt(tx_hash(0x0f), BRIDGER, 992, vec![log]);

    let mut claim = scenario_claim();
    claim.tx_hash = Some(format!("{:#x}", tx_hash(0x0f)));
    claim.message_id = Some(hex_id(&id));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err, AttestationError::NoMatchingEvent);
}

#[tokio::test]
async fn test_missing_block_not_found() {
    let h = harness();
    h.chain_a.add_receipt(
        tx_hash(0x10),
        BRIDGER,
        995,
        vec![transfer_log(FERRY_A, &scenario_event(), 995, tx_hash(0x10), 0)],
    );
    h.chain_a.with(|s| {
        s.block_timestamps.remove(&995);
    });
    let mut claim = scenario_claim();
    claim.tx_hash = Some(format!("{:#x}", tx_hash(0x10)));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err.code(), "NotFound");
    assert_eq!(err.status().as_u16(), 404);
    assert!(err.to_string().contains("block 995"));
}

#[tokio::test]
async fn test_timestamp_tolerance_is_inclusive() {
    for offset in [-(TOLERANCE as i64), TOLERANCE as i64] {
        let h = harness();
        let mut claim = scenario_claim();
        claim.timestamp = Some(FieldValue::Number((BLOCK_TIME as i64 + offset) as u64));
        assert!(h.verifier.attest(&claim).await.is_ok(), "offset {offset}");
    }

    for offset in [-(TOLERANCE as i64) - 1, TOLERANCE as i64 + 1] {
        let h = harness();
        let mut claim = scenario_claim();
        claim.timestamp = Some(FieldValue::Number((BLOCK_TIME as i64 + offset) as u64));
        let err = expect_rejection(&h, &claim).await;
        assert_eq!(err.code(), "TimestampMismatch", "offset {offset}");
    }
}

#[tokio::test]
async fn test_wrong_destination_rejected() {
    let h = harness();
    let mut claim = scenario_claim();
    claim.dest_chain = Some(FieldValue::Number(56));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err.code(), "ChainMismatch");
    assert_eq!(err.status().as_u16(), 400);
}

#[tokio::test]
async fn test_unknown_transaction_not_found() {
    let h = harness();
    let mut claim = scenario_claim();
    claim.tx_hash = Some(format!("{:#x}", tx_hash(0x0c)));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err.code(), "NotFound");
    assert_eq!(err.status().as_u16(), 404);
}

#[tokio::test]
async fn test_unserved_source_chain_rejected() {
    let h = harness();
    let mut claim = scenario_claim();
    claim.source_chain = Some(FieldValue::Text("56".to_string()));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err, AttestationError::UnsupportedChain(56));
}

#[tokio::test]
async fn test_missing_signer_rejects_before_parsing() {
    let h = harness_with(MessageIdScheme::V2, false);

    let err = expect_rejection(&h, &AttestationClaim::default()).await;
    assert_eq!(err.code(), "NotConfigured");
    assert_eq!(err.status().as_u16(), 503);
}

#[tokio::test]
async fn test_missing_field_named() {
    let h = harness();
    let mut claim = scenario_claim();
    claim.tx_hash = None;

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err, AttestationError::MissingField("txHash"));
}

#[tokio::test]
async fn test_ledger_failure_is_upstream() {
    let h = harness();
    h.chain_a.with(|s| s.fail_receipts = true);

    let err = expect_rejection(&h, &scenario_claim()).await;
    assert_eq!(err.code(), "Upstream");
    assert_eq!(err.status().as_u16(), 502);
}

#[tokio::test]
async fn test_matching_log_selected_from_batch() {
    let h = harness();
    let mut other = scenario_event();
    other.nonce = U256::from(6u64);
    other.amountOut = ether(5);

    h.chain_a.add_receipt(
        tx_hash(0x0d),
        BRIDGER,
        991,
        vec![
            transfer_log(FERRY_A, &other, 991, tx_hash(0x0d), 0),
            unrelated_log(FERRY_A, 991, tx_hash(0x0d), 1),
            transfer_log(FERRY_A, &scenario_event(), 991, tx_hash(0x0d), 3),
        ],
    );
    let mut claim = scenario_claim();
    claim.tx_hash = Some(format!("{:#x}", tx_hash(0x0d)));

    let response = h.verifier.attest(&claim).await.unwrap();
    assert_eq!(response.log_index, 3);
}

#[tokio::test]
async fn test_log_from_other_contract_ignored() {
    let h = harness();
    h.chain_a.add_receipt(
        tx_hash(0x0e),
        BRIDGER,
        991,
        vec![transfer_log(
            Address::repeat_byte(0x44),
            &scenario_event(),
            991,
            tx_hash(0x0e),
            0,
        )],
    );
    let mut claim = scenario_claim();
    claim.tx_hash = Some(format!("{:#x}", tx_hash(0x0e)));

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err, AttestationError::NoMatchingEvent);
}

#[tokio::test]
async fn test_v1_scheme_accepts_v1_id() {
    let h = harness_with(MessageIdScheme::V1, true);
    let mut claim = scenario_claim();

    let err = expect_rejection(&h, &claim).await;
    assert_eq!(err, AttestationError::NoMatchingEvent);

    claim.message_id = Some(SCENARIO_ID_V1.to_string());
    let response = h.verifier.attest(&claim).await.unwrap();
    assert_eq!(response.message_id, SCENARIO_ID_V1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_issue_one_signature() {
    let h = harness();

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let verifier = Arc::clone(&h.verifier);
            tokio::spawn(async move { verifier.attest(&scenario_claim()).await })
        })
        .collect();

    let mut issued = 0;
    let mut duplicates = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => issued += 1,
            Err(AttestationError::AlreadyAttested) => duplicates += 1,
            Err(e) => panic!("unexpected rejection: {e}"),
        }
    }

    assert_eq!(issued, 1);
    assert_eq!(duplicates, 15);
    assert_eq!(h.guard.len(), 1);
}
