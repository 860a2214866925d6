use super::*;
use crate::channel::{Action, Balances, ChannelKey};
use crate::tests::test_utils::{test_domain, TestKey, ALICE, HUB};

fn message(nonce: u128) -> StateMessage {
    StateMessage {
        key: ChannelKey::new(None, Principal::from(ALICE), Principal::from(HUB)).unwrap(),
        balances: Balances::new(90, 10),
        nonce,
        action: Action::Transfer,
        actor: Some(Principal::from(ALICE)),
        secret_hash: None,
    }
}

fn oracle_with(keys: &[&TestKey]) -> LocalOracle {
    let oracle = LocalOracle::new(test_domain());
    for key in keys {
        oracle.register(key.principal.clone(), key.public_key());
    }
    oracle
}

#[tokio::test]
async fn test_local_oracle_verifies_own_signature() {
    let alice = TestKey::generate(ALICE);
    let oracle = oracle_with(&[&alice]);
    let signature = oracle.sign(&message(6), &alice.secret_key).await.unwrap();
    assert!(oracle
        .verify(&signature, &alice.principal, &message(6))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_local_oracle_rejects_other_tuple_or_signer() {
    let alice = TestKey::generate(ALICE);
    let hub = TestKey::generate(HUB);
    let oracle = oracle_with(&[&alice, &hub]);
    let signature = oracle.sign(&message(6), &alice.secret_key).await.unwrap();

    assert!(!oracle
        .verify(&signature, &alice.principal, &message(7))
        .await
        .unwrap());
    assert!(!oracle
        .verify(&signature, &hub.principal, &message(6))
        .await
        .unwrap());
    assert!(!oracle
        .verify(&signature, &Principal::from("SP9UNKNOWN"), &message(6))
        .await
        .unwrap());
}

#[tokio::test]
async fn test_garbage_signature_is_not_valid() {
    let alice = TestKey::generate(ALICE);
    let oracle = oracle_with(&[&alice]);
    let garbage = Signature::from([0xffu8; SIGNATURE_SIZE]);
    assert!(!oracle
        .verify(&garbage, &alice.principal, &message(1))
        .await
        .unwrap());
}

#[test]
fn test_digest_is_domain_separated() {
    let domain = test_domain();
    let other = SigningDomain {
        chain_id: domain.chain_id + 1,
        ..domain.clone()
    };
    assert_ne!(domain.digest(&message(1)), other.digest(&message(1)));
    assert_ne!(domain.digest(&message(1)), domain.digest(&message(2)));
    assert_eq!(
        domain.digest(&message(1)),
        domain.digest_of_hash(&sha256(message(1).encode()))
    );
}

#[test]
fn test_recover_signer_round_trip() {
    let alice = TestKey::generate(ALICE);
    let digest = test_domain().digest(&message(3));
    let signature = sign_digest(&digest, &alice.secret_key);
    assert_eq!(recover_signer(&digest, &signature).unwrap(), alice.public_key());

    let mut bytes = [0u8; SIGNATURE_SIZE];
    bytes.copy_from_slice(signature.as_ref());
    bytes[64] = 9;
    assert!(matches!(
        recover_signer(&digest, &Signature::from(bytes)),
        Err(Error::InvalidSignature(_))
    ));
}

#[test]
fn test_hub_identity_debug_hides_key() {
    let hub = TestKey::generate(HUB);
    let debug = format!("{:?}", hub.identity());
    assert!(debug.contains(HUB));
    assert!(!debug.contains(&hex::encode(hub.secret_key.secret_bytes())));
}
