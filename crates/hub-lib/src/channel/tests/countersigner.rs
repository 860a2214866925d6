use std::sync::Arc;
use std::time::Duration;

use crate::channel::{
    Action, Balances, ChannelState, ChannelStore, Countersigner, UpdateValidator,
};
use crate::oracle::SignatureOracle;
use crate::primitives::Hash256;
use crate::routing::{HopRole, PendingConditionalUpdate};
use crate::tests::test_utils::{TestHub, ALICE};
use crate::Error;

fn components(hub: &TestHub) -> (UpdateValidator, Countersigner) {
    let oracle = hub.oracle.clone() as Arc<dyn SignatureOracle>;
    (
        UpdateValidator::new(
            hub.hub.principal.clone(),
            oracle.clone(),
            Duration::from_secs(5),
        ),
        Countersigner::new(hub.hub.identity(), oracle, Duration::from_secs(5)),
    )
}

#[tokio::test]
async fn test_finalize_persists_state_and_channel() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    let (validator, countersigner) = components(&hub);
    let request = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;

    let guard = hub.store.lock_channels(&[channel.id]).await;
    let update = validator.validate(&*guard, &request).await.unwrap();
    let mut txn = guard.begin();
    let state = countersigner.finalize(&mut txn, &update).await.unwrap();
    txn.commit().unwrap();

    assert_eq!(state.nonce, 6);
    assert_eq!(state.counterparty_signature, request.signature);
    assert!(hub
        .oracle
        .verify(&state.hub_signature, &hub.hub.principal, &update.message)
        .await
        .unwrap());
    let stored = hub.store.get_channel(&channel.id).unwrap().unwrap();
    assert_eq!(stored.nonce, 6);
    assert_eq!(stored.balances, Balances::new(90, 10));
    assert_eq!(hub.store.get_signed_state(&channel.id).unwrap(), Some(state));
}

#[tokio::test]
async fn test_deposit_opens_funding_channel() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let (validator, countersigner) = components(&hub);
    let request = hub.request(&alice, Action::Deposit, 50, 0, 1, 50).await;
    let key = hub.key_with(&alice);

    let guard = hub.store.lock_channels(&[key.id()]).await;
    let update = validator.validate(&*guard, &request).await.unwrap();
    let mut txn = guard.begin();
    countersigner.finalize(&mut txn, &update).await.unwrap();
    txn.commit().unwrap();

    let channel = hub.store.get_channel(&key.id()).unwrap().unwrap();
    assert_eq!(channel.state, ChannelState::Open);
    assert_eq!(channel.balances, Balances::new(50, 0));
}

#[tokio::test]
async fn test_existing_signature_only_for_identical_tuple() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    let (validator, countersigner) = components(&hub);
    let request = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;

    let guard = hub.store.lock_channels(&[channel.id]).await;
    let update = validator.validate(&*guard, &request).await.unwrap();
    assert_eq!(
        countersigner
            .existing_signature(&*guard, &update.message, &request.signature)
            .unwrap(),
        None
    );
    let mut txn = guard.begin();
    let state = countersigner.finalize(&mut txn, &update).await.unwrap();
    txn.commit().unwrap();

    assert_eq!(
        countersigner
            .existing_signature(&*guard, &update.message, &request.signature)
            .unwrap(),
        Some(state.hub_signature)
    );
    let mut other = update.message.clone();
    other.action = Action::Withdraw;
    assert_eq!(
        countersigner
            .existing_signature(&*guard, &other, &request.signature)
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_promote_rejects_stale_pending() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    let (_, countersigner) = components(&hub);
    let signature = hub.request(&alice, Action::Transfer, 90, 10, 5, 10).await.signature;
    let pending = PendingConditionalUpdate {
        channel_id: channel.id,
        role: HopRole::Inbound,
        balances: Balances::new(90, 10),
        nonce: 5,
        action: Action::Transfer,
        actor: Some(alice.principal.clone()),
        amount: 10,
        secret_hash: Hash256::from([4u8; 32]),
        hub_signature: signature,
        counterparty_signature: Some(signature),
        depends_on: None,
        expiry: 500,
    };
    let guard = hub.store.lock_channels(&[channel.id]).await;
    let mut txn = guard.begin();
    assert!(matches!(
        countersigner.promote(&mut txn, &channel, &pending, signature),
        Err(Error::StaleNonce { .. })
    ));

    let fresh = PendingConditionalUpdate {
        nonce: 6,
        ..pending
    };
    txn.put_pending_conditional(&fresh).unwrap();
    let state = countersigner
        .promote(&mut txn, &channel, &fresh, signature)
        .unwrap();
    txn.commit().unwrap();
    assert_eq!(state.secret_hash, Some(fresh.secret_hash));
    assert_eq!(hub.store.get_channel(&channel.id).unwrap().unwrap().nonce, 6);
    assert!(hub.service.get_conditional_update(&channel.id).unwrap().is_none());
}
