use std::sync::Arc;
use std::time::Duration;

use crate::channel::{
    Action, Balances, Channel, ChannelState, ChannelStore, UpdateValidator,
};
use crate::oracle::SignatureOracle;
use crate::primitives::{Hash256, Principal};
use crate::routing::{HopRole, PendingConditionalUpdate};
use crate::tests::test_utils::{TestHub, ALICE, BOB, CAROL};
use crate::Error;

fn validator(hub: &TestHub) -> UpdateValidator {
    UpdateValidator::new(
        hub.hub.principal.clone(),
        hub.oracle.clone() as Arc<dyn SignatureOracle>,
        Duration::from_secs(5),
    )
}

#[tokio::test]
async fn test_propose_canonicalizes_balances() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let mut request = hub
        .request(&alice, Action::Transfer, 90, 10, 6, 10)
        .await;
    // Same request with the principals swapped.
    std::mem::swap(&mut request.principal_1, &mut request.principal_2);
    std::mem::swap(&mut request.balance_1, &mut request.balance_2);

    let proposal = validator(&hub).propose(&request).unwrap();
    assert_eq!(proposal.key.principal_1, alice.principal);
    assert_eq!(proposal.counterparty, alice.principal);
    assert_eq!((proposal.balance_1, proposal.balance_2), (90, 10));
    assert_eq!(proposal.balances(), Some(Balances::new(90, 10)));
}

#[tokio::test]
async fn test_propose_rejects_channel_without_hub() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let mut request = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;
    request.principal_2 = Principal::from(BOB);
    assert!(matches!(
        validator(&hub).propose(&request),
        Err(Error::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn test_transfer_on_unknown_channel() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let request = hub.request(&alice, Action::Transfer, 90, 10, 1, 10).await;
    assert!(matches!(
        validator(&hub).validate(&hub.store, &request).await,
        Err(Error::ChannelNotFound(_))
    ));
}

#[tokio::test]
async fn test_first_deposit_creates_funding_channel() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let request = hub.request(&alice, Action::Deposit, 50, 0, 1, 50).await;
    let update = validator(&hub).validate(&hub.store, &request).await.unwrap();
    assert!(update.is_new);
    assert_eq!(update.channel.state, ChannelState::Funding);
    assert_eq!(update.message.balances, Balances::new(50, 0));
    assert_eq!(update.message.actor, Some(alice.principal.clone()));
}

#[tokio::test]
async fn test_transfer_moves_funds_from_counterparty_to_hub() {
    let hub = TestHub::new();
    let bob = hub.party(BOB);
    // The hub sorts before bob, so the hub is principal-1 here.
    hub.open_channel(&bob, 100, 0, 5).await;
    let request = hub.request(&bob, Action::Transfer, 90, 10, 6, 10).await;
    let update = validator(&hub).validate(&hub.store, &request).await.unwrap();
    assert_eq!(update.message.balances, Balances::new(10, 90));
    assert!(!update.is_conditional());
}

#[tokio::test]
async fn test_stale_nonce_carries_snapshot() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    for nonce in [4, 5] {
        let request = hub.request(&alice, Action::Transfer, 90, 10, nonce, 10).await;
        let err = validator(&hub)
            .validate(&hub.store, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StaleNonce { .. }));
        assert_eq!(err.snapshot(), Some(&channel));
    }
}

#[tokio::test]
async fn test_nonce_may_skip_ahead() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    hub.open_channel(&alice, 100, 0, 5).await;
    let request = hub.request(&alice, Action::Transfer, 90, 10, 42, 10).await;
    assert!(validator(&hub).validate(&hub.store, &request).await.is_ok());
}

#[tokio::test]
async fn test_balances_must_follow_the_action() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    hub.open_channel(&alice, 100, 0, 5).await;
    let v = validator(&hub);

    // Moves funds the wrong way.
    let request = hub.request(&alice, Action::Transfer, 110, -10, 6, 10).await;
    assert!(matches!(
        v.validate(&hub.store, &request).await,
        Err(Error::InvalidBalanceDelta { .. })
    ));
    // Conserves the total but not by the amount.
    let request = hub.request(&alice, Action::Transfer, 95, 5, 6, 10).await;
    assert!(matches!(
        v.validate(&hub.store, &request).await,
        Err(Error::InvalidBalanceDelta { .. })
    ));
    // A deposit never touches the hub's side.
    let request = hub.request(&alice, Action::Deposit, 100, 20, 6, 20).await;
    assert!(matches!(
        v.validate(&hub.store, &request).await,
        Err(Error::InvalidBalanceDelta { .. })
    ));
    // Withdrawal beyond the counterparty's balance.
    let request = hub.request(&alice, Action::Withdraw, 0, 0, 6, 150).await;
    assert!(matches!(
        v.validate(&hub.store, &request).await,
        Err(Error::InvalidBalanceDelta { .. })
    ));
    // Close keeps both balances.
    let request = hub.request(&alice, Action::Close, 100, 0, 6, 0).await;
    assert!(v.validate(&hub.store, &request).await.is_ok());
}

#[tokio::test]
async fn test_zero_transfer_is_rejected() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    hub.open_channel(&alice, 100, 0, 5).await;
    let request = hub.request(&alice, Action::Transfer, 100, 0, 6, 0).await;
    assert!(matches!(
        validator(&hub).validate(&hub.store, &request).await,
        Err(Error::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn test_only_transfers_carry_a_lock() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    hub.open_channel(&alice, 100, 0, 5).await;
    let lock = Hash256::from([7u8; 32]);

    let mut withdraw = hub.request(&alice, Action::Withdraw, 90, 0, 6, 10).await;
    withdraw.secret_hash = Some(lock);
    withdraw.next_hop = Some(Principal::from(BOB));
    withdraw.expiry = Some(500);
    hub.sign_request(&alice, &mut withdraw).await;
    assert!(matches!(
        validator(&hub).validate(&hub.store, &withdraw).await,
        Err(Error::InvalidParameter(_))
    ));

    let mut transfer = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;
    transfer.secret_hash = Some(lock);
    transfer.next_hop = Some(Principal::from(BOB));
    transfer.expiry = Some(500);
    hub.sign_request(&alice, &mut transfer).await;
    let update = validator(&hub).validate(&hub.store, &transfer).await.unwrap();
    assert!(update.is_conditional());

    // A lock without a next hop is settled directly.
    transfer.next_hop = None;
    transfer.expiry = None;
    hub.sign_request(&alice, &mut transfer).await;
    let update = validator(&hub).validate(&hub.store, &transfer).await.unwrap();
    assert!(!update.is_conditional());
}

#[tokio::test]
async fn test_signature_of_someone_else_is_rejected() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let carol = hub.party(CAROL);
    hub.open_channel(&alice, 100, 0, 5).await;
    let mut request = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;
    let forged = hub.request(&carol, Action::Transfer, 90, 10, 6, 10).await;
    request.signature = forged.signature;
    assert!(matches!(
        validator(&hub).validate(&hub.store, &request).await,
        Err(Error::InvalidSignature(_))
    ));
}

#[tokio::test]
async fn test_closing_channel_rejects_updates() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    {
        let guard = hub.store.lock_channels(&[channel.id]).await;
        let mut closing = guard.get_channel(&channel.id).unwrap().unwrap();
        closing.transition(ChannelState::Closing).unwrap();
        let mut txn = guard.begin();
        txn.put_channel(&closing).unwrap();
        txn.commit().unwrap();
    }
    let request = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;
    assert!(matches!(
        validator(&hub).validate(&hub.store, &request).await,
        Err(Error::InvalidChannelState {
            state: ChannelState::Closing,
            ..
        })
    ));
}

#[tokio::test]
async fn test_funding_channel_accepts_only_deposits() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let key = hub.key_with(&alice);
    {
        let guard = hub.store.lock_channels(&[key.id()]).await;
        let mut txn = guard.begin();
        txn.put_channel(&Channel::new(key.clone(), ChannelState::Funding))
            .unwrap();
        txn.commit().unwrap();
    }
    let v = validator(&hub);
    let transfer = hub.request(&alice, Action::Transfer, 0, 0, 1, 10).await;
    assert!(matches!(
        v.validate(&hub.store, &transfer).await,
        Err(Error::InvalidChannelState { .. })
    ));
    let deposit = hub.request(&alice, Action::Deposit, 30, 0, 1, 30).await;
    let update = v.validate(&hub.store, &deposit).await.unwrap();
    assert!(!update.is_new);
}

#[tokio::test]
async fn test_pending_conditional_blocks_updates() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    {
        let guard = hub.store.lock_channels(&[channel.id]).await;
        let mut txn = guard.begin();
        txn.put_pending_conditional(&PendingConditionalUpdate {
            channel_id: channel.id,
            role: HopRole::Inbound,
            balances: Balances::new(90, 10),
            nonce: 6,
            action: Action::Transfer,
            actor: Some(alice.principal.clone()),
            amount: 10,
            secret_hash: Hash256::from([5u8; 32]),
            hub_signature: hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await.signature,
            counterparty_signature: None,
            depends_on: None,
            expiry: 500,
        })
        .unwrap();
        txn.commit().unwrap();
    }
    let request = hub.request(&alice, Action::Transfer, 90, 10, 7, 10).await;
    assert!(matches!(
        validator(&hub).validate(&hub.store, &request).await,
        Err(Error::ConditionalUpdateInFlight(id)) if id == channel.id
    ));
}
