use std::time::Duration;

use ractor::Actor;

use super::*;
use crate::channel::{Action, Balances};
use crate::primitives::{Hash256, Principal};
use crate::tests::test_utils::{TestHub, ALICE, BOB, CAROL};
use crate::{gen_rand_sha256_hash, Error};

#[tokio::test]
async fn test_invalid_delta_then_valid_transfer() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;

    let bad = hub.request(&alice, Action::Transfer, 110, -10, 6, 10).await;
    let err = hub.service.submit_update(bad).await.unwrap_err();
    assert!(matches!(err, Error::InvalidBalanceDelta { .. }));
    assert_eq!(err.snapshot(), Some(&channel));
    assert_eq!(hub.channel(&channel.key), channel);

    let good = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;
    let receipt = hub.service.submit_update(good).await.unwrap();
    assert_eq!(receipt.nonce, 6);
    assert!(!receipt.pending);
    let updated = hub.channel(&channel.key);
    assert_eq!(updated.nonce, 6);
    assert_eq!(updated.balances, Balances::new(90, 10));
    assert_eq!(
        hub.signed_state(&channel.key).unwrap().hub_signature,
        receipt.hub_signature
    );
}

#[tokio::test]
async fn test_resubmitting_returns_the_same_signature() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    let request = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;

    let first = hub.service.submit_update(request.clone()).await.unwrap();
    let second = hub.service.submit_update(request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(hub.channel(&channel.key).nonce, 6);

    // Same nonce, different tuple.
    let other = hub.request(&alice, Action::Transfer, 80, 20, 6, 20).await;
    assert!(matches!(
        hub.service.submit_update(other).await,
        Err(Error::StaleNonce { .. })
    ));
}

#[tokio::test]
async fn test_concurrent_updates_at_one_nonce() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let channel = hub.open_channel(&alice, 100, 0, 5).await;
    let a = hub.request(&alice, Action::Transfer, 90, 10, 6, 10).await;
    let b = hub.request(&alice, Action::Transfer, 80, 20, 6, 20).await;

    let (ra, rb) = tokio::join!(
        hub.service.submit_update(a),
        hub.service.submit_update(b)
    );
    let results = [ra, rb];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(Error::StaleNonce { .. }))));

    let updated = hub.channel(&channel.key);
    assert_eq!(updated.nonce, 6);
    assert!(
        updated.balances == Balances::new(90, 10) || updated.balances == Balances::new(80, 20)
    );
}

#[tokio::test]
async fn test_sequence_keeps_nonces_increasing_and_totals_consistent() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let key = hub.key_with(&alice);

    let steps = [
        (Action::Deposit, 100, 0, 1, 100),
        (Action::Transfer, 70, 30, 2, 30),
        (Action::Deposit, 120, 30, 4, 50),
        (Action::Withdraw, 20, 30, 5, 100),
        (Action::Transfer, 5, 45, 9, 15),
    ];
    let mut last_nonce = 0;
    for (action, party, hub_balance, nonce, amount) in steps {
        let before = hub.service.get_channel(&key.id()).ok();
        let request = hub
            .request(&alice, action, party, hub_balance, nonce, amount)
            .await;
        hub.service.submit_update(request).await.unwrap();

        let after = hub.channel(&key);
        assert!(after.nonce > last_nonce);
        last_nonce = after.nonce;
        let total_before = before.map_or(0, |c| c.balances.total().unwrap());
        let total_after = after.balances.total().unwrap();
        match action {
            Action::Deposit => assert_eq!(total_after, total_before + amount),
            Action::Withdraw => assert_eq!(total_after, total_before - amount),
            _ => assert_eq!(total_after, total_before),
        }
    }
    assert_eq!(hub.channel(&key).balances, Balances::new(5, 45));
}

#[tokio::test]
async fn test_register_channel_rules() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    hub.open_channel(&alice, 100, 0, 5).await;

    let duplicate = ChannelRegistration {
        asset: None,
        principal_1: hub.hub.principal.clone(),
        principal_2: alice.principal.clone(),
        balance_1: 1,
        balance_2: 1,
        nonce: 0,
        expires_at: None,
    };
    assert!(matches!(
        hub.service.register_channel(duplicate.clone()).await,
        Err(Error::InvalidParameter(_))
    ));

    let foreign = ChannelRegistration {
        principal_1: Principal::from(BOB),
        principal_2: Principal::from(CAROL),
        ..duplicate
    };
    assert!(matches!(
        hub.service.register_channel(foreign).await,
        Err(Error::InvalidParameter(_))
    ));
}

#[tokio::test]
async fn test_registration_balances_follow_the_given_order() {
    let hub = TestHub::new();
    let bob = hub.party(BOB);
    // The hub sorts first, so the given balances are swapped into place.
    let channel = hub.open_channel(&bob, 30, 70, 1).await;
    assert_eq!(channel.key.principal_1, hub.hub.principal);
    assert_eq!(channel.balances, Balances::new(70, 30));
}

#[tokio::test]
async fn test_list_channels() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let bob = hub.party(BOB);
    let carol = hub.party(CAROL);
    hub.open_channel(&alice, 100, 0, 1).await;
    hub.open_channel(&bob, 0, 100, 1).await;

    let channels = hub.service.list_channels(&alice.principal).unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].key, hub.key_with(&alice));
    assert!(hub.service.list_channels(&carol.principal).unwrap().is_empty());
    assert_eq!(hub.service.list_channels(&hub.hub.principal).unwrap().len(), 2);
    assert_eq!(hub.service.list_all_channels().unwrap().len(), 2);
}

#[tokio::test]
async fn test_sweep_on_idle_hub() {
    let hub = TestHub::new();
    let summary = hub.service.sweep().await.unwrap();
    assert_eq!(summary.height, 100);
    assert!(summary.routing.discarded.is_empty());
    assert!(summary.disputes.is_empty());
}

#[tokio::test]
async fn test_sweeper_actor_discards_expired_routes() {
    let hub = TestHub::new();
    let alice = hub.party(ALICE);
    let bob = hub.party(BOB);
    let inbound = hub.open_channel(&alice, 100_000, 0, 1).await;
    hub.open_channel(&bob, 0, 100_000, 1).await;
    let request = hub
        .routed_request(
            &alice,
            90_000,
            10_000,
            2,
            10_000,
            Hash256::lock_of(&gen_rand_sha256_hash()),
            &bob.principal,
            150,
        )
        .await;
    hub.service.submit_update(request).await.unwrap();
    hub.settlement.set_height(150);

    let (sweeper, handle) = Actor::spawn(
        None,
        SweeperActor::new(hub.service.clone()),
        Duration::from_millis(10),
    )
    .await
    .expect("spawn sweeper");

    let mut discarded = false;
    for _ in 0..100 {
        if hub
            .service
            .get_conditional_update(&inbound.id)
            .unwrap()
            .is_none()
        {
            discarded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sweeper.stop(None);
    handle.await.expect("sweeper stopped");
    assert!(discarded);
    assert_eq!(hub.channel(&inbound.key).nonce, 1);
}
