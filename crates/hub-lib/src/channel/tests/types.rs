use crate::channel::*;
use crate::primitives::{AssetId, Hash256, Principal, Signature, SIGNATURE_SIZE};
use crate::tests::test_utils::{ALICE, BOB, HUB};
use crate::Error;

fn principal(s: &str) -> Principal {
    Principal::from(s)
}

#[test]
fn test_channel_key_is_order_independent() {
    let a = ChannelKey::new(None, principal(HUB), principal(ALICE)).unwrap();
    let b = ChannelKey::new(None, principal(ALICE), principal(HUB)).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.id(), b.id());
    assert_eq!(a.principal_1, principal(ALICE));
    assert_eq!(a.side_of(&principal(HUB)), Some(Side::Two));
    assert_eq!(a.counterparty_of(&principal(HUB)), Some(&principal(ALICE)));
    assert_eq!(a.side_of(&principal(BOB)), None);
}

#[test]
fn test_channel_key_asset_changes_id() {
    let native = ChannelKey::new(None, principal(ALICE), principal(HUB)).unwrap();
    let token = ChannelKey::new(
        Some(AssetId::new("SP000.usd-token")),
        principal(ALICE),
        principal(HUB),
    )
    .unwrap();
    assert_ne!(native.id(), token.id());
}

#[test]
fn test_channel_key_needs_two_principals() {
    assert!(matches!(
        ChannelKey::new(None, principal(HUB), principal(HUB)),
        Err(Error::InvalidParameter(_))
    ));
}

#[test]
fn test_channel_state_transitions() {
    use ChannelState::*;
    assert!(Funding.allow_transition(&Open));
    assert!(Open.allow_transition(&Closing));
    assert!(Closing.allow_transition(&Closed));
    assert!(!Closing.allow_transition(&Open));
    assert!(!Closed.allow_transition(&Open));
    assert!(!Closed.allow_transition(&Closed));
    assert!(Closed.is_terminal());

    let key = ChannelKey::new(None, principal(ALICE), principal(HUB)).unwrap();
    let mut channel = Channel::new(key, Closed);
    assert!(matches!(
        channel.transition(Open),
        Err(Error::InvalidChannelState { state: Closed, .. })
    ));
}

#[test]
fn test_balances_by_side() {
    let balances = Balances::from_sides(Side::Two, 10, 90);
    assert_eq!(balances, Balances::new(90, 10));
    assert_eq!(balances.get(Side::Two), 10);
    assert_eq!(balances.total(), Some(100));
    assert_eq!(Balances::new(u128::MAX, 1).total(), None);
}

#[test]
fn test_delta_apply() {
    assert_eq!(Delta::Credit.apply(5, 10), Some(15));
    assert_eq!(Delta::Debit.apply(5, 10), None);
    assert_eq!(Delta::Debit.apply(15, 10), Some(5));
    assert_eq!(Delta::Unchanged.apply(5, 10), Some(5));
    assert_eq!(Delta::Credit.apply(u128::MAX, 1), None);
}

#[test]
fn test_balance_rule_table() {
    let rule = |action| balance_rule(action);
    assert_eq!(
        rule(Action::Transfer),
        BalanceRule {
            hub: Delta::Credit,
            counterparty: Delta::Debit
        }
    );
    assert_eq!(rule(Action::Deposit).counterparty, Delta::Credit);
    assert_eq!(rule(Action::Withdraw).counterparty, Delta::Debit);
    assert_eq!(rule(Action::Deposit).hub, Delta::Unchanged);
    assert_eq!(
        rule(Action::Close),
        BalanceRule {
            hub: Delta::Unchanged,
            counterparty: Delta::Unchanged
        }
    );
}

#[test]
fn test_action_codes() {
    for (code, action) in [
        (0u8, Action::Close),
        (1, Action::Transfer),
        (2, Action::Deposit),
        (3, Action::Withdraw),
    ] {
        assert_eq!(action.code(), code);
        assert_eq!(Action::try_from(code).unwrap(), action);
    }
    assert!(Action::try_from(4).is_err());
}

fn message() -> StateMessage {
    StateMessage {
        key: ChannelKey::new(None, principal(ALICE), principal(HUB)).unwrap(),
        balances: Balances::new(90, 10),
        nonce: 6,
        action: Action::Transfer,
        actor: Some(principal(ALICE)),
        secret_hash: None,
    }
}

#[test]
fn test_state_message_encoding_covers_every_field() {
    let base = message().encode();
    let variants = [
        StateMessage {
            nonce: 7,
            ..message()
        },
        StateMessage {
            action: Action::Withdraw,
            ..message()
        },
        StateMessage {
            actor: None,
            ..message()
        },
        StateMessage {
            secret_hash: Some(Hash256::default()),
            ..message()
        },
        StateMessage {
            balances: Balances::new(10, 90),
            ..message()
        },
    ];
    for variant in variants {
        assert_ne!(variant.encode(), base);
    }
    assert_eq!(message().encode(), base);
}

#[test]
fn test_signed_state_commits_to_its_tuple() {
    let message = message();
    let state = SignedState {
        channel_id: message.key.id(),
        balances: message.balances,
        nonce: message.nonce,
        action: message.action,
        actor: message.actor.clone(),
        secret_hash: None,
        hub_signature: Signature::from([1u8; SIGNATURE_SIZE]),
        counterparty_signature: Signature::from([2u8; SIGNATURE_SIZE]),
    };
    assert!(state.commits_to(&message));
    assert_eq!(state.message(&message.key), message);
    assert!(!state.commits_to(&StateMessage {
        nonce: 7,
        ..message.clone()
    }));
}
