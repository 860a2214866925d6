use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::channel::{Action, Balances, Channel, ChannelKey, SignedState, StateMessage, UpdateRequest};
use crate::dispute::DisputePolicy;
use crate::hub::{ChannelRegistration, HubOptions, HubService};
use crate::oracle::{HubIdentity, LocalOracle, SignatureOracle, SigningDomain};
use crate::primitives::{Hash256, Principal, Signature, SIGNATURE_SIZE};
use crate::routing::RoutingPolicy;
use crate::settlement::{DisputeSubmission, SettlementLayer, SubmissionOutcome};
use crate::store::Store;
use crate::{Error, Result};

/// Sorts between `ALICE` and `BOB`, so both key orders are exercised.
pub const HUB: &str = "SP2HUB";
pub const ALICE: &str = "SP1ALICE";
pub const BOB: &str = "SP3BOB";
pub const CAROL: &str = "SP4CAROL";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

pub fn init_tracing() {
    use std::sync::Once;

    static INIT: Once = Once::new();

    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .pretty()
            .init();
    });
}

pub fn generate_store() -> (Store, TempDir) {
    let temp_dir = tempfile::Builder::new()
        .prefix("test-flowhub-store")
        .tempdir()
        .expect("create temp directory");
    let store = Store::new(temp_dir.path()).expect("create store");
    (store, temp_dir)
}

pub fn test_domain() -> SigningDomain {
    SigningDomain {
        name: "flowhub-test".to_string(),
        version: "0.1.0".to_string(),
        chain_id: 2147483648,
    }
}

#[derive(Clone)]
pub struct TestKey {
    pub principal: Principal,
    pub secret_key: SecretKey,
}

impl TestKey {
    pub fn generate(principal: &str) -> Self {
        Self {
            principal: Principal::from(principal),
            secret_key: SecretKey::new(&mut secp256k1::rand::thread_rng()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::new(), &self.secret_key)
    }

    pub fn identity(&self) -> HubIdentity {
        HubIdentity::new(self.principal.clone(), self.secret_key)
    }
}

/// Settlement layer double recording every dispute it receives.
pub struct MockSettlement {
    height: AtomicU64,
    submissions: Mutex<Vec<DisputeSubmission>>,
    // Scripted answers, consumed one per submission. Once empty every
    // submission is accepted.
    script: Mutex<VecDeque<Result<SubmissionOutcome>>>,
}

impl MockSettlement {
    pub fn new(height: u64) -> Self {
        Self {
            height: AtomicU64::new(height),
            submissions: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn height(&self) -> u64 {
        self.height.load(Ordering::SeqCst)
    }

    pub fn push_outcome(&self, outcome: Result<SubmissionOutcome>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn fail_next(&self, times: usize) {
        for _ in 0..times {
            self.push_outcome(Err(Error::ExternalServiceError(
                "settlement node unreachable".to_string(),
            )));
        }
    }

    pub fn submissions(&self) -> Vec<DisputeSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SettlementLayer for MockSettlement {
    async fn current_height(&self) -> Result<u64> {
        Ok(self.height())
    }

    async fn submit_dispute(&self, submission: &DisputeSubmission) -> Result<SubmissionOutcome> {
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(Err(err)) => Err(err),
            Some(Ok(outcome)) => {
                self.submissions.lock().unwrap().push(submission.clone());
                Ok(outcome)
            }
            None => {
                let mut submissions = self.submissions.lock().unwrap();
                submissions.push(submission.clone());
                Ok(SubmissionOutcome::Accepted {
                    tx_id: format!("0xdispute{}", submissions.len()),
                })
            }
        }
    }
}

pub fn test_options() -> HubOptions {
    HubOptions {
        external_call_timeout: Duration::from_secs(5),
        dispute_policy: DisputePolicy {
            retry_base: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
        routing_policy: RoutingPolicy::default(),
        webhook_secret: WEBHOOK_SECRET.to_string(),
    }
}

/// A hub service over a temporary store, a local oracle and a mock
/// settlement layer.
pub struct TestHub {
    pub service: Arc<HubService>,
    pub store: Store,
    pub oracle: Arc<LocalOracle>,
    pub settlement: Arc<MockSettlement>,
    pub hub: TestKey,
    _dir: TempDir,
}

impl TestHub {
    pub fn new() -> Self {
        Self::with_options(test_options())
    }

    pub fn with_options(options: HubOptions) -> Self {
        let (store, dir) = generate_store();
        let hub = TestKey::generate(HUB);
        let oracle = Arc::new(LocalOracle::new(test_domain()));
        oracle.register(hub.principal.clone(), hub.public_key());
        let settlement = Arc::new(MockSettlement::new(100));
        let service = Arc::new(HubService::new(
            store.clone(),
            hub.identity(),
            oracle.clone() as Arc<dyn SignatureOracle>,
            settlement.clone() as Arc<dyn SettlementLayer>,
            options,
        ));
        Self {
            service,
            store,
            oracle,
            settlement,
            hub,
            _dir: dir,
        }
    }

    /// A counterparty whose key the oracle knows.
    pub fn party(&self, principal: &str) -> TestKey {
        let key = TestKey::generate(principal);
        self.oracle.register(key.principal.clone(), key.public_key());
        key
    }

    pub fn key_with(&self, party: &TestKey) -> ChannelKey {
        ChannelKey::new(None, party.principal.clone(), self.hub.principal.clone())
            .expect("distinct principals")
    }

    /// Register an open channel with the given balances of each side.
    pub async fn open_channel(
        &self,
        party: &TestKey,
        party_balance: u128,
        hub_balance: u128,
        nonce: u128,
    ) -> Channel {
        self.service
            .register_channel(ChannelRegistration {
                asset: None,
                principal_1: party.principal.clone(),
                principal_2: self.hub.principal.clone(),
                balance_1: party_balance,
                balance_2: hub_balance,
                nonce,
                expires_at: None,
            })
            .await
            .expect("register channel")
    }

    pub async fn sign(&self, key: &TestKey, message: &StateMessage) -> Signature {
        self.oracle
            .sign(message, &key.secret_key)
            .await
            .expect("sign message")
    }

    /// An update from `party`, signed by `party`. Balances are given as
    /// (party's, hub's).
    pub async fn request(
        &self,
        party: &TestKey,
        action: Action,
        party_balance: i128,
        hub_balance: i128,
        nonce: u128,
        amount: u128,
    ) -> UpdateRequest {
        let mut request = UpdateRequest {
            action,
            asset: None,
            principal_1: party.principal.clone(),
            principal_2: self.hub.principal.clone(),
            balance_1: party_balance,
            balance_2: hub_balance,
            nonce,
            amount,
            signature: Signature::from([0u8; SIGNATURE_SIZE]),
            secret_hash: None,
            next_hop: None,
            expiry: None,
        };
        self.sign_request(party, &mut request).await;
        request
    }

    /// Conditional transfer from `party` forwarded to `next_hop`.
    #[allow(clippy::too_many_arguments)]
    pub async fn routed_request(
        &self,
        party: &TestKey,
        party_balance: i128,
        hub_balance: i128,
        nonce: u128,
        amount: u128,
        secret_hash: Hash256,
        next_hop: &Principal,
        expiry: u64,
    ) -> UpdateRequest {
        let mut request = self
            .request(party, Action::Transfer, party_balance, hub_balance, nonce, amount)
            .await;
        request.secret_hash = Some(secret_hash);
        request.next_hop = Some(next_hop.clone());
        request.expiry = Some(expiry);
        self.sign_request(party, &mut request).await;
        request
    }

    /// Re-sign `request` as `party`. Requests with negative balances keep a
    /// zeroed signature since no tuple exists for them.
    pub async fn sign_request(&self, party: &TestKey, request: &mut UpdateRequest) {
        if let Some(message) = message_of(request, &party.principal) {
            request.signature = self.sign(party, &message).await;
        }
    }

    pub fn channel(&self, key: &ChannelKey) -> Channel {
        self.service.get_channel(&key.id()).expect("channel exists")
    }

    pub fn signed_state(&self, key: &ChannelKey) -> Option<SignedState> {
        self.service
            .get_signed_state(&key.id())
            .expect("read signed state")
    }
}

impl Default for TestHub {
    fn default() -> Self {
        Self::new()
    }
}

/// The tuple a request's signer commits to.
pub fn message_of(request: &UpdateRequest, actor: &Principal) -> Option<StateMessage> {
    let key = ChannelKey::new(
        request.asset.clone(),
        request.principal_1.clone(),
        request.principal_2.clone(),
    )
    .ok()?;
    let (balance_1, balance_2) = if key.principal_1 == request.principal_1 {
        (request.balance_1, request.balance_2)
    } else {
        (request.balance_2, request.balance_1)
    };
    Some(StateMessage {
        key,
        balances: Balances::new(u128::try_from(balance_1).ok()?, u128::try_from(balance_2).ok()?),
        nonce: request.nonce,
        action: request.action,
        actor: Some(actor.clone()),
        secret_hash: request.secret_hash,
    })
}

/// A contract event on `key` as the settlement feed delivers it.
pub fn channel_event(
    name: &str,
    key: &ChannelKey,
    balances: Balances,
    nonce: u128,
    sender: &Principal,
    signatures: Option<(Signature, Signature)>,
) -> Value {
    let mut value = json!({
        "event": name,
        "channel": {
            "balance-1": format!("u{}", balances.balance_1),
            "balance-2": format!("u{}", balances.balance_2),
            "expires-at": format!("u{}", u128::MAX),
            "nonce": format!("u{}", nonce),
        },
        "channel-key": {
            "principal-1": key.principal_1,
            "principal-2": key.principal_2,
            "token": key.asset,
        },
        "sender": sender,
    });
    if let Some((mine, theirs)) = signatures {
        value["my-signature"] = json!(format!("0x{}", hex::encode(mine)));
        value["their-signature"] = json!(format!("0x{}", hex::encode(theirs)));
    }
    contract_event(value)
}

pub fn reveal_secret_event(secret: &Hash256) -> Value {
    contract_event(json!({
        "event": "reveal-secret",
        "secret": secret,
    }))
}

pub fn contract_event(value: Value) -> Value {
    json!({
        "type": "SmartContractEvent",
        "data": { "value": value },
    })
}

/// A delivery body with one transaction per block.
pub fn delivery(blocks: &[(u64, Vec<Value>)]) -> Vec<u8> {
    let apply: Vec<Value> = blocks
        .iter()
        .map(|(height, events)| {
            json!({
                "block_identifier": { "index": height },
                "transactions": [
                    { "metadata": { "receipt": { "events": events } } }
                ],
            })
        })
        .collect();
    serde_json::to_vec(&json!({ "apply": apply })).expect("serialize delivery")
}
