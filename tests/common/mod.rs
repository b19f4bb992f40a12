//! Shared fixtures: a scripted gateway, seeded in-memory stores and helpers
//! that build the query string a returning customer would carry.

#![allow(dead_code)]

use async_trait::async_trait;
use dpo_return_flow::codec::{EncryptionKey, HashKey, ParamCodec};
use dpo_return_flow::domain::{Confirmation, CustomerDetails, FeedConfig, Order, OrderReference};
use dpo_return_flow::gateway::{GatewayEndpoints, GatewayError, GatewaySessionClient, GatewayTransport};
use dpo_return_flow::services::{CallbackSettings, PollPolicy, ReturnFlowService};
use dpo_return_flow::storage::{InMemoryFeedRepository, InMemoryOrderStore};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ORDER_ID: &str = "42";
pub const FORM_ID: &str = "1";
pub const OWNER_ID: &str = "7";
pub const FEED_ID: &str = "3";
pub const COMPANY_TOKEN: &str = "8D3DA73D-9D7F-4E09-96D4-3D44E7A83EA3";
pub const SUCCESS_PAGE: &str = "https://shop.example/thanks";
pub const RETURN_BASE: &str = "https://shop.example/payments/return";

pub fn create_ok_xml(token: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><API3G><Result>000</Result><ResultExplanation>Transaction created</ResultExplanation><TransToken>{}</TransToken><TransRef>R1</TransRef></API3G>"#,
        token
    )
}

pub fn verify_xml(code: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><API3G><Result>{}</Result><ResultExplanation>status {}</ResultExplanation></API3G>"#,
        code, code
    )
}

pub fn approved_xml(amount: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><API3G><Result>000</Result><ResultExplanation>Transaction Paid</ResultExplanation><TransactionAmount>{}</TransactionAmount><TransactionCurrency>USD</TransactionCurrency><TransactionApproval>4455</TransactionApproval></API3G>"#,
        amount
    )
}

/// Gateway double. Responses are queued per request kind; once a queue has
/// one entry left that entry repeats forever.
#[derive(Default)]
pub struct ScriptedTransport {
    create: Mutex<VecDeque<Result<String, GatewayError>>>,
    verify: Mutex<VecDeque<Result<String, GatewayError>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_create(&self, response: Result<String, GatewayError>) {
        self.create.lock().unwrap().push_back(response);
    }

    pub fn on_verify(&self, response: Result<String, GatewayError>) {
        self.verify.lock().unwrap().push_back(response);
    }

    pub fn verify_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, body)| body.contains("<Request>verifyToken</Request>"))
            .count()
    }

    pub fn create_calls(&self) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, body)| body.contains("<Request>createToken</Request>"))
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }

    fn next(queue: &Mutex<VecDeque<Result<String, GatewayError>>>) -> Result<String, GatewayError> {
        let mut queue = queue.lock().unwrap();
        match queue.len() {
            0 => Err(GatewayError::Transport("no scripted response".to_string())),
            1 => queue[0].clone(),
            _ => queue.pop_front().unwrap(),
        }
    }
}

#[async_trait]
impl GatewayTransport for ScriptedTransport {
    async fn post_xml(&self, url: &str, body: String) -> Result<String, GatewayError> {
        let is_create = body.contains("<Request>createToken</Request>");
        self.calls.lock().unwrap().push((url.to_string(), body));
        if is_create {
            Self::next(&self.create)
        } else {
            Self::next(&self.verify)
        }
    }
}

pub fn codec() -> ParamCodec {
    ParamCodec::new(
        EncryptionKey::from_bytes([7u8; 32]),
        HashKey::new(b"test-hash-secret").unwrap(),
    )
}

pub fn reference() -> OrderReference {
    OrderReference {
        order_id: ORDER_ID.to_string(),
        form_id: FORM_ID.to_string(),
        owner_id: OWNER_ID.to_string(),
        feed_id: FEED_ID.to_string(),
    }
}

pub fn order() -> Order {
    Order::new(reference(), "USD", Decimal::from_str("10.00").unwrap()).with_customer(
        CustomerDetails {
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            address: "1 Analytical Way".to_string(),
            city: "London".to_string(),
            country: "GB".to_string(),
            phone: "+44 (20) 7946-0000".to_string(),
            email: "ada@example.com".to_string(),
        },
    )
}

pub fn feed() -> FeedConfig {
    FeedConfig {
        feed_id: FEED_ID.to_string(),
        form_id: FORM_ID.to_string(),
        company_token: COMPANY_TOKEN.to_string(),
        service_type: "3854".to_string(),
        service_description: "Form payment".to_string(),
        test_mode: true,
        success_page_url: None,
        confirmations: vec![Confirmation {
            name: "Cancelled".to_string(),
            message: "Your payment was cancelled.".to_string(),
        }],
    }
}

pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        max_attempts: 5,
        backoff: Duration::from_secs(2),
        timeout: Duration::from_secs(30),
    }
}

pub struct Fixture {
    pub service: ReturnFlowService,
    pub transport: Arc<ScriptedTransport>,
    pub orders: Arc<InMemoryOrderStore>,
    pub feeds: Arc<InMemoryFeedRepository>,
}

pub fn service_with(
    transport: Arc<ScriptedTransport>,
    orders: Arc<InMemoryOrderStore>,
    feeds: Arc<InMemoryFeedRepository>,
    settings: CallbackSettings,
) -> ReturnFlowService {
    let client = GatewaySessionClient::new(transport, GatewayEndpoints::default());
    ReturnFlowService::new(codec(), client, fast_policy(), orders, feeds, settings)
}

pub async fn fixture_with(feed: FeedConfig, settings: CallbackSettings) -> Fixture {
    let transport = ScriptedTransport::new();
    let orders = Arc::new(InMemoryOrderStore::new());
    let feeds = Arc::new(InMemoryFeedRepository::new());
    orders.insert_order(order()).await;
    feeds.insert_feed(feed).await;

    let service = service_with(transport.clone(), orders.clone(), feeds.clone(), settings);

    Fixture {
        service,
        transport,
        orders,
        feeds,
    }
}

pub async fn fixture() -> Fixture {
    fixture_with(feed(), CallbackSettings::default()).await
}

/// Query a customer returning from the hosted page would carry.
pub fn callback_query(codec: &ParamCodec, transaction_token: &str) -> Vec<(String, String)> {
    let ids = reference().ids_string();
    let mut envelope = BTreeMap::new();
    envelope.insert("hash".to_string(), codec.keyed_hash(&ids));
    envelope.insert("ids".to_string(), ids);

    vec![
        ("gf_dpo_group_return".to_string(), codec.encode(&envelope).unwrap()),
        ("rm".to_string(), "2".to_string()),
        ("eid".to_string(), codec.encrypt_value(ORDER_ID).unwrap()),
        ("mode".to_string(), "on".to_string()),
        ("TransactionToken".to_string(), transaction_token.to_string()),
        ("CompanyRef".to_string(), "DPO_Group_Form_42".to_string()),
        ("TransID".to_string(), "T1".to_string()),
        ("CCDapproval".to_string(), "4455".to_string()),
        ("PnrID".to_string(), "DPO_Group_Form_42".to_string()),
    ]
}

/// Same as [`callback_query`] but with the envelope hash computed over
/// different identifiers.
pub fn forged_query(codec: &ParamCodec, transaction_token: &str) -> Vec<(String, String)> {
    let ids = reference().ids_string();
    let mut envelope = BTreeMap::new();
    envelope.insert("hash".to_string(), codec.keyed_hash("1|43|7|3"));
    envelope.insert("ids".to_string(), ids);

    let mut query = callback_query(codec, transaction_token);
    query[0].1 = codec.encode(&envelope).unwrap();
    query
}
