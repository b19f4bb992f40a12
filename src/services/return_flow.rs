//! Return-flow orchestrator
//!
//! Outbound, it seals the order identifiers into the return URL, opens a
//! gateway session and hands back the hosted-page redirect. Inbound, it
//! validates the returning request, asks the gateway for the final result
//! and drives the order state machine.

use crate::codec::params::{ORDER_ID_PARAM, MODE_PARAM, RETURN_MODE_PARAM, TRANSACTION_TOKEN_PARAM};
use crate::codec::{CodecError, ParamCodec, ReturnParams, RETURN_MARKER};
use crate::config::{AppConfig, CallbackConfig, ConfigError, DEFAULT_CONFIRMATION};
use crate::domain::order::NOTE_AUTHOR_REDIRECT;
use crate::domain::{FeedConfig, FeedRepository, Note, Order, OrderReference, OrderState, OrderStore, TransitionResult};
use crate::error::ReturnFlowError;
use crate::gateway::{
    FailureCause, GatewayEndpoints, GatewayError, GatewaySessionClient, GatewayTransport,
    OrderDetails, Outcome, SessionToken,
};
use crate::logging::mask_token;
use crate::services::order_state_machine::{OrderStateMachine, SettlementFacts};
use crate::services::verification_poller::{PollError, PollPolicy, VerificationPoller, VerifyPhase};
use chrono::Utc;
use reqwest::Url;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

const IDS_KEY: &str = "ids";
const HASH_KEY: &str = "hash";
const RETURN_MODE: &str = "2";
const TEST_ITN_PARAM: &str = "test_itn";
const COMPANY_REF_PREFIX: &str = "DPO_Group_Form_";

/// Per-request state: correlation id and cancellation signal.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub cancel: watch::Receiver<bool>,
}

impl RequestContext {
    /// Context that is never cancelled.
    pub fn new(request_id: Uuid) -> Self {
        let (_tx, cancel) = watch::channel(false);
        Self { request_id, cancel }
    }

    pub fn with_cancel(request_id: Uuid, cancel: watch::Receiver<bool>) -> Self {
        Self { request_id, cancel }
    }
}

/// Callback behaviour knobs.
#[derive(Debug, Clone)]
pub struct CallbackSettings {
    pub allow_test_bypass: bool,
    pub default_confirmation: String,
}

impl Default for CallbackSettings {
    fn default() -> Self {
        Self {
            allow_test_bypass: false,
            default_confirmation: DEFAULT_CONFIRMATION.to_string(),
        }
    }
}

impl From<&CallbackConfig> for CallbackSettings {
    fn from(cfg: &CallbackConfig) -> Self {
        Self {
            allow_test_bypass: cfg.allow_test_bypass,
            default_confirmation: cfg.default_confirmation.clone(),
        }
    }
}

/// Where to send the customer to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRedirect {
    pub url: String,
    pub session_token: SessionToken,
    pub company_ref: String,
}

/// Result of handling a returning customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub order_id: String,
    pub state: OrderState,
    /// Whether this request performed the state change.
    pub applied: bool,
    pub result_code: Option<String>,
    pub message: String,
    /// Confirmation page to redirect to, when one is configured.
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackDisposition {
    /// No `TransactionToken`; the request is not ours.
    NotACallback,
    Processed(CallbackOutcome),
}

#[derive(Clone)]
pub struct ReturnFlowService {
    codec: ParamCodec,
    client: GatewaySessionClient,
    poller: VerificationPoller,
    machine: OrderStateMachine,
    orders: Arc<dyn OrderStore>,
    feeds: Arc<dyn FeedRepository>,
    settings: CallbackSettings,
}

impl ReturnFlowService {
    pub fn new(
        codec: ParamCodec,
        client: GatewaySessionClient,
        policy: PollPolicy,
        orders: Arc<dyn OrderStore>,
        feeds: Arc<dyn FeedRepository>,
        settings: CallbackSettings,
    ) -> Self {
        Self {
            codec,
            poller: VerificationPoller::new(client.clone(), policy),
            client,
            machine: OrderStateMachine::new(orders.clone()),
            orders,
            feeds,
            settings,
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        transport: Arc<dyn GatewayTransport>,
        orders: Arc<dyn OrderStore>,
        feeds: Arc<dyn FeedRepository>,
    ) -> Result<Self, ConfigError> {
        let client = GatewaySessionClient::new(transport, GatewayEndpoints::from_config(&cfg.gateway));
        Ok(Self::new(
            cfg.codec.build()?,
            client,
            PollPolicy::from_config(&cfg.poller),
            orders,
            feeds,
            CallbackSettings::from(&cfg.callback),
        ))
    }

    pub fn codec(&self) -> &ParamCodec {
        &self.codec
    }

    /// Load the order and its feed, then start a payment.
    pub async fn checkout(
        &self,
        order_id: &str,
        return_base: &str,
        ctx: &RequestContext,
    ) -> Result<PaymentRedirect, ReturnFlowError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or_else(|| ReturnFlowError::OrderNotFound(order_id.to_string()))?;
        let feed = self.load_feed(&order.reference).await?;
        self.begin_payment(&feed, &order, return_base, ctx).await
    }

    /// Open a gateway session for `order` and return the hosted-page
    /// redirect. Nothing is written to the order unless the session is ready.
    #[instrument(skip(self, feed, order, return_base, ctx), fields(request_id = %ctx.request_id, order_id = %order.id()))]
    pub async fn begin_payment(
        &self,
        feed: &FeedConfig,
        order: &Order,
        return_base: &str,
        ctx: &RequestContext,
    ) -> Result<PaymentRedirect, ReturnFlowError> {
        if order.state.is_terminal() {
            return Err(ReturnFlowError::AlreadySettled(order.state));
        }

        let (redirect_url, back_url) = self.build_return_urls(order, feed.test_mode, return_base)?;
        let company_ref = format!(
            "{}{}_{}",
            COMPANY_REF_PREFIX,
            order.id(),
            Utc::now().format("%Y%m%d%H%M%S")
        );

        let details = OrderDetails {
            amount: order.total,
            currency: order.currency.clone(),
            company_ref: company_ref.clone(),
            redirect_url,
            back_url,
            service_type: feed.service_type.clone(),
            service_description: feed.service_description.clone(),
            service_date: Utc::now(),
            customer: order.customer.clone(),
        };

        let credential = feed.credential(feed.test_mode);
        let creation = self.client.create_session(&credential, &details).await;
        let token = match (creation.success, creation.session_token) {
            (true, Some(token)) => token,
            _ => {
                let message = creation
                    .error
                    .unwrap_or_else(|| "payment session could not be created".to_string());
                warn!(error = %message, "Session creation failed, order left untouched");
                return Err(ReturnFlowError::SessionCreation(message));
            }
        };

        self.poller
            .poll(&credential, &token, VerifyPhase::SessionReady, ctx.cancel.clone())
            .await?;

        self.orders
            .record_session(order.id(), token.as_str(), &company_ref)
            .await?;
        self.orders
            .append_note(
                order.id(),
                Note::new(
                    NOTE_AUTHOR_REDIRECT,
                    format!("Payment session created, Pay Request ID: {}", token),
                ),
            )
            .await?;

        info!(session_token = %mask_token(token.as_str()), company_ref = %company_ref, "Redirecting to hosted payment page");

        Ok(PaymentRedirect {
            url: self.client.hosted_page_url(&credential, &token),
            session_token: token,
            company_ref,
        })
    }

    /// Return URL (envelope, return mode, encrypted order id, mode flag) and
    /// back URL (same, without order id and mode).
    fn build_return_urls(
        &self,
        order: &Order,
        test_mode: bool,
        return_base: &str,
    ) -> Result<(String, String), ReturnFlowError> {
        let ids = order.reference.ids_string();
        let mut envelope = BTreeMap::new();
        envelope.insert(HASH_KEY.to_string(), self.codec.keyed_hash(&ids));
        envelope.insert(IDS_KEY.to_string(), ids);
        let sealed = self.codec.encode(&envelope).map_err(ReturnFlowError::Encode)?;

        let mut url = Url::parse(return_base).map_err(|e| {
            ReturnFlowError::Encode(CodecError::InvalidParam(format!(
                "return base {:?} is not a URL: {}",
                return_base, e
            )))
        })?;
        url.query_pairs_mut()
            .append_pair(RETURN_MARKER, &sealed)
            .append_pair(RETURN_MODE_PARAM, RETURN_MODE);
        let back_url = url.to_string();

        let eid = self
            .codec
            .encrypt_value(order.id())
            .map_err(ReturnFlowError::Encode)?;
        url.query_pairs_mut()
            .append_pair(ORDER_ID_PARAM, &eid)
            .append_pair(MODE_PARAM, if test_mode { "on" } else { "off" });

        Ok((url.to_string(), back_url))
    }

    /// Handle a customer returning from the hosted page.
    #[instrument(skip(self, query, ctx), fields(request_id = %ctx.request_id))]
    pub async fn handle_callback(
        &self,
        query: &[(String, String)],
        ctx: &RequestContext,
    ) -> Result<CallbackDisposition, ReturnFlowError> {
        let has_token = query
            .iter()
            .any(|(k, v)| k == TRANSACTION_TOKEN_PARAM && !v.is_empty());
        if !has_token {
            return Ok(CallbackDisposition::NotACallback);
        }

        let params = ReturnParams::from_query(
            &self.codec,
            query.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
        .map_err(|e| {
            warn!(error = %e, "Rejecting callback with undecodable parameters");
            ReturnFlowError::Decode(e)
        })?;

        let reference = self.verify_proof(&params)?;
        let order_id = reference.order_id.clone();

        let order = match self.orders.get_order(&order_id).await? {
            Some(order) => order,
            None => {
                error!(order_id = %order_id, "Callback for unknown order");
                return Err(ReturnFlowError::OrderNotFound(order_id));
            }
        };
        let feed = self.load_feed(&reference).await?;

        if order.state.is_terminal() {
            info!(order_id = %order_id, state = %order.state, "Order already settled, callback acknowledged");
            return Ok(CallbackDisposition::Processed(self.callback_outcome(
                &feed, &params, &order_id, order.state, false, None,
            )));
        }

        // `mode` only gates the test bypass; the feed decides the endpoint.
        let credential = feed.credential(feed.test_mode);
        let transaction_token = params.transaction_token().unwrap_or_default().to_string();
        let token = SessionToken::new(transaction_token.clone());

        let mut facts = SettlementFacts {
            transaction_id: transaction_token,
            company_ref: params.company_ref().map(str::to_string),
            approval_code: None,
            amount: None,
        };

        let (outcome, result_code) = match self
            .poller
            .poll(&credential, &token, VerifyPhase::Settlement, ctx.cancel.clone())
            .await
        {
            Ok(result) => {
                facts.approval_code = result.approval_code.clone();
                facts.amount = result.transaction_amount;
                (
                    Outcome::from_result_code(&result.result_code),
                    Some(result.result_code.as_str().to_string()),
                )
            }
            Err(PollError::Timeout { attempts, elapsed_ms, last_code }) => {
                error!(
                    failure_kind = FailureCause::VerificationTimeout.kind(),
                    attempts,
                    elapsed_ms = %elapsed_ms,
                    last_code = ?last_code,
                    "Verification timed out"
                );
                (Outcome::Failed(FailureCause::VerificationTimeout), last_code)
            }
            Err(PollError::Gateway(GatewayError::Parse(msg))) => {
                error!(
                    failure_kind = FailureCause::MalformedResponse.kind(),
                    error = %msg,
                    "Verify response could not be parsed"
                );
                (Outcome::Failed(FailureCause::MalformedResponse), None)
            }
            Err(e) => return Err(e.into()),
        };

        let (state, applied) = match self.machine.settle(&order, &outcome, &facts).await? {
            TransitionResult::Applied(updated) => (updated.state, true),
            TransitionResult::AlreadyTerminal(state) => (state, false),
        };

        Ok(CallbackDisposition::Processed(self.callback_outcome(
            &feed,
            &params,
            &order_id,
            state,
            applied,
            result_code,
        )))
    }

    /// Check the envelope's keyed hash and `eid` against the order
    /// identifiers. Runs before any order is read or written.
    fn verify_proof(&self, params: &ReturnParams) -> Result<OrderReference, ReturnFlowError> {
        let ids = params.envelope_value(IDS_KEY).ok_or_else(|| {
            warn!("Callback without return envelope");
            ReturnFlowError::MissingProof
        })?;

        let bypass = self.settings.allow_test_bypass
            && params.is_test_mode()
            && params.gateway_param(TEST_ITN_PARAM) == Some("1");

        match params.envelope_value(HASH_KEY) {
            Some(hash) if self.codec.verify_hash(ids, hash) => {}
            Some(_) if bypass => warn!("Hash mismatch ignored for test callback"),
            None if bypass => warn!("Missing hash ignored for test callback"),
            Some(_) => {
                warn!("Callback hash does not match order identifiers");
                return Err(ReturnFlowError::HashMismatch);
            }
            None => {
                warn!("Callback envelope has no hash");
                return Err(ReturnFlowError::MissingProof);
            }
        }

        let reference = OrderReference::parse_ids(ids).ok_or_else(|| {
            ReturnFlowError::Decode(CodecError::Decode("malformed order identifiers".to_string()))
        })?;

        if let Some(eid) = params.order_id.as_deref() {
            if eid != reference.order_id {
                warn!("Encrypted order id does not match envelope");
                return Err(ReturnFlowError::HashMismatch);
            }
        }

        Ok(reference)
    }

    async fn load_feed(&self, reference: &OrderReference) -> Result<FeedConfig, ReturnFlowError> {
        self.feeds
            .get_feed(&reference.feed_id, &reference.form_id)
            .await?
            .ok_or_else(|| {
                error!(feed_id = %reference.feed_id, form_id = %reference.form_id, "Feed not found");
                ReturnFlowError::FeedNotFound {
                    feed_id: reference.feed_id.clone(),
                    form_id: reference.form_id.clone(),
                }
            })
    }

    fn callback_outcome(
        &self,
        feed: &FeedConfig,
        params: &ReturnParams,
        order_id: &str,
        state: OrderState,
        applied: bool,
        result_code: Option<String>,
    ) -> CallbackOutcome {
        let keyword = match state {
            OrderState::Approved => "approved",
            OrderState::Cancelled => "cancelled",
            _ => "failed",
        };
        let message = feed
            .confirmation_for(keyword)
            .map(|c| c.message.clone())
            .unwrap_or_else(|| self.settings.default_confirmation.clone());

        let redirect_url = match (state, feed.success_page_url.as_deref()) {
            (OrderState::Approved, Some(page)) => self.success_page_url(page, params, order_id),
            _ => None,
        };

        CallbackOutcome {
            order_id: order_id.to_string(),
            state,
            applied,
            result_code,
            message,
            redirect_url,
        }
    }

    /// Success page with the original `eid` echoed back.
    fn success_page_url(&self, page: &str, params: &ReturnParams, order_id: &str) -> Option<String> {
        let eid = match params.order_id_token.clone() {
            Some(eid) => eid,
            None => self.codec.encrypt_value(order_id).ok()?,
        };
        match Url::parse(page) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair(ORDER_ID_PARAM, &eid);
                Some(url.to_string())
            }
            Err(e) => {
                warn!(page = %page, error = %e, "Configured success page is not a URL");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EncryptionKey, HashKey};
    use crate::storage::{InMemoryFeedRepository, InMemoryOrderStore};
    use async_trait::async_trait;
    use rust_decimal::Decimal;

    struct Unreachable;

    #[async_trait]
    impl GatewayTransport for Unreachable {
        async fn post_xml(&self, _url: &str, _body: String) -> Result<String, GatewayError> {
            Err(GatewayError::Transport("no network in unit tests".to_string()))
        }
    }

    fn service() -> ReturnFlowService {
        ReturnFlowService::new(
            ParamCodec::new(EncryptionKey::generate(), HashKey::new(b"k").unwrap()),
            GatewaySessionClient::new(Arc::new(Unreachable), GatewayEndpoints::default()),
            PollPolicy::default(),
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemoryFeedRepository::new()),
            CallbackSettings::default(),
        )
    }

    fn order() -> Order {
        Order::new(
            OrderReference {
                order_id: "42".to_string(),
                form_id: "1".to_string(),
                owner_id: "7".to_string(),
                feed_id: "3".to_string(),
            },
            "USD",
            Decimal::new(1000, 2),
        )
    }

    #[test]
    fn test_return_urls_carry_envelope_and_order_id() {
        let service = service();
        let (redirect, back) = service
            .build_return_urls(&order(), true, "https://shop.example/pay?page=5")
            .unwrap();

        assert!(redirect.starts_with("https://shop.example/pay?page=5&gf_dpo_group_return="));
        assert!(redirect.contains("&rm=2&eid="));
        assert!(redirect.ends_with("&mode=on"));
        assert!(back.contains("rm=2"));
        assert!(!back.contains("eid="));
        assert!(!back.contains("mode="));

        let url = Url::parse(&redirect).unwrap();
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let params = ReturnParams::from_query(
            service.codec(),
            pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        )
        .unwrap();
        assert_eq!(params.order_id.as_deref(), Some("42"));
        let reference = service.verify_proof(&params).unwrap();
        assert_eq!(reference, order().reference);
    }

    #[tokio::test]
    async fn test_request_without_token_is_not_a_callback() {
        let service = service();
        let query = vec![("page".to_string(), "5".to_string())];
        let disposition = service
            .handle_callback(&query, &RequestContext::new(Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(disposition, CallbackDisposition::NotACallback);
    }

    #[tokio::test]
    async fn test_callback_without_envelope_is_missing_proof() {
        let service = service();
        let query = vec![("TransactionToken".to_string(), "T1".to_string())];
        let err = service
            .handle_callback(&query, &RequestContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReturnFlowError::MissingProof));
    }

    #[tokio::test]
    async fn test_session_failure_surfaces_message() {
        let service = service();
        let feed = FeedConfig {
            feed_id: "3".to_string(),
            form_id: "1".to_string(),
            company_token: "ABC".to_string(),
            service_type: "3854".to_string(),
            service_description: "Form payment".to_string(),
            test_mode: true,
            success_page_url: None,
            confirmations: Vec::new(),
        };
        let err = service
            .begin_payment(&feed, &order(), "https://shop.example/pay", &RequestContext::new(Uuid::new_v4()))
            .await
            .unwrap_err();
        match err {
            ReturnFlowError::SessionCreation(msg) => assert!(msg.contains("no network")),
            other => panic!("expected SessionCreation, got {:?}", other),
        }
    }
}
