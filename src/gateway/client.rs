use super::transport::GatewayTransport;
use super::types::{GatewayResult, MerchantCredential, OrderDetails, SessionCreation, SessionToken};
use super::{xml, GatewayError};
use crate::config::GatewayConfig;
use crate::logging::{log_external_call, mask_token, redact_sensitive_data};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const SERVICE_NAME: &str = "DPO Pay";

/// Live and sandbox endpoint roots plus the API and hosted-page paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoints {
    pub live_base_url: String,
    pub sandbox_base_url: String,
    pub api_path: String,
    pub pay_path: String,
}

impl Default for GatewayEndpoints {
    fn default() -> Self {
        Self::from_config(&GatewayConfig::default())
    }
}

impl GatewayEndpoints {
    pub fn from_config(cfg: &GatewayConfig) -> Self {
        Self {
            live_base_url: cfg.live_base_url.trim_end_matches('/').to_string(),
            sandbox_base_url: cfg.sandbox_base_url.trim_end_matches('/').to_string(),
            api_path: cfg.api_path.clone(),
            pay_path: cfg.pay_path.clone(),
        }
    }

    fn base(&self, test_mode: bool) -> &str {
        if test_mode {
            &self.sandbox_base_url
        } else {
            &self.live_base_url
        }
    }

    pub fn api_url(&self, test_mode: bool) -> String {
        format!("{}{}", self.base(test_mode), self.api_path)
    }

    pub fn pay_url(&self, test_mode: bool) -> String {
        format!("{}{}", self.base(test_mode), self.pay_path)
    }
}

/// Issues `createToken` and `verifyToken` calls. Each call is a single
/// request; retrying belongs to the verification poller.
#[derive(Clone)]
pub struct GatewaySessionClient {
    transport: Arc<dyn GatewayTransport>,
    endpoints: GatewayEndpoints,
}

impl GatewaySessionClient {
    pub fn new(transport: Arc<dyn GatewayTransport>, endpoints: GatewayEndpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    /// Open a hosted-payment session. Every failure, including transport
    /// errors, comes back as an unsuccessful [`SessionCreation`].
    #[instrument(
        skip(self, credential, details),
        fields(company_ref = %details.company_ref, test_mode = credential.test_mode)
    )]
    pub async fn create_session(
        &self,
        credential: &MerchantCredential,
        details: &OrderDetails,
    ) -> SessionCreation {
        match self.try_create_session(credential, details).await {
            Ok(creation) => creation,
            Err(e) => {
                warn!(error = %e, "createToken call failed");
                SessionCreation::failed(e.to_string())
            }
        }
    }

    async fn try_create_session(
        &self,
        credential: &MerchantCredential,
        details: &OrderDetails,
    ) -> Result<SessionCreation, GatewayError> {
        let body = xml::create_token_body(credential, details)?;
        debug!(body = %redact_sensitive_data(&body), "createToken request");

        let url = self.endpoints.api_url(credential.test_mode);
        let response = log_external_call(
            SERVICE_NAME,
            xml::REQUEST_CREATE_TOKEN,
            self.transport.post_xml(&url, body),
        )
        .await?;
        debug!(body = %redact_sensitive_data(&response), "createToken response");

        let parsed = xml::parse_create_token(&response)?;
        match (parsed.result.as_str(), parsed.trans_token) {
            (xml::CREATE_TOKEN_OK, Some(token)) => {
                debug!(session_token = %mask_token(&token), trans_ref = ?parsed.trans_ref, "Session created");
                Ok(SessionCreation::created(SessionToken::new(token)))
            }
            (code, _) => {
                let explanation = parsed
                    .result_explanation
                    .unwrap_or_else(|| format!("gateway result {}", code));
                warn!(result_code = %code, explanation = %explanation, "createToken rejected");
                Ok(SessionCreation::failed(explanation))
            }
        }
    }

    /// Ask the gateway for the current result of `token`.
    #[instrument(skip(self, credential, token), fields(session_token = %mask_token(token.as_str())))]
    pub async fn verify_session(
        &self,
        credential: &MerchantCredential,
        token: &SessionToken,
    ) -> Result<GatewayResult, GatewayError> {
        let body = xml::verify_token_body(credential, token)?;
        debug!(body = %redact_sensitive_data(&body), "verifyToken request");

        let url = self.endpoints.api_url(credential.test_mode);
        let response = log_external_call(
            SERVICE_NAME,
            xml::REQUEST_VERIFY_TOKEN,
            self.transport.post_xml(&url, body),
        )
        .await?;
        debug!(body = %redact_sensitive_data(&response), "verifyToken response");

        xml::parse_verify_token(&response)
    }

    /// Hosted payment page for `token`.
    pub fn hosted_page_url(&self, credential: &MerchantCredential, token: &SessionToken) -> String {
        format!("{}?ID={}", self.endpoints.pay_url(credential.test_mode), token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CustomerDetails;
    use async_trait::async_trait;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    struct CannedTransport {
        response: Result<String, GatewayError>,
        urls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GatewayTransport for CannedTransport {
        async fn post_xml(&self, url: &str, _body: String) -> Result<String, GatewayError> {
            self.urls.lock().unwrap().push(url.to_string());
            self.response.clone()
        }
    }

    fn client(response: Result<String, GatewayError>) -> (GatewaySessionClient, Arc<CannedTransport>) {
        let transport = Arc::new(CannedTransport {
            response,
            urls: Mutex::new(Vec::new()),
        });
        (
            GatewaySessionClient::new(transport.clone(), GatewayEndpoints::default()),
            transport,
        )
    }

    fn details() -> OrderDetails {
        OrderDetails {
            amount: Decimal::new(1000, 2),
            currency: "USD".to_string(),
            company_ref: "ref".to_string(),
            redirect_url: "https://shop.example/r".to_string(),
            back_url: "https://shop.example/b".to_string(),
            service_type: "3854".to_string(),
            service_description: "Form payment".to_string(),
            service_date: Utc::now(),
            customer: CustomerDetails::default(),
        }
    }

    #[test]
    fn test_endpoint_selection() {
        let endpoints = GatewayEndpoints::default();
        assert_eq!(endpoints.api_url(false), "https://secure.3gdirectpay.com/API/v6/");
        assert_eq!(
            endpoints.pay_url(true),
            "https://secure1.sandbox.directpay.online/payv2.php"
        );
    }

    #[tokio::test]
    async fn test_create_session_success() {
        let (client, transport) = client(Ok(
            "<API3G><Result>000</Result><TransToken>T1</TransToken></API3G>".to_string(),
        ));
        let credential = MerchantCredential::new("ABC", true);
        let creation = client.create_session(&credential, &details()).await;
        assert!(creation.success);
        assert_eq!(creation.session_token, Some(SessionToken::new("T1")));
        assert!(transport.urls.lock().unwrap()[0].contains("sandbox"));
        assert_eq!(
            client.hosted_page_url(&credential, &SessionToken::new("T1")),
            "https://secure1.sandbox.directpay.online/payv2.php?ID=T1"
        );
    }

    #[tokio::test]
    async fn test_create_session_rejected_carries_explanation() {
        let (client, _) = client(Ok(
            "<API3G><Result>801</Result><ResultExplanation>Request missing company token</ResultExplanation></API3G>"
                .to_string(),
        ));
        let creation = client
            .create_session(&MerchantCredential::new("ABC", false), &details())
            .await;
        assert!(!creation.success);
        assert_eq!(creation.error.as_deref(), Some("Request missing company token"));
    }

    #[tokio::test]
    async fn test_create_session_transport_failure_is_not_success() {
        let (client, _) = client(Err(GatewayError::Transport("connection refused".to_string())));
        let creation = client
            .create_session(&MerchantCredential::new("ABC", false), &details())
            .await;
        assert!(!creation.success);
        assert!(creation.error.unwrap().contains("connection refused"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_verify_response_logged_without_customer_data() {
        // Given: a verify response carrying customer contact details
        let (client, _) = client(Ok(
            "<API3G><Result>000</Result><TransactionAmount>10.00</TransactionAmount>\
             <CustomerName>Ada Lovelace</CustomerName><CustomerPhone>27825550100</CustomerPhone>\
             <CustomerEmail>ada@example.com</CustomerEmail></API3G>"
                .to_string(),
        ));
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        // When: the session is verified at DEBUG level
        client
            .verify_session(&MerchantCredential::new("ABC", true), &SessionToken::new("T1"))
            .await
            .unwrap();

        // Then: the response is logged, with customer fields redacted
        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("verifyToken response"));
        assert!(output.contains("<CustomerPhone>[REDACTED]</CustomerPhone>"));
        for leaked in ["Ada Lovelace", "27825550100", "ada@example.com"] {
            assert!(!output.contains(leaked), "{} leaked into logs", leaked);
        }
    }

    #[tokio::test]
    async fn test_verify_session_parse_error() {
        let (client, _) = client(Ok("<html>maintenance</html>".to_string()));
        let result = client
            .verify_session(&MerchantCredential::new("ABC", false), &SessionToken::new("T1"))
            .await;
        assert!(matches!(result, Err(GatewayError::Parse(_))));
    }
}
