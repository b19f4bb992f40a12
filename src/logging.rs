//! Logging and tracing configuration for the DPO return flow
//!
//! Provides structured logging with JSON formatting in production and
//! human-readable output in development. Includes redaction of merchant
//! credentials and return-URL secrets, and helpers for timing gateway calls.

use std::env;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info, Level};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Environment types for logging configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    /// Detect environment from ENV variable
    pub fn from_env() -> Self {
        Self::parse(
            &env::var("ENVIRONMENT")
                .or_else(|_| env::var("ENV"))
                .unwrap_or_else(|_| "development".to_string()),
        )
    }

    pub fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "staging" | "stage" => Self::Staging,
            _ => Self::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Get default log level for environment
    pub fn default_log_level(&self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Staging => Level::INFO,
            Self::Production => Level::INFO,
        }
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Initialize the tracing subscriber with appropriate formatting
///
/// # Environment Variables
/// - `ENVIRONMENT` or `ENV`: Set to "production", "staging", or "development"
/// - `RUST_LOG`: Override log level (e.g., "info", "debug", "warn")
/// - `LOG_FORMAT`: Force format to "json" or "pretty"
///
/// Calling this twice is harmless; the second call is ignored.
pub fn init_tracing() {
    let environment = Environment::from_env();

    // JSON for production, pretty for dev
    let use_json = env::var("LOG_FORMAT")
        .map(|f| f.to_lowercase() == "json")
        .unwrap_or_else(|_| environment.is_production());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={},tower_http=debug,axum=debug,hyper=warn,reqwest=warn",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            environment.default_log_level()
        ))
    });

    let initialized = if use_json {
        let json_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_target(true)
            .with_level(true)
            .with_file(false)
            .with_line_number(false)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).try_init()
    } else {
        let pretty_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(pretty_layer).try_init()
    };

    if initialized.is_ok() {
        info!(
            environment = ?environment,
            format = if use_json { "json" } else { "pretty" },
            "Tracing initialized"
        );
    }
}

/// Mask a merchant token or gateway session token for logging
///
/// Shows first 4 and last 4 characters, masks the rest
///
/// # Examples
/// ```
/// # use dpo_return_flow::logging::mask_token;
/// let masked = mask_token("8D3DA73D-9D7F-4E09-96D4-3D44E7A83EA3");
/// assert_eq!(masked, "8D3D...3EA3");
/// assert_eq!(mask_token("short"), "****");
/// ```
pub fn mask_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

const SENSITIVE_KEYS: [&str; 9] = [
    "secret",
    "password",
    "token",
    "api_key",
    "apiKey",
    "auth",
    "authorization",
    "encryption_key",
    "hash_secret",
];

/// Matched case-insensitively: requests use `customerPhone`, verify
/// responses use `CustomerPhone`.
const SENSITIVE_XML_ELEMENTS: [&str; 9] = [
    "CompanyToken",
    "CustomerName",
    "CustomerFirstName",
    "CustomerLastName",
    "CustomerAddress",
    "CustomerPhone",
    "CustomerEmail",
    "CustomerCredit",
    "CustomerZip",
];

fn redaction_patterns() -> &'static [(regex::Regex, String)] {
    static PATTERNS: OnceLock<Vec<(regex::Regex, String)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let mut patterns = Vec::new();
        for key in SENSITIVE_KEYS {
            // Match patterns like "key": "value" or "key":"value"
            for pattern in [
                format!(r#""{}":\s*"[^"]*""#, key),
                format!(r#"'{}': '[^']*'"#, key),
            ] {
                if let Ok(re) = regex::Regex::new(&pattern) {
                    patterns.push((re, format!(r#""{}": "[REDACTED]""#, key)));
                }
            }
        }
        for element in SENSITIVE_XML_ELEMENTS {
            let pattern = format!(r"(?i)<({0})>[^<]*</({0})>", element);
            if let Ok(re) = regex::Regex::new(&pattern) {
                patterns.push((re, "<${1}>[REDACTED]</${2}>".to_string()));
            }
        }
        patterns
    })
}

/// Redact sensitive fields from JSON-like structures and API3G XML bodies
///
/// Replaces values for keys like "secret", "password", "token", and the
/// contents of `CompanyToken` and customer contact elements.
pub fn redact_sensitive_data(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in redaction_patterns() {
        result = re.replace_all(&result, replacement.as_str()).to_string();
    }
    result
}

/// Track an outbound call to the payment gateway
///
/// Logs start, completion and failure with the call duration.
pub async fn log_external_call<F, T, E>(service: &str, endpoint: &str, operation: F) -> Result<T, E>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();

    tracing::debug!(
        event_type = "external_call_start",
        service = %service,
        endpoint = %endpoint,
        "Calling external service"
    );

    let result = operation.await;
    let duration_ms = start.elapsed().as_millis();

    match &result {
        Ok(_) => {
            info!(
                event_type = "external_call_complete",
                service = %service,
                endpoint = %endpoint,
                duration_ms = %duration_ms,
                "External service call completed"
            );
        }
        Err(e) => {
            tracing::error!(
                event_type = "external_call_error",
                service = %service,
                endpoint = %endpoint,
                duration_ms = %duration_ms,
                error = %e,
                "External service call failed"
            );
        }
    }

    result
}

/// Log a payment state event with consistent structure
///
/// # Examples
/// ```no_run
/// # use dpo_return_flow::log_payment_event;
/// log_payment_event!(
///     event = "payment_approved",
///     order_id = "42",
///     result_code = "000",
/// );
/// ```
#[macro_export]
macro_rules! log_payment_event {
    ($($key:tt = $value:expr),* $(,)?) => {
        tracing::info!(
            event_type = "payment",
            $($key = tracing::field::debug(&$value)),*
        );
    };
}

/// Create a tracing span for a request with context
///
/// # Examples
/// ```no_run
/// # use dpo_return_flow::request_span;
/// let span = request_span!(
///     "payment_callback",
///     request_id = "req_abc123",
///     order_id = "42",
/// );
/// let _guard = span.enter();
/// ```
#[macro_export]
macro_rules! request_span {
    ($name:expr, $($key:tt = $value:expr),* $(,)?) => {
        tracing::info_span!(
            $name,
            $($key = tracing::field::debug(&$value)),*
        )
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!(Environment::parse("production"), Environment::Production);
        assert!(Environment::parse("PROD").is_production());
        assert_eq!(Environment::parse("stage"), Environment::Staging);
        assert_eq!(Environment::parse("anything"), Environment::Development);
        assert!(!Environment::parse("development").is_production());
    }

    #[test]
    fn test_mask_token() {
        assert_eq!(mask_token("8D3DA73D-9D7F-4E09-96D4-3D44E7A83EA3"), "8D3D...3EA3");
        assert_eq!(mask_token("ABC"), "****");
    }

    #[test]
    fn test_default_log_levels() {
        assert_eq!(Environment::Development.default_log_level(), Level::DEBUG);
        assert_eq!(Environment::Production.default_log_level(), Level::INFO);
        assert_eq!(Environment::Staging.default_log_level(), Level::INFO);
    }

    #[test]
    fn test_redact_sensitive_data() {
        let data = r#"{"hash_secret": "SECRET123", "amount": 100}"#;
        let redacted = redact_sensitive_data(data);
        assert!(redacted.contains("[REDACTED]"));
        assert!(!redacted.contains("SECRET123"));
        assert!(redacted.contains("100"));
    }

    #[test]
    fn test_redact_xml_company_token() {
        let body = "<API3G><CompanyToken>8D3DA73D</CompanyToken><Request>verifyToken</Request></API3G>";
        let redacted = redact_sensitive_data(body);
        assert!(!redacted.contains("8D3DA73D"));
        assert!(redacted.contains("<CompanyToken>[REDACTED]</CompanyToken>"));
        assert!(redacted.contains("verifyToken"));
    }

    #[test]
    fn test_redact_verify_response_customer_fields() {
        let body = "<API3G><Result>000</Result><CustomerName>Ada Lovelace</CustomerName>\
            <CustomerCredit>4111</CustomerCredit><CustomerPhone>27825550100</CustomerPhone>\
            <CustomerEmail>ada@example.com</CustomerEmail></API3G>";
        let redacted = redact_sensitive_data(body);
        for leaked in ["Ada Lovelace", "4111", "27825550100", "ada@example.com"] {
            assert!(!redacted.contains(leaked), "{} leaked: {}", leaked, redacted);
        }
        assert!(redacted.contains("<CustomerPhone>[REDACTED]</CustomerPhone>"));
        assert!(redacted.contains("<Result>000</Result>"));
    }

    #[test]
    fn test_redact_create_token_customer_fields() {
        let body = "<customerFirstName>Ada</customerFirstName><customerPhone>442079460000</customerPhone>\
            <customerCountry>GB</customerCountry>";
        let redacted = redact_sensitive_data(body);
        assert!(redacted.contains("<customerFirstName>[REDACTED]</customerFirstName>"));
        assert!(redacted.contains("<customerPhone>[REDACTED]</customerPhone>"));
        assert!(redacted.contains("<customerCountry>GB</customerCountry>"));
    }

    #[tokio::test]
    async fn test_log_external_call_passes_result_through() {
        let ok = log_external_call("DPO Pay", "verifyToken", async { Ok::<_, String>(7) }).await;
        assert_eq!(ok, Ok(7));

        let err = log_external_call("DPO Pay", "verifyToken", async {
            Err::<u8, _>("boom".to_string())
        })
        .await;
        assert!(err.is_err());
    }
}
