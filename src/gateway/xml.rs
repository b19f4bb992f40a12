//! API3G request/response envelopes.

use super::types::{GatewayResult, MerchantCredential, OrderDetails, ResultCode, SessionToken};
use super::GatewayError;
use crate::domain::order::format_dot_amount;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;
const SERVICE_DATE_FORMAT: &str = "%Y/%m/%d %H:%M";

pub const REQUEST_CREATE_TOKEN: &str = "createToken";
pub const REQUEST_VERIFY_TOKEN: &str = "verifyToken";
/// `Result` value of a successful `createToken`.
pub const CREATE_TOKEN_OK: &str = "000";

#[derive(Debug, Serialize)]
#[serde(rename = "API3G")]
struct CreateTokenRequest {
    #[serde(rename = "CompanyToken")]
    company_token: String,
    #[serde(rename = "Request")]
    request: String,
    #[serde(rename = "Transaction")]
    transaction: TransactionBlock,
    #[serde(rename = "Services")]
    services: ServicesBlock,
}

#[derive(Debug, Serialize)]
struct TransactionBlock {
    #[serde(rename = "PaymentAmount")]
    payment_amount: String,
    #[serde(rename = "PaymentCurrency")]
    payment_currency: String,
    #[serde(rename = "CompanyRef")]
    company_ref: String,
    #[serde(rename = "RedirectURL")]
    redirect_url: String,
    #[serde(rename = "BackURL")]
    back_url: String,
    #[serde(rename = "CompanyRefUnique")]
    company_ref_unique: u8,
    #[serde(rename = "customerFirstName")]
    customer_first_name: String,
    #[serde(rename = "customerLastName")]
    customer_last_name: String,
    #[serde(rename = "customerAddress")]
    customer_address: String,
    #[serde(rename = "customerCity")]
    customer_city: String,
    #[serde(rename = "customerCountry")]
    customer_country: String,
    #[serde(rename = "customerPhone")]
    customer_phone: String,
    #[serde(rename = "customerEmail")]
    customer_email: String,
    #[serde(rename = "CompanyAccRef")]
    company_acc_ref: String,
}

#[derive(Debug, Serialize)]
struct ServicesBlock {
    #[serde(rename = "Service")]
    service: Vec<ServiceBlock>,
}

#[derive(Debug, Serialize)]
struct ServiceBlock {
    #[serde(rename = "ServiceType")]
    service_type: String,
    #[serde(rename = "ServiceDescription")]
    service_description: String,
    #[serde(rename = "ServiceDate")]
    service_date: String,
}

#[derive(Debug, Serialize)]
#[serde(rename = "API3G")]
struct VerifyTokenRequest {
    #[serde(rename = "CompanyToken")]
    company_token: String,
    #[serde(rename = "Request")]
    request: String,
    #[serde(rename = "TransactionToken")]
    transaction_token: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenResponse {
    #[serde(rename = "Result")]
    pub result: String,
    #[serde(rename = "ResultExplanation", default)]
    pub result_explanation: Option<String>,
    #[serde(rename = "TransToken", default)]
    pub trans_token: Option<String>,
    #[serde(rename = "TransRef", default)]
    pub trans_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyTokenResponse {
    #[serde(rename = "Result")]
    result: String,
    #[serde(rename = "ResultExplanation", default)]
    result_explanation: Option<String>,
    #[serde(rename = "TransactionAmount", default)]
    transaction_amount: Option<String>,
    #[serde(rename = "TransactionCurrency", default)]
    transaction_currency: Option<String>,
    #[serde(rename = "TransactionApproval", default)]
    transaction_approval: Option<String>,
    #[serde(rename = "ApprovalNumber", default)]
    approval_number: Option<String>,
}

/// Strip formatting characters the gateway rejects in phone numbers.
fn sanitize_phone(phone: &str) -> String {
    phone
        .chars()
        .filter(|c| !matches!(c, '+' | '-' | '(' | ')' | ' '))
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn to_xml<T: Serialize>(request: &T) -> Result<String, GatewayError> {
    let body = quick_xml::se::to_string(request).map_err(|e| GatewayError::Encode(e.to_string()))?;
    Ok(format!("{}{}", XML_DECLARATION, body))
}

pub fn create_token_body(
    credential: &MerchantCredential,
    details: &OrderDetails,
) -> Result<String, GatewayError> {
    let customer = &details.customer;
    let request = CreateTokenRequest {
        company_token: credential.company_token.clone(),
        request: REQUEST_CREATE_TOKEN.to_string(),
        transaction: TransactionBlock {
            payment_amount: format_dot_amount(details.amount),
            payment_currency: details.currency.clone(),
            company_ref: details.company_ref.clone(),
            redirect_url: details.redirect_url.clone(),
            back_url: details.back_url.clone(),
            company_ref_unique: 0,
            customer_first_name: customer.first_name.clone(),
            customer_last_name: customer.last_name.clone(),
            customer_address: customer.address.clone(),
            customer_city: customer.city.clone(),
            customer_country: customer.country.clone(),
            customer_phone: sanitize_phone(&customer.phone),
            customer_email: customer.email.clone(),
            company_acc_ref: details.company_ref.clone(),
        },
        services: ServicesBlock {
            service: vec![ServiceBlock {
                service_type: details.service_type.clone(),
                service_description: details.service_description.clone(),
                service_date: details.service_date.format(SERVICE_DATE_FORMAT).to_string(),
            }],
        },
    };
    to_xml(&request)
}

pub fn verify_token_body(
    credential: &MerchantCredential,
    token: &SessionToken,
) -> Result<String, GatewayError> {
    to_xml(&VerifyTokenRequest {
        company_token: credential.company_token.clone(),
        request: REQUEST_VERIFY_TOKEN.to_string(),
        transaction_token: token.as_str().to_string(),
    })
}

pub fn parse_create_token(body: &str) -> Result<CreateTokenResponse, GatewayError> {
    let mut response: CreateTokenResponse =
        quick_xml::de::from_str(body).map_err(|e| GatewayError::Parse(e.to_string()))?;
    response.result = response.result.trim().to_string();
    response.result_explanation = non_empty(response.result_explanation);
    response.trans_token = non_empty(response.trans_token);
    response.trans_ref = non_empty(response.trans_ref);
    Ok(response)
}

/// Parse a `verifyToken` response. An approval without a readable amount is
/// rejected rather than recorded with a guessed value.
pub fn parse_verify_token(body: &str) -> Result<GatewayResult, GatewayError> {
    let response: VerifyTokenResponse =
        quick_xml::de::from_str(body).map_err(|e| GatewayError::Parse(e.to_string()))?;

    let result_code = ResultCode::new(response.result);
    if result_code.as_str().len() != 3 || !result_code.as_str().chars().all(|c| c.is_ascii_digit()) {
        return Err(GatewayError::Parse(format!(
            "result code {:?} is not a 3-digit code",
            result_code.as_str()
        )));
    }

    let transaction_amount = match non_empty(response.transaction_amount) {
        Some(raw) => Some(Decimal::from_str(&raw).map_err(|e| {
            GatewayError::Parse(format!("invalid TransactionAmount {:?}: {}", raw, e))
        })?),
        None => None,
    };

    if result_code.as_str() == ResultCode::APPROVED && transaction_amount.is_none() {
        return Err(GatewayError::Parse(
            "approved result without TransactionAmount".to_string(),
        ));
    }

    Ok(GatewayResult {
        result_code,
        result_explanation: non_empty(response.result_explanation),
        transaction_amount,
        transaction_currency: non_empty(response.transaction_currency),
        approval_code: non_empty(response.approval_number)
            .or_else(|| non_empty(response.transaction_approval)),
    })
}
