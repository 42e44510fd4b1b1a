//! VNPay gateway (API 2.1.0).
//!
//! Payment creation is a signed redirect URL and needs no outbound call. The
//! IPN arrives as query parameters, and status checks go through the
//! `querydr` merchant API. All signatures are HMAC-SHA512.

use std::collections::BTreeMap;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    CallbackReply, GatewayOutcome, PaymentGateway, PaymentLink, PaymentRequest, RawCallback,
    StatusQuery, VerifiedCallback,
    signing::{self, HmacSha512},
    unreachable,
};
use crate::{app_error::AppError, config::VnpayConfig, status::PaymentMethod};

const NAME: &str = "VNPay";
const HASH_PARAM: &str = "vnp_SecureHash";
const HASH_TYPE_PARAM: &str = "vnp_SecureHashType";
/// How long the buyer has to finish on the VNPay page.
const PAYMENT_WINDOW_MINUTES: i64 = 15;
/// `querydr` response code for a transaction VNPay has no record of yet.
const QUERY_NOT_FOUND: &str = "91";

pub struct VnpayGateway {
    config: VnpayConfig,
    client: Client,
}

#[derive(Serialize, Debug)]
#[allow(non_snake_case)]
struct QueryBody<'a> {
    vnp_RequestId: String,
    vnp_Version: &'a str,
    vnp_Command: &'a str,
    vnp_TmnCode: &'a str,
    vnp_TxnRef: &'a str,
    vnp_OrderInfo: String,
    vnp_TransactionDate: String,
    vnp_CreateDate: String,
    vnp_IpAddr: &'a str,
    vnp_SecureHash: String,
}

#[derive(Deserialize, Debug)]
#[allow(non_snake_case)]
struct QueryResponse {
    vnp_ResponseCode: String,
    #[serde(default)]
    vnp_Message: String,
    vnp_TransactionStatus: Option<String>,
    vnp_TransactionNo: Option<String>,
}

/// VNPay timestamps are `yyyyMMddHHmmss` in Vietnam time (GMT+7).
pub fn vnp_timestamp(at: DateTime<Utc>) -> String {
    (at + Duration::hours(7)).format("%Y%m%d%H%M%S").to_string()
}

/// Sorted, form-urlencoded `k=v&...` string; this is both the signed data
/// and the query string sent to VNPay.
pub fn encode_params(params: &BTreeMap<String, String>) -> Result<String, AppError> {
    let url = Url::parse_with_params("http://vnpay.invalid/", params.iter())
        .map_err(|err| AppError::Other(anyhow::anyhow!("Failed to encode VNPay params: {err}")))?;
    Ok(url.query().unwrap_or_default().to_string())
}

/// Pipe-joined data signed for a `querydr` request.
pub fn query_hash_data(body: &QueryHashFields<'_>) -> String {
    [
        body.request_id,
        body.version,
        body.command,
        body.tmn_code,
        body.txn_ref,
        body.transaction_date,
        body.create_date,
        body.ip_addr,
        body.order_info,
    ]
    .join("|")
}

pub struct QueryHashFields<'a> {
    pub request_id: &'a str,
    pub version: &'a str,
    pub command: &'a str,
    pub tmn_code: &'a str,
    pub txn_ref: &'a str,
    pub transaction_date: &'a str,
    pub create_date: &'a str,
    pub ip_addr: &'a str,
    pub order_info: &'a str,
}

impl VnpayGateway {
    pub fn new(config: VnpayConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn sign(&self, data: &str) -> Result<String, AppError> {
        signing::sign::<HmacSha512>(&self.config.hash_secret, data)
    }

    /// Builds the signed redirect URL for a payment attempt.
    pub fn payment_url(&self, request: &PaymentRequest) -> Result<String, AppError> {
        let ip_addr = request.client_ip.as_deref().unwrap_or(&self.config.ip_addr);
        let expire_at = request.created_at + Duration::minutes(PAYMENT_WINDOW_MINUTES);

        let params: BTreeMap<String, String> = [
            ("vnp_Version", self.config.version.clone()),
            ("vnp_Command", "pay".to_string()),
            ("vnp_TmnCode", self.config.tmn_code.clone()),
            ("vnp_Amount", (request.amount * 100).to_string()),
            ("vnp_CurrCode", "VND".to_string()),
            ("vnp_TxnRef", request.correlation_id.clone()),
            ("vnp_OrderInfo", request.order_info.clone()),
            ("vnp_OrderType", "other".to_string()),
            ("vnp_Locale", "vn".to_string()),
            ("vnp_ReturnUrl", self.config.return_url.clone()),
            ("vnp_IpAddr", ip_addr.to_string()),
            ("vnp_CreateDate", vnp_timestamp(request.created_at)),
            ("vnp_ExpireDate", vnp_timestamp(expire_at)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let query = encode_params(&params)?;
        let hash = self.sign(&query)?;
        Ok(format!("{}?{}&{}={}", self.config.pay_url, query, HASH_PARAM, hash))
    }

    /// IPN parameters come in the query string; a JSON object body is
    /// accepted as a fallback for proxies that re-post them.
    fn callback_params(callback: &RawCallback) -> Result<BTreeMap<String, String>, AppError> {
        if !callback.query.is_empty() || callback.body.is_empty() {
            return Ok(callback.query.clone());
        }
        serde_json::from_slice(&callback.body)
            .map_err(|err| AppError::BadRequest(format!("Malformed VNPay notification: {err}")))
    }
}

#[async_trait]
impl PaymentGateway for VnpayGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Vnpay
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn new_correlation_id(&self, order_id: i32) -> String {
        format!("{}_{}", order_id, Utc::now().timestamp_millis())
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentLink, AppError> {
        Ok(PaymentLink {
            pay_url: Some(self.payment_url(request)?),
            ..Default::default()
        })
    }

    async fn query_status(&self, query: &StatusQuery) -> Result<GatewayOutcome, AppError> {
        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let order_info = format!("Kiem tra giao dich don hang #{}", query.order_id);
        let transaction_date = vnp_timestamp(query.created_at);
        let create_date = vnp_timestamp(Utc::now());

        let hash_data = query_hash_data(&QueryHashFields {
            request_id: &request_id,
            version: &self.config.version,
            command: "querydr",
            tmn_code: &self.config.tmn_code,
            txn_ref: &query.correlation_id,
            transaction_date: &transaction_date,
            create_date: &create_date,
            ip_addr: &self.config.ip_addr,
            order_info: &order_info,
        });

        let body = QueryBody {
            vnp_SecureHash: self.sign(&hash_data)?,
            vnp_RequestId: request_id,
            vnp_Version: &self.config.version,
            vnp_Command: "querydr",
            vnp_TmnCode: &self.config.tmn_code,
            vnp_TxnRef: &query.correlation_id,
            vnp_OrderInfo: order_info,
            vnp_TransactionDate: transaction_date,
            vnp_CreateDate: create_date,
            vnp_IpAddr: &self.config.ip_addr,
        };

        let response: QueryResponse = self
            .client
            .post(&self.config.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|err| unreachable(NAME, err))?
            .json()
            .await
            .map_err(|err| AppError::ServiceUnreachable(format!("VNPay sent an unreadable response: {err}")))?;

        tracing::debug!(
            order_id = query.order_id,
            response_code = %response.vnp_ResponseCode,
            "VNPay status query answered"
        );

        match response.vnp_ResponseCode.as_str() {
            "00" => {}
            QUERY_NOT_FOUND => return Ok(GatewayOutcome::Pending),
            code => {
                return Err(AppError::ServiceUnreachable(format!(
                    "VNPay status query failed with code {code}: {}",
                    response.vnp_Message
                )));
            }
        }

        Ok(match response.vnp_TransactionStatus.as_deref() {
            Some("00") => GatewayOutcome::Paid {
                gateway_trans_id: response.vnp_TransactionNo,
            },
            Some("01") | None => GatewayOutcome::Pending,
            Some(status) => GatewayOutcome::Failed {
                code: status.to_string(),
                message: response.vnp_Message,
            },
        })
    }

    fn verify_callback(&self, callback: &RawCallback) -> Result<VerifiedCallback, AppError> {
        let mut params = Self::callback_params(callback)?;
        let Some(given) = params.remove(HASH_PARAM) else {
            return Err(AppError::InvalidSignature(NAME.into()));
        };
        params.remove(HASH_TYPE_PARAM);
        params.retain(|key, _| key.starts_with("vnp_"));

        let data = encode_params(&params)?;
        if !signing::verify::<HmacSha512>(&self.config.hash_secret, &data, &given)? {
            tracing::warn!(
                txn_ref = params.get("vnp_TxnRef").map(String::as_str).unwrap_or_default(),
                "Rejected VNPay IPN with a bad signature"
            );
            return Err(AppError::InvalidSignature(NAME.into()));
        }

        let correlation_id = params
            .get("vnp_TxnRef")
            .cloned()
            .ok_or_else(|| AppError::BadRequest("VNPay notification has no vnp_TxnRef".into()))?;
        let amount = params
            .get("vnp_Amount")
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(|minor| minor / 100);

        let response_code = params.get("vnp_ResponseCode").map(String::as_str).unwrap_or_default();
        let transaction_status = params
            .get("vnp_TransactionStatus")
            .map(String::as_str)
            .unwrap_or(response_code);

        let outcome = if response_code == "00" && transaction_status == "00" {
            GatewayOutcome::Paid {
                gateway_trans_id: params.get("vnp_TransactionNo").cloned(),
            }
        } else {
            GatewayOutcome::Failed {
                code: response_code.to_string(),
                message: format!("VNPay transaction status {transaction_status}"),
            }
        };

        Ok(VerifiedCallback {
            correlation_id,
            amount,
            outcome,
        })
    }

    fn reply(&self, reply: CallbackReply) -> (StatusCode, serde_json::Value) {
        match reply {
            CallbackReply::Applied => (
                StatusCode::OK,
                json!({ "RspCode": "00", "Message": "Confirm Success" }),
            ),
            CallbackReply::Duplicate => (
                StatusCode::OK,
                json!({ "RspCode": "02", "Message": "Order already confirmed" }),
            ),
            CallbackReply::InvalidSignature => (
                StatusCode::FORBIDDEN,
                json!({ "RspCode": "97", "Message": "Invalid signature" }),
            ),
            CallbackReply::UnknownTransaction => (
                StatusCode::OK,
                json!({ "RspCode": "01", "Message": "Order not found" }),
            ),
            CallbackReply::AmountMismatch => (
                StatusCode::OK,
                json!({ "RspCode": "04", "Message": "Invalid amount" }),
            ),
        }
    }
}
