//! MoMo wallet gateway (`captureWallet` flow, API v2).
//!
//! Every request and every IPN carries an HMAC-SHA256 signature over a fixed,
//! alphabetically ordered `key=value&...` string.

use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{
    CallbackReply, GatewayOutcome, PaymentGateway, PaymentLink, PaymentRequest, RawCallback,
    StatusQuery, VerifiedCallback,
    signing::{self, HmacSha256},
    unreachable,
};
use crate::{app_error::AppError, config::MomoConfig, status::PaymentMethod};

const NAME: &str = "MoMo";
const REQUEST_TYPE: &str = "captureWallet";

/// Result codes that mean the buyer has not finished paying yet.
const PENDING_CODES: [i64; 4] = [1000, 7000, 7002, 9000];

pub struct MomoGateway {
    config: MomoConfig,
    client: Client,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreateBody<'a> {
    partner_code: &'a str,
    access_key: &'a str,
    request_id: &'a str,
    amount: i64,
    order_id: &'a str,
    order_info: &'a str,
    redirect_url: &'a str,
    ipn_url: &'a str,
    extra_data: &'a str,
    request_type: &'a str,
    signature: String,
    lang: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CreateResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
    pay_url: Option<String>,
    qr_code_url: Option<String>,
    deeplink: Option<String>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QueryBody<'a> {
    partner_code: &'a str,
    request_id: &'a str,
    order_id: &'a str,
    signature: String,
    lang: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    result_code: i64,
    #[serde(default)]
    message: String,
    trans_id: Option<i64>,
}

/// Instant payment notification body.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MomoIpn {
    pub partner_code: String,
    pub order_id: String,
    pub request_id: String,
    pub amount: i64,
    #[serde(default)]
    pub order_info: String,
    #[serde(default)]
    pub order_type: String,
    pub trans_id: i64,
    pub result_code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub pay_type: String,
    pub response_time: i64,
    #[serde(default)]
    pub extra_data: String,
    pub signature: String,
}

pub fn create_raw_signature(
    config: &MomoConfig,
    amount: i64,
    order_id: &str,
    order_info: &str,
    request_id: &str,
    extra_data: &str,
) -> String {
    format!(
        "accessKey={}&amount={}&extraData={}&ipnUrl={}&orderId={}&orderInfo={}&partnerCode={}&redirectUrl={}&requestId={}&requestType={}",
        config.access_key,
        amount,
        extra_data,
        config.ipn_url,
        order_id,
        order_info,
        config.partner_code,
        config.redirect_url,
        request_id,
        REQUEST_TYPE,
    )
}

pub fn ipn_raw_signature(access_key: &str, ipn: &MomoIpn) -> String {
    format!(
        "accessKey={}&amount={}&extraData={}&message={}&orderId={}&orderInfo={}&orderType={}&partnerCode={}&payType={}&requestId={}&responseTime={}&resultCode={}&transId={}",
        access_key,
        ipn.amount,
        ipn.extra_data,
        ipn.message,
        ipn.order_id,
        ipn.order_info,
        ipn.order_type,
        ipn.partner_code,
        ipn.pay_type,
        ipn.request_id,
        ipn.response_time,
        ipn.result_code,
        ipn.trans_id,
    )
}

pub fn query_raw_signature(config: &MomoConfig, order_id: &str, request_id: &str) -> String {
    format!(
        "accessKey={}&orderId={}&partnerCode={}&requestId={}",
        config.access_key, order_id, config.partner_code, request_id
    )
}

fn outcome_for(result_code: i64, message: &str, trans_id: Option<i64>) -> GatewayOutcome {
    if result_code == 0 {
        GatewayOutcome::Paid {
            gateway_trans_id: trans_id.map(|id| id.to_string()),
        }
    } else if PENDING_CODES.contains(&result_code) {
        GatewayOutcome::Pending
    } else {
        GatewayOutcome::Failed {
            code: result_code.to_string(),
            message: message.to_string(),
        }
    }
}

impl MomoGateway {
    pub fn new(config: MomoConfig, client: Client) -> Self {
        Self { config, client }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.endpoint.trim_end_matches('/'), path)
    }

    fn sign(&self, raw: &str) -> Result<String, AppError> {
        signing::sign::<HmacSha256>(&self.config.secret_key, raw)
    }

    fn parse_ipn(&self, callback: &RawCallback) -> Result<MomoIpn, AppError> {
        serde_json::from_slice(&callback.body)
            .map_err(|err| AppError::BadRequest(format!("Malformed MoMo notification: {err}")))
    }
}

#[async_trait]
impl PaymentGateway for MomoGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Momo
    }

    fn name(&self) -> &'static str {
        NAME
    }

    fn new_correlation_id(&self, order_id: i32) -> String {
        format!(
            "{}{}_{}",
            self.config.partner_code,
            order_id,
            chrono::Utc::now().timestamp_millis()
        )
    }

    async fn create_payment(&self, request: &PaymentRequest) -> Result<PaymentLink, AppError> {
        let extra_data = "";
        let raw = create_raw_signature(
            &self.config,
            request.amount,
            &request.correlation_id,
            &request.order_info,
            &request.correlation_id,
            extra_data,
        );
        let body = CreateBody {
            partner_code: &self.config.partner_code,
            access_key: &self.config.access_key,
            request_id: &request.correlation_id,
            amount: request.amount,
            order_id: &request.correlation_id,
            order_info: &request.order_info,
            redirect_url: &self.config.redirect_url,
            ipn_url: &self.config.ipn_url,
            extra_data,
            request_type: REQUEST_TYPE,
            signature: self.sign(&raw)?,
            lang: "vi",
        };

        tracing::debug!(order_id = request.order_id, "Creating MoMo payment {}", request.correlation_id);

        let response: CreateResponse = self
            .client
            .post(self.endpoint("/v2/gateway/api/create"))
            .json(&body)
            .send()
            .await
            .map_err(|err| unreachable(NAME, err))?
            .json()
            .await
            .map_err(|err| AppError::ServiceUnreachable(format!("MoMo sent an unreadable response: {err}")))?;

        if response.result_code != 0 {
            return Err(AppError::PaymentRejected {
                provider: NAME.into(),
                code: response.result_code.to_string(),
                message: response.message,
            });
        }

        Ok(PaymentLink {
            pay_url: response.pay_url,
            qr_code_url: response.qr_code_url,
            deeplink: response.deeplink,
        })
    }

    async fn query_status(&self, query: &StatusQuery) -> Result<GatewayOutcome, AppError> {
        let raw = query_raw_signature(&self.config, &query.correlation_id, &query.correlation_id);
        let body = QueryBody {
            partner_code: &self.config.partner_code,
            request_id: &query.correlation_id,
            order_id: &query.correlation_id,
            signature: self.sign(&raw)?,
            lang: "vi",
        };

        let response: QueryResponse = self
            .client
            .post(self.endpoint("/v2/gateway/api/query"))
            .json(&body)
            .send()
            .await
            .map_err(|err| unreachable(NAME, err))?
            .json()
            .await
            .map_err(|err| AppError::ServiceUnreachable(format!("MoMo sent an unreadable response: {err}")))?;

        tracing::debug!(
            order_id = query.order_id,
            result_code = response.result_code,
            "MoMo status query answered"
        );

        Ok(outcome_for(response.result_code, &response.message, response.trans_id))
    }

    fn verify_callback(&self, callback: &RawCallback) -> Result<VerifiedCallback, AppError> {
        let ipn = self.parse_ipn(callback)?;
        let raw = ipn_raw_signature(&self.config.access_key, &ipn);
        if !signing::verify::<HmacSha256>(&self.config.secret_key, &raw, &ipn.signature)? {
            tracing::warn!(correlation_id = %ipn.order_id, "Rejected MoMo IPN with a bad signature");
            return Err(AppError::InvalidSignature(NAME.into()));
        }

        Ok(VerifiedCallback {
            outcome: outcome_for(ipn.result_code, &ipn.message, Some(ipn.trans_id)),
            amount: Some(ipn.amount),
            correlation_id: ipn.order_id,
        })
    }

    fn reply(&self, reply: CallbackReply) -> (StatusCode, serde_json::Value) {
        match reply {
            CallbackReply::Applied | CallbackReply::Duplicate => {
                (StatusCode::OK, json!({ "message": "OK" }))
            }
            CallbackReply::InvalidSignature => {
                (StatusCode::FORBIDDEN, json!({ "error": "Invalid signature" }))
            }
            CallbackReply::UnknownTransaction => {
                (StatusCode::NOT_FOUND, json!({ "message": "Order not found" }))
            }
            CallbackReply::AmountMismatch => {
                (StatusCode::BAD_REQUEST, json!({ "message": "Invalid amount" }))
            }
        }
    }
}
