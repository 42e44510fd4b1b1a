//! Environment-driven service configuration.
//!
//! Gateway credentials fall back to the providers' public sandbox values so a
//! development instance boots with nothing but `DATABASE_URL`.

use std::{str::FromStr, time::Duration};

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub checkout: CheckoutSettings,
    pub payments: PaymentSettings,
    pub momo: MomoConfig,
    pub vnpay: VnpayConfig,
    pub notifications: NotificationConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Knobs the order splitter needs; passed into every checkout.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    /// User that receives the "new orders" system notification.
    pub admin_user_id: i32,
    /// Stock level at or below which the seller is warned.
    pub low_stock_threshold: i32,
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub min_amount: i64,
    pub max_amount: i64,
    pub gateway_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MomoConfig {
    pub partner_code: String,
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: String,
    pub redirect_url: String,
    pub ipn_url: String,
}

#[derive(Debug, Clone)]
pub struct VnpayConfig {
    pub tmn_code: String,
    pub hash_secret: String,
    pub pay_url: String,
    pub api_url: String,
    pub return_url: String,
    pub ip_addr: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    /// RabbitMQ URL; when unset notifications only reach this instance's subscribers.
    pub amqp_url: Option<String>,
    pub exchange: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

/// Loads the configuration from the process environment.
pub fn load() -> Result<AppConfig> {
    let config = AppConfig {
        server: ServerConfig {
            port: env_parse("SERVER_PORT", 3000)?,
        },
        database: DatabaseConfig {
            url: std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS", 10)?,
        },
        checkout: CheckoutSettings {
            admin_user_id: env_parse("ADMIN_USER_ID", 1)?,
            low_stock_threshold: env_parse("LOW_STOCK_THRESHOLD", 10)?,
        },
        payments: PaymentSettings {
            min_amount: env_parse("PAYMENT_MIN_AMOUNT", 1_000)?,
            max_amount: env_parse("PAYMENT_MAX_AMOUNT", 50_000_000)?,
            gateway_timeout: Duration::from_secs(env_parse("GATEWAY_TIMEOUT_SECS", 15)?),
        },
        momo: MomoConfig {
            partner_code: env_or("MOMO_PARTNER_CODE", "MOMO"),
            access_key: env_or("MOMO_ACCESS_KEY", "F8BBA842ECF85"),
            secret_key: env_or("MOMO_SECRET_KEY", "K951B6PE1waDMi640xX08PD3vg6EkVlz"),
            endpoint: env_or("MOMO_ENDPOINT", "https://test-payment.momo.vn"),
            redirect_url: env_or("MOMO_REDIRECT_URL", "https://momo.vn/return"),
            ipn_url: env_or("MOMO_IPN_URL", "https://callback.url/notify"),
        },
        vnpay: VnpayConfig {
            tmn_code: env_or("VNP_TMN_CODE", "BCDEC6H8"),
            hash_secret: env_or("VNP_HASH_SECRET", "BYNQT6V4BAMU9WPO2ECN6PIX4KT69JR6"),
            pay_url: env_or(
                "VNP_URL",
                "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html",
            ),
            api_url: env_or(
                "VNP_API_URL",
                "https://sandbox.vnpayment.vn/merchant_webapi/api/transaction",
            ),
            return_url: env_or(
                "VNP_RETURN_URL",
                "http://localhost:3000/payments/vnpay/return",
            ),
            ip_addr: env_or("VNP_IP_ADDR", "127.0.0.1"),
            version: env_or("VNP_VERSION", "2.1.0"),
        },
        notifications: NotificationConfig {
            amqp_url: std::env::var("AMQP_URL").ok().filter(|s| !s.is_empty()),
            exchange: env_or("NOTIFICATION_EXCHANGE", "marketplace.notifications"),
        },
    };

    if config.payments.min_amount > config.payments.max_amount {
        anyhow::bail!(
            "PAYMENT_MIN_AMOUNT ({}) exceeds PAYMENT_MAX_AMOUNT ({})",
            config.payments.min_amount,
            config.payments.max_amount
        );
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_falls_back_on_missing_variable() {
        let value: u16 = env_parse("AGRIMARKET_TEST_UNSET_PORT", 4242).unwrap();
        assert_eq!(value, 4242);
    }

    #[test]
    fn env_or_uses_default() {
        assert_eq!(env_or("AGRIMARKET_TEST_UNSET_VALUE", "fallback"), "fallback");
    }
}
