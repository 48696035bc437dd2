use serde::Deserialize;
use uuid::Uuid;

use airbear_logic::{PaymentIntent, prelude::*};

/// Hosted payment processor connection. When no processor URL is configured
/// (local development, tests) intents are minted locally so the rest of the
/// checkout flow still works end to end.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub base_url: Option<String>,
    /// Shared secret used to sign webhook deliveries
    pub webhook_secret: String,
}

impl ProcessorConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("AIRBEAR_PROCESSOR_URL").ok(),
            webhook_secret: std::env::var("AIRBEAR_WEBHOOK_SECRET")
                .unwrap_or_else(|_| "dev-webhook-secret".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProcessorIntentResponse {
    id: String,
    client_secret: String,
}

pub async fn create_intent(
    config: &ProcessorConfig,
    client: &reqwest::Client,
    amount_minor: i64,
) -> Result<PaymentIntent> {
    let Some(base_url) = &config.base_url else {
        let id = format!("pi_{}", Uuid::new_v4().simple());
        return Ok(PaymentIntent {
            client_secret: format!("{id}_secret_{}", Uuid::new_v4().simple()),
            id,
            amount_minor,
        });
    };

    let resp = client
        .post(format!("{base_url}/v1/payment_intents"))
        .json(&serde_json::json!({ "amount": amount_minor, "currency": "usd" }))
        .send()
        .await
        .context("Could not reach payment processor")?
        .error_for_status()
        .context("Payment processor returned error")?;

    let body: ProcessorIntentResponse = resp
        .json()
        .await
        .context("Bad payment processor response")?;

    Ok(PaymentIntent {
        id: body.id,
        client_secret: body.client_secret,
        amount_minor,
    })
}

/// Event shape the processor posts to the webhook receiver
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub ride_id: Option<Uuid>,
    #[serde(default)]
    pub order_id: Option<Uuid>,
}
