//! Bill photo extraction through an OpenAI-compatible vision model.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::ExtractionError;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

const EXTRACTION_PROMPT: &str = r#"Read this restaurant bill or receipt and reply with its contents as a JSON object of this shape:
{
  "total": <bill total as a number>,
  "items": [{"name": "<item name>", "price": <item price as a number>}],
  "tax": <tax as a number, 0 if absent>,
  "serviceFee": <service charge as a number, 0 if absent>,
  "tips": <tip as a number, 0 if absent>,
  "discount": <discount as a number, 0 if absent>
}
List every line item. Use 0 for any value you cannot read. Reply with the JSON object only."#;

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct BillItem {
    #[serde(default)]
    pub name: String,
    #[serde(
        default,
        deserialize_with = "amount_or_zero",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub price: Decimal,
}

/// Structured bill as read off the photo. Amounts the model could not read
/// are zero.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bill {
    #[serde(
        default,
        deserialize_with = "amount_or_zero",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub total: Decimal,
    #[serde(default)]
    pub items: Vec<BillItem>,
    #[serde(
        default,
        deserialize_with = "amount_or_zero",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub tax: Decimal,
    #[serde(
        default,
        deserialize_with = "amount_or_zero",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub service_fee: Decimal,
    #[serde(
        default,
        deserialize_with = "amount_or_zero",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub tips: Decimal,
    #[serde(
        default,
        deserialize_with = "amount_or_zero",
        serialize_with = "rust_decimal::serde::float::serialize"
    )]
    pub discount: Decimal,
}

fn amount_or_zero<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Decimal>::deserialize(deserializer)?.unwrap_or_default())
}

/// Finds the JSON object embedded in free-form model output.
///
/// The span from the first `{` to the last `}` is tried first, then each `{`
/// in turn until one starts a well-formed object.
pub fn extract_json_object(text: &str) -> Result<Value, ExtractionError> {
    let start = text.find('{').ok_or(ExtractionError::NoJsonObject)?;
    if let Some(end) = text.rfind('}').filter(|end| *end > start) {
        if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&text[start..=end]) {
            return Ok(value);
        }
    }

    for (offset, _) in text.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&text[offset..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = values.next() {
            return Ok(value);
        }
    }
    Err(ExtractionError::NoJsonObject)
}

pub fn parse_bill(text: &str) -> Result<Bill, ExtractionError> {
    let value = extract_json_object(text)?;
    serde_json::from_value(value).map_err(|e| ExtractionError::InvalidBill(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Clone, Debug)]
pub struct VisionClient {
    http: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl VisionClient {
    pub fn new(
        http: Client,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        VisionClient {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
        }
    }

    /// Sends the image to the model and parses the bill out of its reply.
    pub async fn extract(&self, image: &[u8], media_type: &str) -> Result<Bill, ExtractionError> {
        let image_url = format!("data:{};base64,{}", media_type, STANDARD.encode(image));
        let payload = json!({
            "model": self.model,
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": EXTRACTION_PROMPT},
                    {
                        "type": "image_url",
                        "image_url": {"url": image_url}
                    }
                ]
            }],
            "max_tokens": self.max_tokens,
        });

        debug!(bytes = image.len(), media_type, model = %self.model, "requesting bill extraction");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or_default();
            let message = body["error"]["message"]
                .as_str()
                .unwrap_or("Failed to process image")
                .to_string();
            return Err(ExtractionError::Vision {
                status: status.as_u16(),
                message,
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractionError::Decode(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| ExtractionError::Decode("reply has no message content".to_string()))?;

        let bill = parse_bill(&content)?;
        info!(total = %bill.total, items = bill.items.len(), "parsed bill");
        Ok(bill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn finds_object_after_commentary() {
        let text = "Sure! Here is the bill:\n```json\n{\"total\": 42.5, \"items\": []}\n```";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value["total"], 42.5);
    }

    #[test]
    fn no_braces_is_a_distinct_failure() {
        let err = extract_json_object("I could not read this receipt.").unwrap_err();
        assert!(matches!(err, ExtractionError::NoJsonObject));
    }

    #[test]
    fn falls_back_to_first_well_formed_object() {
        let text = "{not json} then {\"total\": 9} and a stray }";
        let value = extract_json_object(text).unwrap();
        assert_eq!(value, json!({"total": 9}));
        assert!(matches!(extract_json_object("{ broken"), Err(ExtractionError::NoJsonObject)));
    }

    #[test]
    fn missing_and_null_amounts_default_to_zero() {
        let text = r#"{"total": 30, "items": [{"name": "Soup", "price": 12.5}], "tax": null}"#;
        let bill = parse_bill(text).unwrap();
        assert_eq!(bill.total, dec!(30));
        assert_eq!(
            bill.items,
            vec![BillItem {
                name: "Soup".to_string(),
                price: dec!(12.5)
            }]
        );
        assert_eq!(bill.tax, Decimal::ZERO);
        assert_eq!(bill.service_fee, Decimal::ZERO);
        assert_eq!(bill.tips, Decimal::ZERO);
        assert_eq!(bill.discount, Decimal::ZERO);
    }

    #[test]
    fn bill_serializes_amounts_as_numbers() {
        let bill = parse_bill(r#"{"total": 30, "serviceFee": 1.5}"#).unwrap();
        let json = serde_json::to_value(&bill).unwrap();
        assert_eq!(json["total"], 30.0);
        assert_eq!(json["serviceFee"], 1.5);
        assert_eq!(json["items"], json!([]));
    }

    #[tokio::test]
    async fn extracts_bill_from_model_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({"model": "gpt-4o", "max_tokens": 1000})))
            .and(body_string_contains("data:image/png;base64,AQID"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {
                    "role": "assistant",
                    "content": "Here you go: {\"total\": 25, \"items\": [{\"name\": \"Tea\", \"price\": 5}], \"tips\": 2}"
                }}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = VisionClient::new(
            Client::new(),
            format!("{}/v1/chat/completions", server.uri()),
            "sk-test",
            DEFAULT_MODEL,
            DEFAULT_MAX_TOKENS,
        );
        let bill = client.extract(&[1, 2, 3], "image/png").await.unwrap();
        assert_eq!(bill.total, dec!(25));
        assert_eq!(bill.tips, dec!(2));
        assert_eq!(bill.items.len(), 1);
    }

    #[tokio::test]
    async fn model_error_message_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": {"message": "Incorrect API key provided"}
            })))
            .mount(&server)
            .await;

        let client = VisionClient::new(Client::new(), server.uri(), "bad", DEFAULT_MODEL, 10);
        match client.extract(&[0], "image/jpeg").await {
            Err(ExtractionError::Vision { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("expected a vision error, got {other:?}"),
        }
    }
}
