//! Shared-expense ledger collaborator.
//!
//! The posting engine only sees the [`Ledger`] trait; [`SplitwiseClient`]
//! is the HTTP implementation used by the server.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::LedgerError;
use crate::schemas::{
    format_money, Destination, ExpenseRef, GroupId, GroupTarget, Identity, Transaction, UserId,
};

pub const DEFAULT_BASE_URL: &str = "https://secure.splitwise.com/api/v3.0";

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn current_user(&self) -> Result<Identity, LedgerError>;

    async fn group_members(&self, group_id: GroupId) -> Result<Vec<Identity>, LedgerError>;

    async fn friends(&self) -> Result<Vec<Identity>, LedgerError>;

    async fn create_expense(&self, transaction: &Transaction) -> Result<ExpenseRef, LedgerError>;
}

#[derive(Deserialize, Debug)]
struct UserJson {
    id: UserId,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
}

impl From<UserJson> for Identity {
    fn from(user: UserJson) -> Self {
        Identity {
            id: user.id,
            first_name: user.first_name.unwrap_or_default(),
            last_name: user.last_name.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct CurrentUserJson {
    user: UserJson,
}

#[derive(Deserialize, Debug)]
struct GroupJson {
    group: GroupMembersJson,
}

#[derive(Deserialize, Debug)]
struct GroupMembersJson {
    #[serde(default)]
    members: Vec<UserJson>,
}

#[derive(Deserialize, Debug)]
struct FriendsJson {
    #[serde(default)]
    friends: Vec<UserJson>,
}

#[derive(Deserialize, Debug)]
struct CreatedExpensesJson {
    #[serde(default)]
    expenses: Vec<Value>,
    #[serde(default)]
    errors: Value,
}

#[derive(Serialize, Debug)]
struct ShareJson {
    user_id: UserId,
    paid_share: String,
    owed_share: String,
}

#[derive(Serialize, Debug)]
struct PairwiseExpenseJson<'a> {
    cost: String,
    description: &'a str,
    date: String,
    users: Vec<ShareJson>,
}

/// Splitwise v3 API client authenticated with a bearer token.
#[derive(Clone, Debug)]
pub struct SplitwiseClient {
    http: Client,
    base_url: String,
    token: String,
}

impl SplitwiseClient {
    pub fn new(http: Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        SplitwiseClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LedgerError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl Ledger for SplitwiseClient {
    async fn current_user(&self) -> Result<Identity, LedgerError> {
        let body: CurrentUserJson = self.get("get_current_user").await?;
        debug!(id = %body.user.id, "current user");
        Ok(body.user.into())
    }

    async fn group_members(&self, group_id: GroupId) -> Result<Vec<Identity>, LedgerError> {
        let body: GroupJson = self.get(&format!("get_group/{group_id}")).await?;
        Ok(body.group.members.into_iter().map(Identity::from).collect())
    }

    async fn friends(&self) -> Result<Vec<Identity>, LedgerError> {
        let body: FriendsJson = self.get("get_friends").await?;
        Ok(body.friends.into_iter().map(Identity::from).collect())
    }

    async fn create_expense(&self, transaction: &Transaction) -> Result<ExpenseRef, LedgerError> {
        let request = self
            .http
            .post(self.url("create_expense"))
            .bearer_auth(&self.token);
        let request = match &transaction.destination {
            Destination::Group(target) => {
                let fields = group_form_fields(transaction, target);
                debug!(?fields, "sending group expense");
                request.form(&fields)
            }
            Destination::Pairwise => {
                let body = pairwise_body(transaction);
                debug!(?body, "sending pairwise expense");
                request.json(&body)
            }
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let created: CreatedExpensesJson = read_json(response).await?;
        let Some(details) = created.expenses.into_iter().next() else {
            return Err(LedgerError::Api {
                status,
                message: first_message(&created.errors)
                    .unwrap_or_else(|| "Ledger did not create the expense".to_string()),
            });
        };

        let id = details.get("id").and_then(Value::as_u64);
        info!(?id, description = %transaction.description, "expense created");
        Ok(ExpenseRef { id, details })
    }
}

/// Indexed form fields for a multi-participant group expense.
fn group_form_fields(transaction: &Transaction, target: &GroupTarget) -> Vec<(String, String)> {
    let mut fields = vec![
        ("cost".to_string(), format_money(transaction.cost)),
        ("description".to_string(), transaction.description.clone()),
        ("date".to_string(), transaction.date.format("%Y-%m-%d").to_string()),
        ("group_id".to_string(), target.group_id.to_string()),
        ("currency_code".to_string(), target.currency_code.clone()),
    ];
    for (index, share) in transaction.shares.iter().enumerate() {
        fields.push((format!("users__{index}__user_id"), share.identity.id.to_string()));
        fields.push((format!("users__{index}__paid_share"), format_money(share.paid_share)));
        fields.push((format!("users__{index}__owed_share"), format_money(share.owed_share)));
    }
    fields
}

fn pairwise_body(transaction: &Transaction) -> PairwiseExpenseJson<'_> {
    PairwiseExpenseJson {
        cost: format_money(transaction.cost),
        description: &transaction.description,
        date: transaction.date.format("%Y-%m-%d").to_string(),
        users: transaction
            .shares
            .iter()
            .map(|share| ShareJson {
                user_id: share.identity.id,
                paid_share: format_money(share.paid_share),
                owed_share: format_money(share.owed_share),
            })
            .collect(),
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, LedgerError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|json| error_message(&json))
            .unwrap_or_else(|| format!("Ledger request failed with status {status}"));
        return Err(LedgerError::Api {
            status: status.as_u16(),
            message,
        });
    }
    serde_json::from_str(&body).map_err(|e| LedgerError::Decode(e.to_string()))
}

/// Pulls a human readable message out of a ledger error body. The ledger
/// reports errors as `{"error": ".."}`, `{"errors": [{"message": ..}]}` or
/// `{"errors": {"field": [".."]}}`.
pub fn error_message(body: &Value) -> Option<String> {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    first_message(body.get("errors")?)
}

fn first_message(errors: &Value) -> Option<String> {
    match errors {
        Value::String(message) if !message.is_empty() => Some(message.clone()),
        Value::Array(items) => items.iter().find_map(first_message),
        Value::Object(fields) => match fields.get("message") {
            Some(Value::String(message)) => Some(message.clone()),
            _ => fields.values().find_map(first_message),
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::SplitEntry;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn identity(id: u64, first_name: &str) -> Identity {
        Identity {
            id: UserId(id),
            first_name: first_name.to_string(),
            last_name: String::new(),
        }
    }

    fn client(server: &MockServer) -> SplitwiseClient {
        SplitwiseClient::new(Client::new(), server.uri(), "secret")
    }

    fn transaction(destination: Destination) -> Transaction {
        Transaction {
            cost: dec!(20),
            description: "Dinner out".to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            destination,
            shares: vec![
                SplitEntry {
                    identity: identity(1, "Amy"),
                    paid_share: dec!(20),
                    owed_share: dec!(12.5),
                },
                SplitEntry {
                    identity: identity(2, "Bob"),
                    paid_share: dec!(0),
                    owed_share: dec!(7.5),
                },
            ],
        }
    }

    #[tokio::test]
    async fn fetches_current_user_with_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_current_user"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "user": {"id": 1, "first_name": "Amy", "last_name": "Lee", "email": "amy@example.com"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let user = client(&server).current_user().await.unwrap();
        assert_eq!(user.id, UserId(1));
        assert_eq!(user.first_name, "Amy");
        assert_eq!(user.last_name, "Lee");
    }

    #[tokio::test]
    async fn group_members_tolerate_missing_last_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_group/77"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "group": {"id": 77, "members": [
                    {"id": 1, "first_name": "Amy", "last_name": "Lee"},
                    {"id": 2, "first_name": "Bob", "last_name": null}
                ]}
            })))
            .mount(&server)
            .await;

        let members = client(&server).group_members(77).await.unwrap();
        assert_eq!(
            members,
            vec![
                Identity {
                    id: UserId(1),
                    first_name: "Amy".to_string(),
                    last_name: "Lee".to_string()
                },
                identity(2, "Bob"),
            ]
        );
    }

    #[tokio::test]
    async fn lists_friends() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_friends"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "friends": [{"id": 3, "first_name": "Cara", "last_name": "Fox"}]
            })))
            .mount(&server)
            .await;

        let friends = client(&server).friends().await.unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].id, UserId(3));
    }

    #[tokio::test]
    async fn group_expense_is_form_encoded_with_indexed_users() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create_expense"))
            .and(header("content-type", "application/x-www-form-urlencoded"))
            .and(body_string_contains("cost=20.00"))
            .and(body_string_contains("description=Dinner+out"))
            .and(body_string_contains("date=2024-03-09"))
            .and(body_string_contains("group_id=77"))
            .and(body_string_contains("currency_code=INR"))
            .and(body_string_contains("users__0__paid_share=20.00"))
            .and(body_string_contains("users__0__owed_share=12.50"))
            .and(body_string_contains("users__1__user_id=2"))
            .and(body_string_contains("users__1__owed_share=7.50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "expenses": [{"id": 901, "cost": "20.0"}],
                "errors": {}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create_expense(&transaction(Destination::Group(GroupTarget {
                group_id: 77,
                currency_code: "INR".to_string(),
            })))
            .await
            .unwrap();
        assert_eq!(created.id, Some(901));
        assert_eq!(created.details["cost"], "20.0");
    }

    #[tokio::test]
    async fn pairwise_expense_is_sent_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create_expense"))
            .and(body_partial_json(json!({
                "cost": "20.00",
                "description": "Dinner out",
                "date": "2024-03-09",
                "users": [
                    {"user_id": 1, "paid_share": "20.00", "owed_share": "12.50"},
                    {"user_id": 2, "paid_share": "0.00", "owed_share": "7.50"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "expenses": [{"id": 902}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let created = client(&server)
            .create_expense(&transaction(Destination::Pairwise))
            .await
            .unwrap();
        assert_eq!(created.id, Some(902));
    }

    #[tokio::test]
    async fn error_status_carries_ledger_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/get_current_user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "Invalid API Request: you are not logged in"
            })))
            .mount(&server)
            .await;

        match client(&server).current_user().await {
            Err(LedgerError::Api { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid API Request: you are not logged in");
            }
            other => panic!("expected an API error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_expense_in_success_reply_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/create_expense"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "expenses": [],
                "errors": {"base": ["The total of everyone's owed shares must equal the cost"]}
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .create_expense(&transaction(Destination::Pairwise))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "The total of everyone's owed shares must equal the cost");
    }

    #[test]
    fn error_message_shapes() {
        assert_eq!(
            error_message(&json!({"errors": [{"message": "Group not found"}]})),
            Some("Group not found".to_string())
        );
        assert_eq!(
            error_message(&json!({"errors": ["Bad cost"]})),
            Some("Bad cost".to_string())
        );
        assert_eq!(error_message(&json!({"errors": {}})), None);
        assert_eq!(error_message(&json!({"ok": true})), None);
    }
}
