use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type GroupId = u64;

/// A person known to the ledger, either a group member or a friend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub id: UserId,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ShareRequest {
    pub name: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BillTotal {
    pub amount: Decimal,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SplitEntry {
    pub identity: Identity,
    pub paid_share: Decimal,
    pub owed_share: Decimal,
}

/// Where a transaction lands on the ledger. Group transactions carry the
/// group and currency, pairwise ones are posted between two users only.
#[derive(Clone, Debug, PartialEq)]
pub enum Destination {
    Group(GroupTarget),
    Pairwise,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupTarget {
    pub group_id: GroupId,
    pub currency_code: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transaction {
    pub cost: Decimal,
    pub description: String,
    pub date: NaiveDate,
    pub destination: Destination,
    pub shares: Vec<SplitEntry>,
}

/// What the ledger hands back after creating a transaction.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExpenseRef {
    pub id: Option<u64>,
    pub details: serde_json::Value,
}

/// Rounds to cents, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Formats an amount with exactly two decimal digits.
pub fn format_money(amount: Decimal) -> String {
    format!("{:.2}", round_money(amount))
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitRequestJson {
    pub bill_amount: Decimal,
    pub bill_description: String,
    pub expenses: Vec<ShareRequest>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
}

impl SplitRequestJson {
    pub fn bill_total(&self) -> BillTotal {
        BillTotal {
            amount: self.bill_amount,
            description: self.bill_description.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSplitResponse {
    pub success: bool,
    pub message: String,
    pub not_found: Vec<String>,
    pub expense_details: serde_json::Value,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedShare {
    pub name: String,
    pub amount: String,
    pub expense_id: Option<u64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FailedShareJson {
    pub name: String,
    pub message: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendsSplitResponse {
    pub success: bool,
    pub message: String,
    pub not_found: Vec<String>,
    pub added: Vec<AddedShare>,
    pub errors: Vec<FailedShareJson>,
}
