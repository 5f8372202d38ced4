use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::allocation::{
    allocate_group, allocate_pairwise, check_share_sum, PairwiseShare, ShareSumCheck,
};
use crate::error::PostingError;
use crate::ledger::Ledger;
use crate::roster::Roster;
use crate::schemas::{BillTotal, ExpenseRef, GroupTarget, Identity, ShareRequest};

/// Which roster names are resolved against, and how the split is posted.
#[derive(Clone, Debug, PartialEq)]
pub enum PostingMode {
    /// One multi-way transaction inside a fixed group.
    Group(GroupTarget),
    /// One two-person transaction per friend.
    Friends,
}

impl PostingMode {
    pub fn roster_label(&self) -> &'static str {
        match self {
            PostingMode::Group(_) => "group",
            PostingMode::Friends => "friends",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Posted {
    pub name: String,
    pub amount: Decimal,
    pub expense: ExpenseRef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FailedShare {
    pub name: String,
    pub message: String,
}

/// What happened to a single participant of a friends split.
#[derive(Clone, Debug, PartialEq)]
pub enum ShareResult {
    Posted(Posted),
    NotFound(String),
    Failed(FailedShare),
}

/// Per-name results of a split plus the transactions that reached the ledger.
///
/// In group mode every resolved name points at the same single transaction,
/// so `created` holds one entry while `posted` may hold several.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AllocationOutcome {
    pub created: Vec<ExpenseRef>,
    pub posted: Vec<Posted>,
    pub unresolved: Vec<String>,
    pub errors: Vec<FailedShare>,
}

impl AllocationOutcome {
    pub fn from_results(results: Vec<ShareResult>) -> Self {
        let mut outcome = AllocationOutcome::default();
        for result in results {
            match result {
                ShareResult::Posted(posted) => {
                    outcome.created.push(posted.expense.clone());
                    outcome.posted.push(posted);
                }
                ShareResult::NotFound(name) => outcome.unresolved.push(name),
                ShareResult::Failed(failed) => outcome.errors.push(failed),
            }
        }
        outcome
    }

    pub fn summary(&self, roster_label: &str) -> String {
        let count = self.created.len();
        let mut message = format!("Added {} expense{}", count, if count == 1 { "" } else { "s" });
        if !self.unresolved.is_empty() {
            message.push_str(&format!(
                "\n\nNot found in {}: {}",
                roster_label,
                self.unresolved.join(", ")
            ));
        }
        if !self.errors.is_empty() {
            let names: Vec<&str> = self.errors.iter().map(|e| e.name.as_str()).collect();
            message.push_str(&format!("\n\nCould not add: {}", names.join(", ")));
        }
        message
    }
}

fn validate(total: &BillTotal, requests: &[ShareRequest]) -> Result<(), PostingError> {
    if total.amount < Decimal::ZERO {
        return Err(PostingError::InvalidRequest(
            "billAmount must not be negative".to_string(),
        ));
    }
    if requests.is_empty() {
        return Err(PostingError::InvalidRequest("expenses must not be empty".to_string()));
    }
    if let Some(request) = requests.iter().find(|r| r.amount < Decimal::ZERO) {
        return Err(PostingError::InvalidRequest(format!(
            "amount for {} must not be negative",
            request.name
        )));
    }
    Ok(())
}

/// Resolves every requested name against a freshly fetched roster and posts
/// the resulting transactions in request order.
///
/// Collaborator failures before submission abort the request. In group mode
/// the single submission failing aborts it too; in friends mode a failed
/// submission is recorded and the remaining friends are still attempted.
pub async fn post<L: Ledger + ?Sized>(
    ledger: &L,
    mode: &PostingMode,
    check: ShareSumCheck,
    total: &BillTotal,
    requests: &[ShareRequest],
    date: NaiveDate,
) -> Result<AllocationOutcome, PostingError> {
    validate(total, requests)?;
    info!(
        mode = mode.roster_label(),
        description = %total.description,
        participants = requests.len(),
        "splitting bill"
    );

    let payer = ledger.current_user().await?;
    match mode {
        PostingMode::Group(target) => {
            post_group(ledger, &payer, target, check, total, requests, date).await
        }
        PostingMode::Friends => {
            let results = post_friends(ledger, &payer, total, requests, date).await?;
            Ok(AllocationOutcome::from_results(results))
        }
    }
}

async fn post_group<L: Ledger + ?Sized>(
    ledger: &L,
    payer: &Identity,
    target: &GroupTarget,
    check: ShareSumCheck,
    total: &BillTotal,
    requests: &[ShareRequest],
    date: NaiveDate,
) -> Result<AllocationOutcome, PostingError> {
    let members = ledger.group_members(target.group_id).await?;
    info!(group_id = target.group_id, members = members.len(), "fetched group");
    let roster = Roster::build(&members);

    let allocation = allocate_group(total, payer, requests, &roster, target.clone(), date);
    check_share_sum(&allocation.transaction, check)?;
    let expense = ledger.create_expense(&allocation.transaction).await?;

    let posted = allocation
        .included
        .into_iter()
        .map(|request| Posted {
            name: request.name,
            amount: request.amount,
            expense: expense.clone(),
        })
        .collect();
    Ok(AllocationOutcome {
        created: vec![expense],
        posted,
        unresolved: allocation.unresolved,
        errors: Vec::new(),
    })
}

async fn post_friends<L: Ledger + ?Sized>(
    ledger: &L,
    payer: &Identity,
    total: &BillTotal,
    requests: &[ShareRequest],
    date: NaiveDate,
) -> Result<Vec<ShareResult>, PostingError> {
    let friends = ledger.friends().await?;
    info!(friends = friends.len(), "fetched friends");
    let roster = Roster::build(&friends);

    let mut results = Vec::with_capacity(requests.len());
    for share in allocate_pairwise(&total.description, payer, requests, &roster, date) {
        let result = match share {
            PairwiseShare::Unresolved { name } => ShareResult::NotFound(name),
            PairwiseShare::Ready {
                name,
                amount,
                transaction,
            } => match ledger.create_expense(&transaction).await {
                Ok(expense) => ShareResult::Posted(Posted {
                    name,
                    amount,
                    expense,
                }),
                Err(err) => {
                    warn!(name = %name, error = %err, "could not add share");
                    ShareResult::Failed(FailedShare {
                        name,
                        message: err.to_string(),
                    })
                }
            },
        };
        results.push(result);
    }
    Ok(results)
}
