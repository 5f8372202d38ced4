use chrono::NaiveDate;
use clap::ValueEnum;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::AllocationError;
use crate::roster::Roster;
use crate::schemas::{
    format_money, round_money, BillTotal, Destination, GroupTarget, Identity, ShareRequest,
    SplitEntry, Transaction,
};

/// How strictly the owed shares of a group transaction must match its cost.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ShareSumCheck {
    /// Post whatever the caller sent.
    #[default]
    Off,
    /// Owed shares may not exceed the bill total.
    AtMost,
    /// Owed shares must equal the bill total.
    Exact,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupAllocation {
    pub transaction: Transaction,
    /// Requests that matched someone in the roster, the payer included.
    pub included: Vec<ShareRequest>,
    pub unresolved: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PairwiseShare {
    Ready {
        name: String,
        amount: Decimal,
        transaction: Transaction,
    },
    Unresolved {
        name: String,
    },
}

/// Builds the single group transaction: the payer covers the whole bill and
/// every resolved participant owes their amount. A request resolving to the
/// payer sets the payer's own owed share instead of adding a row.
pub fn allocate_group(
    total: &BillTotal,
    payer: &Identity,
    requests: &[ShareRequest],
    roster: &Roster,
    target: GroupTarget,
    date: NaiveDate,
) -> GroupAllocation {
    let mut shares = vec![SplitEntry {
        identity: payer.clone(),
        paid_share: total.amount,
        owed_share: Decimal::ZERO,
    }];
    let mut included = Vec::new();
    let mut unresolved = Vec::new();

    for request in requests {
        let Some(member) = roster.resolve(&request.name) else {
            warn!(name = %request.name, "member not found");
            unresolved.push(request.name.clone());
            continue;
        };
        debug!(name = %request.name, id = %member.id, "member resolved");
        included.push(request.clone());

        if member.id == payer.id {
            shares[0].owed_share = request.amount;
            continue;
        }

        shares.push(SplitEntry {
            identity: member.clone(),
            paid_share: Decimal::ZERO,
            owed_share: request.amount,
        });
    }

    GroupAllocation {
        transaction: Transaction {
            cost: total.amount,
            description: total.description.clone(),
            date,
            destination: Destination::Group(target),
            shares,
        },
        included,
        unresolved,
    }
}

/// Builds one two-person transaction per resolved friend, each paid in full
/// by the payer and owed in full by the friend.
pub fn allocate_pairwise(
    description: &str,
    payer: &Identity,
    requests: &[ShareRequest],
    roster: &Roster,
    date: NaiveDate,
) -> Vec<PairwiseShare> {
    requests
        .iter()
        .map(|request| match roster.resolve(&request.name) {
            None => {
                warn!(name = %request.name, "friend not found");
                PairwiseShare::Unresolved {
                    name: request.name.clone(),
                }
            }
            Some(friend) => PairwiseShare::Ready {
                name: request.name.clone(),
                amount: request.amount,
                transaction: Transaction {
                    cost: request.amount,
                    description: format!("{} - {}'s share", description, request.name),
                    date,
                    destination: Destination::Pairwise,
                    shares: vec![
                        SplitEntry {
                            identity: payer.clone(),
                            paid_share: request.amount,
                            owed_share: Decimal::ZERO,
                        },
                        SplitEntry {
                            identity: friend.clone(),
                            paid_share: Decimal::ZERO,
                            owed_share: request.amount,
                        },
                    ],
                },
            },
        })
        .collect()
}

/// Compares the owed shares of a transaction with its cost, at the two
/// decimal precision the ledger receives.
pub fn check_share_sum(
    transaction: &Transaction,
    check: ShareSumCheck,
) -> Result<(), AllocationError> {
    let owed: Decimal = transaction
        .shares
        .iter()
        .map(|share| round_money(share.owed_share))
        .sum();
    let cost = round_money(transaction.cost);

    let ok = match check {
        ShareSumCheck::Off => true,
        ShareSumCheck::AtMost => owed <= cost,
        ShareSumCheck::Exact => owed == cost,
    };
    if ok {
        Ok(())
    } else {
        Err(AllocationError::ShareSum {
            owed: format_money(owed),
            cost: format_money(cost),
        })
    }
}
