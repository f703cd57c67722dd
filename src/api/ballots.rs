use serde::Deserialize;
use serde_json::json;

use crate::api::{Request, Response};
use crate::db::schema::DrawId;
use crate::error::LotteryError;
use crate::lottery::Lottery;
use crate::support::payment::PaymentDetails;

pub const PURCHASE_BALLOTS: &str = "purchase-ballots";
pub const ASSIGN_BALLOT: &str = "assign-ballot";
pub const ASSIGN_BALLOTS: &str = "assign-ballots";
pub const MY_BALLOTS: &str = "my-ballots";
pub const BALLOT_DETAIL: &str = "ballot-detail";
pub const MY_WINNINGS: &str = "my-winnings";

/// Expiry arrives either split into month and year or as the form's `MM/YY`.
#[derive(Deserialize)]
struct PurchaseBody {
    quantity: i64,
    card_number: String,
    cvv: String,
    expiry_month: Option<u32>,
    expiry_year: Option<i32>,
    expiry_date: Option<String>,
}

impl PurchaseBody {
    fn payment(&self) -> Result<PaymentDetails, LotteryError> {
        match (&self.expiry_date, self.expiry_month, self.expiry_year) {
            (_, Some(month), Some(year)) => Ok(PaymentDetails {
                card_number: self.card_number.clone(),
                expiry_month: month,
                expiry_year: year,
                cvv: self.cvv.clone(),
            }),
            (Some(date), _, _) => PaymentDetails::from_form(&self.card_number, date, &self.cvv),
            _ => Err(LotteryError::validation("expiry_date", "expiry date is required")),
        }
    }
}

#[derive(Deserialize)]
struct AssignBody {
    draw_id: DrawId,
}

#[derive(Deserialize)]
struct AssignManyBody {
    draw_id: DrawId,
    count: i64,
}

pub async fn purchase(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    let user = req.caller()?;
    let body = req.body::<PurchaseBody>()?;
    let payment = body.payment()?;

    let ballots = lottery.purchase(user, body.quantity, &payment).await?;

    Ok(Response::created(json!({
        "ballots_created": ballots.len(),
        "ballot_ids": ballots.iter().map(|b| b.id).collect::<Vec<_>>(),
    })))
}

pub async fn assign(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    let user = req.caller()?;
    let ballot = req.id()?;
    let body = req.body::<AssignBody>()?;

    let assigned = lottery.assign(user, ballot, body.draw_id).await?;

    Ok(Response::ok(json!({
        "message": format!("Ballot #{} entered into draw #{}.", assigned.id, body.draw_id),
        "ballot": assigned,
    })))
}

pub async fn assign_many(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    let user = req.caller()?;
    let body = req.body::<AssignManyBody>()?;

    let assigned = lottery.assign_many(user, body.draw_id, body.count).await?;

    Ok(Response::ok(json!({
        "message": format!("{} ballot(s) entered into draw #{}.", assigned.len(), body.draw_id),
        "ballot_ids": assigned.iter().map(|b| b.id).collect::<Vec<_>>(),
    })))
}

pub async fn my_ballots(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    let ballots = lottery.my_ballots(req.caller()?).await?;

    Ok(Response::ok(json!({
        "unassigned_ballots": ballots.unassigned,
        "assigned_ballots": ballots.assigned,
        "total_ballots": ballots.total_ballots,
    })))
}

pub async fn ballot_detail(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    let ballot = lottery.my_ballot(req.caller()?, req.id()?).await?;

    Ok(Response::ok(json!(ballot)))
}

pub async fn my_winnings(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    let winnings = lottery.my_winnings(req.caller()?).await?;

    Ok(Response::ok(json!(winnings)))
}
