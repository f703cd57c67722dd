use serde_json::json;

use crate::api::{Request, Response};
use crate::error::LotteryError;
use crate::lottery::Lottery;

pub const OPEN_DRAWS: &str = "open-draws";
pub const CLOSED_DRAWS: &str = "closed-draws";
pub const DRAW_DETAIL: &str = "draw-detail";
pub const LOTTERY_STATS: &str = "lottery-stats";
pub const RESOLVE_DRAW: &str = "resolve-draw";

pub async fn open_draws(lottery: &Lottery) -> Result<Response, LotteryError> {
    Ok(Response::ok(json!(lottery.open_draws().await?)))
}

pub async fn closed_draws(lottery: &Lottery) -> Result<Response, LotteryError> {
    Ok(Response::ok(json!(lottery.closed_draws().await?)))
}

pub async fn draw_detail(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    Ok(Response::ok(json!(lottery.draw_detail(req.id()?).await?)))
}

pub async fn stats(lottery: &Lottery) -> Result<Response, LotteryError> {
    Ok(Response::ok(json!(lottery.stats().await?)))
}

pub async fn resolve(lottery: &Lottery, req: &Request) -> Result<Response, LotteryError> {
    let resolution = lottery.resolve(req.id()?).await?;

    Ok(Response::ok(json!({
        "draw_id": resolution.draw().id,
        "already_closed": !resolution.is_fresh(),
        "winners": resolution.winners(),
        "total_awarded": resolution.draw().total_awarded(),
    })))
}
