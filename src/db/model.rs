use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{query, PgPool, Row};

use crate::db::dbclient::DBClient;
use crate::db::schema::{Ballot, BallotId, BallotState, Draw, DrawId, DrawType, DrawTypeId, NewDrawType, Outcome, PrizeTier, Schedule, UserId, Winner};
use crate::db::{check_ballot_assignable, check_draw_accepts, missing_ballot, missing_draw, LotteryStore, WinnerPicker};
use crate::error::LotteryError;

const DRAW_TYPE_COLUMNS: &str = "id, name, position, is_active, schedule, tiers";
const BALLOT_COLUMNS: &str = "id, id_owner, time_created, state, id_draw, prize_tier, prize_amount";
const DRAW_COLUMNS: &str = "d.id, d.id_draw_type, d.draw_type_name, d.tiers, d.draw_date, d.scheduled_at, \
                            d.time_created, d.time_closed, d.winners";

fn is_unique_violation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

fn draw_type_from_row(row: &PgRow) -> Result<DrawType, sqlx::Error> {
    Ok(DrawType {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        position: row.try_get("position")?,
        is_active: row.try_get("is_active")?,
        schedule: row.try_get::<Json<Schedule>, _>("schedule")?.0,
        tiers: row.try_get::<Json<Vec<PrizeTier>>, _>("tiers")?.0,
    })
}

fn draw_from_row(row: &PgRow) -> Result<Draw, sqlx::Error> {
    Ok(Draw {
        id: row.try_get("id")?,
        id_draw_type: row.try_get("id_draw_type")?,
        draw_type_name: row.try_get("draw_type_name")?,
        tiers: row.try_get::<Json<Vec<PrizeTier>>, _>("tiers")?.0,
        date: row.try_get("draw_date")?,
        scheduled_at: row.try_get("scheduled_at")?,
        time_created: row.try_get("time_created")?,
        time_closed: row.try_get("time_closed")?,
        winners: row.try_get::<Option<Json<Vec<Winner>>>, _>("winners")?.map(|w| w.0),
        entries: row.try_get::<i64, _>("entries")? as u64,
    })
}

fn ballot_from_row(row: &PgRow) -> Result<Ballot, LotteryError> {
    let state = row.try_get::<String, _>("state")?
        .parse::<BallotState>()
        .map_err(LotteryError::Internal)?;

    let outcome = match state {
        BallotState::Resolved => {
            let tier: Option<String> = row.try_get("prize_tier")?;
            let amount: Option<i64> = row.try_get("prize_amount")?;
            Some(match (tier, amount) {
                (Some(tier), Some(amount)) => Outcome::Prize { tier, amount },
                _ => Outcome::NoPrize,
            })
        }
        _ => None,
    };

    Ok(Ballot {
        id: row.try_get("id")?,
        id_owner: row.try_get("id_owner")?,
        time_created: row.try_get("time_created")?,
        state,
        id_draw: row.try_get("id_draw")?,
        outcome,
    })
}

pub async fn add_draw_type(conn: &PgPool, new: &NewDrawType) -> Result<DrawType, LotteryError> {
    let r = query(
        "INSERT INTO draw_type (name, position, is_active, schedule, tiers)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING id;")
        .bind(&new.name)
        .bind(new.position)
        .bind(new.is_active)
        .bind(Json(&new.schedule))
        .bind(Json(&new.tiers))
        .fetch_one(conn)
        .await;

    let r = match r {
        Ok(v) => v,
        Err(e) if is_unique_violation(&e) => {
            return Err(LotteryError::validation("name", format!("a draw type named '{}' already exists", new.name)));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(DrawType {
        id: r.try_get("id")?,
        name: new.name.clone(),
        position: new.position,
        is_active: new.is_active,
        schedule: new.schedule.clone(),
        tiers: new.tiers.clone(),
    })
}

pub async fn list_draw_types(conn: &PgPool) -> Result<Vec<DrawType>, LotteryError> {
    let sql = format!("SELECT {} FROM draw_type ORDER BY position DESC, id;", DRAW_TYPE_COLUMNS);
    let mut rows = query(&sql).fetch(conn);

    let mut result = Vec::new();
    while let Some(row) = rows.try_next().await? {
        result.push(draw_type_from_row(&row)?);
    }

    Ok(result)
}

pub async fn get_draw_type(conn: &PgPool, id: DrawTypeId) -> Result<Option<DrawType>, LotteryError> {
    let sql = format!("SELECT {} FROM draw_type WHERE id=$1;", DRAW_TYPE_COLUMNS);
    let r = query(&sql).bind(id).fetch_optional(conn).await?;

    match r {
        None => Ok(None),
        Some(row) => Ok(Some(draw_type_from_row(&row)?)),
    }
}

pub async fn add_draw(
    conn: &PgPool,
    draw_type: &DrawType,
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Draw, LotteryError> {
    let date = scheduled_at.date_naive();

    let r = query(
        "INSERT INTO draw (id_draw_type, draw_type_name, tiers, draw_date, scheduled_at, time_created)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING id;")
        .bind(draw_type.id)
        .bind(&draw_type.name)
        .bind(Json(&draw_type.tiers))
        .bind(date)
        .bind(scheduled_at)
        .bind(now)
        .fetch_one(conn)
        .await;

    let r = match r {
        Ok(v) => v,
        Err(e) if is_unique_violation(&e) => {
            return Err(LotteryError::validation("date", format!("a draw is already scheduled on {}", date)));
        }
        Err(e) => return Err(e.into()),
    };

    Ok(Draw {
        id: r.try_get("id")?,
        id_draw_type: draw_type.id,
        draw_type_name: draw_type.name.clone(),
        tiers: draw_type.tiers.clone(),
        date,
        scheduled_at,
        time_created: now,
        time_closed: None,
        winners: None,
        entries: 0,
    })
}

pub async fn get_draw(conn: &PgPool, id: DrawId) -> Result<Option<Draw>, LotteryError> {
    let sql = format!(
        "SELECT {}, (SELECT COUNT(*) FROM ballot b WHERE b.id_draw = d.id) AS entries
         FROM draw d WHERE d.id=$1;",
        DRAW_COLUMNS);
    let r = query(&sql).bind(id).fetch_optional(conn).await?;

    match r {
        None => Ok(None),
        Some(row) => Ok(Some(draw_from_row(&row)?)),
    }
}

pub async fn list_draws(conn: &PgPool) -> Result<Vec<Draw>, LotteryError> {
    let sql = format!(
        "SELECT {}, (SELECT COUNT(*) FROM ballot b WHERE b.id_draw = d.id) AS entries
         FROM draw d ORDER BY d.scheduled_at, d.id;",
        DRAW_COLUMNS);
    let mut rows = query(&sql).fetch(conn);

    let mut result = Vec::new();
    while let Some(row) = rows.try_next().await? {
        result.push(draw_from_row(&row)?);
    }

    Ok(result)
}

pub async fn add_ballots(
    conn: &PgPool,
    owner: UserId,
    quantity: u32,
    key: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Ballot>, LotteryError> {
    // One statement, so the batch is created entirely or not at all. A key
    // that was already used inserts nothing.
    let sql = format!(
        "WITH p AS (
             INSERT INTO purchase (key, id_owner, quantity, time_created)
             VALUES ($4, $1, $3, $2)
             ON CONFLICT (key) DO NOTHING
             RETURNING key
         )
         INSERT INTO ballot (id_owner, purchase_key, time_created, state)
         SELECT $1::BIGINT, p.key, $2::TIMESTAMPTZ, 'unassigned' FROM p, generate_series(1, $3::INT)
         RETURNING {};",
        BALLOT_COLUMNS);
    let rows = query(&sql)
        .bind(owner)
        .bind(now)
        .bind(quantity as i32)
        .bind(key)
        .fetch_all(conn)
        .await?;

    if rows.is_empty() {
        return purchased_ballots(conn, owner, key).await;
    }

    let mut ballots = rows.iter().map(ballot_from_row).collect::<Result<Vec<_>, _>>()?;
    ballots.sort_by_key(|b| b.id);

    Ok(ballots)
}

async fn purchased_ballots(conn: &PgPool, owner: UserId, key: &str) -> Result<Vec<Ballot>, LotteryError> {
    let sql = format!("SELECT {} FROM ballot WHERE purchase_key=$1 ORDER BY id;", BALLOT_COLUMNS);
    let rows = query(&sql).bind(key).fetch_all(conn).await?;
    let ballots = rows.iter().map(ballot_from_row).collect::<Result<Vec<_>, _>>()?;

    if ballots.iter().any(|b| b.id_owner != owner) {
        return Err(LotteryError::validation("purchase_key", "purchase key belongs to another user"));
    }

    Ok(ballots)
}

pub async fn get_ballot(conn: &PgPool, id: BallotId) -> Result<Option<Ballot>, LotteryError> {
    let sql = format!("SELECT {} FROM ballot WHERE id=$1;", BALLOT_COLUMNS);
    let r = query(&sql).bind(id).fetch_optional(conn).await?;

    match r {
        None => Ok(None),
        Some(row) => Ok(Some(ballot_from_row(&row)?)),
    }
}

pub async fn list_user_ballots(conn: &PgPool, owner: UserId) -> Result<Vec<Ballot>, LotteryError> {
    let sql = format!("SELECT {} FROM ballot WHERE id_owner=$1 ORDER BY id;", BALLOT_COLUMNS);
    let mut rows = query(&sql).bind(owner).fetch(conn);

    let mut result = Vec::new();
    while let Some(row) = rows.try_next().await? {
        result.push(ballot_from_row(&row)?);
    }

    Ok(result)
}

pub async fn assign_ballot(
    conn: &PgPool,
    owner: UserId,
    id_ballot: BallotId,
    id_draw: DrawId,
    now: DateTime<Utc>,
) -> Result<Ballot, LotteryError> {
    let mut tx = conn.begin().await?;

    let ballot_sql = format!("SELECT {} FROM ballot WHERE id=$1;", BALLOT_COLUMNS);
    let ballot = match query(&ballot_sql).bind(id_ballot).fetch_optional(&mut tx).await? {
        None => return Err(missing_ballot(id_ballot)),
        Some(row) => ballot_from_row(&row)?,
    };
    check_ballot_assignable(&ballot, owner)?;

    // FOR SHARE lets assignments to one draw run side by side while keeping a
    // resolution of that draw (FOR UPDATE) out until they commit.
    let draw_sql = format!("SELECT {}, 0::BIGINT AS entries FROM draw d WHERE d.id=$1 FOR SHARE;", DRAW_COLUMNS);
    let draw = match query(&draw_sql).bind(id_draw).fetch_optional(&mut tx).await? {
        None => return Err(missing_draw(id_draw)),
        Some(row) => draw_from_row(&row)?,
    };
    check_draw_accepts(&draw, now)?;

    let update_sql = format!(
        "UPDATE ballot SET state='assigned', id_draw=$2
         WHERE id=$1 AND id_owner=$3 AND state='unassigned'
         RETURNING {};",
        BALLOT_COLUMNS);
    let updated = query(&update_sql)
        .bind(id_ballot)
        .bind(id_draw)
        .bind(owner)
        .fetch_optional(&mut tx)
        .await?;

    let assigned = match updated {
        Some(row) => ballot_from_row(&row)?,
        None => {
            // Lost the race: report the state the winner left behind.
            let current = query(&ballot_sql).bind(id_ballot).fetch_one(&mut tx).await?;
            let current = ballot_from_row(&current)?;
            return Err(LotteryError::InvalidState {
                ballot: id_ballot,
                state: current.state,
            });
        }
    };

    tx.commit().await?;

    Ok(assigned)
}

pub async fn close_draw(
    conn: &PgPool,
    id_draw: DrawId,
    now: DateTime<Utc>,
    picker: &dyn WinnerPicker,
) -> Result<Draw, LotteryError> {
    let mut tx = conn.begin().await?;

    let draw_sql = format!("SELECT {}, 0::BIGINT AS entries FROM draw d WHERE d.id=$1 FOR UPDATE;", DRAW_COLUMNS);
    let mut draw = match query(&draw_sql).bind(id_draw).fetch_optional(&mut tx).await? {
        None => return Err(missing_draw(id_draw)),
        Some(row) => draw_from_row(&row)?,
    };
    if draw.is_closed() {
        return Err(LotteryError::AlreadyClosed { draw: id_draw });
    }

    let pool_sql = format!(
        "SELECT {} FROM ballot WHERE id_draw=$1 AND state='assigned' ORDER BY id FOR UPDATE;",
        BALLOT_COLUMNS);
    let rows = query(&pool_sql).bind(id_draw).fetch_all(&mut tx).await?;
    let pool = rows.iter().map(ballot_from_row).collect::<Result<Vec<_>, _>>()?;

    let winners = picker.pick(&draw.tiers, &pool);

    query("UPDATE ballot SET state='resolved' WHERE id_draw=$1 AND state='assigned';")
        .bind(id_draw)
        .execute(&mut tx)
        .await?;

    for winner in &winners {
        query("UPDATE ballot SET prize_tier=$2, prize_amount=$3 WHERE id=$1 AND id_draw=$4;")
            .bind(winner.id_ballot)
            .bind(&winner.tier)
            .bind(winner.amount)
            .bind(id_draw)
            .execute(&mut tx)
            .await?;
    }

    query("UPDATE draw SET time_closed=$2, winners=$3 WHERE id=$1;")
        .bind(id_draw)
        .bind(now)
        .bind(Json(&winners))
        .execute(&mut tx)
        .await?;

    tx.commit().await?;

    draw.time_closed = Some(now);
    draw.winners = Some(winners);
    draw.entries = pool.len() as u64;

    Ok(draw)
}

#[async_trait]
impl LotteryStore for DBClient {
    async fn add_draw_type(&self, new: &NewDrawType) -> Result<DrawType, LotteryError> {
        add_draw_type(self.conn(), new).await
    }

    async fn list_draw_types(&self) -> Result<Vec<DrawType>, LotteryError> {
        list_draw_types(self.conn()).await
    }

    async fn get_draw_type(&self, id: DrawTypeId) -> Result<Option<DrawType>, LotteryError> {
        get_draw_type(self.conn(), id).await
    }

    async fn add_draw(&self, draw_type: &DrawType, scheduled_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<Draw, LotteryError> {
        add_draw(self.conn(), draw_type, scheduled_at, now).await
    }

    async fn get_draw(&self, id: DrawId) -> Result<Option<Draw>, LotteryError> {
        get_draw(self.conn(), id).await
    }

    async fn list_draws(&self) -> Result<Vec<Draw>, LotteryError> {
        list_draws(self.conn()).await
    }

    async fn add_ballots(&self, owner: UserId, quantity: u32, key: &str, now: DateTime<Utc>) -> Result<Vec<Ballot>, LotteryError> {
        add_ballots(self.conn(), owner, quantity, key, now).await
    }

    async fn get_ballot(&self, id: BallotId) -> Result<Option<Ballot>, LotteryError> {
        get_ballot(self.conn(), id).await
    }

    async fn list_user_ballots(&self, owner: UserId) -> Result<Vec<Ballot>, LotteryError> {
        list_user_ballots(self.conn(), owner).await
    }

    async fn assign_ballot(&self, owner: UserId, ballot: BallotId, draw: DrawId, now: DateTime<Utc>) -> Result<Ballot, LotteryError> {
        assign_ballot(self.conn(), owner, ballot, draw, now).await
    }

    async fn close_draw(&self, draw: DrawId, now: DateTime<Utc>, picker: &dyn WinnerPicker) -> Result<Draw, LotteryError> {
        close_draw(self.conn(), draw, now, picker).await
    }
}
