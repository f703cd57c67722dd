mod ballots;
mod draws;

use std::sync::Arc;

use dashmap::DashMap;
use evlog::meta;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::db::schema::UserId;
use crate::error::LotteryError;
use crate::lottery::Lottery;
use crate::runtime::get_logger;

#[derive(Clone, Debug, Default)]
pub struct Request {
    pub caller: Option<UserId>,
    pub admin: bool,
    pub path_id: Option<i64>,
    pub body: Value,
}

impl Request {
    pub fn new(caller: Option<UserId>) -> Self {
        Self {
            caller,
            ..Self::default()
        }
    }

    pub fn as_admin(mut self) -> Self {
        self.admin = true;
        self
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.path_id = Some(id);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    fn caller(&self) -> Result<UserId, LotteryError> {
        self.caller.ok_or_else(|| LotteryError::internal("operation requires a caller"))
    }

    fn id(&self) -> Result<i64, LotteryError> {
        self.path_id.ok_or_else(|| LotteryError::validation("id", "missing identifier in path"))
    }

    fn body<T: DeserializeOwned>(&self) -> Result<T, LotteryError> {
        let body = if self.body.is_null() { json!({}) } else { self.body.clone() };

        serde_json::from_value(body).map_err(|e| LotteryError::validation("body", e.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Value,
}

impl Response {
    pub fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    pub fn created(body: Value) -> Self {
        Self { status: 201, body }
    }

    fn failure(status: u16, code: &str, message: String) -> Self {
        Self {
            status,
            body: json!({ "error": code, "message": message }),
        }
    }
}

impl From<&LotteryError> for Response {
    fn from(e: &LotteryError) -> Self {
        Self::failure(e.status(), e.code(), e.to_string())
    }
}

pub type OperationHandler = fn(Arc<Lottery>, Request) -> BoxFuture<'static, Result<Response, LotteryError>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    Public,
    User,
    Admin,
}

pub struct OperationDef {
    pub name: &'static str,
    pub handler: OperationHandler,
    pub access: Access,
}

pub const OPERATIONS: &[OperationDef] = &[
    OperationDef {
        name: ballots::PURCHASE_BALLOTS,
        handler: |l, r| Box::pin(async move { ballots::purchase(&l, &r).await }),
        access: Access::User,
    },
    OperationDef {
        name: ballots::ASSIGN_BALLOT,
        handler: |l, r| Box::pin(async move { ballots::assign(&l, &r).await }),
        access: Access::User,
    },
    OperationDef {
        name: ballots::ASSIGN_BALLOTS,
        handler: |l, r| Box::pin(async move { ballots::assign_many(&l, &r).await }),
        access: Access::User,
    },
    OperationDef {
        name: ballots::MY_BALLOTS,
        handler: |l, r| Box::pin(async move { ballots::my_ballots(&l, &r).await }),
        access: Access::User,
    },
    OperationDef {
        name: ballots::BALLOT_DETAIL,
        handler: |l, r| Box::pin(async move { ballots::ballot_detail(&l, &r).await }),
        access: Access::User,
    },
    OperationDef {
        name: ballots::MY_WINNINGS,
        handler: |l, r| Box::pin(async move { ballots::my_winnings(&l, &r).await }),
        access: Access::User,
    },
    OperationDef {
        name: draws::OPEN_DRAWS,
        handler: |l, _| Box::pin(async move { draws::open_draws(&l).await }),
        access: Access::Public,
    },
    OperationDef {
        name: draws::CLOSED_DRAWS,
        handler: |l, _| Box::pin(async move { draws::closed_draws(&l).await }),
        access: Access::Public,
    },
    OperationDef {
        name: draws::DRAW_DETAIL,
        handler: |l, r| Box::pin(async move { draws::draw_detail(&l, &r).await }),
        access: Access::Public,
    },
    OperationDef {
        name: draws::LOTTERY_STATS,
        handler: |l, _| Box::pin(async move { draws::stats(&l).await }),
        access: Access::Public,
    },
    OperationDef {
        name: draws::RESOLVE_DRAW,
        handler: |l, r| Box::pin(async move { draws::resolve(&l, &r).await }),
        access: Access::Admin,
    },
];

static OPERATION_MAP: Lazy<DashMap<&'static str, &'static OperationDef>> = Lazy::new(|| {
    let map = DashMap::new();

    for op in OPERATIONS {
        map.insert(op.name, op);
    }

    map
});

pub fn get_operation(name: &str) -> Option<&'static OperationDef> {
    OPERATION_MAP
        .get(name)
        .as_ref()
        .map(|entry| *entry.value())
}

pub async fn dispatch(lottery: Arc<Lottery>, name: &str, request: Request) -> Response {
    let op = match get_operation(name) {
        None => {
            get_logger().info("Unknown operation requested.", meta! {
                "Operation" => name,
            });
            return Response::failure(404, "unknown_operation", format!("no operation named '{}'", name));
        }
        Some(v) => v,
    };

    if op.access != Access::Public && request.caller.is_none() {
        get_logger().info("Anonymous call to restricted operation.", meta! {
            "Operation" => op.name,
        });
        return Response::failure(401, "unauthenticated", format!("'{}' requires a signed-in user", op.name));
    }

    if op.access == Access::Admin && !request.admin {
        get_logger().info("Non-admin call to admin operation.", meta! {
            "Operation" => op.name,
            "UserID" => request.caller.unwrap_or_default(),
        });
        return Response::failure(403, "forbidden", format!("'{}' requires an administrator", op.name));
    }

    match (op.handler)(lottery, request).await {
        Ok(response) => response,
        Err(e) => {
            if e.status() >= 500 {
                get_logger().error("Error occurred in operation handler.", meta! {
                    "Operation" => op.name,
                    "Code" => e.code(),
                    "Error" => e.to_string(),
                });
            }

            Response::from(&e)
        }
    }
}
