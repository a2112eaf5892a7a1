//! The `tip.json` endpoint: set a tipper's weekly donation to a tippee.
//!
//! `set_tip` holds the domain logic; `post_tip_json` is the request-level
//! wrapper that runs it in one transaction and maps errors to a status code
//! and a JSON body, the way an HTTP handler would.

use crate::{
    config::TipConfig,
    db::{CursorOptions, Db},
    error::{DomainValidationError, LedgerError, LedgerResult},
    store::LedgerStore,
    types::{format_amount, ParticipantId, ParticipantStatus, Timestamp},
};
use log::{error, warn};
use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TipResponse {
    pub amount: String,
    pub total_giving: String,
    pub msg: String,
}

/// Status code plus JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonResponse {
    pub code: u16,
    pub body: serde_json::Value,
}

impl JsonResponse {
    pub fn text(&self) -> String {
        self.body.to_string()
    }

    fn error(code: u16, message: String) -> Self {
        Self {
            code,
            body: serde_json::json!({
                "error_code": code,
                "error_message_long": message,
            }),
        }
    }
}

/// Parse and range-check a donation amount. Zero is always accepted.
pub fn parse_amount(text: &str, config: &TipConfig) -> Result<Decimal, DomainValidationError> {
    let invalid = || DomainValidationError::InvalidAmount {
        amount: text.to_string(),
        min: format_amount(config.min_amount),
        max: format_amount(config.max_amount),
    };
    let amount = Decimal::from_str(text.trim()).map_err(|_| invalid())?;
    if amount.scale() > 2 && amount.normalize().scale() > 2 {
        return Err(invalid());
    }
    if amount.is_zero() {
        return Ok(Decimal::ZERO);
    }
    if amount < config.min_amount || amount > config.max_amount {
        return Err(invalid());
    }
    Ok(amount)
}

/// Record a new tip version from `tipper` to the participant named
/// `tippee_username`. Validation runs before any write.
pub fn set_tip(
    conn: &Connection,
    config: &TipConfig,
    tipper: ParticipantId,
    tippee_username: &str,
    amount_text: &str,
    now: Timestamp,
) -> LedgerResult<TipResponse> {
    let amount = parse_amount(amount_text, config)?;
    let store = LedgerStore::new(conn);
    let tippee = store
        .participant_by_username(tippee_username)?
        .ok_or_else(|| LedgerError::ParticipantNotFound(tippee_username.to_string()))?;
    if tippee.id == tipper {
        return Err(DomainValidationError::SelfTip.into());
    }
    if !amount.is_zero() && !tippee.accepts_donations() {
        return Err(DomainValidationError::NotAcceptingDonations(tippee.username).into());
    }

    let tip = store.insert_tip(tipper, tippee.id, amount, now)?;
    let total_giving = store.total_giving(tipper)?;

    let amount = format_amount(tip.amount);
    let msg = if tip.amount.is_zero() {
        format!("You're no longer donating to {}.", tippee.username)
    } else if tippee.status == ParticipantStatus::Stub {
        format!(
            "You're now pledging {amount} per week to {}. Thank you!",
            tippee.username
        )
    } else {
        format!(
            "You're now donating {amount} per week to {}. Thank you!",
            tippee.username
        )
    };
    Ok(TipResponse {
        amount,
        total_giving: format_amount(total_giving),
        msg,
    })
}

/// Request-level handler for `POST /{tippee}/tip.json`. Validation errors
/// are answered with a 4xx and never escalate.
pub fn post_tip_json(
    db: &Db,
    config: &TipConfig,
    tipper: ParticipantId,
    tippee_username: &str,
    amount_text: &str,
) -> JsonResponse {
    let now = chrono::Utc::now();
    let result = db.with_cursor(CursorOptions::default(), |conn| {
        set_tip(conn, config, tipper, tippee_username, amount_text, now)
    });
    match result {
        Ok(tip) => match serde_json::to_value(&tip) {
            Ok(body) => JsonResponse { code: 200, body },
            Err(e) => {
                error!("tip.json: cannot serialize response: {e}");
                JsonResponse::error(500, "internal error".into())
            }
        },
        Err(LedgerError::DomainValidation(e)) => {
            warn!("tip.json rejected for tipper {tipper}: {e}");
            JsonResponse::error(400, e.to_string())
        }
        Err(e @ LedgerError::ParticipantNotFound(_)) => JsonResponse::error(404, e.to_string()),
        Err(e) => {
            error!("tip.json failed for tipper {tipper}: {e}");
            JsonResponse::error(500, "internal error".into())
        }
    }
}
