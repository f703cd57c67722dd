use std::fmt;

use chrono::{Datelike, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::error::LotteryError;

static CARD_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new("^[0-9]{13,19}$").unwrap());
static CVV: Lazy<Regex> = Lazy::new(|| Regex::new("^[0-9]{3,4}$").unwrap());
static FORM_EXPIRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([0-9]{1,2})\s*/\s*([0-9]{2}|[0-9]{4})\s*$").unwrap());

/// Card fields of a purchase. Only their shape is checked; nothing is charged.
#[derive(Clone, Deserialize)]
pub struct PaymentDetails {
    pub card_number: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
    pub cvv: String,
}

impl fmt::Debug for PaymentDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.card_number.replace(' ', "");
        let last4 = digits.chars().skip(digits.chars().count().saturating_sub(4)).collect::<String>();

        f.debug_struct("PaymentDetails")
            .field("card_number", &format!("**** {}", last4))
            .field("expiry_month", &self.expiry_month)
            .field("expiry_year", &self.expiry_year)
            .finish()
    }
}

impl PaymentDetails {
    /// Builds details from the purchase form, where expiry is typed as `MM/YY`.
    pub fn from_form(card_number: &str, expiry: &str, cvv: &str) -> Result<Self, LotteryError> {
        let caps = match FORM_EXPIRY.captures(expiry) {
            None => return Err(LotteryError::validation("expiry_date", "please enter expiry date in MM/YY format")),
            Some(v) => v,
        };

        let month = caps[1].parse::<u32>()
            .map_err(|_| LotteryError::validation("expiry_date", "please enter expiry date in MM/YY format"))?;
        let year = caps[2].parse::<i32>()
            .map_err(|_| LotteryError::validation("expiry_date", "please enter expiry date in MM/YY format"))?;
        let year = if caps[2].len() == 2 { 2000 + year } else { year };

        Ok(Self {
            card_number: card_number.to_owned(),
            expiry_month: month,
            expiry_year: year,
            cvv: cvv.to_owned(),
        })
    }

    pub fn check(&self, today: NaiveDate) -> Result<(), LotteryError> {
        let digits = self.card_number.replace(' ', "");
        if !CARD_NUMBER.is_match(&digits) {
            return Err(LotteryError::validation("card_number", "card number must be 13 to 19 digits"));
        }

        if !(1..=12).contains(&self.expiry_month) {
            return Err(LotteryError::validation("expiry_month", "expiry month must be between 1 and 12"));
        }

        if (self.expiry_year, self.expiry_month) < (today.year(), today.month()) {
            return Err(LotteryError::validation("expiry_year", "card has expired"));
        }

        if !CVV.is_match(&self.cvv) {
            return Err(LotteryError::validation("cvv", "CVV must be 3 or 4 digits"));
        }

        Ok(())
    }
}
