use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

const DEFAULT_USD_RATES: [(&str, f64); 9] = [
    ("USD", 1.00),
    ("EUR", 0.92),
    ("GBP", 0.79),
    ("JPY", 158.00),
    ("CHF", 0.89),
    ("CAD", 1.37),
    ("AUD", 1.49),
    ("CNY", 7.26),
    ("INR", 83.60),
];

#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    #[error("unsupported currency '{0}'")]
    UnsupportedCurrency(String),
    #[error("amount must be numeric")]
    InvalidAmount,
    #[error("invalid rate for '{0}': {1}")]
    InvalidRate(String, f64),
    #[error("Rates file error: {0}")]
    RatesFile(String),
}

/// Exchange rates quoted against one US dollar, keyed by upper-case
/// ISO-4217 code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable {
    rates: BTreeMap<String, f64>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            rates: DEFAULT_USD_RATES
                .iter()
                .map(|(code, rate)| (code.to_string(), *rate))
                .collect(),
        }
    }
}

impl RateTable {
    pub fn rate(&self, code: &str) -> Option<f64> {
        self.rates.get(&code.to_ascii_uppercase()).copied()
    }

    pub fn insert(&mut self, code: &str, rate: f64) -> Result<(), ConversionError> {
        let code = code.trim().to_ascii_uppercase();
        if !rate.is_finite() || rate <= 0.0 {
            return Err(ConversionError::InvalidRate(code, rate));
        }
        self.rates.insert(code, rate);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.rates.iter().map(|(code, rate)| (code.as_str(), *rate))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }

    /// Converts through USD: `amount / rate[from] * rate[to]`.
    pub fn convert(
        &self,
        from: &str,
        to: &str,
        amount: f64,
    ) -> Result<Conversion, ConversionError> {
        if !amount.is_finite() {
            return Err(ConversionError::InvalidAmount);
        }

        let from = from.trim().to_ascii_uppercase();
        let to = to.trim().to_ascii_uppercase();

        let from_rate = self
            .rates
            .get(&from)
            .copied()
            .ok_or_else(|| ConversionError::UnsupportedCurrency(from.clone()))?;
        let to_rate = self
            .rates
            .get(&to)
            .copied()
            .ok_or_else(|| ConversionError::UnsupportedCurrency(to.clone()))?;

        let converted = if from == to {
            amount
        } else {
            amount / from_rate * to_rate
        };

        Ok(Conversion {
            amount,
            from,
            to,
            converted,
        })
    }
}

/// One completed conversion. Its `Display` form is what gets remembered.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub amount: f64,
    pub from: String,
    pub to: String,
    pub converted: f64,
}

impl Conversion {
    pub fn is_identity(&self) -> bool {
        self.from == self.to
    }

    /// Recovers the source amount and currency from a remembered entry such
    /// as `"200 USD = 184.00 EUR"`.
    pub fn parse_source(entry: &str) -> Option<(f64, String)> {
        let mut fields = entry.split_whitespace();
        let amount = fields.next()?.parse::<f64>().ok()?;
        let code = fields.next()?;

        if amount.is_finite() && !code.is_empty() && code.chars().all(|c| c.is_ascii_alphabetic()) {
            Some((amount, code.to_ascii_uppercase()))
        } else {
            None
        }
    }
}

impl fmt::Display for Conversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity() {
            write!(f, "{} {} (no conversion).", self.amount, self.from)
        } else {
            write!(f, "{} {} = {:.2} {}", self.amount, self.from, self.converted, self.to)
        }
    }
}

/// Loads a JSON object of `code -> rate` overrides and merges it over the
/// default table. A missing file yields the defaults.
pub async fn load_rates(path: &Path) -> Result<RateTable, ConversionError> {
    let mut table = RateTable::default();

    if !path.exists() {
        debug!(path = %path.display(), "no rates file, using defaults");
        return Ok(table);
    }

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConversionError::RatesFile(e.to_string()))?;

    let overrides: BTreeMap<String, f64> =
        serde_json::from_str(&content).map_err(|e| ConversionError::RatesFile(e.to_string()))?;

    for (code, rate) in overrides {
        table.insert(&code, rate)?;
    }

    debug!(path = %path.display(), currencies = table.len(), "rates loaded");
    Ok(table)
}
