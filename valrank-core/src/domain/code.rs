//! Exchange-qualified security codes (`sh.600519`, `sz.000001`, `bj.830799`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    /// Shanghai
    Sh,
    /// Shenzhen
    Sz,
    /// Beijing
    Bj,
}

impl Market {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Sh => "sh",
            Self::Sz => "sz",
            Self::Bj => "bj",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "sh" => Some(Self::Sh),
            "sz" => Some(Self::Sz),
            "bj" => Some(Self::Bj),
            _ => None,
        }
    }

    /// Market implied by the leading digit of a bare code.
    ///
    /// 6xx → Shanghai main board and STAR; 0xx/3xx → Shenzhen main board and
    /// ChiNext; 4xx/8xx → Beijing. Anything else is tried on Shanghai.
    fn infer(bare: &str) -> Self {
        match bare.chars().next() {
            Some('0') | Some('3') => Self::Sz,
            Some('4') | Some('8') => Self::Bj,
            _ => Self::Sh,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("security code is empty")]
    Empty,

    #[error("unknown market prefix '{prefix}' in code '{code}'")]
    UnknownMarket { code: String, prefix: String },
}

/// A normalized, market-qualified security code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SecurityCode(String);

impl SecurityCode {
    /// Normalize user input: trims, lowercases and adds a market prefix to
    /// bare codes.
    pub fn normalize(raw: &str) -> Result<Self, CodeError> {
        let code = raw.trim().to_lowercase();
        if code.is_empty() {
            return Err(CodeError::Empty);
        }

        if let Some((prefix, bare)) = code.split_once('.') {
            if Market::from_prefix(prefix).is_none() {
                return Err(CodeError::UnknownMarket {
                    code: code.clone(),
                    prefix: prefix.to_string(),
                });
            }
            if bare.is_empty() {
                return Err(CodeError::Empty);
            }
            return Ok(Self(code));
        }

        let market = Market::infer(&code);
        Ok(Self(format!("{}.{code}", market.prefix())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn market(&self) -> Market {
        self.0
            .split_once('.')
            .and_then(|(p, _)| Market::from_prefix(p))
            .unwrap_or(Market::Sh)
    }

    /// Code without the market prefix.
    pub fn bare(&self) -> &str {
        self.0.split_once('.').map(|(_, b)| b).unwrap_or(&self.0)
    }

    /// The same bare code on the other main exchange (sh ↔ sz).
    ///
    /// Used when a provider reports the inferred market has no such listing.
    pub fn alternative(&self) -> Option<Self> {
        let other = match self.market() {
            Market::Sh => Market::Sz,
            Market::Sz => Market::Sh,
            Market::Bj => return None,
        };
        Some(Self(format!("{}.{}", other.prefix(), self.bare())))
    }
}

impl fmt::Display for SecurityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SecurityCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::normalize(s)
    }
}

impl TryFrom<String> for SecurityCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::normalize(&value)
    }
}

impl From<SecurityCode> for String {
    fn from(code: SecurityCode) -> Self {
        code.0
    }
}
