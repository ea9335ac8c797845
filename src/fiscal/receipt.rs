//! Receipt value types shared by the orchestrator and every driver.
//!
//! A [`Receipt`] is built by the caller, handed to the orchestrator, and read
//! (never mutated) by the driver while the fiscal document is assembled.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Session / format enums
// ---------------------------------------------------------------------------

/// Fiscal session state as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Device not ready or not identifiable. Fatal for the orchestrator.
    Unknown,
    Closed,
    Opened,
    /// Session outlived its allowed length and must be closed first.
    Expired,
}

/// Fiscal document format (device/firmware family).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FiscalFormat {
    #[default]
    Unknown,
    #[serde(rename = "ffd_1_0")]
    Ffd100,
    #[serde(rename = "ffd_1_05")]
    Ffd105,
    #[serde(rename = "ffd_1_1")]
    Ffd110,
    #[serde(rename = "ffd_1_2")]
    Ffd120,
}

impl fmt::Display for FiscalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FiscalFormat::Unknown => "unknown",
            FiscalFormat::Ffd100 => "1.0",
            FiscalFormat::Ffd105 => "1.05",
            FiscalFormat::Ffd110 => "1.1",
            FiscalFormat::Ffd120 => "1.2",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Payment
// ---------------------------------------------------------------------------

/// Number of canonical payment channels.
pub const PAYMENT_SLOTS: usize = 5;

/// Payment channel, addressed by its type code 0..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Cash = 0,
    Card = 1,
    Prepaid = 2,
    Credit = 3,
    Other = 4,
}

impl PaymentType {
    /// All payment types in ascending code order.
    pub const ALL: [PaymentType; PAYMENT_SLOTS] = [
        PaymentType::Cash,
        PaymentType::Card,
        PaymentType::Prepaid,
        PaymentType::Credit,
        PaymentType::Other,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Result<Self, PaymentError> {
        Self::ALL
            .get(code as usize)
            .copied()
            .ok_or(PaymentError::UnknownType(code))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("payment breakdown must have exactly 5 slots, got {0}")]
    InvalidLength(usize),
    #[error("unknown payment type code {0}")]
    UnknownType(u8),
}

/// Tendered amounts (minor units) per payment channel.
///
/// Always exactly five slots; a zero slot means "not paid with this type".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Payment {
    amounts: [u32; PAYMENT_SLOTS],
}

impl Payment {
    pub fn new(amounts: [u32; PAYMENT_SLOTS]) -> Self {
        Self { amounts }
    }

    /// Build from a slice, rejecting anything but exactly five amounts.
    pub fn from_slice(amounts: &[u32]) -> Result<Self, PaymentError> {
        let amounts: [u32; PAYMENT_SLOTS] = amounts
            .try_into()
            .map_err(|_| PaymentError::InvalidLength(amounts.len()))?;
        Ok(Self { amounts })
    }

    /// Cash-only breakdown.
    pub fn cash(amount: u32) -> Self {
        Self::default().with(PaymentType::Cash, amount)
    }

    /// Set one slot, builder style.
    pub fn with(mut self, kind: PaymentType, amount: u32) -> Self {
        self.amounts[kind as usize] = amount;
        self
    }

    pub fn amount(&self, kind: PaymentType) -> u32 {
        self.amounts[kind as usize]
    }

    pub fn as_array(&self) -> [u32; PAYMENT_SLOTS] {
        self.amounts
    }

    /// Every slot in ascending type-code order, zero slots included.
    pub fn slots(&self) -> impl Iterator<Item = (PaymentType, u32)> + '_ {
        PaymentType::ALL.iter().map(move |&t| (t, self.amounts[t as usize]))
    }

    /// Sum of all slots. Widened so five `u32::MAX` amounts cannot overflow.
    pub fn total(&self) -> u64 {
        self.amounts.iter().map(|&a| u64::from(a)).sum()
    }
}

impl From<[u32; PAYMENT_SLOTS]> for Payment {
    fn from(amounts: [u32; PAYMENT_SLOTS]) -> Self {
        Self::new(amounts)
    }
}

impl TryFrom<Vec<u32>> for Payment {
    type Error = PaymentError;

    fn try_from(amounts: Vec<u32>) -> Result<Self, Self::Error> {
        Self::from_slice(&amounts)
    }
}

impl Serialize for Payment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.amounts.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payment {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let amounts = Vec::<u32>::deserialize(deserializer)?;
        Payment::from_slice(&amounts).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Positions and receipts
// ---------------------------------------------------------------------------

/// A single line item on a fiscal receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub name: String,
    pub quantity: f64,
    /// Unit price in minor units.
    pub price: u32,
    /// Tax category code understood by the device (e.g. "A").
    pub tax_code: String,
}

impl Position {
    pub fn new(
        name: impl Into<String>,
        quantity: f64,
        price: u32,
        tax_code: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            quantity,
            price,
            tax_code: tax_code.into(),
        }
    }
}

/// One sales transaction to fiscalize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Registered on the device in this order.
    pub items: Vec<Position>,
    pub payment: Payment,
    /// Total to close with; `None` lets the device use its running total.
    pub rounded_sum: Option<u32>,
    #[serde(default)]
    pub operator: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl Receipt {
    pub fn new(items: Vec<Position>, payment: Payment) -> Self {
        Self {
            items,
            payment,
            ..Default::default()
        }
    }

    pub fn with_rounded_sum(mut self, sum: u32) -> Self {
        self.rounded_sum = Some(sum);
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
