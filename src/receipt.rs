//! Structured receipt description handed to the printer.

use serde::{Deserialize, Serialize};

/// How the customer paid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    #[default]
    Cash,
    MobileMoney,
    Card,
    Credit,
}

impl PaymentMethod {
    /// Label printed on the receipt
    pub fn label(self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::MobileMoney => "Mobile Money",
            PaymentMethod::Card => "Card",
            PaymentMethod::Credit => "Credit",
        }
    }
}

/// One sold line.
///
/// Amounts are whole currency units; there is no fractional part to round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    pub quantity: u32,
    pub unit_price: i64,
}

impl LineItem {
    pub fn new(name: impl Into<String>, quantity: u32, unit_price: i64) -> Self {
        Self {
            name: name.into(),
            quantity,
            unit_price,
        }
    }

    /// quantity x unit price, clamped at the i64 range
    pub fn line_total(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }
}

/// Everything one printed receipt shows.
///
/// `total` is the only value that is always present; the encoder skips
/// any block whose fields are missing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptData {
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub merchant_phone: Option<String>,
    #[serde(default)]
    pub market_name: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub subtotal: Option<i64>,
    #[serde(default)]
    pub discount: Option<i64>,
    #[serde(default)]
    pub commission: Option<i64>,
    pub total: i64,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Printed as a QR code when present
    #[serde(default)]
    pub qr_data: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
}

impl ReceiptData {
    /// Minimal receipt: a total and how it was paid
    pub fn new(total: i64, payment_method: PaymentMethod) -> Self {
        Self {
            total,
            payment_method,
            ..Default::default()
        }
    }

    pub fn with_merchant(mut self, name: impl Into<String>, phone: Option<String>) -> Self {
        self.merchant_name = Some(name.into());
        self.merchant_phone = phone;
        self
    }

    pub fn with_items(mut self, items: Vec<LineItem>) -> Self {
        self.items = items;
        self
    }

    pub fn with_subtotal(mut self, subtotal: i64) -> Self {
        self.subtotal = Some(subtotal);
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_qr(mut self, data: impl Into<String>) -> Self {
        self.qr_data = Some(data.into());
        self
    }

    pub fn with_footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }
}
