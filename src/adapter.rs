//! Converts application sales into printable receipts.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::receipt::{LineItem, PaymentMethod, ReceiptData};

/// Seller details printed in the receipt header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Merchant {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionItem {
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: i64,
}

/// A completed sale as recorded by the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub reference: String,
    pub created_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub items: Vec<TransactionItem>,
    #[serde(default)]
    pub discount: Option<i64>,
    #[serde(default)]
    pub commission: Option<i64>,
    pub total: i64,
    pub payment_method: PaymentMethod,
}

/// Builds the receipt for `tx` sold by `merchant`.
///
/// Date and time are printed in the transaction's own offset. The
/// reference doubles as the QR payload so a receipt can be looked up.
pub fn receipt_from_transaction(tx: &Transaction, merchant: &Merchant) -> ReceiptData {
    let items: Vec<LineItem> = tx
        .items
        .iter()
        .map(|i| LineItem::new(i.product_name.clone(), i.quantity, i.unit_price))
        .collect();
    let subtotal = if items.is_empty() {
        None
    } else {
        Some(items.iter().map(LineItem::line_total).fold(0, i64::saturating_add))
    };

    ReceiptData {
        merchant_name: Some(merchant.name.clone()),
        merchant_phone: merchant.phone.clone(),
        market_name: merchant.market.clone(),
        reference: Some(tx.reference.clone()),
        date: Some(tx.created_at.format("%d/%m/%Y").to_string()),
        time: Some(tx.created_at.format("%H:%M").to_string()),
        items,
        subtotal,
        discount: tx.discount.filter(|d| *d != 0),
        commission: tx.commission.filter(|c| *c != 0),
        total: tx.total,
        payment_method: tx.payment_method,
        qr_data: Some(tx.reference.clone()),
        footer: merchant.footer.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction() -> Transaction {
        Transaction {
            reference: "TX-0042".into(),
            created_at: DateTime::parse_from_rfc3339("2024-03-05T09:07:00+00:00").unwrap(),
            items: vec![
                TransactionItem {
                    product_name: "Tomate".into(),
                    quantity: 2,
                    unit_price: 500,
                },
                TransactionItem {
                    product_name: "Igname".into(),
                    quantity: 1,
                    unit_price: 1000,
                },
            ],
            discount: Some(0),
            commission: Some(100),
            total: 1900,
            payment_method: PaymentMethod::MobileMoney,
        }
    }

    #[test]
    fn test_receipt_fields() {
        let merchant = Merchant {
            name: "Chez Awa".into(),
            phone: Some("0700000000".into()),
            market: Some("Marché de Treichville".into()),
            footer: None,
        };
        let receipt = receipt_from_transaction(&transaction(), &merchant);

        assert_eq!(receipt.merchant_name.as_deref(), Some("Chez Awa"));
        assert_eq!(receipt.date.as_deref(), Some("05/03/2024"));
        assert_eq!(receipt.time.as_deref(), Some("09:07"));
        assert_eq!(receipt.subtotal, Some(2000));
        assert_eq!(receipt.discount, None);
        assert_eq!(receipt.commission, Some(100));
        assert_eq!(receipt.total, 1900);
        assert_eq!(receipt.qr_data.as_deref(), Some("TX-0042"));
        assert_eq!(receipt.items[1], LineItem::new("Igname", 1, 1000));
    }

    #[test]
    fn test_no_items_no_subtotal() {
        let mut tx = transaction();
        tx.items.clear();
        let receipt = receipt_from_transaction(&tx, &Merchant::default());
        assert_eq!(receipt.subtotal, None);
        assert!(receipt.items.is_empty());
    }
}
