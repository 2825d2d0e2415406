//! Receipt encoder
//!
//! Fluent builder that renders receipt content into ESC/POS bytes.
//! Text is written as UTF-8, which is lossless, so no call here can fail.

use crate::protocol::{self, Alignment, LF};
use crate::receipt::ReceiptData;

/// Suffix appended to every formatted amount
pub const CURRENCY: &str = "FCFA";

/// Footer printed when the receipt carries none
pub const DEFAULT_FOOTER: &str = "Thank you for your purchase!";

/// Formats a whole amount with space thousands separators and the
/// currency suffix, e.g. `2500` -> `"2 500 FCFA"`.
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        grouped.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(' ');
        }
        grouped.push(c);
    }
    format!("{grouped} {CURRENCY}")
}

/// ESC/POS receipt builder
///
/// Each call appends to an internal buffer. `encode` snapshots it,
/// `reset` clears it for the next receipt.
///
/// Common widths:
/// - 58mm paper: 32 characters
/// - 80mm paper: 48 characters
#[derive(Debug, Clone)]
pub struct ReceiptEncoder {
    buf: Vec<u8>,
    width: usize,
    qr_size: u8,
    double_width: bool,
    double_height: bool,
}

impl ReceiptEncoder {
    pub fn new(width: usize) -> Self {
        Self {
            buf: Vec::with_capacity(1024),
            width,
            qr_size: 6,
            double_width: false,
            double_height: false,
        }
    }

    /// Module size used for the QR block of `build_receipt`
    pub fn with_qr_size(mut self, size: u8) -> Self {
        self.qr_size = size;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `ESC @`; also forgets the tracked character size
    pub fn initialize(&mut self) -> &mut Self {
        self.double_width = false;
        self.double_height = false;
        self.buf.extend_from_slice(&protocol::initialize());
        self
    }

    pub fn text(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn newline(&mut self, count: usize) -> &mut Self {
        self.buf.extend(std::iter::repeat_n(LF, count));
        self
    }

    /// Text followed by one line feed
    pub fn line(&mut self, s: &str) -> &mut Self {
        self.text(s).newline(1)
    }

    pub fn align(&mut self, alignment: Alignment) -> &mut Self {
        self.buf.extend_from_slice(&protocol::align(alignment));
        self
    }

    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&protocol::emphasis(on));
        self
    }

    pub fn double_height(&mut self, on: bool) -> &mut Self {
        self.double_height = on;
        self.buf
            .extend_from_slice(&protocol::character_size(self.double_width, on));
        self
    }

    pub fn double_width(&mut self, on: bool) -> &mut Self {
        self.double_width = on;
        self.buf
            .extend_from_slice(&protocol::character_size(on, self.double_height));
        self
    }

    /// A full line of `c`
    pub fn separator(&mut self, c: char) -> &mut Self {
        let rule: String = std::iter::repeat_n(c, self.width).collect();
        self.line(&rule)
    }

    /// Label on the left, value flush right, on one line.
    ///
    /// The label is padded, or truncated, so the line is exactly `width`
    /// columns. A value wider than the line is printed alone.
    pub fn label_value(&mut self, label: &str, value: &str) -> &mut Self {
        let value_width = value.chars().count();
        if value_width >= self.width {
            return self.line(value);
        }
        // keep one column between a truncated label and the value
        let room = self.width - value_width;
        let label_width = label.chars().count();
        let label: String = if label_width >= room {
            label.chars().take(room.saturating_sub(1)).collect()
        } else {
            label.to_string()
        };
        let pad = room - label.chars().count();
        let line = format!("{label}{}{value}", " ".repeat(pad));
        self.line(&line)
    }

    /// QR code block for `data` at module `size`
    pub fn scannable_code(&mut self, data: &str, size: u8) -> &mut Self {
        self.buf
            .extend_from_slice(&protocol::qr_code(data.as_bytes(), size));
        self
    }

    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&protocol::feed_lines(lines));
        self
    }

    /// Partial cut
    pub fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&protocol::partial_cut());
        self
    }

    /// Snapshot of the bytes built so far
    pub fn encode(&self) -> Vec<u8> {
        self.buf.clone()
    }

    pub fn reset(&mut self) -> &mut Self {
        self.buf.clear();
        self.double_width = false;
        self.double_height = false;
        self
    }

    /// Renders `receipt` in the standard layout and returns the bytes.
    ///
    /// Clears anything built before. Identical input always yields
    /// identical bytes.
    pub fn build_receipt(&mut self, receipt: &ReceiptData) -> Vec<u8> {
        self.reset();
        self.initialize();

        // Header
        self.align(Alignment::Center);
        if let Some(name) = &receipt.merchant_name {
            self.bold(true).double_height(true);
            self.line(name);
            self.double_height(false).bold(false);
        }
        if let Some(phone) = &receipt.merchant_phone {
            self.line(&format!("Tel: {phone}"));
        }
        if let Some(market) = &receipt.market_name {
            self.line(market);
        }
        self.bold(true).separator('=').bold(false);
        self.bold(true).double_width(true);
        self.line("RECEIPT");
        self.double_width(false).bold(false);
        self.separator('-');

        // Reference block
        self.align(Alignment::Left);
        if let Some(reference) = &receipt.reference {
            self.label_value("Ref:", reference);
        }
        if let Some(date) = &receipt.date {
            self.label_value("Date:", date);
        }
        if let Some(time) = &receipt.time {
            self.label_value("Time:", time);
        }

        // Items
        if !receipt.items.is_empty() {
            self.separator('-');
            for item in &receipt.items {
                self.line(&item.name);
                let qty = format!("  {} x {}", item.quantity, format_amount(item.unit_price));
                self.label_value(&qty, &format_amount(item.line_total()));
            }
        }

        // Totals
        self.separator('-');
        if let Some(subtotal) = receipt.subtotal {
            self.label_value("Subtotal", &format_amount(subtotal));
        }
        if let Some(discount) = receipt.discount {
            self.label_value("Discount", &format_amount(discount.saturating_neg()));
        }
        if let Some(commission) = receipt.commission {
            self.label_value("Commission", &format_amount(commission.saturating_neg()));
        }
        self.bold(true).double_height(true);
        self.label_value("TOTAL", &format_amount(receipt.total));
        self.double_height(false).bold(false);
        self.separator('-');
        self.label_value("Payment", receipt.payment_method.label());

        if let Some(qr) = &receipt.qr_data {
            self.newline(1);
            self.align(Alignment::Center);
            self.scannable_code(qr, self.qr_size);
            self.newline(1);
        }

        // Footer
        self.newline(1);
        self.align(Alignment::Center);
        self.line(receipt.footer.as_deref().unwrap_or(DEFAULT_FOOTER));
        self.feed(3);
        self.cut();

        self.encode()
    }

    /// Short diagnostic page used to check a fresh connection
    pub fn build_test_page(&mut self, device_name: &str) -> Vec<u8> {
        self.reset();
        self.initialize();
        self.align(Alignment::Center);
        self.bold(true).line("PRINTER TEST").bold(false);
        self.separator('-');
        self.line(device_name);
        self.line("Connection OK");
        self.separator('-');
        self.feed(3);
        self.cut();
        self.encode()
    }
}

impl Default for ReceiptEncoder {
    fn default() -> Self {
        Self::new(32)
    }
}
