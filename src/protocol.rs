//! ESC/POS command bytes and byte-stream utilities.
//!
//! Every function here returns the exact bytes for one command; the
//! `ReceiptEncoder` sequences them. Nothing in this module allocates more
//! than the command itself and nothing can fail.

pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;
pub const LF: u8 = 0x0A;

/// Horizontal text alignment (`ESC a n`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    fn code(self) -> u8 {
        match self {
            Alignment::Left => 0x00,
            Alignment::Center => 0x01,
            Alignment::Right => 0x02,
        }
    }
}

/// `ESC @` - reset the printer to its power-on state
pub fn initialize() -> [u8; 2] {
    [ESC, 0x40]
}

/// `ESC a n` - select justification
pub fn align(alignment: Alignment) -> [u8; 3] {
    [ESC, 0x61, alignment.code()]
}

/// `ESC E n` - emphasized (bold) mode on/off
pub fn emphasis(on: bool) -> [u8; 3] {
    [ESC, 0x45, on as u8]
}

/// `GS ! n` - character size.
///
/// Width and height share one byte, so the caller passes both flags.
pub fn character_size(double_width: bool, double_height: bool) -> [u8; 3] {
    let mut n = 0u8;
    if double_width {
        n |= 0x10;
    }
    if double_height {
        n |= 0x01;
    }
    [GS, 0x21, n]
}

/// `ESC d n` - print the buffer and feed `lines` lines
pub fn feed_lines(lines: u8) -> [u8; 3] {
    [ESC, 0x64, lines]
}

/// `GS V 1` - partial cut
pub fn partial_cut() -> [u8; 3] {
    [GS, 0x56, 0x01]
}

/// Builds the QR code command groups (`GS ( k`, cn = 49).
///
/// - `data`: payload to encode
/// - `module_size`: dot size of one module, clamped to 1..=16
///
/// Returns the five command groups: model 2, module size, error
/// correction level M, store data, print.
pub fn qr_code(data: &[u8], module_size: u8) -> Vec<u8> {
    let size = module_size.clamp(1, 16);
    // Store-data length covers cn, fn, m plus the payload.
    let len = data.len() + 3;
    let p_l = (len & 0xFF) as u8;
    let p_h = ((len >> 8) & 0xFF) as u8;

    let mut out = Vec::with_capacity(data.len() + 40);
    // Function 165: select model 2
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);
    // Function 167: module size
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, size]);
    // Function 169: error correction level M
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, 0x31]);
    // Function 180: store data
    out.extend_from_slice(&[GS, 0x28, 0x6B, p_l, p_h, 0x31, 0x50, 0x30]);
    out.extend_from_slice(data);
    // Function 181: print symbol
    out.extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);
    out
}

/// Splits data into chunks of given size.
///
/// - `data`: input bytes
/// - `chunk_size`: size of each chunk
///
/// Returns Vec of byte slices; every chunk but the last is exactly
/// `chunk_size` long.
pub fn chunk_data(data: &[u8], chunk_size: usize) -> Vec<&[u8]> {
    if chunk_size == 0 {
        return vec![data];
    }
    data.chunks(chunk_size).collect()
}

/// Recovers the printable text of an encoded byte stream.
///
/// Strips every command this crate emits (QR payloads included) and
/// splits on line feeds. Useful for receipt previews and for checking
/// what a stream will print without a printer attached.
///
/// - `bytes`: an encoded stream, e.g. from `ReceiptEncoder::encode`
///
/// Returns the text lines in print order
pub fn preview_lines(bytes: &[u8]) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            ESC => {
                i += match bytes.get(i + 1) {
                    Some(0x40) => 2,
                    Some(0x64) => {
                        // feed n lines: flush, then emit blanks
                        lines.push(String::from_utf8_lossy(&current).into_owned());
                        current.clear();
                        let n = bytes.get(i + 2).copied().unwrap_or(0);
                        for _ in 1..n {
                            lines.push(String::new());
                        }
                        3
                    }
                    _ => 3,
                };
            }
            GS => match bytes.get(i + 1) {
                Some(0x28) => {
                    let p_l = bytes.get(i + 3).copied().unwrap_or(0) as usize;
                    let p_h = bytes.get(i + 4).copied().unwrap_or(0) as usize;
                    i += 5 + p_l + (p_h << 8);
                }
                Some(0x56) if bytes.get(i + 2) == Some(&0x42) => i += 4,
                _ => i += 3,
            },
            LF => {
                lines.push(String::from_utf8_lossy(&current).into_owned());
                current.clear();
                i += 1;
            }
            b => {
                current.push(b);
                i += 1;
            }
        }
    }
    if !current.is_empty() {
        lines.push(String::from_utf8_lossy(&current).into_owned());
    }
    lines
}
