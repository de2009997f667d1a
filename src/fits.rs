//! Minimal FITS header handling
//!
//! The service returns WCS solutions as header-only FITS files. This module reads and
//! writes the 80-column header cards, and splices a header into an existing file so a
//! solution can be merged into the original image. Data units are carried through as
//! opaque bytes.

use crate::error::{Error, Result};
use std::fmt;

/// Size of a FITS logical record
pub const BLOCK_SIZE: usize = 2880;
/// Size of a header card
pub const CARD_SIZE: usize = 80;

/// Longest string value (after doubling quotes) that fits in one card
pub const MAX_TEXT_LEN: usize = 68;

/// Keywords describing the file structure rather than the image; not copied by [`Header::extend`]
const STRUCTURAL: &[&str] = &[
    "SIMPLE", "XTENSION", "BITPIX", "EXTEND", "PCOUNT", "GCOUNT", "END",
];

/// Value of a header card
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// `T` / `F`
    Logical(bool),
    /// Integer literal
    Integer(i64),
    /// Floating point literal (`E` or `D` exponent)
    Real(f64),
    /// Quoted string, trailing blanks removed
    Text(String),
}

impl fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderValue::Logical(true) => write!(f, "{:>20}", "T"),
            HeaderValue::Logical(false) => write!(f, "{:>20}", "F"),
            HeaderValue::Integer(i) => write!(f, "{:>20}", i),
            HeaderValue::Real(x) => {
                let mut text = format!("{:E}", x);
                if !text.contains('.') {
                    text = text.replacen('E', ".0E", 1);
                }
                write!(f, "{:>20}", text)
            }
            HeaderValue::Text(s) => {
                let quoted = format!("'{:<8}'", s.replace('\'', "''"));
                write!(f, "{:<20}", quoted)
            }
        }
    }
}

/// One header card
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    /// Keyword (upper case, at most 8 characters)
    pub keyword: String,
    /// Value, absent for commentary cards and undefined values
    pub value: Option<HeaderValue>,
    /// Comment text after the `/`, or the body of COMMENT/HISTORY cards
    pub comment: Option<String>,
}

impl Card {
    /// A keyword = value card
    ///
    /// Fails with [`Error::Fits`] unless every part is printable ASCII, the keyword
    /// has at most 8 characters and the value fits in one card. Comments that run
    /// past column 80 are cut when rendered.
    pub fn new(keyword: &str, value: HeaderValue, comment: Option<&str>) -> Result<Self> {
        let keyword = keyword.to_ascii_uppercase();
        if keyword.is_empty() || keyword.len() > 8 || !is_printable_ascii(&keyword) {
            return Err(Error::Fits(format!("invalid keyword {:?}", keyword)));
        }

        match &value {
            HeaderValue::Text(text) => {
                if !is_printable_ascii(text) {
                    return Err(Error::Fits(format!(
                        "value for {} is not printable ASCII",
                        keyword
                    )));
                }
                // columns 11 to 80, less the two quotes
                let escaped = text.len() + text.matches('\'').count();
                if escaped > MAX_TEXT_LEN {
                    return Err(Error::Fits(format!(
                        "value for {} is {} characters, at most {} fit in a card",
                        keyword, escaped, MAX_TEXT_LEN
                    )));
                }
            }
            HeaderValue::Real(x) if !x.is_finite() => {
                return Err(Error::Fits(format!("value for {} is not finite", keyword)));
            }
            _ => {}
        }

        if let Some(comment) = comment.filter(|c| !is_printable_ascii(c)) {
            return Err(Error::Fits(format!(
                "comment {:?} for {} is not printable ASCII",
                comment, keyword
            )));
        }

        Ok(Self {
            keyword,
            value: Some(value),
            comment: comment.map(str::to_string),
        })
    }

    fn parse(raw: &str) -> Result<Self> {
        let keyword = raw.get(..8).unwrap_or(raw).trim_end().to_string();
        let rest = raw.get(8..).unwrap_or("");

        if !rest.starts_with("= ") {
            let text = rest.trim();
            return Ok(Self {
                keyword,
                value: None,
                comment: (!text.is_empty()).then(|| text.to_string()),
            });
        }

        let body = &rest[2..];
        let trimmed = body.trim_start();

        if let Some(after_quote) = trimmed.strip_prefix('\'') {
            let (text, remainder) = parse_quoted(after_quote).ok_or_else(|| {
                Error::Fits(format!("unterminated string in card for {}", keyword))
            })?;
            return Ok(Self {
                keyword,
                value: Some(HeaderValue::Text(text)),
                comment: parse_comment(remainder),
            });
        }

        let (token, comment) = match body.find('/') {
            Some(idx) => (&body[..idx], parse_comment(&body[idx..])),
            None => (body, None),
        };
        let token = token.trim();

        let value = if token.is_empty() {
            None
        } else if token == "T" {
            Some(HeaderValue::Logical(true))
        } else if token == "F" {
            Some(HeaderValue::Logical(false))
        } else if let Ok(i) = token.parse::<i64>() {
            Some(HeaderValue::Integer(i))
        } else if let Ok(x) = token.replace(['D', 'd'], "E").parse::<f64>() {
            Some(HeaderValue::Real(x))
        } else {
            return Err(Error::Fits(format!(
                "cannot parse value {:?} for {}",
                token, keyword
            )));
        };

        Ok(Self {
            keyword,
            value,
            comment,
        })
    }

    fn render(&self) -> String {
        let mut line = format!("{:<8}", self.keyword);
        match &self.value {
            Some(value) => {
                line.push_str("= ");
                line.push_str(&value.to_string());
                if let Some(comment) = &self.comment {
                    line.push_str(" / ");
                    line.push_str(comment);
                }
            }
            None => {
                if let Some(comment) = &self.comment {
                    line.push_str(comment);
                }
            }
        }
        // fields are public, so anything outside printable ASCII still has to go
        let mut line: String = line
            .chars()
            .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { '?' })
            .take(CARD_SIZE)
            .collect();
        while line.len() < CARD_SIZE {
            line.push(' ');
        }
        line
    }

    fn is_structural(&self) -> bool {
        STRUCTURAL.contains(&self.keyword.as_str())
            || self
                .keyword
                .strip_prefix("NAXIS")
                .is_some_and(|n| n.chars().all(|c| c.is_ascii_digit()))
    }
}

fn is_printable_ascii(text: &str) -> bool {
    text.chars().all(|c| c == ' ' || c.is_ascii_graphic())
}

fn parse_quoted(input: &str) -> Option<(String, &str)> {
    let mut text = String::new();
    let mut chars = input.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if c == '\'' {
            if let Some((_, '\'')) = chars.peek() {
                text.push('\'');
                chars.next();
                continue;
            }
            return Some((text.trim_end().to_string(), &input[idx + 1..]));
        }
        text.push(c);
    }
    None
}

fn parse_comment(remainder: &str) -> Option<String> {
    let comment = remainder.trim().strip_prefix('/')?.trim();
    (!comment.is_empty()).then(|| comment.to_string())
}

/// An ordered list of header cards (without the END card)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: Vec<Card>,
}

impl Header {
    /// Empty header
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the first header in `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        Self::parse_prefix(bytes).map(|(header, _)| header)
    }

    /// Parse the first header and return it with its on-disk size (a multiple of [`BLOCK_SIZE`])
    pub fn parse_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        let mut cards = Vec::new();

        for (index, chunk) in bytes.chunks(CARD_SIZE).enumerate() {
            if chunk.len() < CARD_SIZE {
                break;
            }
            let raw = std::str::from_utf8(chunk)
                .ok()
                .filter(|s| s.is_ascii())
                .ok_or_else(|| Error::Fits(format!("card {} is not ASCII", index)))?;

            if raw.starts_with("END") && raw[3..].trim().is_empty() {
                let used = (index + 1) * CARD_SIZE;
                let size = used.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
                return Ok((Self { cards }, size.min(bytes.len()).max(used)));
            }
            cards.push(Card::parse(raw)?);
        }

        Err(Error::Fits("header has no END card".to_string()))
    }

    /// First value stored under `keyword`
    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards
            .iter()
            .find(|c| c.keyword.eq_ignore_ascii_case(keyword))
            .and_then(|c| c.value.as_ref())
    }

    /// Real value under `keyword`, widening integers
    pub fn get_f64(&self, keyword: &str) -> Option<f64> {
        match self.get(keyword)? {
            HeaderValue::Real(x) => Some(*x),
            HeaderValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// All cards in order
    pub fn cards(&self) -> &[Card] {
        &self.cards
    }

    /// Number of cards
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// True when the header has no cards
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Replace the first card with the same keyword, or append
    pub fn set(&mut self, card: Card) {
        match self.cards.iter_mut().find(|c| c.keyword == card.keyword) {
            Some(existing) => *existing = card,
            None => self.cards.push(card),
        }
    }

    /// Append the cards of `other`, skipping structural keywords (SIMPLE, BITPIX, NAXISn, ...)
    pub fn extend(&mut self, other: &Header) {
        self.cards.extend(
            other
                .cards
                .iter()
                .filter(|c| !c.is_structural())
                .cloned(),
        );
    }

    /// Serialize to whole FITS blocks, END card included
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = String::with_capacity(BLOCK_SIZE);
        for card in &self.cards {
            out.push_str(&card.render());
        }
        out.push_str(&format!("{:<80}", "END"));
        let padded = out.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        while out.len() < padded {
            out.push(' ');
        }
        out.into_bytes()
    }
}

/// A FITS file split into its primary header and everything after it
#[derive(Debug, Clone)]
pub struct FitsFile {
    /// Primary header
    pub header: Header,
    /// Primary data unit and any extensions, untouched
    pub remainder: Vec<u8>,
}

impl FitsFile {
    /// Split a FITS file
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if !bytes.starts_with(b"SIMPLE  =") {
            return Err(Error::Fits("not a FITS file (missing SIMPLE card)".to_string()));
        }
        let (header, size) = Header::parse_prefix(bytes)?;
        Ok(Self {
            header,
            remainder: bytes[size..].to_vec(),
        })
    }

    /// Read and split a FITS file from disk
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read FITS file '{}': {}", path.display(), e),
            ))
        })?;
        Self::parse(&bytes)
    }

    /// Reassemble the file with the (possibly modified) header
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.header.to_bytes();
        out.extend_from_slice(&self.remainder);
        out
    }
}
