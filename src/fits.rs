//! The narrow FITS capability.
//!
//! Just enough of the on-disk format to load a multi-extension file into
//! a [`DataFile`] and write one back: 80-byte cards, 2880-byte blocks,
//! image payloads for every BITPIX, and the simple fixed-width BINTABLE
//! column types (I, J, K, E, D, A). Anything fancier is out of scope and
//! is skipped with a warning rather than rejected.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use log::warn;

use crate::error::{Error, Result};
use crate::header::{Card, Header, Value};
use crate::nddata::PixelArray;
use crate::table::{Column, Table};

/// Logical record size: headers and data are padded to this.
pub const BLOCK_SIZE: usize = 2880;
/// One header card.
pub const CARD_SIZE: usize = 80;
/// Cards per block.
const CARDS_PER_BLOCK: usize = BLOCK_SIZE / CARD_SIZE;

// ── Card parsing ──

/// Parse one 80-byte card. Returns `Ok(None)` for the END card.
pub fn parse_card(raw: &[u8]) -> Result<Option<Card>> {
    if raw.len() != CARD_SIZE {
        return Err(Error::InvalidHeader("card is not 80 bytes"));
    }
    if !raw.is_ascii() {
        return Err(Error::InvalidHeader("non-ASCII bytes in header card"));
    }
    let text = std::str::from_utf8(raw).map_err(|_| Error::InvalidHeader("bad card encoding"))?;
    let keyword = text[..8].trim_end().to_string();

    if keyword == "END" && text[8..].trim().is_empty() {
        return Ok(None);
    }

    // Commentary cards and cards without a value indicator carry their
    // whole text as a comment.
    if &text[8..10] != "= " || keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
        let body = text[8..].trim_end();
        return Ok(Some(Card {
            keyword,
            value: None,
            comment: if body.is_empty() {
                None
            } else {
                Some(String::from(body.trim_start()))
            },
        }));
    }

    let (value, comment) = parse_value(&text[10..])?;
    Ok(Some(Card {
        keyword,
        value,
        comment,
    }))
}

/// Parse the value field of a card (everything after `"= "`).
fn parse_value(field: &str) -> Result<(Option<Value>, Option<String>)> {
    let trimmed = field.trim_start();
    if trimmed.is_empty() {
        return Ok((None, None));
    }

    if let Some(rest) = trimmed.strip_prefix('\'') {
        // Quoted string; '' escapes a single quote.
        let mut out = String::new();
        let mut chars = rest.char_indices();
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                match chars.next() {
                    Some((_, '\'')) => out.push('\''),
                    Some((j, _)) => {
                        end = Some(j);
                        break;
                    }
                    None => {
                        end = Some(i + 1);
                        break;
                    }
                }
            } else {
                out.push(c);
            }
        }
        let end = end.ok_or(Error::InvalidHeader("unterminated string value"))?;
        let tail = rest[end..].trim();
        let comment = tail
            .strip_prefix('/')
            .map(|c| String::from(c.trim()))
            .filter(|c| !c.is_empty());
        return Ok((Some(Value::Str(String::from(out.trim_end()))), comment));
    }

    let (token, comment) = match trimmed.split_once('/') {
        Some((v, c)) => (v.trim(), {
            let c = c.trim();
            if c.is_empty() {
                None
            } else {
                Some(String::from(c))
            }
        }),
        None => (trimmed.trim_end(), None),
    };

    let value = match token {
        "" => None,
        "T" => Some(Value::Logical(true)),
        "F" => Some(Value::Logical(false)),
        _ => {
            if let Ok(n) = token.parse::<i64>() {
                Some(Value::Integer(n))
            } else {
                // FITS allows 'D' as the exponent letter.
                let norm = token.replace(['D', 'd'], "E");
                match norm.parse::<f64>() {
                    Ok(x) => Some(Value::Real(x)),
                    Err(_) => return Err(Error::InvalidHeader("unparseable value field")),
                }
            }
        }
    };
    Ok((value, comment))
}

// ── Card formatting ──

/// Render a card as an 80-byte record.
pub fn format_card(card: &Card) -> [u8; CARD_SIZE] {
    let mut out = String::with_capacity(CARD_SIZE);
    out.push_str(&format!("{:<8}", card.keyword));

    match &card.value {
        None => {
            if let Some(c) = &card.comment {
                out.push(' ');
                out.push_str(c);
            }
        }
        Some(value) => {
            out.push_str("= ");
            match value {
                Value::Str(s) => {
                    let escaped = s.replace('\'', "''");
                    // Strings are padded to at least eight characters.
                    out.push_str(&format!("'{:<8}'", escaped));
                }
                Value::Logical(b) => {
                    out.push_str(&format!("{:>20}", if *b { "T" } else { "F" }));
                }
                Value::Integer(n) => out.push_str(&format!("{n:>20}")),
                Value::Real(x) => {
                    let mut s = format!("{x:E}");
                    if !s.contains('.') {
                        // Ensure a decimal point so the value reads back
                        // as a float.
                        if let Some(pos) = s.find('E') {
                            s.insert(pos, '0');
                            s.insert(pos, '.');
                        }
                    }
                    out.push_str(&format!("{s:>20}"));
                }
            }
            if let Some(c) = &card.comment {
                out.push_str(" / ");
                out.push_str(c);
            }
        }
    }

    let mut raw = [b' '; CARD_SIZE];
    let bytes = out.as_bytes();
    let n = bytes.len().min(CARD_SIZE);
    raw[..n].copy_from_slice(&bytes[..n]);
    raw
}

// ── Header blocks ──

/// Parse a header from `bytes`, consuming whole blocks until the END
/// card. Returns the header and the number of bytes consumed.
pub fn parse_header(bytes: &[u8]) -> Result<(Header, usize)> {
    let mut cards = Vec::new();
    let mut offset = 0;
    loop {
        if bytes.len() < offset + BLOCK_SIZE {
            return Err(Error::UnexpectedEof);
        }
        let block = &bytes[offset..offset + BLOCK_SIZE];
        offset += BLOCK_SIZE;
        for i in 0..CARDS_PER_BLOCK {
            let raw = &block[i * CARD_SIZE..(i + 1) * CARD_SIZE];
            if raw.iter().all(|&b| b == b' ') {
                continue;
            }
            match parse_card(raw)? {
                Some(card) => cards.push(card),
                None => return Ok((Header::from_cards(cards), offset)),
            }
        }
    }
}

/// Serialize a header into whole blocks, END card and padding included.
pub fn serialize_header(header: &Header) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOCK_SIZE);
    for card in header.iter() {
        out.extend_from_slice(&format_card(card));
    }
    out.extend_from_slice(&format_card(&Card {
        keyword: String::from("END"),
        value: None,
        comment: None,
    }));
    pad_to_block(&mut out, b' ');
    out
}

fn pad_to_block(buf: &mut Vec<u8>, fill: u8) {
    let rem = buf.len() % BLOCK_SIZE;
    if rem != 0 {
        buf.resize(buf.len() + BLOCK_SIZE - rem, fill);
    }
}

/// Length in bytes of the data section a header announces.
fn data_len(header: &Header) -> Result<usize> {
    let bitpix = header
        .get_int("BITPIX")
        .ok_or(Error::InvalidHeader("missing BITPIX"))?;
    let naxis = header
        .get_int("NAXIS")
        .ok_or(Error::InvalidHeader("missing NAXIS"))?;
    if naxis == 0 {
        return Ok(0);
    }
    let mut elements: usize = 1;
    for i in 1..=naxis {
        let len = header
            .get_int(&format!("NAXIS{i}"))
            .ok_or(Error::InvalidHeader("missing NAXISn"))?;
        if len < 0 {
            return Err(Error::InvalidHeader("negative axis length"));
        }
        elements = elements
            .checked_mul(len as usize)
            .ok_or(Error::InvalidHeader("data size overflows"))?;
    }
    let width = match bitpix {
        8 | 16 | 32 | 64 | -32 | -64 => (bitpix.unsigned_abs() / 8) as usize,
        other => return Err(Error::InvalidBitpix(other)),
    };
    elements
        .checked_mul(width)
        .ok_or(Error::InvalidHeader("data size overflows"))
}

/// Axis lengths in slowest-first order (reversed from NAXISn order).
fn shape_of(header: &Header) -> Result<Vec<usize>> {
    let naxis = header
        .get_int("NAXIS")
        .ok_or(Error::InvalidHeader("missing NAXIS"))?;
    let mut shape = Vec::with_capacity(naxis.max(0) as usize);
    for i in (1..=naxis).rev() {
        let len = header
            .get_int(&format!("NAXIS{i}"))
            .ok_or(Error::InvalidHeader("missing NAXISn"))?;
        if len < 0 {
            return Err(Error::InvalidHeader("negative axis length"));
        }
        shape.push(len as usize);
    }
    Ok(shape)
}

// ── Extensions ──

/// Payload of one extension.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtPayload {
    /// No data section (NAXIS = 0).
    None,
    /// An image data section.
    Image(PixelArray),
    /// A decoded binary table.
    Table(Table),
}

/// One header-and-payload section of a file.
#[derive(Debug, Clone, PartialEq)]
pub struct Extension {
    pub header: Header,
    pub payload: ExtPayload,
}

impl Extension {
    /// Build an image extension with the required structural cards.
    pub fn image(name: Option<&str>, extver: Option<i64>, data: PixelArray) -> Self {
        let mut header = Header::new();
        header.set("XTENSION", "IMAGE");
        header.set("BITPIX", data.bitpix());
        let shape = data.shape().to_vec();
        header.set("NAXIS", shape.len() as i64);
        for (i, len) in shape.iter().rev().enumerate() {
            header.set(&format!("NAXIS{}", i + 1), *len as i64);
        }
        header.set("PCOUNT", 0i64);
        header.set("GCOUNT", 1i64);
        if let Some(name) = name {
            header.set("EXTNAME", name);
        }
        if let Some(ver) = extver {
            header.set("EXTVER", ver);
        }
        Extension {
            header,
            payload: ExtPayload::Image(data),
        }
    }

    /// The EXTNAME value, trimmed.
    pub fn name(&self) -> Option<&str> {
        self.header.get_str("EXTNAME").map(str::trim)
    }

    /// The EXTVER value.
    pub fn extver(&self) -> Option<i64> {
        self.header.get_int("EXTVER")
    }
}

// ── DataFile ──

/// An in-memory snapshot of a multi-extension file: the global header
/// plus every extension in file order. This is the source type class
/// matchers inspect.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataFile {
    /// The global (primary) header.
    pub phu: Header,
    /// Extensions in file order.
    pub extensions: Vec<Extension>,
}

impl DataFile {
    /// Create an empty source with just a global header.
    pub fn new(phu: Header) -> Self {
        DataFile {
            phu,
            extensions: Vec::new(),
        }
    }

    /// Read and parse a file from disk. The OS handle is closed before
    /// this returns, success or not.
    pub fn read(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        fs::File::open(path)?.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            warn!("{} is zero length", path.display());
        }
        Self::from_bytes(&bytes)
    }

    /// Parse a file image from memory.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (phu, mut offset) = parse_header(bytes)?;
        if phu.get_bool("SIMPLE") != Some(true) {
            return Err(Error::InvalidHeader("missing SIMPLE card"));
        }
        // A primary data section would be a single-extension layout; the
        // reader folds it in as an unnamed image extension.
        let mut extensions = Vec::new();
        let primary_len = data_len(&phu)?;
        if primary_len > 0 {
            let (payload, consumed) = read_image(&phu, &bytes[offset..])?;
            offset += consumed;
            let mut header = Header::new();
            header.set("BITPIX", phu.get_int("BITPIX").unwrap_or(8));
            extensions.push(Extension { header, payload });
        }

        while offset < bytes.len() {
            if bytes[offset..].iter().all(|&b| b == b' ' || b == 0) {
                break;
            }
            let (header, consumed) = parse_header(&bytes[offset..])?;
            offset += consumed;
            let xtension = header.get_str("XTENSION").map(str::trim).unwrap_or("");
            let (payload, consumed) = match xtension {
                "IMAGE" => read_image(&header, &bytes[offset..])?,
                "BINTABLE" => read_bintable(&header, &bytes[offset..])?,
                other => {
                    warn!("skipping unsupported extension type '{other}'");
                    let len = data_len(&header)?;
                    let padded = len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
                    if bytes.len() < offset + padded {
                        return Err(Error::UnexpectedEof);
                    }
                    (ExtPayload::None, padded)
                }
            };
            offset += consumed;
            extensions.push(Extension { header, payload });
        }

        Ok(DataFile { phu, extensions })
    }

    /// Serialize the whole file, padding every section to whole blocks.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut phu = self.phu.clone();
        ensure_primary_cards(&mut phu);
        let mut out = serialize_header(&phu);
        for ext in &self.extensions {
            match &ext.payload {
                ExtPayload::Image(data) => {
                    out.extend_from_slice(&serialize_header(&ext.header));
                    let mut body = data.to_be_bytes();
                    pad_to_block(&mut body, 0);
                    out.extend_from_slice(&body);
                }
                ExtPayload::None => {
                    out.extend_from_slice(&serialize_header(&ext.header));
                }
                ExtPayload::Table(_) => {
                    // Table re-encoding is delegated to the storage side.
                    warn!(
                        "skipping table extension '{}' on write",
                        ext.name().unwrap_or("?")
                    );
                }
            }
        }
        out
    }

    /// Write the file to disk.
    pub fn write(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes();
        let mut file = fs::File::create(path)?;
        file.write_all(&bytes)?;
        Ok(())
    }
}

/// Rewrite the structural cards a global header must open with.
fn ensure_primary_cards(phu: &mut Header) {
    let mut cards: Vec<Card> = vec![
        Card::with_comment("SIMPLE", true, "conforms to the standard"),
        Card::new("BITPIX", 8i64),
        Card::new("NAXIS", 0i64),
        Card::new("EXTEND", true),
    ];
    let structural = ["SIMPLE", "BITPIX", "NAXIS", "EXTEND"];
    for card in phu.iter() {
        if !structural.contains(&card.keyword.as_str()) {
            cards.push(card.clone());
        }
    }
    *phu = Header::from_cards(cards);
}

fn read_image(header: &Header, bytes: &[u8]) -> Result<(ExtPayload, usize)> {
    let len = data_len(header)?;
    if len == 0 {
        return Ok((ExtPayload::None, 0));
    }
    let padded = len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    if bytes.len() < padded {
        return Err(Error::UnexpectedEof);
    }
    let bitpix = header
        .get_int("BITPIX")
        .ok_or(Error::InvalidHeader("missing BITPIX"))?;
    let shape = shape_of(header)?;
    let data = PixelArray::from_be_bytes(bitpix, &shape, &bytes[..len])?;
    Ok((ExtPayload::Image(data), padded))
}

// ── Binary tables ──

#[derive(Debug)]
struct ColumnSpec {
    name: String,
    repeat: usize,
    code: char,
    width: usize,
}

fn parse_tform(tform: &str) -> Result<(usize, char)> {
    let tform = tform.trim();
    let split = tform
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or(Error::InvalidHeader("bad TFORM"))?;
    let repeat = if split == 0 {
        1
    } else {
        tform[..split]
            .parse::<usize>()
            .map_err(|_| Error::InvalidHeader("bad TFORM repeat count"))?
    };
    let code = tform[split..]
        .chars()
        .next()
        .ok_or(Error::InvalidHeader("bad TFORM"))?;
    Ok((repeat, code))
}

fn element_width(code: char) -> Option<usize> {
    match code {
        'A' | 'L' | 'B' => Some(1),
        'I' => Some(2),
        'J' | 'E' => Some(4),
        'K' | 'D' => Some(8),
        _ => None,
    }
}

/// A structural table count: present and non-negative.
fn table_count(header: &Header, keyword: &str, missing: &'static str) -> Result<usize> {
    let value = header.get_int(keyword).ok_or(Error::InvalidHeader(missing))?;
    usize::try_from(value).map_err(|_| Error::InvalidHeader("negative table dimension"))
}

fn read_bintable(header: &Header, bytes: &[u8]) -> Result<(ExtPayload, usize)> {
    let row_len = table_count(header, "NAXIS1", "missing NAXIS1")?;
    let nrows = table_count(header, "NAXIS2", "missing NAXIS2")?;
    let nfields = table_count(header, "TFIELDS", "missing TFIELDS")?;
    let pcount = header.get_int("PCOUNT").unwrap_or(0);
    if pcount < 0 {
        return Err(Error::InvalidHeader("negative table dimension"));
    }

    let len = row_len
        .checked_mul(nrows)
        .and_then(|n| n.checked_add(pcount as usize))
        .ok_or(Error::InvalidHeader("table size overflows"))?;
    let padded = len.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    if bytes.len() < padded {
        return Err(Error::UnexpectedEof);
    }

    let mut specs = Vec::with_capacity(nfields);
    let mut offset_in_row = 0usize;
    for i in 1..=nfields {
        let tform = header
            .get_str(&format!("TFORM{i}"))
            .ok_or(Error::InvalidHeader("missing TFORMn"))?;
        let (repeat, code) = parse_tform(tform)?;
        let elem = element_width(code)
            .ok_or(Error::InvalidHeader("unsupported TFORM type code"))?;
        let name = header
            .get_str(&format!("TTYPE{i}"))
            .map(str::trim)
            .map(String::from)
            .unwrap_or_else(|| format!("COL{i}"));
        specs.push((
            ColumnSpec {
                name,
                repeat,
                code,
                width: repeat * elem,
            },
            offset_in_row,
        ));
        offset_in_row += repeat * elem;
    }
    if offset_in_row > row_len {
        return Err(Error::InvalidHeader("TFORM widths exceed NAXIS1"));
    }

    let mut table = Table::new();
    for (spec, col_offset) in &specs {
        // Multi-element numeric cells have no column representation
        // here; those columns are skipped.
        if spec.code != 'A' && spec.repeat != 1 {
            warn!("skipping repeated column '{}'", spec.name);
            continue;
        }
        let column = decode_column(spec, *col_offset, row_len, nrows, bytes)?;
        match column {
            Some(col) => table.add_column(&spec.name, col)?,
            None => warn!("skipping column '{}' of type {}", spec.name, spec.code),
        }
    }
    Ok((ExtPayload::Table(table), padded))
}

fn decode_column(
    spec: &ColumnSpec,
    col_offset: usize,
    row_len: usize,
    nrows: usize,
    bytes: &[u8],
) -> Result<Option<Column>> {
    let cell = |row: usize| -> &[u8] {
        let start = row * row_len + col_offset;
        &bytes[start..start + spec.width]
    };
    let col = match spec.code {
        'I' => Column::Int16(
            (0..nrows)
                .map(|r| i16::from_be_bytes(be_array(cell(r))))
                .collect(),
        ),
        'J' => Column::Int32(
            (0..nrows)
                .map(|r| i32::from_be_bytes(be_array(cell(r))))
                .collect(),
        ),
        'K' => Column::Int64(
            (0..nrows)
                .map(|r| i64::from_be_bytes(be_array(cell(r))))
                .collect(),
        ),
        'E' => Column::Float32(
            (0..nrows)
                .map(|r| f32::from_be_bytes(be_array(cell(r))))
                .collect(),
        ),
        'D' => Column::Float64(
            (0..nrows)
                .map(|r| f64::from_be_bytes(be_array(cell(r))))
                .collect(),
        ),
        'A' => Column::Text(
            (0..nrows)
                .map(|r| {
                    String::from_utf8_lossy(cell(r))
                        .trim_end()
                        .to_string()
                })
                .collect(),
        ),
        _ => return Ok(None),
    };
    Ok(Some(col))
}

fn be_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;
    use ndarray::IxDyn;

    fn card(text: &str) -> [u8; CARD_SIZE] {
        let mut raw = [b' '; CARD_SIZE];
        raw[..text.len()].copy_from_slice(text.as_bytes());
        raw
    }

    #[test]
    fn parse_logical_card() {
        let c = parse_card(&card("SIMPLE  =                    T / standard"))
            .unwrap()
            .unwrap();
        assert_eq!(c.keyword, "SIMPLE");
        assert_eq!(c.value, Some(Value::Logical(true)));
        assert_eq!(c.comment.as_deref(), Some("standard"));
    }

    #[test]
    fn parse_integer_card() {
        let c = parse_card(&card("NAXIS   =                    2"))
            .unwrap()
            .unwrap();
        assert_eq!(c.value, Some(Value::Integer(2)));
    }

    #[test]
    fn parse_real_card_with_d_exponent() {
        let c = parse_card(&card("EXPTIME =              1.5D+02"))
            .unwrap()
            .unwrap();
        assert_eq!(c.value, Some(Value::Real(150.0)));
    }

    #[test]
    fn parse_string_card_with_escaped_quote() {
        let c = parse_card(&card("OBJECT  = 'O''NEILL '           / target"))
            .unwrap()
            .unwrap();
        assert_eq!(c.value, Some(Value::Str(String::from("O'NEILL"))));
        assert_eq!(c.comment.as_deref(), Some("target"));
    }

    #[test]
    fn parse_end_card() {
        assert!(parse_card(&card("END")).unwrap().is_none());
    }

    #[test]
    fn parse_commentary_card() {
        let c = parse_card(&card("HISTORY stacked by the pipeline"))
            .unwrap()
            .unwrap();
        assert_eq!(c.keyword, "HISTORY");
        assert!(c.value.is_none());
        assert_eq!(c.comment.as_deref(), Some("stacked by the pipeline"));
    }

    #[test]
    fn format_then_parse_cards() {
        let cases = vec![
            Card::new("SIMPLE", true),
            Card::new("BITPIX", 16i64),
            Card::new("EXPTIME", 120.5),
            Card::with_comment("TELESCOP", "GEMINI-NORTH", "observatory"),
        ];
        for original in cases {
            let raw = format_card(&original);
            let parsed = parse_card(&raw).unwrap().unwrap();
            assert_eq!(parsed.keyword, original.keyword);
            assert_eq!(parsed.value, original.value);
        }
    }

    #[test]
    fn header_block_round_trip() {
        let mut hdr = Header::new();
        hdr.set("SIMPLE", true);
        hdr.set("BITPIX", 8i64);
        hdr.set("NAXIS", 0i64);
        hdr.set("OBSTYPE", "DARK");
        let bytes = serialize_header(&hdr);
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        let (parsed, consumed) = parse_header(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(parsed.get_str("OBSTYPE"), Some("DARK"));
        assert_eq!(parsed.get_int("BITPIX"), Some(8));
    }

    #[test]
    fn truncated_header_is_eof() {
        assert!(matches!(
            parse_header(&[b' '; 100]),
            Err(Error::UnexpectedEof)
        ));
    }

    fn sample_file() -> DataFile {
        let mut phu = Header::new();
        phu.set("TELESCOP", "GEMINI-NORTH");
        phu.set("INSTRUME", "GMOS-N");
        let mut file = DataFile::new(phu);
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![1i16, 2, 3, 4, 5, 6]).unwrap();
        file.extensions.push(Extension::image(
            Some("SCI"),
            Some(1),
            PixelArray::Int16(data),
        ));
        file
    }

    #[test]
    fn file_round_trip() {
        let original = sample_file();
        let bytes = original.to_bytes();
        assert_eq!(bytes.len() % BLOCK_SIZE, 0);
        let parsed = DataFile::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.phu.get_str("INSTRUME"), Some("GMOS-N"));
        assert_eq!(parsed.extensions.len(), 1);
        let ext = &parsed.extensions[0];
        assert_eq!(ext.name(), Some("SCI"));
        assert_eq!(ext.extver(), Some(1));
        match &ext.payload {
            ExtPayload::Image(PixelArray::Int16(a)) => {
                assert_eq!(a.shape(), &[2, 3]);
                assert_eq!(a[[1, 2]], 6);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn missing_simple_rejected() {
        let mut hdr = Header::new();
        hdr.set("BITPIX", 8i64);
        hdr.set("NAXIS", 0i64);
        let bytes = serialize_header(&hdr);
        assert!(matches!(
            DataFile::from_bytes(&bytes),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn empty_input_is_eof() {
        assert!(matches!(DataFile::from_bytes(&[]), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn tform_parsing() {
        assert_eq!(parse_tform("1J").unwrap(), (1, 'J'));
        assert_eq!(parse_tform("16A").unwrap(), (16, 'A'));
        assert_eq!(parse_tform("D").unwrap(), (1, 'D'));
        assert!(parse_tform("16").is_err());
    }

    #[test]
    fn negative_table_dimensions_error_cleanly() {
        // A crafted extension header must fail parsing, not panic.
        let mut phu = Header::new();
        phu.set("SIMPLE", true);
        phu.set("BITPIX", 8i64);
        phu.set("NAXIS", 0i64);
        let mut bytes = serialize_header(&phu);

        let mut ext = Header::new();
        ext.set("XTENSION", "BINTABLE");
        ext.set("BITPIX", 8i64);
        ext.set("NAXIS", 2i64);
        ext.set("NAXIS1", 8i64);
        ext.set("NAXIS2", -1i64);
        ext.set("PCOUNT", 0i64);
        ext.set("GCOUNT", 1i64);
        ext.set("TFIELDS", 1i64);
        ext.set("TTYPE1", "ID");
        ext.set("TFORM1", "1J");
        bytes.extend_from_slice(&serialize_header(&ext));

        assert!(matches!(
            DataFile::from_bytes(&bytes),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn negative_pcount_rejected() {
        let mut hdr = Header::new();
        hdr.set("NAXIS1", 8i64);
        hdr.set("NAXIS2", 1i64);
        hdr.set("TFIELDS", 1i64);
        hdr.set("PCOUNT", -2880i64);
        hdr.set("TTYPE1", "ID");
        hdr.set("TFORM1", "1J");
        assert!(matches!(
            read_bintable(&hdr, &[0u8; BLOCK_SIZE]),
            Err(Error::InvalidHeader(_))
        ));
    }

    #[test]
    fn oversized_image_dimensions_error_cleanly() {
        let mut hdr = Header::new();
        hdr.set("BITPIX", -64i64);
        hdr.set("NAXIS", 2i64);
        hdr.set("NAXIS1", i64::MAX / 2);
        hdr.set("NAXIS2", 4i64);
        assert!(matches!(
            data_len(&hdr),
            Err(Error::InvalidHeader("data size overflows"))
        ));
    }

    #[test]
    fn bintable_decoding() {
        // Two rows of (J, 4A): structural cards plus the raw row bytes.
        let mut hdr = Header::new();
        hdr.set("XTENSION", "BINTABLE");
        hdr.set("BITPIX", 8i64);
        hdr.set("NAXIS", 2i64);
        hdr.set("NAXIS1", 8i64);
        hdr.set("NAXIS2", 2i64);
        hdr.set("PCOUNT", 0i64);
        hdr.set("GCOUNT", 1i64);
        hdr.set("TFIELDS", 2i64);
        hdr.set("TTYPE1", "ID");
        hdr.set("TFORM1", "1J");
        hdr.set("TTYPE2", "NAME");
        hdr.set("TFORM2", "4A");

        let mut body = Vec::new();
        body.extend_from_slice(&7i32.to_be_bytes());
        body.extend_from_slice(b"ab  ");
        body.extend_from_slice(&(-3i32).to_be_bytes());
        body.extend_from_slice(b"cd  ");
        body.resize(BLOCK_SIZE, 0);

        let (payload, consumed) = read_bintable(&hdr, &body).unwrap();
        assert_eq!(consumed, BLOCK_SIZE);
        match payload {
            ExtPayload::Table(t) => {
                assert_eq!(t.nrows(), 2);
                assert_eq!(t.column("ID").unwrap().get_float(1), Some(-3.0));
                assert_eq!(t.column("NAME").unwrap().get_text(0), Some("ab"));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
