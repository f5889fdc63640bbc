//! Line-oriented workload traces.
//!
//! One instruction per line, whitespace separated, tag first:
//!
//! ```text
//! I <key> <value>
//! U <key> <value>
//! D <key>
//! Q <key>
//! S <start_key> <end_key>
//! ```
//!
//! Keys and values are opaque byte strings. Lines are read as raw bytes, so a
//! trace does not have to be valid UTF-8.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use crate::error::TraceError;

/// One trace record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    Insert { key: Vec<u8>, value: Vec<u8> },
    Update { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
    Query { key: Vec<u8> },
    ScanRange { start: Vec<u8>, end: Vec<u8> },
}

impl Instruction {
    /// Single-character tag used in the trace grammar.
    pub fn tag(&self) -> char {
        match self {
            Self::Insert { .. } => 'I',
            Self::Update { .. } => 'U',
            Self::Delete { .. } => 'D',
            Self::Query { .. } => 'Q',
            Self::ScanRange { .. } => 'S',
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |b: &[u8]| String::from_utf8_lossy(b).into_owned();
        match self {
            Self::Insert { key, value } | Self::Update { key, value } => {
                write!(f, "{} {} {}", self.tag(), show(key), show(value))
            }
            Self::Delete { key } | Self::Query { key } => write!(f, "{} {}", self.tag(), show(key)),
            Self::ScanRange { start, end } => write!(f, "S {} {}", show(start), show(end)),
        }
    }
}

/// How strictly a line is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Workload replay: the tag is classified by its first character and
    /// tokens past the expected operands are ignored.
    Lenient,
    /// Bulk load: the tag must be exactly one character and extra tokens
    /// invalidate the line.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    UnknownTag(String),
    MissingOperand { tag: char, expected: usize, found: usize },
    TrailingTokens { tag: char, extra: usize },
}

/// A malformed trace line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub line: usize,
    pub kind: ParseErrorKind,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ParseErrorKind::UnknownTag(tag) => {
                write!(f, "line {}: unknown instruction tag {:?}", self.line, tag)
            }
            ParseErrorKind::MissingOperand {
                tag,
                expected,
                found,
            } => write!(
                f,
                "line {}: '{}' expects {} operand(s), found {}",
                self.line, tag, expected, found
            ),
            ParseErrorKind::TrailingTokens { tag, extra } => write!(
                f,
                "line {}: '{}' has {} unexpected trailing token(s)",
                self.line, tag, extra
            ),
        }
    }
}

impl std::error::Error for ParseError {}

impl ParseError {
    /// Whether the line carried a tag the grammar does not know.
    pub fn is_unknown_tag(&self) -> bool {
        matches!(self.kind, ParseErrorKind::UnknownTag(_))
    }
}

fn operand_count(tag: char) -> Option<usize> {
    match tag {
        'I' | 'U' | 'S' => Some(2),
        'D' | 'Q' => Some(1),
        _ => None,
    }
}

/// Parse one trace line. Blank lines yield `Ok(None)`.
pub fn parse_line(
    line: &[u8],
    lineno: usize,
    mode: ParseMode,
) -> Result<Option<Instruction>, ParseError> {
    let mut tokens = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|t| !t.is_empty());

    let Some(raw_tag) = tokens.next() else {
        return Ok(None);
    };

    let unknown = || ParseError {
        line: lineno,
        kind: ParseErrorKind::UnknownTag(String::from_utf8_lossy(raw_tag).into_owned()),
    };
    if mode == ParseMode::Strict && raw_tag.len() != 1 {
        return Err(unknown());
    }
    let tag = raw_tag[0] as char;
    let expected = operand_count(tag).ok_or_else(unknown)?;

    let operands: Vec<&[u8]> = tokens.by_ref().take(expected).collect();
    if operands.len() < expected {
        return Err(ParseError {
            line: lineno,
            kind: ParseErrorKind::MissingOperand {
                tag,
                expected,
                found: operands.len(),
            },
        });
    }
    if mode == ParseMode::Strict {
        let extra = tokens.count();
        if extra > 0 {
            return Err(ParseError {
                line: lineno,
                kind: ParseErrorKind::TrailingTokens { tag, extra },
            });
        }
    }

    let a = operands[0].to_vec();
    let instruction = match tag {
        'I' => Instruction::Insert {
            key: a,
            value: operands[1].to_vec(),
        },
        'U' => Instruction::Update {
            key: a,
            value: operands[1].to_vec(),
        },
        'D' => Instruction::Delete { key: a },
        'Q' => Instruction::Query { key: a },
        'S' => Instruction::ScanRange {
            start: a,
            end: operands[1].to_vec(),
        },
        _ => unreachable!("operand_count accepted tag {tag}"),
    };
    Ok(Some(instruction))
}

/// Lazy reader over a trace source, yielding instructions in file order.
pub struct TraceReader<R> {
    reader: R,
    mode: ParseMode,
    lineno: usize,
    buf: Vec<u8>,
}

impl TraceReader<BufReader<File>> {
    /// Open a trace file.
    pub fn open(path: impl AsRef<Path>, mode: ParseMode) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), mode))
    }
}

impl<R: BufRead> TraceReader<R> {
    pub fn new(reader: R, mode: ParseMode) -> Self {
        Self {
            reader,
            mode,
            lineno: 0,
            buf: Vec::with_capacity(256),
        }
    }

    /// Number of lines consumed so far.
    pub fn lines_read(&self) -> usize {
        self.lineno
    }
}

impl<R: BufRead> Iterator for TraceReader<R> {
    type Item = Result<Instruction, TraceError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => return Some(Err(TraceError::Io(e))),
            }
            self.lineno += 1;
            match parse_line(&self.buf, self.lineno, self.mode) {
                Ok(Some(instruction)) => return Some(Ok(instruction)),
                Ok(None) => continue,
                Err(e) => return Some(Err(TraceError::Parse(e))),
            }
        }
    }
}

/// Number of non-blank lines in a trace: the workload size.
pub fn count_instructions(path: impl AsRef<Path>) -> io::Result<u64> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut buf = Vec::with_capacity(256);
    let mut count = 0u64;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        if buf.iter().any(|b| !b.is_ascii_whitespace()) {
            count += 1;
        }
    }
    Ok(count)
}
