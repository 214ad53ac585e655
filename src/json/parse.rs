//! `JSON.parse`
//!
//! A strict RFC 8259 scanner (no comments, no trailing commas, no unquoted
//! keys) that builds runtime values as it goes. Containers still being
//! filled sit on an explicit stack, so nesting is bounded by
//! `max_parse_depth` rather than by the native call stack. Strings decode
//! straight to UTF-16 code units, which keeps escaped lone surrogates intact.

use crate::error::JsError;
use crate::json::walker;
use crate::object::{JsObjectRef, PropertyKey};
use crate::runtime::Runtime;
use crate::string::JsString;
use crate::value::JsValue;

/// `JSON.parse(text, reviver)`; the reviver only runs when it is callable
pub fn parse(rt: &mut Runtime, text: &str, reviver: Option<&JsValue>) -> Result<JsValue, JsError> {
    let max_depth = rt.config().max_parse_depth;
    let value = Parser::new(text, max_depth).parse_document(rt)?;
    match reviver {
        Some(reviver) if reviver.is_callable() => walker::walk(rt, value, reviver),
        _ => Ok(value),
    }
}

/// A container whose members are still being read
enum Frame {
    Array { target: JsObjectRef, index: u32 },
    Object { target: JsObjectRef, key: PropertyKey },
}

impl Frame {
    fn into_target(self) -> JsObjectRef {
        match self {
            Frame::Array { target, .. } | Frame::Object { target, .. } => target,
        }
    }
}

/// What follows a container's opening bracket
enum Opened {
    Empty(JsObjectRef),
    Frame(Frame),
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, max_depth: usize) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            max_depth,
        }
    }

    fn parse_document(&mut self, rt: &mut Runtime) -> Result<JsValue, JsError> {
        let mut stack: Vec<Frame> = Vec::new();
        'value: loop {
            self.skip_whitespace();
            let mut value = match self.peek() {
                Some(b'[') | Some(b'{') => {
                    if stack.len() >= self.max_depth {
                        tracing::debug!(target: "jscell::json", depth = stack.len(), "parse depth ceiling reached");
                        return Err(JsError::stack_overflow());
                    }
                    match self.open_container(rt)? {
                        Opened::Empty(target) => JsValue::Object(target),
                        Opened::Frame(frame) => {
                            stack.push(frame);
                            continue 'value;
                        }
                    }
                }
                Some(b'"') => JsValue::String(self.scan_string()?),
                Some(b't') => self.scan_literal("true", JsValue::Boolean(true))?,
                Some(b'f') => self.scan_literal("false", JsValue::Boolean(false))?,
                Some(b'n') => self.scan_literal("null", JsValue::Null)?,
                Some(b'-' | b'0'..=b'9') => self.scan_number()?,
                _ => return Err(self.unexpected()),
            };

            // Attach the finished value, closing every container it completes
            loop {
                let Some(frame) = stack.last_mut() else {
                    self.skip_whitespace();
                    if self.peek().is_some() {
                        return Err(self.unexpected());
                    }
                    return Ok(value);
                };
                let closed = match frame {
                    Frame::Array { target, index } => {
                        target.borrow_mut().put_index(*index, value)?;
                        *index = index.saturating_add(1);
                        self.skip_whitespace();
                        match self.peek() {
                            Some(b',') => false,
                            Some(b']') => true,
                            _ => return Err(self.unexpected()),
                        }
                    }
                    Frame::Object { target, key } => {
                        target.borrow_mut().put(key.clone(), value)?;
                        self.skip_whitespace();
                        match self.peek() {
                            Some(b',') => {
                                self.pos += 1;
                                *key = self.scan_member_key()?;
                                continue 'value;
                            }
                            Some(b'}') => true,
                            _ => return Err(self.unexpected()),
                        }
                    }
                };
                self.pos += 1;
                if !closed {
                    continue 'value;
                }
                let Some(done) = stack.pop() else {
                    return Err(JsError::internal_error("parse stack underflow"));
                };
                let target = done.into_target();
                rt.report_butterfly_cost(&target);
                value = JsValue::Object(target);
            }
        }
    }

    /// Consume `[` or `{` and, unless the container is empty, its first key
    fn open_container(&mut self, rt: &mut Runtime) -> Result<Opened, JsError> {
        let is_array = self.peek() == Some(b'[');
        self.pos += 1;
        self.skip_whitespace();
        if is_array {
            let target = rt.create_array(Vec::new())?;
            if self.peek() == Some(b']') {
                self.pos += 1;
                return Ok(Opened::Empty(target));
            }
            return Ok(Opened::Frame(Frame::Array { target, index: 0 }));
        }
        let target = rt.create_object()?;
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(Opened::Empty(target));
        }
        let key = self.scan_member_key()?;
        Ok(Opened::Frame(Frame::Object { target, key }))
    }

    // ------------------------------------------------------------------
    // Tokens
    // ------------------------------------------------------------------

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    /// `"name" :`
    fn scan_member_key(&mut self) -> Result<PropertyKey, JsError> {
        self.skip_whitespace();
        if self.peek() != Some(b'"') {
            return Err(self.unexpected());
        }
        let name = self.scan_string()?;
        self.skip_whitespace();
        if self.peek() != Some(b':') {
            return Err(self.unexpected());
        }
        self.pos += 1;
        Ok(PropertyKey::from(name))
    }

    fn scan_literal(&mut self, word: &str, value: JsValue) -> Result<JsValue, JsError> {
        let start = self.pos;
        for expected in word.bytes() {
            if self.peek() != Some(expected) {
                return Err(self.unexpected());
            }
            self.pos += 1;
        }
        // `truefalse` and friends
        if self.peek().is_some_and(|b| b.is_ascii_alphanumeric()) {
            self.pos = start;
            return Err(self.unexpected());
        }
        Ok(value)
    }

    fn skip_digits(&mut self) -> bool {
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn scan_number(&mut self) -> Result<JsValue, JsError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        match self.peek() {
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => {
                self.skip_digits();
            }
            _ => return Err(self.unexpected()),
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            if !self.skip_digits() {
                return Err(self.unexpected());
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if !self.skip_digits() {
                return Err(self.unexpected());
            }
        }
        let literal = self
            .text
            .get(start..self.pos)
            .ok_or_else(|| JsError::internal_error("number literal off a char boundary"))?;
        // Magnitudes past f64 come out as infinities or zeros, as in JS
        let number: f64 = literal.parse().map_err(|_| self.unexpected())?;
        Ok(JsValue::number(number))
    }

    /// A quoted string, decoded to UTF-16 code units
    fn scan_string(&mut self) -> Result<JsString, JsError> {
        self.pos += 1;
        let mut units: Vec<u16> = Vec::new();
        loop {
            let run_start = self.pos;
            while matches!(self.peek(), Some(b) if b != b'"' && b != b'\\' && b >= 0x20) {
                self.pos += 1;
            }
            // The run stops only at ASCII bytes, so both ends are char boundaries
            if let Some(run) = self.text.get(run_start..self.pos) {
                units.extend(run.encode_utf16());
            }
            match self.peek() {
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(JsString::from_utf16(&units));
                }
                Some(b'\\') => {
                    self.pos += 1;
                    units.push(self.scan_escape()?);
                }
                Some(_) => {
                    return Err(self.error_here("JSON Parse error: Unescaped control character in string"));
                }
                None => return Err(self.unexpected()),
            }
        }
    }

    fn scan_escape(&mut self) -> Result<u16, JsError> {
        let unit = match self.peek() {
            Some(b'"') => 0x22,
            Some(b'\\') => 0x5C,
            Some(b'/') => 0x2F,
            Some(b'b') => 0x08,
            Some(b'f') => 0x0C,
            Some(b'n') => 0x0A,
            Some(b'r') => 0x0D,
            Some(b't') => 0x09,
            Some(b'u') => {
                self.pos += 1;
                return self.scan_hex4();
            }
            Some(_) => return Err(self.error_here("JSON Parse error: Invalid escape character")),
            None => return Err(self.unexpected()),
        };
        self.pos += 1;
        Ok(unit)
    }

    /// Four hex digits; any code unit, paired surrogate or not
    fn scan_hex4(&mut self) -> Result<u16, JsError> {
        let mut unit: u16 = 0;
        for _ in 0..4 {
            let Some(b) = self.peek() else {
                return Err(self.unexpected());
            };
            let Some(digit) = char::from(b).to_digit(16) else {
                return Err(self.error_here("JSON Parse error: \\u must be followed by 4 hex digits"));
            };
            unit = (unit << 4) | digit as u16;
            self.pos += 1;
        }
        Ok(unit)
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// 1-based line and column (in chars) of the current position
    fn location(&self) -> (u32, u32) {
        let before = self.text.get(..self.pos).unwrap_or(self.text);
        let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
        let column = before.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (
            u32::try_from(line).unwrap_or(u32::MAX),
            u32::try_from(column).unwrap_or(u32::MAX),
        )
    }

    fn error_here(&self, message: impl Into<String>) -> JsError {
        let (line, column) = self.location();
        JsError::syntax_error(message, line, column)
    }

    /// The character at the current position cannot start or continue
    /// anything valid here
    fn unexpected(&self) -> JsError {
        let found = self.text.get(self.pos..).and_then(|rest| rest.chars().next());
        match found {
            None => self.error_here("Unexpected end of JSON input"),
            Some(c) => self.error_here(format!("JSON Parse error: Unexpected token '{}'", c)),
        }
    }
}
