//! Rope strings
//!
//! A `JsString` is either a flat buffer of code units (8-bit Latin-1 or 16-bit
//! UTF-16) or a rope node holding up to three fibers. Concatenation builds rope
//! nodes in O(1); the characters are copied into one buffer the first time
//! somebody needs them contiguously, after which the node behaves as flat.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::JsError;
use crate::value::CheapClone;

/// Fibers per rope node
pub const MAX_ROPE_FIBERS: usize = 3;

/// Longest representable string, in code units
pub const MAX_STRING_LENGTH: usize = i32::MAX as usize;

type Fibers = [Option<JsString>; MAX_ROPE_FIBERS];

/// Reference-counted, immutable JavaScript string
#[derive(Clone)]
pub struct JsString(Rc<StringImpl>);

impl CheapClone for JsString {}

struct StringImpl {
    /// Length in code units; for ropes, the sum of the fibers' lengths
    length: usize,
    /// Every code unit fits in 8 bits; for ropes, AND over the fibers
    is_8bit: bool,
    repr: RefCell<Repr>,
}

enum Repr {
    Flat(FlatBuffer),
    Rope(Fibers),
    /// Resolution failed to allocate; fibers were released
    Exhausted,
}

enum FlatBuffer {
    Latin1(Box<[u8]>),
    Utf16(Box<[u16]>),
}

/// Borrowed view of a flat string's code units
#[derive(Clone, Copy, Debug)]
pub enum CodeUnits<'a> {
    Latin1(&'a [u8]),
    Utf16(&'a [u16]),
}

impl CodeUnits<'_> {
    pub fn len(&self) -> usize {
        match self {
            CodeUnits::Latin1(units) => units.len(),
            CodeUnits::Utf16(units) => units.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        match self {
            CodeUnits::Latin1(units) => units.get(index).map(|&u| u16::from(u)),
            CodeUnits::Utf16(units) => units.get(index).copied(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        let (latin1, utf16) = match self {
            CodeUnits::Latin1(units) => (Some(units.iter().map(|&u| u16::from(u))), None),
            CodeUnits::Utf16(units) => (None, Some(units.iter().copied())),
        };
        latin1
            .into_iter()
            .flatten()
            .chain(utf16.into_iter().flatten())
    }
}

fn checked_length(a: usize, b: usize) -> Result<usize, JsError> {
    a.checked_add(b)
        .filter(|&len| len <= MAX_STRING_LENGTH)
        .ok_or_else(JsError::out_of_memory)
}

impl JsString {
    fn flat(buffer: FlatBuffer) -> Self {
        let (length, is_8bit) = match &buffer {
            FlatBuffer::Latin1(units) => (units.len(), true),
            FlatBuffer::Utf16(units) => (units.len(), false),
        };
        JsString(Rc::new(StringImpl {
            length,
            is_8bit,
            repr: RefCell::new(Repr::Flat(buffer)),
        }))
    }

    fn rope(length: usize, is_8bit: bool, fibers: Fibers) -> Self {
        JsString(Rc::new(StringImpl {
            length,
            is_8bit,
            repr: RefCell::new(Repr::Rope(fibers)),
        }))
    }

    pub fn empty() -> Self {
        JsString::flat(FlatBuffer::Latin1(Box::default()))
    }

    pub fn from_latin1(bytes: &[u8]) -> Self {
        JsString::flat(FlatBuffer::Latin1(bytes.into()))
    }

    /// Build from UTF-16 code units, narrowing to 8-bit storage when possible
    pub fn from_utf16(units: &[u16]) -> Self {
        if units.iter().all(|&u| u <= 0xFF) {
            let bytes: Vec<u8> = units.iter().map(|&u| (u & 0xFF) as u8).collect();
            JsString::flat(FlatBuffer::Latin1(bytes.into_boxed_slice()))
        } else {
            JsString::flat(FlatBuffer::Utf16(units.into()))
        }
    }

    pub fn len(&self) -> usize {
        self.0.length
    }

    pub fn is_empty(&self) -> bool {
        self.0.length == 0
    }

    pub fn is_8bit(&self) -> bool {
        self.0.is_8bit
    }

    /// True while this node still holds unresolved fibers
    pub fn is_rope(&self) -> bool {
        matches!(&*self.0.repr.borrow(), Repr::Rope(_))
    }

    pub fn ptr_eq(a: &JsString, b: &JsString) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    /// Call `visitor` once for each fiber this node still references
    pub fn visit_fibers(&self, mut visitor: impl FnMut(&JsString)) {
        if let Repr::Rope(fibers) = &*self.0.repr.borrow() {
            for fiber in fibers.iter().flatten() {
                visitor(fiber);
            }
        }
    }

    /// Flatten the rope into one buffer.
    ///
    /// Returns the number of bytes newly allocated (0 when the string was
    /// already flat), so the caller can report it to the collector.
    pub fn resolve(&self) -> Result<usize, JsError> {
        let fibers = {
            let mut repr = self.0.repr.borrow_mut();
            match &mut *repr {
                Repr::Flat(_) => return Ok(0),
                Repr::Exhausted => return Err(JsError::out_of_memory()),
                Repr::Rope(fibers) => std::mem::take(fibers),
            }
        };

        let result = if self.0.is_8bit {
            resolve_into::<u8>(self.0.length, fibers).map(FlatBuffer::Latin1)
        } else {
            resolve_into::<u16>(self.0.length, fibers).map(FlatBuffer::Utf16)
        };

        let mut repr = self.0.repr.borrow_mut();
        match result {
            Ok(buffer) => {
                let bytes = match &buffer {
                    FlatBuffer::Latin1(units) => units.len(),
                    FlatBuffer::Utf16(units) => units.len() * 2,
                };
                *repr = Repr::Flat(buffer);
                tracing::trace!(target: "jscell::string", length = self.0.length, bytes, "rope resolved");
                Ok(bytes)
            }
            Err(err) => {
                *repr = Repr::Exhausted;
                Err(err)
            }
        }
    }

    /// Run `f` over the contiguous code units, resolving first if needed
    pub fn with_code_units<R>(&self, f: impl FnOnce(CodeUnits<'_>) -> R) -> Result<R, JsError> {
        self.resolve()?;
        let repr = self.0.repr.borrow();
        match &*repr {
            Repr::Flat(FlatBuffer::Latin1(units)) => Ok(f(CodeUnits::Latin1(units))),
            Repr::Flat(FlatBuffer::Utf16(units)) => Ok(f(CodeUnits::Utf16(units))),
            Repr::Exhausted => Err(JsError::out_of_memory()),
            Repr::Rope(_) => Err(JsError::internal_error("rope still unresolved")),
        }
    }

    pub fn char_code_at(&self, index: usize) -> Result<Option<u16>, JsError> {
        self.with_code_units(|units| units.get(index))
    }

    pub fn to_utf16(&self) -> Result<Vec<u16>, JsError> {
        self.with_code_units(|units| units.iter().collect())
    }

    /// Lossy conversion: lone surrogates become U+FFFD
    pub fn to_rust_string(&self) -> Result<String, JsError> {
        self.with_code_units(|units| match units {
            CodeUnits::Latin1(bytes) => bytes.iter().map(|&b| char::from(b)).collect(),
            CodeUnits::Utf16(units) => String::from_utf16_lossy(units),
        })
    }

    /// Content equality with a Rust string
    pub fn eq_str(&self, other: &str) -> bool {
        self.with_code_units(|units| units.iter().eq(other.encode_utf16()))
            .unwrap_or(false)
    }

    /// Interpret the string as a canonical array index ("0", "17", not "01")
    pub fn as_array_index(&self) -> Option<u32> {
        if self.is_empty() || self.len() > 10 {
            return None;
        }
        self.with_code_units(|units| {
            let mut value: u64 = 0;
            for (i, unit) in units.iter().enumerate() {
                let digit = match unit {
                    0x30..=0x39 => u64::from(unit - 0x30),
                    _ => return None,
                };
                if i == 0 && digit == 0 && units.len() > 1 {
                    return None;
                }
                value = value * 10 + digit;
            }
            u32::try_from(value).ok().filter(|&v| v != u32::MAX)
        })
        .ok()
        .flatten()
    }
}

/// Code unit width a resolution buffer is built in
trait CodeUnit: Copy + Default {
    fn copy_from(dst: &mut [Self], src: CodeUnits<'_>) -> Result<(), JsError>;
}

impl CodeUnit for u8 {
    fn copy_from(dst: &mut [u8], src: CodeUnits<'_>) -> Result<(), JsError> {
        match src {
            CodeUnits::Latin1(units) => {
                dst.copy_from_slice(units);
                Ok(())
            }
            CodeUnits::Utf16(units) => {
                for (d, &s) in dst.iter_mut().zip(units) {
                    *d = u8::try_from(s).map_err(|_| {
                        JsError::internal_error("16-bit fiber inside an 8-bit rope")
                    })?;
                }
                Ok(())
            }
        }
    }
}

impl CodeUnit for u16 {
    fn copy_from(dst: &mut [u16], src: CodeUnits<'_>) -> Result<(), JsError> {
        match src {
            CodeUnits::Latin1(units) => {
                for (d, &s) in dst.iter_mut().zip(units) {
                    *d = u16::from(s);
                }
            }
            CodeUnits::Utf16(units) => dst.copy_from_slice(units),
        }
        Ok(())
    }
}

fn allocate_units<U: CodeUnit>(length: usize) -> Result<Vec<U>, JsError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(length)
        .map_err(|_| JsError::out_of_memory())?;
    buffer.resize(length, U::default());
    Ok(buffer)
}

/// Copy `fiber` (which must be flat) into `buffer[position..]`
fn copy_flat_fiber<U: CodeUnit>(
    buffer: &mut [U],
    position: usize,
    fiber: &JsString,
) -> Result<(), JsError> {
    let repr = fiber.0.repr.borrow();
    let src = match &*repr {
        Repr::Flat(FlatBuffer::Latin1(units)) => CodeUnits::Latin1(units),
        Repr::Flat(FlatBuffer::Utf16(units)) => CodeUnits::Utf16(units),
        Repr::Exhausted => return Err(JsError::out_of_memory()),
        Repr::Rope(_) => return Err(JsError::internal_error("copying an unresolved fiber")),
    };
    let dst = buffer
        .get_mut(position..position + src.len())
        .ok_or_else(|| JsError::internal_error("fiber overruns rope length"))?;
    U::copy_from(dst, src)
}

fn resolve_into<U: CodeUnit>(length: usize, fibers: Fibers) -> Result<Box<[U]>, JsError> {
    let mut buffer = allocate_units::<U>(length)?;

    if fibers.iter().flatten().all(|fiber| !fiber.is_rope()) {
        let mut position = 0;
        for fiber in fibers.iter().flatten() {
            copy_flat_fiber(&mut buffer, position, fiber)?;
            position += fiber.len();
        }
    } else {
        // Fill from the end. Popping the last-pushed fiber first means a
        // left-leaning chain (`s = s + x` in a loop) keeps the work stack at
        // a couple of entries no matter how deep the chain is.
        let mut stack: Vec<JsString> = fibers.into_iter().flatten().collect();
        let mut position = length;
        while let Some(fiber) = stack.pop() {
            let nested = match &*fiber.0.repr.borrow() {
                Repr::Rope(nested) => Some(nested.clone()),
                _ => None,
            };
            if let Some(nested) = nested {
                stack.extend(nested.into_iter().flatten());
                continue;
            }
            position = position
                .checked_sub(fiber.len())
                .ok_or_else(|| JsError::internal_error("fiber lengths exceed rope length"))?;
            copy_flat_fiber(&mut buffer, position, &fiber)?;
        }
    }

    Ok(buffer.into_boxed_slice())
}

impl Drop for StringImpl {
    fn drop(&mut self) {
        // A long concatenation chain would otherwise be torn down by one
        // nested drop per link.
        let Repr::Rope(fibers) = self.repr.get_mut() else {
            return;
        };
        let mut pending: Vec<JsString> = fibers.iter_mut().filter_map(Option::take).collect();
        while let Some(fiber) = pending.pop() {
            if let Ok(mut inner) = Rc::try_unwrap(fiber.0) {
                if let Repr::Rope(fibers) = inner.repr.get_mut() {
                    pending.extend(fibers.iter_mut().filter_map(Option::take));
                }
            }
        }
    }
}

// ============================================================================
// Concatenation
// ============================================================================

/// `a + b` without copying either operand
pub fn concat(a: &JsString, b: &JsString) -> Result<JsString, JsError> {
    if a.is_empty() {
        return Ok(b.cheap_clone());
    }
    if b.is_empty() {
        return Ok(a.cheap_clone());
    }
    let length = checked_length(a.len(), b.len())?;
    Ok(JsString::rope(
        length,
        a.is_8bit() && b.is_8bit(),
        [Some(a.cheap_clone()), Some(b.cheap_clone()), None],
    ))
}

/// `a + b + c` as a single three-fiber node
pub fn concat3(a: &JsString, b: &JsString, c: &JsString) -> Result<JsString, JsError> {
    if a.is_empty() {
        return concat(b, c);
    }
    if b.is_empty() {
        return concat(a, c);
    }
    if c.is_empty() {
        return concat(a, b);
    }
    let length = checked_length(checked_length(a.len(), b.len())?, c.len())?;
    Ok(JsString::rope(
        length,
        a.is_8bit() && b.is_8bit() && c.is_8bit(),
        [Some(a.cheap_clone()), Some(b.cheap_clone()), Some(c.cheap_clone())],
    ))
}

/// Accumulates any number of fragments into a left-leaning rope
pub struct RopeBuilder {
    fibers: Vec<JsString>,
    length: usize,
    is_8bit: bool,
}

impl Default for RopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RopeBuilder {
    pub fn new() -> Self {
        RopeBuilder {
            fibers: Vec::with_capacity(MAX_ROPE_FIBERS),
            length: 0,
            is_8bit: true,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn append(&mut self, fragment: &JsString) -> Result<(), JsError> {
        if fragment.is_empty() {
            return Ok(());
        }
        let length = checked_length(self.length, fragment.len())?;
        if self.fibers.len() == MAX_ROPE_FIBERS {
            self.expand();
        }
        self.fibers.push(fragment.cheap_clone());
        self.length = length;
        self.is_8bit &= fragment.is_8bit();
        Ok(())
    }

    pub fn append_str(&mut self, fragment: &str) -> Result<(), JsError> {
        self.append(&JsString::from(fragment))
    }

    /// Fold the full node into the first fiber of a fresh one
    fn expand(&mut self) {
        let node = self.take_node();
        self.fibers.push(node);
    }

    fn take_node(&mut self) -> JsString {
        let mut fibers: Fibers = Default::default();
        for (slot, fiber) in fibers.iter_mut().zip(self.fibers.drain(..)) {
            *slot = Some(fiber);
        }
        JsString::rope(self.length, self.is_8bit, fibers)
    }

    pub fn finish(mut self) -> JsString {
        match self.fibers.len() {
            0 => JsString::empty(),
            1 => self.fibers.pop().unwrap_or_else(JsString::empty),
            _ => self.take_node(),
        }
    }
}

// ============================================================================
// Trait impls
// ============================================================================

impl PartialEq for JsString {
    fn eq(&self, other: &Self) -> bool {
        if JsString::ptr_eq(self, other) {
            return true;
        }
        if self.len() != other.len() {
            return false;
        }
        self.with_code_units(|a| other.with_code_units(|b| a.iter().eq(b.iter())))
            .and_then(|inner| inner)
            .unwrap_or(false)
    }
}

impl Eq for JsString {}

impl Hash for JsString {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_usize(self.len());
        let hashed = self.with_code_units(|units| {
            for unit in units.iter() {
                state.write_u16(unit);
            }
        });
        if hashed.is_err() {
            // A rope that cannot be flattened only equals itself, so any
            // fixed value keeps Hash consistent with Eq.
            state.write_u8(0xff);
        }
    }
}

impl PartialEq<str> for JsString {
    fn eq(&self, other: &str) -> bool {
        self.eq_str(other)
    }
}

impl PartialEq<&str> for JsString {
    fn eq(&self, other: &&str) -> bool {
        self.eq_str(other)
    }
}

impl From<&str> for JsString {
    fn from(s: &str) -> Self {
        if s.chars().all(|c| u32::from(c) <= 0xFF) {
            let bytes: Vec<u8> = s.chars().map(|c| (u32::from(c) & 0xFF) as u8).collect();
            JsString::flat(FlatBuffer::Latin1(bytes.into_boxed_slice()))
        } else {
            let units: Vec<u16> = s.encode_utf16().collect();
            JsString::flat(FlatBuffer::Utf16(units.into_boxed_slice()))
        }
    }
}

impl From<String> for JsString {
    fn from(s: String) -> Self {
        JsString::from(s.as_str())
    }
}

impl Default for JsString {
    fn default() -> Self {
        JsString::empty()
    }
}

impl fmt::Display for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rust_string() {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl fmt::Debug for JsString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_rust_string() {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "<unresolvable string of length {}>", self.len()),
        }
    }
}
