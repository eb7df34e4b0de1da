//! JVM field and method descriptor parsing, printing and sizing (§4.1).
//!
//! Grammar (strict LL(1), one token of lookahead):
//! ```text
//! field-descriptor  := 'B' | 'C' | 'D' | 'F' | 'I' | 'J' | 'S' | 'Z' | 'L' name ';' | '[' field-descriptor
//! method-descriptor := '(' field-descriptor* ')' return-descriptor
//! return-descriptor := field-descriptor | 'V'
//! ```

use std::fmt;

pub const POINTER_SIZE: usize = size_of::<usize>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorError {
    Empty,
    UnterminatedClassName { start: usize },
    UnknownTag(u8),
    TrailingGarbage { at: usize },
    MissingOpenParen,
    MissingCloseParen,
    MissingReturnType,
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for DescriptorError {}

/// A single field (non-method) type: a primitive, a named class reference, or an array.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Descriptor {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
    Object(String),
    Array(Box<Descriptor>),
}

impl Descriptor {
    /// Byte size of a value of this type on the target machine. References (object and array)
    /// are pointer-sized; `Void` has no storage.
    pub fn size_of(&self) -> usize {
        match self {
            Descriptor::Boolean | Descriptor::Byte => 1,
            Descriptor::Char | Descriptor::Short => 2,
            Descriptor::Int | Descriptor::Float => 4,
            Descriptor::Long | Descriptor::Double => 8,
            Descriptor::Void => 0,
            Descriptor::Object(_) | Descriptor::Array(_) => POINTER_SIZE,
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Descriptor::Object(_) | Descriptor::Array(_))
    }

    /// Human-readable form used only in diagnostics, not round-tripped.
    pub fn pretty(&self) -> String {
        match self {
            Descriptor::Boolean => "boolean".to_string(),
            Descriptor::Byte => "byte".to_string(),
            Descriptor::Char => "char".to_string(),
            Descriptor::Short => "short".to_string(),
            Descriptor::Int => "int".to_string(),
            Descriptor::Long => "long".to_string(),
            Descriptor::Float => "float".to_string(),
            Descriptor::Double => "double".to_string(),
            Descriptor::Void => "void".to_string(),
            Descriptor::Object(name) => name.replace('/', "."),
            Descriptor::Array(component) => format!("{}[]", component.pretty()),
        }
    }

    /// Renders the strict textual form this type was (or would be) parsed from.
    pub fn write(&self) -> String {
        match self {
            Descriptor::Boolean => "Z".to_string(),
            Descriptor::Byte => "B".to_string(),
            Descriptor::Char => "C".to_string(),
            Descriptor::Short => "S".to_string(),
            Descriptor::Int => "I".to_string(),
            Descriptor::Long => "J".to_string(),
            Descriptor::Float => "F".to_string(),
            Descriptor::Double => "D".to_string(),
            Descriptor::Void => "V".to_string(),
            Descriptor::Object(name) => format!("L{};", name),
            Descriptor::Array(component) => format!("[{}", component.write()),
        }
    }
}

/// A parsed `(params)return` method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub parameters: Vec<Descriptor>,
    pub return_type: Descriptor,
}

impl MethodDescriptor {
    pub fn write(&self) -> String {
        let mut out = String::from("(");
        for param in &self.parameters {
            out.push_str(&param.write());
        }
        out.push(')');
        out.push_str(&self.return_type.write());
        out
    }

    pub fn pretty_signature(&self, class_name: &str, method_name: &str) -> String {
        let params = self
            .parameters
            .iter()
            .map(Descriptor::pretty)
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "{} {}.{}({})",
            self.return_type.pretty(),
            class_name.replace('/', "."),
            method_name,
            params
        )
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor { bytes: text.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.pos += 1;
        Some(b)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn parse_field(&mut self) -> Result<Descriptor, DescriptorError> {
        let tag = self.advance().ok_or(DescriptorError::Empty)?;
        match tag {
            b'Z' => Ok(Descriptor::Boolean),
            b'B' => Ok(Descriptor::Byte),
            b'C' => Ok(Descriptor::Char),
            b'S' => Ok(Descriptor::Short),
            b'I' => Ok(Descriptor::Int),
            b'J' => Ok(Descriptor::Long),
            b'F' => Ok(Descriptor::Float),
            b'D' => Ok(Descriptor::Double),
            b'[' => Ok(Descriptor::Array(Box::new(self.parse_field()?))),
            b'L' => {
                let start = self.pos;
                let name_start = self.pos;
                loop {
                    match self.advance() {
                        Some(b';') => break,
                        Some(_) => continue,
                        None => return Err(DescriptorError::UnterminatedClassName { start }),
                    }
                }
                let name_end = self.pos - 1;
                let name = std::str::from_utf8(&self.bytes[name_start..name_end])
                    .map_err(|_| DescriptorError::UnterminatedClassName { start })?
                    .to_string();
                Ok(Descriptor::Object(name))
            }
            other => Err(DescriptorError::UnknownTag(other)),
        }
    }

    fn parse_return(&mut self) -> Result<Descriptor, DescriptorError> {
        if self.peek() == Some(b'V') {
            self.advance();
            return Ok(Descriptor::Void);
        }
        if self.at_end() {
            return Err(DescriptorError::MissingReturnType);
        }
        self.parse_field()
    }
}

/// Strict LL(1) parse of a field descriptor. Rejects empty input, an unterminated `L` name,
/// and trailing garbage after a complete descriptor.
pub fn parse_field(text: &str) -> Result<Descriptor, DescriptorError> {
    if text.is_empty() {
        return Err(DescriptorError::Empty);
    }
    let mut cursor = Cursor::new(text);
    let descriptor = cursor.parse_field()?;
    if !cursor.at_end() {
        return Err(DescriptorError::TrailingGarbage { at: cursor.pos });
    }
    Ok(descriptor)
}

/// Strict parse of a method descriptor `(<field>*)<field-or-void>`.
pub fn parse_method(text: &str) -> Result<MethodDescriptor, DescriptorError> {
    if text.is_empty() {
        return Err(DescriptorError::Empty);
    }
    let mut cursor = Cursor::new(text);
    if cursor.advance() != Some(b'(') {
        return Err(DescriptorError::MissingOpenParen);
    }
    let mut parameters = Vec::new();
    while cursor.peek() != Some(b')') {
        if cursor.at_end() {
            return Err(DescriptorError::MissingCloseParen);
        }
        parameters.push(cursor.parse_field()?);
    }
    cursor.advance(); // ')'
    let return_type = cursor.parse_return()?;
    if !cursor.at_end() {
        return Err(DescriptorError::TrailingGarbage { at: cursor.pos });
    }
    Ok(MethodDescriptor { parameters, return_type })
}
