//! Method descriptors of the form `(T*)R`.
//!
//! The source language only knows integers and booleans, so the grammar is a
//! small slice of the class-file one: parameters range over `I` and `Z`, the
//! return type additionally allows `V`.

use std::fmt;
use std::str::Chars;

/// A descriptor failed to parse.
#[derive(Debug, PartialEq, Eq)]
pub struct BadDescriptor {
    pub descriptor: String,
    pub reason: String,
}

impl fmt::Display for BadDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "bad descriptor '{}': {}", self.descriptor, self.reason)
    }
}

/// Utility trait for converting descriptors to and from string representations
pub trait Descriptor: Sized {
    /// Turn the descriptor into a string
    fn render(&self) -> String {
        let mut string = String::new();
        self.render_to(&mut string);
        string
    }

    /// Parse a descriptor from a string
    fn parse(source: &str) -> Result<Self, BadDescriptor> {
        let mut chars = source.chars();
        let ret = Descriptor::parse_from(source, &mut chars)?;
        let rest = chars.as_str();
        if rest.is_empty() {
            Ok(ret)
        } else {
            Err(BadDescriptor {
                descriptor: source.to_owned(),
                reason: format!("unexpected leftover input '{}'", rest),
            })
        }
    }

    /// Write the descriptor to a string
    fn render_to(&self, write_to: &mut String);

    /// Read the descriptor from a character buffer
    fn parse_from(source: &str, chars: &mut Chars) -> Result<Self, BadDescriptor>;
}

/// Value types that can appear as a parameter.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum BaseType {
    Int,
    Boolean,
}

impl BaseType {
    /// The IR type tag. Booleans are integers past the front end.
    pub fn type_tag(self) -> &'static str {
        "I"
    }
}

impl Descriptor for BaseType {
    fn render_to(&self, write_to: &mut String) {
        let c = match self {
            BaseType::Int => 'I',
            BaseType::Boolean => 'Z',
        };
        write_to.push(c);
    }

    fn parse_from(source: &str, chars: &mut Chars) -> Result<Self, BadDescriptor> {
        match chars.next() {
            Some('I') => Ok(BaseType::Int),
            Some('Z') => Ok(BaseType::Boolean),
            Some(c) => Err(BadDescriptor {
                descriptor: source.to_owned(),
                reason: format!("invalid base type character '{}'", c),
            }),
            None => Err(BadDescriptor {
                descriptor: source.to_owned(),
                reason: "missing base type character".to_owned(),
            }),
        }
    }
}

/// A method descriptor: parameter types plus a return type (`None` = void).
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct MethodDescriptor {
    pub parameters: Vec<BaseType>,
    pub return_type: Option<BaseType>,
}

impl MethodDescriptor {
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// The IR type tag of a call to a method with this descriptor.
    pub fn return_tag(&self) -> &'static str {
        match self.return_type {
            Some(t) => t.type_tag(),
            None => "V",
        }
    }
}

impl Descriptor for MethodDescriptor {
    fn render_to(&self, write_to: &mut String) {
        write_to.push('(');
        for parameter in &self.parameters {
            parameter.render_to(write_to);
        }
        write_to.push(')');
        match self.return_type {
            Some(typ) => typ.render_to(write_to),
            None => write_to.push('V'),
        }
    }

    fn parse_from(source: &str, chars: &mut Chars) -> Result<Self, BadDescriptor> {
        if chars.next() != Some('(') {
            return Err(BadDescriptor {
                descriptor: source.to_owned(),
                reason: "expected '('".to_owned(),
            });
        }
        let mut parameters = Vec::new();
        loop {
            // Peek for the closing paren without consuming a base type.
            let mut lookahead = chars.clone();
            match lookahead.next() {
                Some(')') => {
                    *chars = lookahead;
                    break;
                }
                Some(_) => parameters.push(BaseType::parse_from(source, chars)?),
                None => {
                    return Err(BadDescriptor {
                        descriptor: source.to_owned(),
                        reason: "missing ')'".to_owned(),
                    })
                }
            }
        }
        let return_type = match chars.clone().next() {
            Some('V') => {
                chars.next();
                None
            }
            _ => Some(BaseType::parse_from(source, chars)?),
        };
        Ok(MethodDescriptor {
            parameters,
            return_type,
        })
    }
}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.render())
    }
}
