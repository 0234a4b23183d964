//! Code objects: the sealed output of compilation.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;

use num_bigint::BigInt;

/// Code object flag bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct CodeFlags(u32);

impl CodeFlags {
    /// No flags.
    pub const NONE: CodeFlags = CodeFlags(0);
    /// Locals live in numbered slots rather than a name bag.
    pub const SLOTS: CodeFlags = CodeFlags(0x01);
    /// The function takes `*args`.
    pub const VARARGS: CodeFlags = CodeFlags(0x04);
    /// The function takes `**kwargs`.
    pub const VARKEYWORDS: CodeFlags = CodeFlags(0x08);
    /// The body contains `yield`.
    pub const GENERATOR: CodeFlags = CodeFlags(0x20);
    /// The body belongs to an `async def`.
    pub const COROUTINE: CodeFlags = CodeFlags(0x80);
    /// The body is a class body.
    pub const CLASS_BODY: CodeFlags = CodeFlags(0x1000);
    /// The body is a module.
    pub const MODULE: CodeFlags = CodeFlags(0x2000);

    /// Returns true if every bit of `other` is set.
    pub fn contains(self, other: CodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Raw bits.
    pub fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for CodeFlags {
    type Output = CodeFlags;

    fn bitor(self, rhs: CodeFlags) -> CodeFlags {
        CodeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for CodeFlags {
    fn bitor_assign(&mut self, rhs: CodeFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (CodeFlags::SLOTS, "SLOTS"),
            (CodeFlags::VARARGS, "VARARGS"),
            (CodeFlags::VARKEYWORDS, "VARKEYWORDS"),
            (CodeFlags::GENERATOR, "GENERATOR"),
            (CodeFlags::COROUTINE, "COROUTINE"),
            (CodeFlags::CLASS_BODY, "CLASS_BODY"),
            (CodeFlags::MODULE, "MODULE"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("0")
        } else {
            f.write_str(&set.join(" | "))
        }
    }
}

/// A compile-time constant.
#[derive(Debug, Clone)]
pub enum Constant {
    /// `None`
    None,
    /// `True` / `False`
    Bool(bool),
    /// Integer in `i64` range
    Int(i64),
    /// Larger integer
    BigInt(Arc<BigInt>),
    /// Float
    Float(f64),
    /// String
    Str(Arc<str>),
    /// `...`
    Ellipsis,
    /// Tuple of constants (keyword names, import lists)
    Tuple(Arc<[Constant]>),
    /// Nested code object
    Code(Arc<CodeObject>),
}

impl Constant {
    /// Pool identity: equal values of the same type are the same entry; code
    /// objects only match themselves.
    pub fn same_entry(&self, other: &Constant) -> bool {
        match (self, other) {
            (Constant::None, Constant::None) | (Constant::Ellipsis, Constant::Ellipsis) => true,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::BigInt(a), Constant::BigInt(b)) => a == b,
            // Bitwise, so 0.0 and -0.0 stay distinct and NaN matches itself.
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::Str(a), Constant::Str(b)) => a == b,
            (Constant::Tuple(a), Constant::Tuple(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.same_entry(y))
            }
            (Constant::Code(a), Constant::Code(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => f.write_str("None"),
            Constant::Bool(true) => f.write_str("True"),
            Constant::Bool(false) => f.write_str("False"),
            Constant::Int(n) => write!(f, "{}", n),
            Constant::BigInt(n) => write!(f, "{}", n),
            Constant::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 && x.abs() < 1e16 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Constant::Str(s) => write!(f, "'{}'", s.escape_debug()),
            Constant::Ellipsis => f.write_str("Ellipsis"),
            Constant::Tuple(items) => {
                f.write_str("(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Constant::Code(code) => write!(f, "<code object {}>", code.name),
        }
    }
}

/// A compiled unit: module, function, lambda, comprehension or class body.
///
/// Code objects are immutable once built and shared by `Arc`.
#[derive(Debug)]
pub struct CodeObject {
    /// Display name (`<module>`, the function name, `<lambda>`, `<listcomp>`)
    pub name: String,
    /// Dotted name including enclosing functions and classes
    pub qualname: String,
    /// Source file the unit came from
    pub filename: Arc<str>,
    /// Constant pool
    pub constants: Vec<Constant>,
    /// Name table (globals, attributes, name-bag locals, free variables)
    pub names: Vec<String>,
    /// Flat bytecode
    pub bytecode: Vec<u32>,
    /// Number of positional parameters
    pub argcount: u32,
    /// Number of keyword-only parameters
    pub kwonlyargcount: u32,
    /// Local variable names. With `SLOTS`, index `i` names slot `i`.
    pub varnames: Vec<String>,
    /// Number of local slots (zero without `SLOTS`)
    pub nslots: u32,
    /// Maximum operand stack depth
    pub stacksize: u32,
    /// Flag bits
    pub flags: CodeFlags,
    /// Names this unit reads from enclosing function scopes
    pub freevars: Vec<String>,
    /// Own locals captured by nested scopes
    pub cellvars: Vec<String>,
    /// Line of the first statement
    pub first_line: u32,
    /// `(bytecode offset, line)` pairs, offsets ascending
    pub line_table: Vec<(u32, u32)>,
}

impl CodeObject {
    /// Returns true if calling this code creates a generator.
    pub fn is_generator(&self) -> bool {
        self.flags.contains(CodeFlags::GENERATOR)
    }

    /// Returns true if calling this code creates a coroutine.
    pub fn is_coroutine(&self) -> bool {
        self.flags.contains(CodeFlags::COROUTINE)
    }

    /// Returns true if locals live in numbered slots.
    pub fn uses_slots(&self) -> bool {
        self.flags.contains(CodeFlags::SLOTS)
    }

    /// Number of slots plus operand stack scratch space.
    pub fn nlocals_plus(&self) -> u32 {
        self.nslots + self.stacksize
    }

    /// Name of the `*args` parameter, if any.
    pub fn vararg_name(&self) -> Option<&str> {
        if self.flags.contains(CodeFlags::VARARGS) {
            self.varnames.get(self.argcount as usize).map(String::as_str)
        } else {
            None
        }
    }

    /// Name of the `**kwargs` parameter, if any.
    pub fn varkw_name(&self) -> Option<&str> {
        if !self.flags.contains(CodeFlags::VARKEYWORDS) {
            return None;
        }
        let mut index = self.argcount as usize;
        if self.flags.contains(CodeFlags::VARARGS) {
            index += 1;
        }
        self.varnames.get(index).map(String::as_str)
    }

    /// Slot index of the keyword-only parameter `i`.
    ///
    /// Keyword-only parameters come after every other local.
    pub fn kwonly_slot(&self, i: usize) -> usize {
        self.varnames.len() - self.kwonlyargcount as usize + i
    }

    /// Source line of the instruction at `offset`.
    pub fn line_for(&self, offset: usize) -> u32 {
        let offset = offset as u32;
        match self.line_table.binary_search_by(|(start, _)| start.cmp(&offset)) {
            Ok(i) => self.line_table[i].1,
            Err(0) => self.first_line,
            Err(i) => self.line_table[i - 1].1,
        }
    }

    /// Iterates over nested code objects in the constant pool.
    pub fn nested(&self) -> impl Iterator<Item = &Arc<CodeObject>> {
        self.constants.iter().filter_map(|c| match c {
            Constant::Code(code) => Some(code),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let flags = CodeFlags::SLOTS | CodeFlags::GENERATOR;
        assert!(flags.contains(CodeFlags::SLOTS));
        assert!(!flags.contains(CodeFlags::COROUTINE));
        assert_eq!(flags.to_string(), "SLOTS | GENERATOR");
        assert_eq!(CodeFlags::NONE.to_string(), "0");
    }

    #[test]
    fn test_constant_identity_is_typed() {
        assert!(!Constant::Int(1).same_entry(&Constant::Float(1.0)));
        assert!(!Constant::Int(1).same_entry(&Constant::Bool(true)));
        assert!(Constant::Float(f64::NAN).same_entry(&Constant::Float(f64::NAN)));
        assert!(!Constant::Float(0.0).same_entry(&Constant::Float(-0.0)));
        assert!(Constant::Str("a".into()).same_entry(&Constant::Str("a".into())));
    }

    #[test]
    fn test_constant_display() {
        assert_eq!(Constant::Float(2.0).to_string(), "2.0");
        assert_eq!(
            Constant::Tuple(vec![Constant::Str("k".into())].into()).to_string(),
            "('k',)"
        );
    }
}
