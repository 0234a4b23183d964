//! Bytecode definitions.
//!
//! Bytecode is a flat `Vec<u32>`: each instruction is one opcode word,
//! followed by exactly one operand word when [`OpCode::has_operand`] says so.
//! Jump operands are absolute word indices into the same array. The compiler,
//! the basic-block analysis, the disassembler and the interpreter all decode
//! through the same predicate.

use std::fmt;

use crate::ast::CompareOperator;

macro_rules! define_opcodes {
    ($( $(#[$doc:meta])* $name:ident = $text:literal, )*) => {
        /// Operation codes for the VM.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $( $(#[$doc])* $name, )*
        }

        impl OpCode {
            /// Every opcode, indexed by its discriminant.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$name,)*];

            /// The opcode's display name, as shown by the disassembler.
            pub fn name(self) -> &'static str {
                match self {
                    $(OpCode::$name => $text,)*
                }
            }
        }
    };
}

define_opcodes! {
    // Stack manipulation
    /// Do nothing
    Nop = "NOP",
    /// Discard TOS
    PopTop = "POP_TOP",
    /// Swap TOS and TOS1
    RotTwo = "ROT_TWO",
    /// Lift TOS1 and TOS2 up one, move TOS down to position three
    RotThree = "ROT_THREE",
    /// Same as `RotThree` with four items
    RotFour = "ROT_FOUR",
    /// Duplicate TOS
    DupTop = "DUP_TOP",
    /// Duplicate TOS1 and TOS
    DupTopTwo = "DUP_TOP_TWO",

    // Unary operators
    /// `+TOS`
    UnaryPositive = "UNARY_POSITIVE",
    /// `-TOS`
    UnaryNegative = "UNARY_NEGATIVE",
    /// `not TOS`
    UnaryNot = "UNARY_NOT",
    /// `~TOS`
    UnaryInvert = "UNARY_INVERT",

    // Binary operators
    /// `TOS1 + TOS`
    BinaryAdd = "BINARY_ADD",
    /// `TOS1 - TOS`
    BinarySubtract = "BINARY_SUBTRACT",
    /// `TOS1 * TOS`
    BinaryMultiply = "BINARY_MULTIPLY",
    /// `TOS1 / TOS`
    BinaryTrueDivide = "BINARY_TRUE_DIVIDE",
    /// `TOS1 // TOS`
    BinaryFloorDivide = "BINARY_FLOOR_DIVIDE",
    /// `TOS1 % TOS`
    BinaryModulo = "BINARY_MODULO",
    /// `TOS1 ** TOS`
    BinaryPower = "BINARY_POWER",
    /// `TOS1 << TOS`
    BinaryLshift = "BINARY_LSHIFT",
    /// `TOS1 >> TOS`
    BinaryRshift = "BINARY_RSHIFT",
    /// `TOS1 & TOS`
    BinaryAnd = "BINARY_AND",
    /// `TOS1 | TOS`
    BinaryOr = "BINARY_OR",
    /// `TOS1 ^ TOS`
    BinaryXor = "BINARY_XOR",

    // In-place operators
    /// `TOS1 += TOS`
    InplaceAdd = "INPLACE_ADD",
    /// `TOS1 -= TOS`
    InplaceSubtract = "INPLACE_SUBTRACT",
    /// `TOS1 *= TOS`
    InplaceMultiply = "INPLACE_MULTIPLY",
    /// `TOS1 /= TOS`
    InplaceTrueDivide = "INPLACE_TRUE_DIVIDE",
    /// `TOS1 //= TOS`
    InplaceFloorDivide = "INPLACE_FLOOR_DIVIDE",
    /// `TOS1 %= TOS`
    InplaceModulo = "INPLACE_MODULO",
    /// `TOS1 **= TOS`
    InplacePower = "INPLACE_POWER",
    /// `TOS1 <<= TOS`
    InplaceLshift = "INPLACE_LSHIFT",
    /// `TOS1 >>= TOS`
    InplaceRshift = "INPLACE_RSHIFT",
    /// `TOS1 &= TOS`
    InplaceAnd = "INPLACE_AND",
    /// `TOS1 |= TOS`
    InplaceOr = "INPLACE_OR",
    /// `TOS1 ^= TOS`
    InplaceXor = "INPLACE_XOR",

    // Subscripts
    /// `TOS1[TOS]`
    BinarySubscr = "BINARY_SUBSCR",
    /// `TOS1[TOS] = TOS2`
    StoreSubscr = "STORE_SUBSCR",
    /// `del TOS1[TOS]`
    DeleteSubscr = "DELETE_SUBSCR",

    // Iteration and generators
    /// `iter(TOS)`
    GetIter = "GET_ITER",
    /// Like `GetIter`, but leaves generators and coroutines alone
    GetYieldFromIter = "GET_YIELD_FROM_ITER",
    /// Return TOS to the caller
    ReturnValue = "RETURN_VALUE",
    /// Suspend the generator, yielding TOS
    YieldValue = "YIELD_VALUE",
    /// Delegate to the sub-iterator at TOS1, sending TOS
    YieldFrom = "YIELD_FROM",
    /// Replace TOS with its awaitable iterator
    GetAwaitable = "GET_AWAITABLE",
    /// `TOS.__aiter__()`
    GetAiter = "GET_AITER",
    /// Push `TOS.__anext__()`
    GetAnext = "GET_ANEXT",
    /// Terminate an `async for` loop on `StopAsyncIteration`
    EndAsyncFor = "END_ASYNC_FOR",

    // Blocks and exceptions
    /// Pop the innermost block
    PopBlock = "POP_BLOCK",
    /// Pop an except-handler block and the exception it handles
    PopExcept = "POP_EXCEPT",
    /// Re-raise the exception at TOS
    Reraise = "RERAISE",
    /// Call the `__exit__` at TOS1 with the exception at TOS
    WithExceptStart = "WITH_EXCEPT_START",
    /// Resolve `__aenter__`/`__aexit__` of the context manager at TOS
    BeforeAsyncWith = "BEFORE_ASYNC_WITH",
    /// Push the builtin `AssertionError`
    LoadAssertionError = "LOAD_ASSERTION_ERROR",

    // Misc
    /// Convert the list at TOS into a tuple
    ListToTuple = "LIST_TO_TUPLE",
    /// `from TOS import *`
    ImportStar = "IMPORT_STAR",

    // ------------------------------------------------------------------
    // Everything below takes an operand.
    // ------------------------------------------------------------------

    // Loads and stores
    /// Push `constants[arg]`
    LoadConst = "LOAD_CONST",
    /// Push the value of `names[arg]` (locals, then globals, then builtins)
    LoadName = "LOAD_NAME",
    /// Bind `names[arg]` in the frame's name bag
    StoreName = "STORE_NAME",
    /// Unbind `names[arg]` from the frame's name bag
    DeleteName = "DELETE_NAME",
    /// Push global (or builtin) `names[arg]`
    LoadGlobal = "LOAD_GLOBAL",
    /// Bind global `names[arg]`
    StoreGlobal = "STORE_GLOBAL",
    /// Unbind global `names[arg]`
    DeleteGlobal = "DELETE_GLOBAL",
    /// Push local slot `arg`
    LoadFast = "LOAD_FAST",
    /// Store into local slot `arg`
    StoreFast = "STORE_FAST",
    /// Clear local slot `arg`
    DeleteFast = "DELETE_FAST",
    /// Push free variable `names[arg]` from the enclosing environments
    LoadDeref = "LOAD_DEREF",
    /// Store free variable `names[arg]` in its enclosing environment
    StoreDeref = "STORE_DEREF",
    /// Unbind free variable `names[arg]`
    DeleteDeref = "DELETE_DEREF",
    /// `TOS.names[arg]`
    LoadAttr = "LOAD_ATTR",
    /// `TOS.names[arg] = TOS1`
    StoreAttr = "STORE_ATTR",
    /// `del TOS.names[arg]`
    DeleteAttr = "DELETE_ATTR",

    // Comparison
    /// Compare TOS1 with TOS using the `CompareOp` sub-code `arg`
    CompareOp = "COMPARE_OP",

    // Builders
    /// Tuple of the top `arg` items
    BuildTuple = "BUILD_TUPLE",
    /// List of the top `arg` items
    BuildList = "BUILD_LIST",
    /// Set of the top `arg` items
    BuildSet = "BUILD_SET",
    /// Dict of the top `arg` key/value pairs
    BuildMap = "BUILD_MAP",
    /// Slice of the top 2 or 3 items
    BuildSlice = "BUILD_SLICE",
    /// Concatenate the top `arg` strings
    BuildString = "BUILD_STRING",
    /// Format TOS (flags: conversion in the low bits, 4 = spec present)
    FormatValue = "FORMAT_VALUE",
    /// Append TOS to the list at `stack[-arg]`
    ListAppend = "LIST_APPEND",
    /// Add TOS to the set at `stack[-arg]`
    SetAdd = "SET_ADD",
    /// Insert TOS1: TOS into the dict at `stack[-arg]`
    MapAdd = "MAP_ADD",
    /// Extend the list at `stack[-arg]` with the iterable at TOS
    ListExtend = "LIST_EXTEND",
    /// Update the set at `stack[-arg]` with the iterable at TOS
    SetUpdate = "SET_UPDATE",
    /// Update the dict at `stack[-arg]` with the mapping at TOS
    DictUpdate = "DICT_UPDATE",
    /// Like `DictUpdate`, but duplicate keys are an error
    DictMerge = "DICT_MERGE",
    /// Unpack TOS into exactly `arg` items
    UnpackSequence = "UNPACK_SEQUENCE",
    /// Unpack TOS with a starred target (`before | after << 8`)
    UnpackEx = "UNPACK_EX",

    // Jumps
    /// Jump to `arg`
    JumpAbsolute = "JUMP_ABSOLUTE",
    /// Pop TOS; jump to `arg` if it is falsy
    PopJumpIfFalse = "POP_JUMP_IF_FALSE",
    /// Pop TOS; jump to `arg` if it is truthy
    PopJumpIfTrue = "POP_JUMP_IF_TRUE",
    /// Jump to `arg` keeping TOS if falsy, else pop it
    JumpIfFalseOrPop = "JUMP_IF_FALSE_OR_POP",
    /// Jump to `arg` keeping TOS if truthy, else pop it
    JumpIfTrueOrPop = "JUMP_IF_TRUE_OR_POP",
    /// Pop TOS and TOS1; jump to `arg` if the exception does not match
    JumpIfNotExcMatch = "JUMP_IF_NOT_EXC_MATCH",
    /// Push the next item of the iterator at TOS, or pop it and jump to `arg`
    ForIter = "FOR_ITER",

    // Block setup
    /// Push a handler block targeting `arg`
    SetupFinally = "SETUP_FINALLY",
    /// Enter the context manager at TOS; its handler block targets `arg`
    SetupWith = "SETUP_WITH",
    /// Push the handler block of an `async with` targeting `arg`
    SetupAsyncWith = "SETUP_ASYNC_WITH",

    // Calls and definitions
    /// Call with `arg` positional arguments
    CallFunction = "CALL_FUNCTION",
    /// Call with `arg` arguments; TOS is a tuple of keyword names
    CallFunctionKw = "CALL_FUNCTION_KW",
    /// Call with an argument tuple (and a kwargs dict if `arg & 1`)
    CallFunctionEx = "CALL_FUNCTION_EX",
    /// Build a function from the code object and qualified name at TOS
    MakeFunction = "MAKE_FUNCTION",
    /// Build a class from a body function, a name and `arg` bases
    BuildClass = "BUILD_CLASS",
    /// Raise (0: re-raise, 1: TOS, 2: TOS1 from TOS)
    RaiseVarargs = "RAISE_VARARGS",

    // Imports
    /// Import module `names[arg]` (TOS1 is the level, TOS the fromlist)
    ImportName = "IMPORT_NAME",
    /// Push attribute `names[arg]` of the module at TOS
    ImportFrom = "IMPORT_FROM",
}

/// `MakeFunction` flag: a tuple of positional defaults is on the stack.
pub const MAKE_FUNCTION_DEFAULTS: u32 = 0x01;
/// `MakeFunction` flag: a dict of keyword-only defaults is on the stack.
pub const MAKE_FUNCTION_KWDEFAULTS: u32 = 0x02;

/// `FormatValue` conversion values (low two bits).
pub const FORMAT_CONVERSION_MASK: u32 = 0x03;
/// `FormatValue`: `!s`
pub const FORMAT_STR: u32 = 0x01;
/// `FormatValue`: `!r`
pub const FORMAT_REPR: u32 = 0x02;
/// `FormatValue`: `!a`
pub const FORMAT_ASCII: u32 = 0x03;
/// `FormatValue`: a format spec is on the stack above the value.
pub const FORMAT_WITH_SPEC: u32 = 0x04;

impl OpCode {
    /// Decodes an opcode word.
    pub fn from_word(word: u32) -> Option<OpCode> {
        Self::ALL.get(word as usize).copied()
    }

    /// Returns true if this opcode is followed by an operand word.
    ///
    /// This is the single predicate used to step through bytecode.
    pub fn has_operand(self) -> bool {
        self as u8 >= OpCode::LoadConst as u8
    }

    /// Returns true if the operand is a jump target.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            OpCode::JumpAbsolute
                | OpCode::PopJumpIfFalse
                | OpCode::PopJumpIfTrue
                | OpCode::JumpIfFalseOrPop
                | OpCode::JumpIfTrueOrPop
                | OpCode::JumpIfNotExcMatch
                | OpCode::ForIter
                | OpCode::SetupFinally
                | OpCode::SetupWith
                | OpCode::SetupAsyncWith
        )
    }

    /// Returns true if execution never falls through to the next
    /// instruction.
    pub fn is_unconditional_exit(self) -> bool {
        matches!(
            self,
            OpCode::JumpAbsolute
                | OpCode::ReturnValue
                | OpCode::RaiseVarargs
                | OpCode::Reraise
        )
    }

    /// Returns true if this instruction ends a basic block: it returns,
    /// raises, or transfers control.
    pub fn ends_block(self) -> bool {
        self.is_unconditional_exit()
            || matches!(
                self,
                OpCode::PopJumpIfFalse
                    | OpCode::PopJumpIfTrue
                    | OpCode::JumpIfFalseOrPop
                    | OpCode::JumpIfTrueOrPop
                    | OpCode::JumpIfNotExcMatch
                    | OpCode::ForIter
            )
    }

    /// Returns true if the operand indexes the name table.
    pub fn uses_name(self) -> bool {
        matches!(
            self,
            OpCode::LoadName
                | OpCode::StoreName
                | OpCode::DeleteName
                | OpCode::LoadGlobal
                | OpCode::StoreGlobal
                | OpCode::DeleteGlobal
                | OpCode::LoadDeref
                | OpCode::StoreDeref
                | OpCode::DeleteDeref
                | OpCode::LoadAttr
                | OpCode::StoreAttr
                | OpCode::DeleteAttr
                | OpCode::ImportName
                | OpCode::ImportFrom
        )
    }

    /// Returns true if this opcode is a binary or in-place arithmetic
    /// operator.
    pub fn is_binary_operator(self) -> bool {
        (OpCode::BinaryAdd as u8..=OpCode::InplaceXor as u8).contains(&(self as u8))
    }

    /// Net stack effect of the instruction.
    ///
    /// `jump` selects the effect when the branch is taken, for opcodes whose
    /// effect differs between the two paths.
    pub fn stack_effect(self, arg: u32, jump: bool) -> i32 {
        let arg = arg as i32;
        match self {
            OpCode::Nop | OpCode::RotTwo | OpCode::RotThree | OpCode::RotFour => 0,
            OpCode::PopTop => -1,
            OpCode::DupTop => 1,
            OpCode::DupTopTwo => 2,
            OpCode::UnaryPositive | OpCode::UnaryNegative | OpCode::UnaryNot | OpCode::UnaryInvert => 0,
            op if op.is_binary_operator() => -1,
            OpCode::BinarySubscr => -1,
            OpCode::StoreSubscr => -3,
            OpCode::DeleteSubscr => -2,
            OpCode::GetIter | OpCode::GetYieldFromIter => 0,
            OpCode::ReturnValue => -1,
            OpCode::YieldValue => 0,
            OpCode::YieldFrom => -1,
            OpCode::GetAwaitable | OpCode::GetAiter => 0,
            OpCode::GetAnext => 1,
            OpCode::EndAsyncFor => -2,
            OpCode::PopBlock => 0,
            OpCode::PopExcept => 0,
            OpCode::Reraise => -1,
            OpCode::WithExceptStart => 1,
            OpCode::BeforeAsyncWith => 1,
            OpCode::LoadAssertionError => 1,
            OpCode::ListToTuple => 0,
            OpCode::ImportStar => -1,
            OpCode::LoadConst | OpCode::LoadName | OpCode::LoadGlobal | OpCode::LoadFast | OpCode::LoadDeref => 1,
            OpCode::StoreName | OpCode::StoreGlobal | OpCode::StoreFast | OpCode::StoreDeref => -1,
            OpCode::DeleteName | OpCode::DeleteGlobal | OpCode::DeleteFast | OpCode::DeleteDeref => 0,
            OpCode::LoadAttr => 0,
            OpCode::StoreAttr => -2,
            OpCode::DeleteAttr => -1,
            OpCode::CompareOp => -1,
            OpCode::BuildTuple | OpCode::BuildList | OpCode::BuildSet | OpCode::BuildString => 1 - arg,
            OpCode::BuildMap => 1 - 2 * arg,
            OpCode::BuildSlice => 1 - arg,
            OpCode::FormatValue => {
                if arg as u32 & FORMAT_WITH_SPEC != 0 {
                    -1
                } else {
                    0
                }
            }
            OpCode::ListAppend | OpCode::SetAdd => -1,
            OpCode::MapAdd => -2,
            OpCode::ListExtend | OpCode::SetUpdate | OpCode::DictUpdate | OpCode::DictMerge => -1,
            OpCode::UnpackSequence => arg - 1,
            OpCode::UnpackEx => (arg & 0xff) + (arg >> 8),
            OpCode::JumpAbsolute => 0,
            OpCode::PopJumpIfFalse | OpCode::PopJumpIfTrue => -1,
            OpCode::JumpIfFalseOrPop | OpCode::JumpIfTrueOrPop => {
                if jump {
                    0
                } else {
                    -1
                }
            }
            OpCode::JumpIfNotExcMatch => -2,
            OpCode::ForIter => {
                if jump {
                    -1
                } else {
                    1
                }
            }
            // The handler starts with the exception pushed.
            OpCode::SetupFinally => {
                if jump {
                    1
                } else {
                    0
                }
            }
            // Pops the manager, pushes `__exit__` and the `__enter__` result;
            // the handler sees `__exit__` and the exception.
            OpCode::SetupWith => 1,
            OpCode::SetupAsyncWith => 0,
            OpCode::CallFunction => -arg,
            OpCode::CallFunctionKw => -arg - 1,
            OpCode::CallFunctionEx => -1 - (arg & 1),
            OpCode::MakeFunction => {
                -1 - (arg & MAKE_FUNCTION_DEFAULTS as i32)
                    - ((arg & MAKE_FUNCTION_KWDEFAULTS as i32) >> 1)
            }
            OpCode::BuildClass => -1 - arg,
            OpCode::RaiseVarargs => -arg,
            OpCode::ImportName => -1,
            OpCode::ImportFrom => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sub-codes of `COMPARE_OP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CompareOp {
    /// `==`
    Eq = 0,
    /// `!=`
    Ne = 1,
    /// `<`
    Lt = 2,
    /// `<=`
    Le = 3,
    /// `>`
    Gt = 4,
    /// `>=`
    Ge = 5,
    /// `in`
    In = 6,
    /// `not in`
    NotIn = 7,
    /// `is`
    Is = 8,
    /// `is not`
    IsNot = 9,
}

impl CompareOp {
    /// Decodes a `COMPARE_OP` operand.
    pub fn from_arg(arg: u32) -> Option<CompareOp> {
        let op = match arg {
            0 => CompareOp::Eq,
            1 => CompareOp::Ne,
            2 => CompareOp::Lt,
            3 => CompareOp::Le,
            4 => CompareOp::Gt,
            5 => CompareOp::Ge,
            6 => CompareOp::In,
            7 => CompareOp::NotIn,
            8 => CompareOp::Is,
            9 => CompareOp::IsNot,
            _ => return None,
        };
        Some(op)
    }

    /// The operator's source spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
            CompareOp::Is => "is",
            CompareOp::IsNot => "is not",
        }
    }
}

impl From<CompareOperator> for CompareOp {
    fn from(op: CompareOperator) -> Self {
        match op {
            CompareOperator::Eq => CompareOp::Eq,
            CompareOperator::NotEq => CompareOp::Ne,
            CompareOperator::Lt => CompareOp::Lt,
            CompareOperator::LtE => CompareOp::Le,
            CompareOperator::Gt => CompareOp::Gt,
            CompareOperator::GtE => CompareOp::Ge,
            CompareOperator::In => CompareOp::In,
            CompareOperator::NotIn => CompareOp::NotIn,
            CompareOperator::Is => CompareOp::Is,
            CompareOperator::IsNot => CompareOp::IsNot,
        }
    }
}

/// A decoded instruction: its word offset, opcode and operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    /// Word index of the opcode
    pub offset: usize,
    /// The operation code
    pub opcode: OpCode,
    /// Operand word, if the opcode takes one
    pub arg: Option<u32>,
}

impl Instruction {
    /// Index of the instruction that follows this one.
    pub fn next_offset(&self) -> usize {
        self.offset + if self.arg.is_some() { 2 } else { 1 }
    }
}

/// Error produced when a bytecode array cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A word does not name an opcode
    #[error("unknown opcode {word} at offset {offset}")]
    UnknownOpcode {
        /// The bad word
        word: u32,
        /// Where it was found
        offset: usize,
    },
    /// An operand-taking opcode is the last word
    #[error("missing operand for {opcode} at offset {offset}")]
    MissingOperand {
        /// The opcode
        opcode: OpCode,
        /// Where it was found
        offset: usize,
    },
    /// A jump operand points outside the bytecode or into an operand word
    #[error("jump target {target} at offset {offset} is not an instruction")]
    BadJumpTarget {
        /// The operand
        target: u32,
        /// Offset of the jump
        offset: usize,
    },
}

/// Decodes the instruction starting at `offset`.
pub fn decode_at(bytecode: &[u32], offset: usize) -> Result<Instruction, DecodeError> {
    let word = bytecode[offset];
    let opcode = OpCode::from_word(word).ok_or(DecodeError::UnknownOpcode { word, offset })?;
    let arg = if opcode.has_operand() {
        Some(
            *bytecode
                .get(offset + 1)
                .ok_or(DecodeError::MissingOperand { opcode, offset })?,
        )
    } else {
        None
    };
    Ok(Instruction { offset, opcode, arg })
}

/// Iterates over the instructions of a bytecode array.
pub fn instructions(bytecode: &[u32]) -> Instructions<'_> {
    Instructions { bytecode, offset: 0 }
}

/// Iterator returned by [`instructions`].
pub struct Instructions<'a> {
    bytecode: &'a [u32],
    offset: usize,
}

impl Iterator for Instructions<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytecode.len() {
            return None;
        }
        let result = decode_at(self.bytecode, self.offset);
        match &result {
            Ok(instr) => self.offset = instr.next_offset(),
            Err(_) => self.offset = self.bytecode.len(),
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_word_roundtrip() {
        for (i, op) in OpCode::ALL.iter().enumerate() {
            assert_eq!(*op as usize, i);
            assert_eq!(OpCode::from_word(i as u32), Some(*op));
        }
        assert_eq!(OpCode::from_word(OpCode::ALL.len() as u32), None);
    }

    #[test]
    fn test_operand_predicate() {
        assert!(!OpCode::PopTop.has_operand());
        assert!(!OpCode::ReturnValue.has_operand());
        assert!(!OpCode::ImportStar.has_operand());
        assert!(OpCode::LoadConst.has_operand());
        assert!(OpCode::ForIter.has_operand());
        assert!(OpCode::ImportFrom.has_operand());
        for op in OpCode::ALL {
            if op.is_jump() || op.uses_name() {
                assert!(op.has_operand(), "{} should take an operand", op);
            }
        }
    }

    #[test]
    fn test_compare_sub_codes() {
        assert_eq!(CompareOp::Eq as u32, 0);
        assert_eq!(CompareOp::Ge as u32, 5);
        assert_eq!(CompareOp::NotIn as u32, 7);
        assert_eq!(CompareOp::IsNot as u32, 9);
        assert_eq!(CompareOp::from_arg(6), Some(CompareOp::In));
        assert_eq!(CompareOp::from_arg(10), None);
    }

    #[test]
    fn test_decode_instructions() {
        let code = [
            OpCode::LoadConst as u32,
            0,
            OpCode::ReturnValue as u32,
        ];
        let decoded: Vec<_> = instructions(&code).collect::<Result<_, _>>().unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].arg, Some(0));
        assert_eq!(decoded[1].offset, 2);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode_at(&[999], 0),
            Err(DecodeError::UnknownOpcode { word: 999, .. })
        ));
        assert!(matches!(
            decode_at(&[OpCode::LoadConst as u32], 0),
            Err(DecodeError::MissingOperand { .. })
        ));
    }
}
