//! Basic-block analysis over compiled bytecode.
//!
//! Pure functions: nothing here refers back to the compiler. A block starts
//! at offset 0, at every jump target and after every instruction that
//! transfers control; it ends at a control transfer or just before the next
//! block start.

use std::collections::BTreeSet;

use super::bytecode::{decode_at, instructions, DecodeError, Instruction};

/// An inclusive `(start, end)` word range. `end` is the offset of the last
/// word of the block's final instruction (its operand when it has one).
pub type BlockRange = (usize, usize);

fn decode_all(bytecode: &[u32]) -> Result<Vec<Instruction>, DecodeError> {
    instructions(bytecode).collect()
}

/// Collects every jump target, checking that each lands on an instruction.
pub fn jump_targets(bytecode: &[u32]) -> Result<BTreeSet<usize>, DecodeError> {
    let decoded = decode_all(bytecode)?;
    let starts: BTreeSet<usize> = decoded.iter().map(|i| i.offset).collect();
    let mut targets = BTreeSet::new();
    for instr in &decoded {
        if !instr.opcode.is_jump() {
            continue;
        }
        let target = instr.arg.unwrap_or_default();
        if !starts.contains(&(target as usize)) {
            return Err(DecodeError::BadJumpTarget {
                target,
                offset: instr.offset,
            });
        }
        targets.insert(target as usize);
    }
    Ok(targets)
}

/// Splits `bytecode` into basic blocks, in offset order.
pub fn basic_blocks(bytecode: &[u32]) -> Result<Vec<BlockRange>, DecodeError> {
    let decoded = decode_all(bytecode)?;
    let targets = jump_targets(bytecode)?;

    let mut blocks = Vec::new();
    let mut start: Option<usize> = None;
    for instr in &decoded {
        if targets.contains(&instr.offset) {
            if let Some(open) = start.take() {
                blocks.push((open, instr.offset - 1));
            }
        }
        let open = *start.get_or_insert(instr.offset);
        if instr.opcode.ends_block() {
            blocks.push((open, instr.next_offset() - 1));
            start = None;
        }
    }
    if let Some(open) = start {
        blocks.push((open, bytecode.len() - 1));
    }
    Ok(blocks)
}

/// Computes the maximum operand stack depth reachable in `bytecode`.
///
/// Walks every path from offset 0, following both edges of conditional
/// jumps and the handler edge of block setups. Each offset is visited at
/// the deepest depth seen so far.
pub fn max_stack_depth(bytecode: &[u32]) -> Result<u32, DecodeError> {
    if bytecode.is_empty() {
        return Ok(0);
    }
    let mut depth_at: Vec<Option<i32>> = vec![None; bytecode.len()];
    let mut worklist = vec![(0usize, 0i32)];
    let mut max_depth = 0i32;

    while let Some((offset, depth)) = worklist.pop() {
        if offset >= bytecode.len() {
            continue;
        }
        match depth_at[offset] {
            Some(seen) if seen >= depth => continue,
            _ => depth_at[offset] = Some(depth),
        }
        let instr = decode_at(bytecode, offset)?;
        let arg = instr.arg.unwrap_or_default();

        if instr.opcode.is_jump() {
            let taken = depth + instr.opcode.stack_effect(arg, true);
            max_depth = max_depth.max(taken);
            worklist.push((arg as usize, taken));
        }
        if !instr.opcode.is_unconditional_exit() {
            let next = depth + instr.opcode.stack_effect(arg, false);
            max_depth = max_depth.max(next);
            worklist.push((instr.next_offset(), next));
        }
    }
    Ok(max_depth.max(0) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::OpCode;

    fn op(op: OpCode) -> u32 {
        op as u32
    }

    #[test]
    fn test_straight_line_is_one_block() {
        let code = [
            op(OpCode::LoadConst),
            0,
            op(OpCode::LoadConst),
            1,
            op(OpCode::BinaryAdd),
            op(OpCode::ReturnValue),
        ];
        assert_eq!(basic_blocks(&code).unwrap(), vec![(0, 5)]);
        assert_eq!(max_stack_depth(&code).unwrap(), 2);
    }

    #[test]
    fn test_loop_blocks() {
        // 0 LOAD_NAME 0; 2 GET_ITER; 3 FOR_ITER 10; 5 STORE_NAME 1;
        // 7 JUMP_ABSOLUTE 3; 9 NOP; 10 LOAD_CONST 0; 12 RETURN_VALUE
        let code = [
            op(OpCode::LoadName),
            0,
            op(OpCode::GetIter),
            op(OpCode::ForIter),
            10,
            op(OpCode::StoreName),
            1,
            op(OpCode::JumpAbsolute),
            3,
            op(OpCode::Nop),
            op(OpCode::LoadConst),
            0,
            op(OpCode::ReturnValue),
        ];
        let blocks = basic_blocks(&code).unwrap();
        assert_eq!(blocks, vec![(0, 2), (3, 4), (5, 8), (9, 9), (10, 12)]);
        let targets = jump_targets(&code).unwrap();
        for target in targets {
            assert!(blocks.iter().any(|(start, _)| *start == target));
        }
        assert_eq!(basic_blocks(&code).unwrap(), blocks);
        assert_eq!(max_stack_depth(&code).unwrap(), 2);
    }

    #[test]
    fn test_bad_jump_target() {
        let code = [op(OpCode::JumpAbsolute), 1];
        assert!(matches!(
            basic_blocks(&code),
            Err(DecodeError::BadJumpTarget { target: 1, offset: 0 })
        ));
    }

    #[test]
    fn test_handler_edge_depth() {
        // SETUP_FINALLY 6; body; POP_BLOCK; handler at 6 sees the exception
        let code = [
            op(OpCode::SetupFinally),
            6,
            op(OpCode::LoadConst),
            0,
            op(OpCode::PopTop),
            op(OpCode::PopBlock),
            op(OpCode::PopTop),
            op(OpCode::LoadConst),
            0,
            op(OpCode::ReturnValue),
        ];
        assert_eq!(max_stack_depth(&code).unwrap(), 1);
    }
}
