//! Tests for the bytecode compiler.

use super::*;
use crate::compiler::blocks::{basic_blocks, jump_targets};
use crate::compiler::bytecode::{instructions, Instruction};
use crate::compiler::code::CodeFlags;
use crate::parser::Parser;

fn compile_source(src: &str) -> Result<Arc<CodeObject>, CompileError> {
    let module = Parser::new(src).parse_module().expect("Should parse");
    let mut compiler = Compiler::new("<test>");
    if compiler.compile_module(&module) {
        Ok(compiler.make_code_object())
    } else {
        Err(compiler.error().cloned().expect("Failure should carry a diagnostic"))
    }
}

fn compile_ok(src: &str) -> Arc<CodeObject> {
    compile_source(src).expect("Compilation should succeed")
}

fn compile_err(src: &str) -> CompileErrorKind {
    compile_source(src).expect_err("Compilation should fail").kind
}

fn ops(code: &CodeObject) -> Vec<OpCode> {
    decoded(code).iter().map(|i| i.opcode).collect()
}

fn decoded(code: &CodeObject) -> Vec<Instruction> {
    instructions(&code.bytecode)
        .collect::<Result<_, _>>()
        .expect("Bytecode should decode")
}

fn nested(code: &CodeObject, name: &str) -> Arc<CodeObject> {
    code.nested()
        .find(|c| c.name == name)
        .cloned()
        .unwrap_or_else(|| panic!("no nested code named {}", name))
}

#[test]
fn test_compile_empty_module() {
    let code = compile_ok("");
    assert_eq!(ops(&code), vec![OpCode::LoadConst, OpCode::ReturnValue]);
    assert!(code.flags.contains(CodeFlags::MODULE));
}

#[test]
fn test_compile_arithmetic_precedence() {
    let code = compile_ok("1 + 2 * 3\n");
    assert_eq!(
        ops(&code),
        vec![
            OpCode::LoadConst,
            OpCode::LoadConst,
            OpCode::LoadConst,
            OpCode::BinaryMultiply,
            OpCode::BinaryAdd,
            OpCode::ReturnValue,
        ]
    );
    assert_eq!(code.stacksize, 3);
}

#[test]
fn test_constants_are_deduplicated_by_type() {
    let code = compile_ok("a = 1\nb = 1\nc = 1.0\nd = True\n");
    let ints = code
        .constants
        .iter()
        .filter(|c| matches!(c, Constant::Int(1)))
        .count();
    assert_eq!(ints, 1);
    assert!(code.constants.iter().any(|c| matches!(c, Constant::Float(_))));
    assert!(code.constants.iter().any(|c| matches!(c, Constant::Bool(true))));
}

#[test]
fn test_names_are_deduplicated() {
    let code = compile_ok("x = 1\nx = x + 1\n");
    assert_eq!(code.names, vec!["x".to_string()]);
}

#[test]
fn test_compile_function_def() {
    let code = compile_ok("def f(x):\n  return x + 1\nresult = f(41)\n");
    let f = nested(&code, "f");
    assert_eq!(f.argcount, 1);
    assert!(f.uses_slots());
    assert_eq!(f.varnames, vec!["x".to_string()]);
    assert_eq!(
        ops(&f),
        vec![OpCode::LoadFast, OpCode::LoadConst, OpCode::BinaryAdd, OpCode::ReturnValue]
    );
    assert!(ops(&code).contains(&OpCode::MakeFunction));
}

#[test]
fn test_implicit_return_none() {
    let code = compile_ok("def f():\n  pass\n");
    let f = nested(&code, "f");
    assert_eq!(ops(&f), vec![OpCode::LoadConst, OpCode::ReturnValue]);
    assert!(matches!(f.constants[0], Constant::None));
}

#[test]
fn test_for_range_pattern() {
    let code = compile_ok("for i in range(3):\n  pass\n");
    let instrs = decoded(&code);
    let get_iter = instrs.iter().position(|i| i.opcode == OpCode::GetIter).expect("GET_ITER");
    let for_iter = &instrs[get_iter + 1];
    assert_eq!(for_iter.opcode, OpCode::ForIter);
    assert_eq!(instrs[get_iter + 2].opcode, OpCode::StoreName);

    let jump = instrs
        .iter()
        .find(|i| i.opcode == OpCode::JumpAbsolute)
        .expect("loop jump");
    assert_eq!(jump.arg, Some(for_iter.offset as u32));

    // Exhaustion jumps past the loop-back jump.
    let exit = for_iter.arg.expect("target") as usize;
    assert_eq!(exit, jump.next_offset());
}

#[test]
fn test_short_circuit_bool_ops() {
    let code = compile_ok("a and b\n");
    assert_eq!(
        ops(&code),
        vec![OpCode::LoadName, OpCode::JumpIfFalseOrPop, OpCode::LoadName, OpCode::ReturnValue]
    );
    let code = compile_ok("a or b or c\n");
    let jumps = ops(&code).iter().filter(|op| **op == OpCode::JumpIfTrueOrPop).count();
    assert_eq!(jumps, 2);
}

#[test]
fn test_compare_sub_codes() {
    let code = compile_ok("a not in b\n");
    let cmp = decoded(&code)
        .into_iter()
        .find(|i| i.opcode == OpCode::CompareOp)
        .expect("COMPARE_OP");
    assert_eq!(cmp.arg, Some(7));
}

#[test]
fn test_chained_comparison() {
    let code = compile_ok("a < b < c\n");
    let ops = ops(&code);
    assert!(ops.contains(&OpCode::RotThree));
    assert_eq!(ops.iter().filter(|op| **op == OpCode::CompareOp).count(), 2);
}

#[test]
fn test_keyword_call() {
    let code = compile_ok("f(1, key=2)\n");
    let instrs = decoded(&code);
    let call = instrs.iter().find(|i| i.opcode == OpCode::CallFunctionKw).expect("CALL_FUNCTION_KW");
    assert_eq!(call.arg, Some(2));
    assert!(code
        .constants
        .iter()
        .any(|c| matches!(c, Constant::Tuple(names) if names.len() == 1)));
}

#[test]
fn test_unpacking_call() {
    let code = compile_ok("f(*args, **kw)\n");
    let ops = ops(&code);
    assert!(ops.contains(&OpCode::ListExtend));
    assert!(ops.contains(&OpCode::ListToTuple));
    assert!(ops.contains(&OpCode::DictMerge));
    assert!(ops.contains(&OpCode::CallFunctionEx));
}

#[test]
fn test_list_comprehension_is_nested_code() {
    let code = compile_ok("[x * 2 for x in y if x]\n");
    let comp = nested(&code, "<listcomp>");
    assert_eq!(comp.argcount, 1);
    assert_eq!(comp.varnames[0], ".0");
    let inner = ops(&comp);
    assert_eq!(inner[0], OpCode::BuildList);
    assert!(inner.contains(&OpCode::ListAppend));
    assert!(inner.contains(&OpCode::PopJumpIfFalse));

    let outer = ops(&code);
    let make = outer.iter().position(|op| *op == OpCode::MakeFunction).expect("MAKE_FUNCTION");
    assert_eq!(
        &outer[make + 1..],
        &[OpCode::LoadName, OpCode::GetIter, OpCode::CallFunction, OpCode::ReturnValue]
    );
}

#[test]
fn test_generator_expression_flags() {
    let code = compile_ok("g = (x for x in y)\n");
    let genexpr = nested(&code, "<genexpr>");
    assert!(genexpr.is_generator());
    assert!(ops(&genexpr).contains(&OpCode::YieldValue));
}

#[test]
fn test_closure_uses_deref() {
    let code = compile_ok("def outer():\n  n = 0\n  def inner():\n    return n\n  return inner\n");
    let outer = nested(&code, "outer");
    assert!(!outer.uses_slots());
    assert_eq!(outer.cellvars, vec!["n".to_string()]);
    assert!(ops(&outer).contains(&OpCode::StoreName));
    let inner = nested(&outer, "inner");
    assert_eq!(ops(&inner)[0], OpCode::LoadDeref);
    assert_eq!(inner.qualname, "outer.<locals>.inner");
}

#[test]
fn test_try_except_layout() {
    let code = compile_ok("try:\n  x = 1\nexcept ValueError as e:\n  pass\n");
    let ops = ops(&code);
    assert_eq!(ops[0], OpCode::SetupFinally);
    assert!(ops.contains(&OpCode::PopBlock));
    assert!(ops.contains(&OpCode::JumpIfNotExcMatch));
    assert!(ops.contains(&OpCode::PopExcept));
    assert!(ops.contains(&OpCode::Reraise));
    assert!(ops.contains(&OpCode::DeleteName));
}

#[test]
fn test_finally_body_is_duplicated() {
    let code = compile_ok("try:\n  a()\nfinally:\n  cleanup()\n");
    let instrs = decoded(&code);
    let cleanup_calls = instrs
        .iter()
        .filter(|i| i.opcode == OpCode::LoadName && code.names[i.arg.unwrap_or(0) as usize] == "cleanup")
        .count();
    assert_eq!(cleanup_calls, 2);
}

#[test]
fn test_return_inside_finally_runs_body() {
    let code = compile_ok("def f():\n  try:\n    return 1\n  finally:\n    g()\n");
    let f = nested(&code, "f");
    let calls = decoded(&f)
        .iter()
        .filter(|i| i.opcode == OpCode::LoadGlobal)
        .count();
    // Once for the return path, once for the normal path, once for the
    // exceptional path.
    assert_eq!(calls, 3);
}

#[test]
fn test_with_statement() {
    let code = compile_ok("with open(p) as f:\n  pass\n");
    let ops = ops(&code);
    assert!(ops.contains(&OpCode::SetupWith));
    assert!(ops.contains(&OpCode::WithExceptStart));
    assert!(ops.contains(&OpCode::CallFunction));
}

#[test]
fn test_yield_from_and_await() {
    let code = compile_ok("def g():\n  yield from h()\nasync def c():\n  await d()\n");
    let g = nested(&code, "g");
    assert!(g.is_generator());
    assert!(ops(&g).contains(&OpCode::GetYieldFromIter));
    let c = nested(&code, "c");
    assert!(c.is_coroutine());
    let c_ops = ops(&c);
    assert!(c_ops.contains(&OpCode::GetAwaitable));
    assert!(c_ops.contains(&OpCode::YieldFrom));
}

#[test]
fn test_class_definition() {
    let code = compile_ok("class A(B):\n  x = 1\n  def m(self):\n    return self.x\n");
    let ops = ops(&code);
    assert!(ops.contains(&OpCode::BuildClass));
    let body = nested(&code, "A");
    assert!(body.flags.contains(CodeFlags::CLASS_BODY));
    let m = nested(&body, "m");
    assert_eq!(m.qualname, "A.m");
}

#[test]
fn test_star_unpacking_target() {
    let code = compile_ok("a, *b, c = xs\n");
    let unpack = decoded(&code)
        .into_iter()
        .find(|i| i.opcode == OpCode::UnpackEx)
        .expect("UNPACK_EX");
    assert_eq!(unpack.arg, Some(1 | (1 << 8)));
}

#[test]
fn test_jump_targets_are_block_starts() {
    let sources = [
        "for i in range(3):\n  if i:\n    continue\n  break\nelse:\n  pass\n",
        "while x:\n  try:\n    y()\n  except E:\n    break\n  finally:\n    z()\n",
        "a = [i for i in b if i if i > 2]\n",
        "with a as b, c as d:\n  pass\n",
    ];
    for src in sources {
        let code = compile_ok(src);
        let blocks = basic_blocks(&code.bytecode).expect("blocks");
        for target in jump_targets(&code.bytecode).expect("targets") {
            assert!(blocks.iter().any(|(start, _)| *start == target), "{}", src);
        }
        assert_eq!(basic_blocks(&code.bytecode).expect("blocks"), blocks);
    }
}

#[test]
fn test_idempotent_compilation() {
    let src = "def f(a, b=2):\n  return [a * i for i in range(b)]\nx = f(3)\n";
    let first = compile_ok(src);
    let second = compile_ok(src);
    assert_eq!(first.bytecode, second.bytecode);
    assert_eq!(first.names, second.names);
}

#[test]
fn test_compile_errors() {
    assert_eq!(compile_err("break\n"), CompileErrorKind::BreakOutsideLoop);
    assert_eq!(compile_err("continue\n"), CompileErrorKind::ContinueOutsideLoop);
    assert_eq!(compile_err("return 1\n"), CompileErrorKind::ReturnOutsideFunction);
    assert_eq!(compile_err("class A:\n  return 1\n"), CompileErrorKind::ReturnOutsideFunction);
    assert_eq!(
        compile_err("def f():\n  nonlocal x\n"),
        CompileErrorKind::NonlocalNotFound("x".into())
    );
}

#[test]
fn test_error_is_cleared_on_success() {
    let bad = Parser::new("break\n").parse_module().expect("Should parse");
    let good = Parser::new("1\n").parse_module().expect("Should parse");
    let mut compiler = Compiler::new("<test>");
    assert!(!compiler.compile_module(&bad));
    assert!(compiler.error().is_some());
    let mut compiler = Compiler::new("<test>");
    assert!(compiler.compile_module(&good));
    assert!(compiler.error().is_none());
}

#[test]
fn test_compile_expression_mode() {
    let expr = Parser::new("x + 1").parse_expression_source().expect("Should parse");
    let mut compiler = Compiler::new("<eval>");
    assert!(compiler.compile_expression(&expr));
    let code = compiler.make_code_object();
    assert_eq!(
        ops(&code),
        vec![OpCode::LoadName, OpCode::LoadConst, OpCode::BinaryAdd, OpCode::ReturnValue]
    );
}

#[test]
fn test_line_table() {
    let code = compile_ok("a = 1\n\nb = 2\n");
    assert_eq!(code.line_for(0), 1);
    let store_b = decoded(&code)
        .into_iter()
        .filter(|i| i.opcode == OpCode::StoreName)
        .nth(1)
        .expect("second store");
    assert_eq!(code.line_for(store_b.offset), 3);
}
