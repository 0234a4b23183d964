//! Invariants that must hold for every program the compiler accepts,
//! checked over a corpus of representative sources.

use std::sync::Arc;

use protopy_engine::compiler::blocks::{basic_blocks, jump_targets};
use protopy_engine::compiler::bytecode::instructions;
use protopy_engine::compiler::{compile_module_checked, CodeFlags, CodeObject, OpCode};
use protopy_engine::parser::Parser;
use protopy_engine::{Engine, Value};

const CORPUS: &[&str] = &[
    "1 + 2 * 3\n",
    "def f(x):\n  return x + 1\nresult = f(41)\n",
    "for i in range(3):\n  pass\n",
    "for i in range(10):\n  if i % 2:\n    continue\n  if i > 6:\n    break\nelse:\n  done = True\n",
    "while n:\n  try:\n    step()\n  except (KeyError, IndexError) as e:\n    break\n  else:\n    n -= 1\n  finally:\n    log()\n",
    "def outer():\n  n = 0\n  def inner():\n    nonlocal n\n    n += 1\n    return n\n  return inner\n",
    "def scope(a, *rest, key=1, **extra):\n  total = a + key\n  return [total * r for r in rest if r]\n",
    "def dynamic():\n  x = 1\n  return locals()\n",
    "def gen(n):\n  for i in range(n):\n    received = yield i\n  yield from other()\n  return n\n",
    "async def co(x):\n  async with lock:\n    async for item in stream(x):\n      await handle(item)\n  return await x\n",
    "class A(Base):\n  attr = 1\n  def method(self):\n    return super().method()\n  @property\n  def prop(self):\n    return self.attr\n",
    "with open_a() as a, open_b() as b:\n  a.write(b.read())\n",
    "x = {k: [v for v in range(k)] for k in range(3)}\ny = {i for i in x}\nz = (i * 2 for i in y)\n",
    "a, *b, c = items\n(p, q), r = pairs\nvalue = p if q else r\nflag = a and b or not c\n",
    "try:\n  risky()\nexcept:\n  raise\n",
    "try:\n  first()\nfinally:\n  second()\n",
    "def deco(f):\n  return f\n@deco\ndef g(*args, **kwargs):\n  return f'{args!r:>10} {kwargs}'\n",
];

fn compile(source: &str) -> Arc<CodeObject> {
    let module = Parser::new(source).parse_module().unwrap_or_else(|e| panic!("{}: {}", source, e));
    compile_module_checked(&module, "<corpus>").unwrap_or_else(|e| panic!("{}: {}", source, e))
}

/// The code object and every code object nested in it.
fn all_code(code: &Arc<CodeObject>) -> Vec<Arc<CodeObject>> {
    let mut out = vec![code.clone()];
    for nested in code.nested() {
        out.extend(all_code(nested));
    }
    out
}

fn opcodes(code: &CodeObject) -> Vec<OpCode> {
    instructions(&code.bytecode).map(|i| i.unwrap().opcode).collect()
}

#[test]
fn test_expression_round_trip() {
    let code = compile("1 + 2 * 3\n");
    assert_eq!(
        opcodes(&code),
        vec![
            OpCode::LoadConst,
            OpCode::LoadConst,
            OpCode::LoadConst,
            OpCode::BinaryMultiply,
            OpCode::BinaryAdd,
            OpCode::ReturnValue,
        ]
    );
    let mut engine = Engine::default();
    assert!(matches!(engine.run_code(code).unwrap(), Value::Int(7)));
}

#[test]
fn test_compilation_is_idempotent() {
    for source in CORPUS {
        let first = all_code(&compile(source));
        let second = all_code(&compile(source));
        assert_eq!(first.len(), second.len(), "{}", source);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.bytecode, b.bytecode, "{}", source);
            assert_eq!(a.names, b.names, "{}", source);
            assert_eq!(a.varnames, b.varnames, "{}", source);
            assert_eq!(a.flags, b.flags, "{}", source);
        }
    }

    let mut engine = Engine::default();
    let source = "def f(n):\n  return sum(i * i for i in range(n))\nf(10)\n";
    let first = engine.run_code(compile(source)).unwrap();
    let second = engine.run_code(compile(source)).unwrap();
    assert!(matches!((first, second), (Value::Int(285), Value::Int(285))));
}

#[test]
fn test_jump_targets_start_blocks() {
    for source in CORPUS {
        for code in all_code(&compile(source)) {
            let blocks = basic_blocks(&code.bytecode).unwrap();
            let targets = jump_targets(&code.bytecode).unwrap();
            for target in &targets {
                assert!(
                    blocks.iter().any(|(start, _)| start == target),
                    "{} in {}: target {} is not a block start",
                    code.name,
                    source,
                    target
                );
            }
            assert_eq!(blocks.first().map(|b| b.0), Some(0));
            assert_eq!(blocks.last().map(|b| b.1), Some(code.bytecode.len() - 1));
            assert_eq!(basic_blocks(&code.bytecode).unwrap(), blocks, "analysis must be pure");
        }
    }
}

#[test]
fn test_blocks_tile_the_bytecode() {
    for source in CORPUS {
        for code in all_code(&compile(source)) {
            let blocks = basic_blocks(&code.bytecode).unwrap();
            for pair in blocks.windows(2) {
                assert_eq!(pair[0].1 + 1, pair[1].0, "{} in {}", code.name, source);
            }
        }
    }
}

#[test]
fn test_captured_names_never_get_slots() {
    for source in CORPUS {
        for code in all_code(&compile(source)) {
            let slots = &code.varnames[..code.nslots as usize];
            for captured in &code.cellvars {
                assert!(!slots.contains(captured), "{}: {} has a slot in {}", source, captured, code.name);
            }
        }
    }
}

#[test]
fn test_plain_functions_use_slots() {
    for source in CORPUS {
        for code in all_code(&compile(source)) {
            if code.name == "<module>" || code.flags.contains(CodeFlags::CLASS_BODY) {
                continue;
            }
            let dynamic = code.names.iter().any(|n| n == "locals" || n == "exec" || n == "eval");
            if code.cellvars.is_empty() && !dynamic {
                assert!(code.uses_slots(), "{} in {} should use slots", code.name, source);
                assert_eq!(code.nslots as usize, code.varnames.len(), "{}", code.name);
            } else {
                assert!(!code.uses_slots(), "{} in {} should use names", code.name, source);
            }
        }
    }
}

#[test]
fn test_function_scenario() {
    let code = compile("def f(x):\n  return x + 1\nresult = f(41)\n");
    let f = code.nested().find(|c| c.name == "f").unwrap().clone();
    assert_eq!(f.argcount, 1);

    let mut engine = Engine::default();
    engine.run_code(code).unwrap();
    assert!(matches!(engine.globals().get("result"), Some(Value::Int(42))));
}

#[test]
fn test_for_loop_scenario() {
    let code = compile("count = 0\nfor i in range(3):\n  count += 1\n");
    let ops = opcodes(&code);
    let get_iter = ops.iter().position(|op| *op == OpCode::GetIter).unwrap();
    assert_eq!(ops[get_iter + 1], OpCode::ForIter);
    assert!(ops[get_iter..].contains(&OpCode::JumpAbsolute));

    let mut engine = Engine::default();
    engine.run_code(code).unwrap();
    assert!(matches!(engine.globals().get("count"), Some(Value::Int(3))));
    assert!(matches!(engine.globals().get("i"), Some(Value::Int(2))));
}

#[test]
fn test_handler_restores_stack_depth() {
    let source = r#"
def collect():
    results = []
    for i in range(50):
        try:
            results.append([i, (i, {"k": 1 // (i % 2)})])
        except ZeroDivisionError:
            results.append(None)
    return len(results), results[1][1][0]
collect()
"#;
    let mut engine = Engine::default();
    match engine.eval(source).unwrap() {
        Value::Object(obj) => {
            let text = engine.repr(&Value::Object(obj)).unwrap();
            assert_eq!(text, "(50, 1)");
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_and_or_short_circuit() {
    let source = "hits = []\ndef t(x):\n  hits.append(x)\n  return x\nr = t(0) and t(1)\ns = t(2) or t(3)\n";
    let mut engine = Engine::default();
    engine.eval(source).unwrap();
    let hits = engine.globals().get("hits").unwrap();
    assert_eq!(engine.repr(&hits).unwrap(), "[0, 2]");
}
