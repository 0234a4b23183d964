//! Generators, coroutines and the async driver, exercised end to end.

use protopy_engine::runtime::{GeneratorState, ObjRef, ObjectKind};
use protopy_engine::vm::{GenStep, Resume};
use protopy_engine::{Engine, Value};

fn run(source: &str) -> String {
    let mut engine = Engine::default();
    let out = engine.capture_output();
    if let Err(err) = engine.eval(source) {
        panic!("{}\n--- source ---\n{}", err, source);
    }
    let text = out.lock().clone();
    text
}

fn generator(engine: &mut Engine, call: &str) -> ObjRef {
    match engine.eval_expression(call).unwrap() {
        Value::Object(obj) if matches!(obj.read().kind, ObjectKind::Generator(_)) => obj,
        other => panic!("{} did not produce a generator: {:?}", call, other),
    }
}

fn state(obj: &ObjRef) -> GeneratorState {
    match &obj.read().kind {
        ObjectKind::Generator(generator) => generator.state,
        _ => unreachable!(),
    }
}

fn int(value: &Value) -> i64 {
    match value {
        Value::Int(n) => *n,
        other => panic!("expected an int, got {:?}", other),
    }
}

#[test]
fn test_resume_drives_state_machine() {
    let mut engine = Engine::default();
    engine.eval("def count(n):\n    for i in range(n):\n        yield i\n    return 'done'\n").unwrap();
    let g = generator(&mut engine, "count(2)");
    assert_eq!(state(&g), GeneratorState::Created);

    let vm = engine.vm();
    let first = vm.resume_generator(&g, Resume::Send(Value::None)).unwrap();
    assert!(matches!(first, GenStep::Yielded(Value::Int(0))));
    assert_eq!(state(&g), GeneratorState::Suspended);
    assert!(matches!(vm.resume_generator(&g, Resume::Send(Value::None)).unwrap(), GenStep::Yielded(Value::Int(1))));
    match vm.resume_generator(&g, Resume::Send(Value::None)).unwrap() {
        GenStep::Returned(Value::Str(s)) => assert_eq!(&*s, "done"),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(state(&g), GeneratorState::Completed);
}

#[test]
fn test_generators_are_deterministic() {
    let mut engine = Engine::default();
    engine.eval("def squares(n):\n    for i in range(n):\n        yield i * i\n").unwrap();
    let mut runs = Vec::new();
    for _ in 0..3 {
        let g = generator(&mut engine, "squares(5)");
        let mut values = Vec::new();
        while let GenStep::Yielded(value) = engine.vm().resume_generator(&g, Resume::Send(Value::None)).unwrap() {
            values.push(int(&value));
        }
        runs.push(values);
    }
    assert_eq!(runs[0], vec![0, 1, 4, 9, 16]);
    assert!(runs.iter().all(|run| run == &runs[0]));
}

#[test]
fn test_exhausted_generator_has_no_side_effects() {
    let source = r#"
log = []
def gen():
    log.append("start")
    yield 1
    log.append("end")
g = gen()
print(list(g), list(g), next(g, "exhausted"), log)
"#;
    assert_eq!(run(source), "[1] [] exhausted ['start', 'end']\n");
}

#[test]
fn test_send_and_return_value() {
    let source = r#"
def accumulate():
    total = 0
    while True:
        value = yield total
        if value is None:
            return total
        total += value
g = accumulate()
next(g)
g.send(10)
print(g.send(5))
try:
    g.send(None)
except StopIteration as stop:
    print("returned", stop.value)
"#;
    assert_eq!(run(source), "15\nreturned 15\n");
}

#[test]
fn test_throw_and_close_run_finally() {
    let source = r#"
log = []
def worker():
    try:
        while True:
            try:
                yield "ready"
            except ValueError as exc:
                log.append(f"handled {exc}")
    finally:
        log.append("cleanup")
g = worker()
next(g)
print(g.throw(ValueError("bad")))
g.close()
g.close()
print(log)
"#;
    assert_eq!(run(source), "ready\n['handled bad', 'cleanup']\n");
}

#[test]
fn test_yield_from_delegates() {
    let source = r#"
def inner():
    received = yield "inner-1"
    yield f"inner got {received}"
    return "inner-result"
def outer():
    result = yield from inner()
    yield result
    yield from [1, 2]
g = outer()
print(next(g))
print(g.send("x"))
print(list(g))
"#;
    assert_eq!(run(source), "inner-1\ninner got x\n['inner-result', 1, 2]\n");
}

#[test]
fn test_generator_expressions_are_lazy() {
    let source = r#"
seen = []
def source():
    for i in range(100):
        seen.append(i)
        yield i
evens = (x for x in source() if x % 2 == 0)
print(next(evens), next(evens), seen)
"#;
    assert_eq!(run(source), "0 2 [0, 1, 2]\n");
}

#[test]
fn test_coroutines() {
    let source = r#"
import asyncio
async def double(x):
    await asyncio.sleep(0)
    return x * 2
async def main():
    first = await double(4)
    rest = await asyncio.gather(double(1), double(2))
    return [first] + rest
print(asyncio.run(main()))
"#;
    assert_eq!(run(source), "[8, 2, 4]\n");
}

#[test]
fn test_async_iteration_and_context() {
    let source = r#"
import asyncio
class Ticker:
    def __init__(self, n):
        self.n = n
    def __aiter__(self):
        return self
    async def __anext__(self):
        if self.n == 0:
            raise StopAsyncIteration
        self.n -= 1
        return self.n
class Session:
    async def __aenter__(self):
        print("open")
        return self
    async def __aexit__(self, kind, value, tb):
        print("close")
        return False
async def main():
    out = []
    async with Session():
        async for tick in Ticker(3):
            out.append(tick)
    return out
print(asyncio.run(main()))
"#;
    assert_eq!(run(source), "open\nclose\n[2, 1, 0]\n");
}

#[test]
fn test_iterator_protocol_methods() {
    let source = r#"
g = (y for y in [1, 2])
print(g.__iter__() is g, g.__next__(), next(g))
try:
    g.__next__()
except StopIteration:
    print("done")
it = iter([7])
print(it.__iter__() is it, it.__next__())
"#;
    assert_eq!(run(source), "True 1 2\ndone\nTrue 7\n");
}

#[test]
fn test_running_generator_cannot_reenter() {
    let source = r#"
def selfish():
    yield next(me)
me = selfish()
try:
    next(me)
except ValueError as exc:
    print(exc)
"#;
    assert_eq!(run(source), "generator already executing\n");
}
