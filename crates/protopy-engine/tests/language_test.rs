//! End-to-end language tests: source in, printed output out.

use protopy_engine::{Engine, EngineConfig, Error};
use std::fs;
use std::path::PathBuf;

/// Runs `source` and returns everything it printed.
fn run(source: &str) -> String {
    let mut engine = Engine::default();
    let out = engine.capture_output();
    if let Err(err) = engine.eval(source) {
        panic!("{}\n--- source ---\n{}", err, source);
    }
    let text = out.lock().clone();
    text
}

/// Runs `source`, expecting an uncaught error; returns its message.
fn run_err(source: &str) -> String {
    let mut engine = Engine::default();
    engine.capture_output();
    match engine.eval(source) {
        Ok(value) => panic!("expected an error, got {:?}", value),
        Err(err) => err.to_string(),
    }
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("protopy-lang-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_arithmetic() {
    let out = run("print(5 + 3, 10 - 4, 6 * 7, 15 / 3, 17 % 5, 17 // 5, 2 ** 10)\n");
    assert_eq!(out, "8 6 42 5.0 2 3 1024\n");
}

#[test]
fn test_floor_division_and_modulo_signs() {
    let out = run("print(-7 // 2, -7 % 2, 7 // -2, 7 % -2, -7.5 // 2)\n");
    assert_eq!(out, "-4 1 -4 -1 -4.0\n");
}

#[test]
fn test_big_integers() {
    let out = run("x = 2 ** 100\nprint(x)\nprint(x // 2 ** 99, x - x + 1)\nprint(2 ** -1)\n");
    assert_eq!(out, "1267650600228229401496703205376\n2 1\n0.5\n");
}

#[test]
fn test_oversized_integers_raise() {
    let source = r#"
for build in (lambda: 1 << 100000000000, lambda: 7 ** 4000000000):
    try:
        build()
    except OverflowError as exc:
        print(exc)
print(len(str(1 << 1000)))
"#;
    assert_eq!(
        run(source),
        "too many digits in integer\ntoo many digits in integer\n302\n"
    );
}

#[test]
fn test_division_by_zero() {
    assert!(run_err("1 // 0").starts_with("ZeroDivisionError"));
    assert!(run_err("1 % 0").starts_with("ZeroDivisionError"));
}

#[test]
fn test_strings() {
    let source = r#"
s = "Hello, World"
print(s.upper(), s.lower())
print(s[0], s[-1], s[7:], s[::-1])
print(len(s), s.find("World"), "lo" in s)
print("-".join(["a", "b", "c"]), "a,b,,c".split(","))
print(repr("it's"), repr('say "hi"'))
"#;
    let out = run(source);
    assert_eq!(
        out,
        "HELLO, WORLD hello, world\nH d World dlroW ,olleH\n12 7 True\na-b-c ['a', 'b', '', 'c']\n\"it's\" 'say \"hi\"'\n"
    );
}

#[test]
fn test_fstrings() {
    let source = r#"
name = "py"
value = 3.14159
n = 255
print(f"{name!r} {value:.2f} {n:x} {n:>6} {n:<4}|")
print(f"{'nested'} {1 + 2} {{literal}}")
"#;
    assert_eq!(run(source), "'py' 3.14 ff    255 255 |\nnested 3 {literal}\n");
}

#[test]
fn test_short_circuit() {
    let source = r#"
calls = []
def mark(tag, result):
    calls.append(tag)
    return result
x = mark("a", False) and mark("b", True)
y = mark("c", True) or mark("d", True)
z = mark("e", 0) or mark("f", "")
print(x, y, repr(z), calls)
"#;
    assert_eq!(run(source), "False True '' ['a', 'c', 'e', 'f']\n");
}

#[test]
fn test_control_flow() {
    let source = r#"
total = 0
for i in range(10):
    if i == 7:
        break
    if i % 2:
        continue
    total += i
else:
    total = -1
print(total)
n = 0
while n < 3:
    n += 1
else:
    print("done", n)
print("even" if total % 2 == 0 else "odd")
"#;
    assert_eq!(run(source), "12\ndone 3\neven\n");
}

#[test]
fn test_unpacking() {
    let source = r#"
a, b = 1, 2
a, b = b, a
first, *rest = [1, 2, 3, 4]
*init, last = "xyz"
(p, q), r = (1, 2), 3
print(a, b, first, rest, init, last, p + q + r)
"#;
    assert_eq!(run(source), "2 1 1 [2, 3, 4] ['x', 'y'] z 6\n");
}

#[test]
fn test_unpacking_arity_errors() {
    assert!(run_err("a, b = [1, 2, 3]").starts_with("ValueError: too many values to unpack"));
    assert!(run_err("a, b, c = [1, 2]").starts_with("ValueError: not enough values to unpack"));
}

#[test]
fn test_functions_and_arguments() {
    let source = r#"
def describe(a, b=2, *args, c, d=4, **kwargs):
    return (a, b, args, c, d, sorted(kwargs.items()))
print(describe(1, c=3))
print(describe(1, 5, 6, 7, c=8, e=9))
def star(*args, **kwargs):
    return len(args), len(kwargs)
parts = [1, 2, 3]
opts = {"x": 1}
print(star(*parts, 4, **opts, y=2))
"#;
    assert_eq!(
        run(source),
        "(1, 2, (), 3, 4, [])\n(1, 5, (6, 7), 8, 4, [('e', 9)])\n(4, 2)\n"
    );
}

#[test]
fn test_argument_errors() {
    assert!(run_err("def f(a):\n    pass\nf()").starts_with("TypeError"));
    assert!(run_err("def f(a):\n    pass\nf(1, 2)").starts_with("TypeError"));
    assert!(run_err("def f(a):\n    pass\nf(b=1)").starts_with("TypeError"));
}

#[test]
fn test_closures_and_nonlocal() {
    let source = r#"
def counter():
    count = 0
    def step():
        nonlocal count
        count += 1
        return count
    return step
c = counter()
c()
c()
print(c())
adders = [lambda x, i=i: x + i for i in range(3)]
print([f(10) for f in adders])
"#;
    assert_eq!(run(source), "3\n[10, 11, 12]\n");
}

#[test]
fn test_global_statement() {
    let source = r#"
total = 1
def bump():
    global total
    total = total + 41
bump()
print(total)
"#;
    assert_eq!(run(source), "42\n");
}

#[test]
fn test_comprehensions() {
    let source = r#"
print([x * x for x in range(5) if x % 2 == 0])
print({k: v for k, v in zip("abc", range(3))})
print(sorted({n % 3 for n in range(10)}))
print(sum(x for x in range(101)))
print([(i, j) for i in range(3) for j in range(i)])
"#;
    assert_eq!(
        run(source),
        "[0, 4, 16]\n{'a': 0, 'b': 1, 'c': 2}\n[0, 1, 2]\n5050\n[(1, 0), (2, 0), (2, 1)]\n"
    );
}

#[test]
fn test_containers() {
    let source = r#"
items = [3, 1, 2]
items.append(5)
items.sort()
items.insert(0, 0)
print(items, items.pop(), items)
d = {"b": 2}
d["a"] = 1
print(d, d.get("z", "none"), list(d.keys()))
del d["b"]
print(d, "a" in d, len(d))
s = {1, 2, 3}
print(sorted(s | {4}), sorted(s & {2, 3, 9}), sorted(s - {1}))
t = (1, 2) + (3,)
print(t, t.count(2), t.index(3))
"#;
    assert_eq!(
        run(source),
        "[0, 1, 2, 3] 5 [0, 1, 2, 3]\n{'b': 2, 'a': 1} none ['b', 'a']\n{'a': 1} True 1\n[1, 2, 3, 4] [2, 3] [2, 3]\n(1, 2, 3) 1 2\n"
    );
}

#[test]
fn test_missing_key() {
    assert!(run_err("{}['nope']").starts_with("KeyError: 'nope'"));
}

#[test]
fn test_classes_and_inheritance() {
    let source = r#"
class Animal:
    kind = "animal"
    def __init__(self, name):
        self.name = name
    def speak(self):
        return f"{self.name} makes a sound"
    def __repr__(self):
        return f"<{type(self).__name__} {self.name}>"

class Dog(Animal):
    def __init__(self, name, tricks):
        super().__init__(name)
        self.tricks = tricks
    def speak(self):
        return super().speak() + " (woof)"

d = Dog("Rex", ["sit"])
print(d.speak())
print(d, d.kind, isinstance(d, Animal), issubclass(Dog, Animal))
print(Dog.__name__, hasattr(d, "tricks"), getattr(d, "missing", 0))
"#;
    assert_eq!(
        run(source),
        "Rex makes a sound (woof)\n<Dog Rex> animal True True\nDog True 0\n"
    );
}

#[test]
fn test_decorators_and_descriptors() {
    let source = r#"
def twice(fn):
    def wrapper(*args):
        return fn(*args) * 2
    return wrapper

class Circle:
    scale = 10
    def __init__(self, r):
        self._r = r
    @property
    def radius(self):
        return self._r
    @radius.setter
    def radius(self, value):
        self._r = value
    @staticmethod
    def unit():
        return Circle(1)
    @classmethod
    def scaled(cls, r):
        return cls(r * cls.scale)
    @twice
    def diameter(self):
        return self._r

c = Circle.unit()
c.radius = 4
print(c.radius, Circle.scaled(2).radius, c.diameter())
"#;
    assert_eq!(run(source), "4 20 8\n");
}

#[test]
fn test_operator_overloading() {
    let source = r#"
class Vec:
    def __init__(self, x, y):
        self.x, self.y = x, y
    def __add__(self, other):
        return Vec(self.x + other.x, self.y + other.y)
    def __mul__(self, k):
        return Vec(self.x * k, self.y * k)
    def __rmul__(self, k):
        return self * k
    def __eq__(self, other):
        return isinstance(other, Vec) and (self.x, self.y) == (other.x, other.y)
    def __len__(self):
        return 2
    def __getitem__(self, i):
        return (self.x, self.y)[i]
    def __repr__(self):
        return f"Vec({self.x}, {self.y})"

v = Vec(1, 2) + Vec(3, 4)
print(v, 2 * v, v == Vec(4, 6), v != Vec(0, 0), len(v), v[1])
"#;
    assert_eq!(run(source), "Vec(4, 6) Vec(8, 12) True True 2 6\n");
}

#[test]
fn test_exceptions() {
    let source = r#"
log = []
def risky(n):
    try:
        if n == 0:
            raise ValueError("zero")
        return 10 // n
    except ValueError as exc:
        log.append(f"value:{exc}")
        return -1
    finally:
        log.append(f"finally:{n}")

print(risky(2), risky(0))
print(log)
try:
    [][1]
except (KeyError, IndexError) as exc:
    print(type(exc).__name__)
try:
    try:
        {}["k"]
    except KeyError as exc:
        raise RuntimeError("wrapped") from exc
except RuntimeError as exc:
    print(exc, type(exc.__cause__).__name__)
try:
    pass
except Exception:
    print("unreachable")
else:
    print("else ran")
"#;
    assert_eq!(
        run(source),
        "5 -1\n['finally:2', 'value:zero', 'finally:0']\nIndexError\nwrapped KeyError\nelse ran\n"
    );
}

#[test]
fn test_custom_exception_and_bare_except() {
    let source = r#"
class AppError(Exception):
    pass
class NotFound(AppError):
    def __init__(self, what):
        super().__init__(f"{what} not found")
try:
    raise NotFound("page")
except AppError as exc:
    print(exc, exc.args)
try:
    undefined_name
except:
    print("bare except")
"#;
    assert_eq!(run(source), "page not found ('page not found',)\nbare except\n");
}

#[test]
fn test_uncaught_exception_message() {
    let message = run_err("class Boom(Exception):\n    pass\nraise Boom('bad')\n");
    assert_eq!(message, "Boom: bad");
    assert!(run_err("missing").starts_with("NameError: name 'missing' is not defined"));
    assert!(run_err("None.attr").starts_with("AttributeError"));
    assert!(run_err("assert 1 == 2, 'math'").starts_with("AssertionError: math"));
}

#[test]
fn test_with_statement() {
    let source = r#"
class Managed:
    def __init__(self, log):
        self.log = log
    def __enter__(self):
        self.log.append("enter")
        return self
    def __exit__(self, kind, value, tb):
        self.log.append(f"exit:{kind.__name__ if kind else None}")
        return kind is ValueError

log = []
with Managed(log) as m:
    log.append("body")
with Managed(log):
    raise ValueError("swallowed")
try:
    with Managed(log):
        raise KeyError("escapes")
except KeyError:
    log.append("caught")
print(log)
"#;
    assert_eq!(
        run(source),
        "['enter', 'body', 'exit:None', 'enter', 'exit:ValueError', 'enter', 'exit:KeyError', 'caught']\n"
    );
}

#[test]
fn test_builtin_functions() {
    let source = r#"
print(abs(-3), min(3, 1, 2), max([1, 5, 2]), sum([1, 2, 3], 10))
print(sorted(["bb", "a", "ccc"], key=len, reverse=True))
print(list(reversed([1, 2, 3])), list(enumerate("ab", 1)))
print(list(map(str, [1, 2])), list(filter(None, [0, 1, 2])))
print(any([0, 1]), all([]), divmod(17, 5), round(2.5), round(3.5))
print(int("42") + 1, float("1.5"), str(12), bool([]), chr(65), ord("a"))
print(hex(255), bin(5), oct(8), int("ff", 16))
"#;
    assert_eq!(
        run(source),
        "3 1 5 16\n['ccc', 'bb', 'a']\n[3, 2, 1] [(1, 'a'), (2, 'b')]\n['1', '2'] [1, 2]\nTrue True (3, 2) 2 4\n43 1.5 12 False A 97\n0xff 0b101 0o10 255\n"
    );
}

#[test]
fn test_exec_and_eval() {
    let source = r#"
x = 10
print(eval("x * 2"))
exec("y = x + 1")
print(y)
scope = {"a": 5}
exec("b = a * 3", scope)
print(scope["b"], eval("a + b", scope))
"#;
    assert_eq!(run(source), "20\n11\n15 20\n");
}

#[test]
fn test_imports_from_search_path() {
    let dir = scratch_dir("imports");
    fs::write(dir.join("helpers.py"), "print('loading helpers')\ndef greet(name):\n    return 'hi ' + name\n").unwrap();
    fs::create_dir_all(dir.join("pkg")).unwrap();
    fs::write(dir.join("pkg").join("__init__.py"), "VERSION = '1.0'\n").unwrap();
    fs::write(dir.join("pkg").join("tools.py"), "from . import VERSION\ndef version():\n    return VERSION\n").unwrap();

    let mut engine = Engine::new(EngineConfig::default().with_search_path(&dir));
    let out = engine.capture_output();
    engine
        .eval(
            "import helpers\nimport helpers as h2\nfrom helpers import greet\nimport pkg.tools\nfrom pkg.tools import version as v\nprint(greet('bob'), helpers is h2, pkg.tools.version(), v())\n",
        )
        .unwrap();
    assert_eq!(out.lock().as_str(), "loading helpers\nhi bob True 1.0 1.0\n");

    let err = engine.eval("import not_a_module").unwrap_err();
    assert!(err.to_string().starts_with("ModuleNotFoundError"), "{}", err);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_run_module_as_main() {
    let dir = scratch_dir("main");
    fs::write(dir.join("tool.py"), "if __name__ == '__main__':\n    print('tool main')\n").unwrap();
    fs::create_dir_all(dir.join("app")).unwrap();
    fs::write(dir.join("app").join("__init__.py"), "").unwrap();
    fs::write(dir.join("app").join("__main__.py"), "print('app main', __package__)\n").unwrap();

    let mut engine = Engine::new(EngineConfig::default().with_search_path(&dir));
    let out = engine.capture_output();
    engine.run_module("tool").unwrap();
    engine.run_module("app.__main__").unwrap();
    assert_eq!(out.lock().as_str(), "tool main\napp main app\n");
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_native_modules() {
    let source = r#"
import math
import sys
from time import monotonic
print(math.sqrt(16), math.floor(2.7), math.gcd(12, 18), round(math.pi, 3))
print(type(sys.argv).__name__, sys.maxsize > 0, monotonic() >= 0)
"#;
    assert_eq!(run(source), "4.0 2 6 3.142\nlist True True\n");
}

#[test]
fn test_threads_share_heap() {
    let source = r#"
import _thread
results = []
lock = _thread.allocate_lock()
def work(n):
    with lock:
        results.append(n * n)
    return n
handles = [_thread.start(work, i) for i in range(4)]
print(sum(h.join() for h in handles), sorted(results))
"#;
    assert_eq!(run(source), "6 [0, 1, 4, 9]\n");
}

#[test]
fn test_recursion_error_is_catchable_in_threads() {
    let source = r#"
import _thread
def dive(n):
    return dive(n + 1)
def guarded():
    try:
        dive(0)
    except RecursionError as exc:
        return str(exc)
print(guarded())
print(_thread.start(guarded).join())
"#;
    assert_eq!(
        run(source),
        "maximum recursion depth exceeded\nmaximum recursion depth exceeded\n"
    );
}

#[test]
fn test_syntax_errors_are_reported() {
    let mut engine = Engine::default();
    let err = engine.eval("if True\n    pass\n").unwrap_err();
    assert!(matches!(err, Error::Syntax(_)), "{:?}", err);

    let err = engine.eval("break\n").unwrap_err();
    assert!(matches!(err, Error::Compile(_)), "{:?}", err);

    let err = engine.eval("def f():\n  x = 1\n    y = 2\n").unwrap_err();
    assert!(err.to_string().starts_with("SyntaxError"));
}

#[test]
fn test_state_survives_an_exception() {
    let mut engine = Engine::default();
    let out = engine.capture_output();
    engine.eval("items = [1, 2]").unwrap();
    assert!(engine.eval("items.append(3)\nraise ValueError('stop')\n").is_err());
    engine.eval("print(items)").unwrap();
    assert_eq!(out.lock().as_str(), "[1, 2, 3]\n");
}
