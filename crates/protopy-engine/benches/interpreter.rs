use criterion::{black_box, criterion_group, criterion_main, Criterion};
use protopy_engine::{Engine, EngineConfig};

const WORKLOADS: &[(&str, &str)] = &[
    (
        "fib",
        "def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n - 2)\nfib(18)\n",
    ),
    (
        "loops",
        "total = 0\nfor i in range(20000):\n    if i % 3 == 0:\n        total += i\n    else:\n        total -= 1\ntotal\n",
    ),
    (
        "comprehensions",
        "data = [i * i for i in range(2000)]\nindex = {i: v for i, v in enumerate(data) if v % 2}\nsum(x for x in index.values())\n",
    ),
    (
        "generators",
        "def gen(n):\n    for i in range(n):\n        yield i\ndef chain(n):\n    yield from gen(n)\n    yield from gen(n)\nsum(chain(5000))\n",
    ),
    (
        "classes",
        "class Point:\n    def __init__(self, x, y):\n        self.x = x\n        self.y = y\n    def __add__(self, other):\n        return Point(self.x + other.x, self.y + other.y)\np = Point(0, 0)\nfor i in range(2000):\n    p = p + Point(i, 1)\np.x\n",
    ),
    (
        "exceptions",
        "caught = 0\nfor i in range(2000):\n    try:\n        if i % 2:\n            raise ValueError(i)\n    except ValueError:\n        caught += 1\ncaught\n",
    ),
];

fn bench_compile(c: &mut Criterion) {
    let engine = Engine::new(EngineConfig::default());
    for (label, source) in WORKLOADS {
        c.bench_function(&format!("compile_{label}"), |b| {
            b.iter(|| black_box(engine.compile(black_box(source), "<bench>").expect("compile")))
        });
    }
}

fn bench_execute(c: &mut Criterion) {
    for (label, source) in WORKLOADS {
        let mut engine = Engine::new(EngineConfig::default());
        let code = engine.compile(source, "<bench>").expect("compile");
        c.bench_function(&format!("execute_{label}"), |b| {
            b.iter(|| black_box(engine.run_code(code.clone()).expect("run")))
        });
    }
}

criterion_group!(benches, bench_compile, bench_execute);
criterion_main!(benches);
