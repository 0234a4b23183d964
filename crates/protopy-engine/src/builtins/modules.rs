//! Native modules: `sys`, `math`, `time`, `asyncio` and `_thread`.
//!
//! Each is built on first import and cached in the module table like a
//! source module, so later imports (and forked threads) see the same
//! object.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam::channel;
use tracing::{debug, warn};

use super::{check_arity, check_method_arity, math, receiver, take_keywords, MethodTable};
use crate::runtime::sync::{ThreadHandle, ThreadOutcome, UserLock};
use crate::runtime::{Args, GeneratorKind, Namespace, NativeFn, ObjRef, ObjectKind, Value};
use crate::vm::{GenStep, Resume, Vm, VmError, VmResult};

/// Names `load` resolves without touching the file system.
pub const NATIVE_MODULES: &[&str] = &["sys", "math", "time", "asyncio", "_thread"];

/// The native module `name`, building and caching it on first use.
pub fn load(vm: &mut Vm, name: &str) -> Option<Value> {
    if !NATIVE_MODULES.contains(&name) {
        return None;
    }
    if let Some(module) = vm.modules.get(name) {
        return Some(module);
    }
    let names = match name {
        "sys" => sys_namespace(vm),
        "math" => math::namespace(vm),
        "time" => functions(vm, "time", TIME_FUNCTIONS),
        "asyncio" => functions(vm, "asyncio", ASYNCIO_FUNCTIONS),
        _ => functions(vm, "_thread", THREAD_FUNCTIONS),
    };
    debug!(module = name, "native module");
    let module = vm.new_module(name, names, None);
    vm.modules.set(name, module.clone());
    Some(module)
}

fn functions(vm: &Vm, name: &str, table: &[(&'static str, NativeFn)]) -> Namespace {
    let names = Namespace::new();
    names.set("__name__", Value::from(name));
    for (func_name, func) in table {
        names.set(*func_name, vm.new_native(*func_name, *func));
    }
    names
}

// ============================================================================
// sys
// ============================================================================

fn sys_namespace(vm: &Vm) -> Namespace {
    let names = functions(vm, "sys", &[("getrecursionlimit", sys_getrecursionlimit)]);
    let config = vm.config();
    let argv = config.argv.iter().map(|arg| Value::from(arg.as_str())).collect();
    let path = config
        .search_paths
        .iter()
        .map(|dir| Value::from(dir.display().to_string()))
        .collect();
    names.set("argv", vm.new_list(argv));
    names.set("path", vm.new_list(path));
    names.set("version", Value::from(concat!("protopy ", env!("CARGO_PKG_VERSION"))));
    names.set("platform", Value::from(std::env::consts::OS));
    names.set("maxsize", Value::Int(i64::MAX));
    names
}

/// `sys.getrecursionlimit()`
pub fn sys_getrecursionlimit(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "getrecursionlimit", 0, 0)?;
    Ok(Value::Int(vm.config().recursion_limit as i64))
}

// ============================================================================
// time
// ============================================================================

const TIME_FUNCTIONS: &[(&str, NativeFn)] = &[
    ("time", time_time),
    ("monotonic", time_monotonic),
    ("perf_counter", time_monotonic),
    ("sleep", time_sleep),
];

/// A non-negative duration in seconds.
fn seconds_arg(vm: &mut Vm, value: &Value, func: &str) -> VmResult<Duration> {
    let seconds = match value.as_f64() {
        Some(seconds) => seconds,
        None => {
            let type_name = vm.type_name(value);
            return Err(vm.type_error(format!(
                "'{}' object cannot be interpreted as an integer or float",
                type_name
            )));
        }
    };
    if seconds.is_nan() || seconds < 0.0 {
        return Err(vm.value_error(format!("{}: sleep length must be non-negative", func)));
    }
    Ok(Duration::from_secs_f64(seconds))
}

/// `time.time()`: seconds since the Unix epoch.
pub fn time_time(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "time", 0, 0)?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Float(now))
}

/// `time.monotonic()` and `time.perf_counter()`: seconds since the first
/// call in this process.
pub fn time_monotonic(vm: &mut Vm, args: Args) -> VmResult<Value> {
    static START: OnceLock<Instant> = OnceLock::new();
    check_arity(vm, &args, "monotonic", 0, 0)?;
    let start = START.get_or_init(Instant::now);
    Ok(Value::Float(start.elapsed().as_secs_f64()))
}

/// `time.sleep(seconds)`: blocks the calling thread.
pub fn time_sleep(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "sleep", 1, 1)?;
    let duration = seconds_arg(vm, &args.positional[0], "sleep")?;
    std::thread::sleep(duration);
    Ok(Value::None)
}

// ============================================================================
// asyncio
// ============================================================================

const ASYNCIO_FUNCTIONS: &[(&str, NativeFn)] = &[
    ("run", asyncio_run),
    ("sleep", asyncio_sleep),
    ("gather", asyncio_gather),
    ("iscoroutine", asyncio_iscoroutine),
];

fn coroutine_ref(value: &Value) -> Option<ObjRef> {
    match value {
        Value::Object(obj) => match &obj.read().kind {
            ObjectKind::Generator(generator) if generator.kind == GeneratorKind::Coroutine => Some(obj.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Drives `coro` until it returns. Suspensions (from `asyncio.sleep`) are
/// resumed immediately: the sleep already happened on this thread.
fn drive(vm: &mut Vm, coro: &ObjRef) -> VmResult<Value> {
    let mut resume = Resume::Send(Value::None);
    loop {
        match vm.resume_generator(coro, resume)? {
            GenStep::Yielded(_) => resume = Resume::Send(Value::None),
            GenStep::Returned(value) => return Ok(value),
        }
    }
}

/// `asyncio.run(coro)`: runs a coroutine to completion and returns its
/// result.
pub fn asyncio_run(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "run", 1, 1)?;
    match coroutine_ref(&args.positional[0]) {
        Some(coro) => drive(vm, &coro),
        None => {
            let repr = vm.repr(&args.positional[0])?;
            Err(vm.value_error(format!("a coroutine was expected, got {}", repr)))
        }
    }
}

/// `asyncio.sleep(seconds, result=None)`: blocks for the duration, then
/// returns an awaitable that suspends once and produces `result`.
pub fn asyncio_sleep(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let result = take_keywords(vm, &mut args, "sleep", &["result"])?.pop().flatten();
    check_arity(vm, &args, "sleep", 1, 2)?;
    let duration = seconds_arg(vm, &args.positional[0], "sleep")?;
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
    let result = result.or_else(|| args.positional.get(1).cloned()).unwrap_or(Value::None);
    Ok(vm.new_awaitable(true, result))
}

/// `asyncio.gather(*aws)`: runs each awaitable to completion in order and
/// returns an awaitable of the list of results.
pub fn asyncio_gather(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    take_keywords(vm, &mut args, "gather", &["return_exceptions"])?;
    let mut results = Vec::with_capacity(args.positional.len());
    for awaitable in &args.positional {
        let result = match coroutine_ref(awaitable) {
            Some(coro) => drive(vm, &coro)?,
            None => {
                let iter = vm.get_awaitable(awaitable)?;
                loop {
                    match vm.step(&iter, Value::None)? {
                        GenStep::Yielded(_) => continue,
                        GenStep::Returned(value) => break value,
                    }
                }
            }
        };
        results.push(result);
    }
    let list = vm.new_list(results);
    Ok(vm.new_awaitable(false, list))
}

/// `asyncio.iscoroutine(obj)`
pub fn asyncio_iscoroutine(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "iscoroutine", 1, 1)?;
    Ok(Value::Bool(coroutine_ref(&args.positional[0]).is_some()))
}

// ============================================================================
// _thread
// ============================================================================

const THREAD_FUNCTIONS: &[(&str, NativeFn)] = &[
    ("start", thread_start),
    ("start_new_thread", thread_start_new_thread),
    ("allocate_lock", allocate_lock),
    ("get_ident", thread_get_ident),
];

/// Runs `func(*args)` on a new OS thread with a forked interpreter and
/// returns its handle.
fn spawn(vm: &mut Vm, func: Value, call_args: Vec<Value>) -> VmResult<Value> {
    let (sender, receiver) = channel::bounded::<ThreadOutcome>(1);
    let mut forked = vm.fork();
    let spawned = std::thread::Builder::new()
        .name("protopy-thread".into())
        .spawn(move || {
            let outcome = match forked.call(&func, Args::new(call_args)) {
                Ok(value) => Ok(value),
                Err(VmError::Exception(exc)) => Err(exc),
                Err(VmError::Internal(message)) => Err(forked.new_exception(
                    super::ExceptionKind::RuntimeError,
                    format!("internal error: {}", message),
                )),
            };
            if let Err(exc) = &outcome {
                let description = forked.describe_exception(exc);
                warn!(error = %description, "unhandled exception in thread");
            }
            let _ = sender.send(outcome);
        });
    if let Err(err) = spawned {
        return Err(vm.runtime_error(format!("can't start new thread: {}", err)));
    }
    let class = vm.types().thread.clone();
    Ok(vm.alloc(ObjectKind::Thread(ThreadHandle::new(receiver)), &class))
}

/// `_thread.start(func, *args)`: returns a handle whose `join()` yields the
/// result or re-raises.
pub fn thread_start(vm: &mut Vm, args: Args) -> VmResult<Value> {
    super::no_keywords(vm, &args, "start")?;
    let mut positional = args.positional.into_iter();
    let func = match positional.next() {
        Some(func) => func,
        None => return Err(vm.type_error("start expected at least 1 argument, got 0")),
    };
    spawn(vm, func, positional.collect())
}

/// `_thread.start_new_thread(func, args)`
pub fn thread_start_new_thread(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "start_new_thread", 2, 2)?;
    let call_args = vm.collect(&args.positional[1])?;
    spawn(vm, args.positional[0].clone(), call_args)
}

/// `_thread.get_ident()`
pub fn thread_get_ident(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "get_ident", 0, 0)?;
    let id = format!("{:?}", std::thread::current().id());
    let digits: String = id.chars().filter(char::is_ascii_digit).collect();
    Ok(Value::Int(digits.parse().unwrap_or(0)))
}

/// Methods of thread handles.
pub const THREAD_METHODS: MethodTable = &[("join", thread_join), ("is_alive", thread_is_alive)];

fn thread_ref(vm: &mut Vm, args: &Args, method: &str) -> VmResult<ObjRef> {
    let this = receiver(vm, args, method)?;
    if let Value::Object(obj) = &this {
        if matches!(obj.read().kind, ObjectKind::Thread(_)) {
            return Ok(obj.clone());
        }
    }
    Err(super::wrong_receiver(vm, method, "thread", &this))
}

/// `handle.join()`: waits for the thread, returning its result or raising
/// its exception. Joining again repeats the outcome.
pub fn thread_join(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "join", 0, 0)?;
    let handle = thread_ref(vm, &args, "join")?;
    let (cached, receiver) = match &handle.read().kind {
        ObjectKind::Thread(thread) => (thread.outcome.clone(), thread.receiver.clone()),
        _ => return Err(VmError::internal("thread payload changed type")),
    };
    let outcome = match cached {
        Some(outcome) => outcome,
        None => {
            let outcome = receiver
                .recv()
                .map_err(|_| vm.runtime_error("thread exited without a result"))?;
            if let ObjectKind::Thread(thread) = &mut handle.write().kind {
                thread.outcome = Some(outcome.clone());
            }
            outcome
        }
    };
    outcome.map_err(VmError::Exception)
}

/// `handle.is_alive()`
pub fn thread_is_alive(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "is_alive", 0, 0)?;
    let handle = thread_ref(vm, &args, "is_alive")?;
    let alive = match &handle.read().kind {
        ObjectKind::Thread(thread) => thread.outcome.is_none() && thread.receiver.is_empty(),
        _ => false,
    };
    Ok(Value::Bool(alive))
}

// ============================================================================
// Locks
// ============================================================================

/// `_thread.allocate_lock()`, also what calling the `lock` class does.
pub fn allocate_lock(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_arity(vm, &args, "allocate_lock", 0, 0)?;
    let class = vm.types().lock.clone();
    Ok(vm.alloc(ObjectKind::Lock(Arc::new(UserLock::new())), &class))
}

/// Methods of locks.
pub const LOCK_METHODS: MethodTable = &[
    ("acquire", lock_acquire),
    ("release", lock_release),
    ("locked", lock_locked),
    ("__enter__", lock_enter),
    ("__exit__", lock_exit),
];

fn lock_ref(vm: &mut Vm, args: &Args, method: &str) -> VmResult<Arc<UserLock>> {
    let this = receiver(vm, args, method)?;
    if let Value::Object(obj) = &this {
        if let ObjectKind::Lock(lock) = &obj.read().kind {
            return Ok(Arc::clone(lock));
        }
    }
    Err(super::wrong_receiver(vm, method, "lock", &this))
}

/// `lock.acquire(blocking=True, timeout=-1)`
pub fn lock_acquire(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let mut options = take_keywords(vm, &mut args, "acquire", &["blocking", "timeout"])?.into_iter();
    check_method_arity(vm, &args, "acquire", 0, 2)?;
    let lock = lock_ref(vm, &args, "acquire")?;
    let blocking = match options.next().flatten().or_else(|| args.positional.get(1).cloned()) {
        Some(flag) => vm.truthy(&flag)?,
        None => true,
    };
    let timeout = match options.next().flatten().or_else(|| args.positional.get(2).cloned()) {
        Some(value) => match value.as_f64() {
            Some(t) if t == -1.0 => None,
            Some(t) if t >= 0.0 => {
                if !blocking {
                    return Err(vm.value_error("can't specify a timeout for a non-blocking call"));
                }
                Some(Duration::from_secs_f64(t))
            }
            _ => return Err(vm.value_error("timeout value must be a non-negative number")),
        },
        None => None,
    };
    Ok(Value::Bool(lock.acquire(blocking, timeout)))
}

/// `lock.release()`
pub fn lock_release(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "release", 0, 0)?;
    let lock = lock_ref(vm, &args, "release")?;
    if lock.release() {
        Ok(Value::None)
    } else {
        Err(vm.runtime_error("release unlocked lock"))
    }
}

/// `lock.locked()`
pub fn lock_locked(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "locked", 0, 0)?;
    let lock = lock_ref(vm, &args, "locked")?;
    Ok(Value::Bool(lock.is_locked()))
}

/// `with lock:` entry: acquires, blocking.
pub fn lock_enter(vm: &mut Vm, args: Args) -> VmResult<Value> {
    check_method_arity(vm, &args, "__enter__", 0, 0)?;
    let lock = lock_ref(vm, &args, "__enter__")?;
    Ok(Value::Bool(lock.acquire(true, None)))
}

/// `with lock:` exit: releases and lets any exception propagate.
pub fn lock_exit(vm: &mut Vm, args: Args) -> VmResult<Value> {
    let lock = lock_ref(vm, &args, "__exit__")?;
    if !lock.release() {
        return Err(vm.runtime_error("release unlocked lock"));
    }
    Ok(Value::Bool(false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn run(vm: &mut Vm, source: &str) -> Namespace {
        let code = vm.compile_source(source, "<test>").unwrap();
        let globals = vm.new_globals("__main__");
        vm.run_module_code(code, globals.clone()).unwrap();
        globals
    }

    #[test]
    fn test_native_modules_are_cached() {
        let mut vm = Vm::new(EngineConfig::default());
        let first = load(&mut vm, "math").unwrap();
        let second = load(&mut vm, "math").unwrap();
        assert!(first.is(&second));
        assert!(load(&mut vm, "json").is_none());
    }

    #[test]
    fn test_lock_protocol() {
        let mut vm = Vm::new(EngineConfig::default());
        let lock = allocate_lock(&mut vm, Args::default()).unwrap();
        let acquired = lock_acquire(&mut vm, Args::new(vec![lock.clone()])).unwrap();
        assert!(matches!(acquired, Value::Bool(true)));
        let again = lock_acquire(&mut vm, Args::new(vec![lock.clone(), Value::Bool(false)])).unwrap();
        assert!(matches!(again, Value::Bool(false)));
        lock_release(&mut vm, Args::new(vec![lock.clone()])).unwrap();
        assert!(lock_release(&mut vm, Args::new(vec![lock])).is_err());
    }

    #[test]
    fn test_thread_join_returns_result() {
        let mut vm = Vm::new(EngineConfig::default());
        let globals = run(
            &mut vm,
            "import _thread\ndef work(a, b):\n    return a * b\nh = _thread.start(work, 6, 7)\nr = h.join()\n",
        );
        assert!(matches!(globals.get("r"), Some(Value::Int(42))));
    }

    #[test]
    fn test_asyncio_run_with_sleep() {
        let mut vm = Vm::new(EngineConfig::default());
        let source = "import asyncio\n\
                      async def inner(x):\n    await asyncio.sleep(0)\n    return x + 1\n\
                      async def outer():\n    a = await inner(1)\n    rs = await asyncio.gather(inner(10), inner(20))\n    return [a] + rs\n\
                      r = asyncio.run(outer())\n";
        let globals = run(&mut vm, source);
        let r = globals.get("r").unwrap();
        assert_eq!(vm.repr(&r).unwrap(), "[2, 11, 21]");
    }
}
