//! `print` and `input`.

use super::{str_arg, take_keywords};
use crate::runtime::{Args, ObjectModel, Value};
use crate::vm::{Vm, VmResult};

fn separator(vm: &mut Vm, value: Option<Value>, name: &str, default: &str) -> VmResult<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => {
            let type_name = vm.type_name(&other);
            Err(vm.type_error(format!("{} must be None or a string, not {}", name, type_name)))
        }
    }
}

/// `print(*objects, sep=' ', end='\n', file=None, flush=False)`
///
/// Without `file`, output goes through [`Vm::write_output`]; with one, the
/// line is handed to `file.write`.
pub fn builtin_print(vm: &mut Vm, mut args: Args) -> VmResult<Value> {
    let mut options = take_keywords(vm, &mut args, "print", &["sep", "end", "file", "flush"])?.into_iter();
    let sep = separator(vm, options.next().flatten(), "sep", " ")?;
    let end = separator(vm, options.next().flatten(), "end", "\n")?;
    let file = options.next().flatten().filter(|f| !f.is_none());
    let flush = options.next().flatten();

    let mut line = String::new();
    for (i, value) in args.positional.iter().enumerate() {
        if i > 0 {
            line.push_str(&sep);
        }
        line.push_str(&vm.to_str(value)?);
    }
    line.push_str(&end);

    match file {
        Some(file) => {
            vm.call_method(&file, "write", Args::new(vec![Value::from(line)]))?;
            if let Some(flush) = flush {
                if vm.truthy(&flush)? && vm.has_attr(&file, "flush")? {
                    vm.call_method(&file, "flush", Args::default())?;
                }
            }
        }
        None => vm.write_output(&line)?,
    }
    Ok(Value::None)
}

/// `input(prompt='')`: one line from stdin without its newline.
pub fn builtin_input(vm: &mut Vm, args: Args) -> VmResult<Value> {
    super::check_arity(vm, &args, "input", 0, 1)?;
    if let Some(prompt) = args.positional.first() {
        let prompt = str_arg(vm, prompt, "input")?;
        vm.write_output(&prompt)?;
    }
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) => Err(vm.error(super::ExceptionKind::EOFError, "EOF when reading a line")),
        Ok(_) => {
            let trimmed = line.strip_suffix('\n').unwrap_or(&line);
            let trimmed = trimmed.strip_suffix('\r').unwrap_or(trimmed);
            Ok(Value::from(trimmed))
        }
        Err(err) => Err(vm.runtime_error(format!("input(): {}", err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    #[test]
    fn test_print_separators() {
        let mut vm = Vm::new(EngineConfig::default());
        let buffer = vm.capture_output();
        let args = Args::with_keywords(
            vec![Value::Int(1), Value::from("a"), Value::None],
            vec![("sep".into(), Value::from("-")), ("end".into(), Value::from("!"))],
        );
        builtin_print(&mut vm, args).unwrap();
        builtin_print(&mut vm, Args::default()).unwrap();
        assert_eq!(buffer.lock().as_str(), "1-a-None!\n");
    }

    #[test]
    fn test_print_rejects_bad_sep() {
        let mut vm = Vm::new(EngineConfig::default());
        vm.capture_output();
        let args = Args::with_keywords(vec![Value::Int(1)], vec![("sep".into(), Value::Int(3))]);
        assert!(builtin_print(&mut vm, args).is_err());
    }
}
