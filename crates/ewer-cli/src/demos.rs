//! Built-in demo graphs.
//!
//! Rust has no runtime script import, so the binary ships a small named
//! registry of example scripts; `--script` selects one. They double as
//! living documentation of the graph-construction API.

use std::sync::Arc;

use ewer_core::task::{Arg, CallArgs, Node, Task, TaskFn};
use ewer_core::{TaskError, Value};
use ewer_engine::error::ScriptError;
use ewer_engine::script::ScriptCtx;

/// A compiled-in script.
pub type Demo = fn(&mut ScriptCtx<'_>) -> Result<(), ScriptError>;

/// Looks up a demo by name.
pub fn find(name: &str) -> Option<Demo> {
    match name {
        "primes" => Some(primes),
        "diamond" => Some(diamond),
        "phased" => Some(phased),
        _ => None,
    }
}

/// Names for `--help` and error messages.
pub const NAMES: &[&str] = &["primes", "diamond", "phased"];

fn int(value: &Value) -> Result<i64, TaskError> {
    value.as_int().ok_or_else(|| TaskError::WrongKind {
        context: "positional".to_string(),
        expected: "int",
        actual: value.kind(),
    })
}

fn count_primes_block(args: CallArgs) -> Result<Value, TaskError> {
    let start = args.int(0)?;
    let end = args.int(1)?;
    let mut count = 0i64;
    for n in start.max(2)..end {
        let mut divisor = 2;
        let mut prime = true;
        while divisor * divisor <= n {
            if n % divisor == 0 {
                prime = false;
                break;
            }
            divisor += 1;
        }
        if prime {
            count += 1;
        }
    }
    Ok(Value::Int(count))
}

fn sum_list(args: CallArgs) -> Result<Value, TaskError> {
    let values = args.get(0)?.as_list().unwrap_or(&[]).to_vec();
    let mut total = 0i64;
    for value in &values {
        total += int(value)?;
    }
    Ok(Value::Int(total))
}

/// Counts primes below 2000 in eight parallel blocks, then totals them.
fn primes(ctx: &mut ScriptCtx<'_>) -> Result<(), ScriptError> {
    let mut blocks = Vec::new();
    for i in 0..8i64 {
        blocks.push(ctx.submit(Task::new(
            "demos.primes.count_block",
            Arc::new(count_primes_block) as TaskFn,
            vec![
                Arg::Value(Value::Int(i * 250)),
                Arg::Value(Value::Int((i + 1) * 250)),
            ],
        )?));
    }
    ctx.submit(Task::new(
        "demos.primes.total",
        Arc::new(sum_list) as TaskFn,
        vec![Arg::List(blocks.iter().map(Arg::from).collect())],
    )?);
    Ok(())
}

/// The canonical diamond: one source, two middles, one sink.
fn diamond(ctx: &mut ScriptCtx<'_>) -> Result<(), ScriptError> {
    let source = ctx.submit(Task::new(
        "demos.diamond.source",
        Arc::new(|_: CallArgs| Ok(Value::Int(1))) as TaskFn,
        vec![],
    )?);
    let left = ctx.submit(Task::new(
        "demos.diamond.left",
        Arc::new(|args: CallArgs| Ok(Value::Int(args.int(0)? + 10))) as TaskFn,
        vec![Arg::Task(source.clone())],
    )?);
    let right = ctx.submit(Task::new(
        "demos.diamond.right",
        Arc::new(|args: CallArgs| Ok(Value::Int(args.int(0)? + 20))) as TaskFn,
        vec![Arg::Task(source)],
    )?);
    ctx.submit(Task::new(
        "demos.diamond.sink",
        Arc::new(|args: CallArgs| Ok(Value::Int(args.int(0)? + args.int(1)?))) as TaskFn,
        vec![Arg::Task(left), Arg::Task(right)],
    )?);
    Ok(())
}

/// Barrier-phased construction: the second phase of the graph depends on
/// the first phase's computed value, so the first execute pass stops at
/// the barrier and the script is re-loaded once widths exist.
fn phased(ctx: &mut ScriptCtx<'_>) -> Result<(), ScriptError> {
    let widths = ctx.submit(Task::new(
        "demos.phased.widths",
        Arc::new(|_: CallArgs| {
            Ok(Value::List(vec![
                Value::Int(3),
                Value::Int(5),
                Value::Int(7),
            ]))
        }) as TaskFn,
        vec![],
    )?);

    let widths = ctx.barrier_value(&Node::Task(widths))?;
    for width in widths.as_list().unwrap_or(&[]) {
        ctx.submit(Task::new(
            "demos.phased.area",
            Arc::new(|args: CallArgs| Ok(Value::Int(args.int(0)? * args.int(0)?))) as TaskFn,
            vec![Arg::Value(width.clone())],
        )?);
    }
    Ok(())
}
