use super::{Asm, load};
use crate::bytecode::Opcode;
use crate::error::ScriptError;
use crate::scope::Scope;
use crate::script::{LoopPolicy, ScriptEnv};
use crate::val::Val;

#[tokio::test]
async fn test_if_jumps_on_false() {
    for (cond, expected) in [(Opcode::TypeTrue, 1.0), (Opcode::TypeFalse, 2.0)] {
        let mut asm = Asm::new();
        asm.func("ontest")
            .op(cond)
            .num(Opcode::If, 4.0)
            .num(Opcode::TypeNumber, 1.0)
            .op(Opcode::Ret)
            .num(Opcode::TypeNumber, 2.0)
            .op(Opcode::Ret);
        let env = ScriptEnv::new();
        let out = load(&env, &asm)
            .execute("ontest", Vec::new())
            .await
            .expect("execute");
        assert_eq!(out, Val::Num(expected));
    }
}

#[tokio::test]
async fn test_set_index_true_jumps_on_true() {
    let mut asm = Asm::new();
    asm.func("ontest")
        .op(Opcode::TypeTrue)
        .num(Opcode::SetIndexTrue, 4.0)
        .num(Opcode::TypeNumber, 1.0)
        .op(Opcode::Ret)
        .num(Opcode::TypeNumber, 2.0)
        .op(Opcode::Ret);
    let env = ScriptEnv::new();
    let out = load(&env, &asm)
        .execute("ontest", Vec::new())
        .await
        .expect("execute");
    assert_eq!(out, Val::Num(2.0));
}

#[tokio::test]
async fn test_runaway_loop_aborts() {
    let mut asm = Asm::new();
    asm.func("onloop")
        .op(Opcode::CmdCall)
        .num(Opcode::SetIndex, 0.0);
    let env = ScriptEnv::new();
    env.set_loop_policy(LoopPolicy {
        limit: 5,
        exempt_events: Vec::new(),
    });
    let err = load(&env, &asm)
        .execute("onloop", Vec::new())
        .await
        .expect_err("should abort");
    match err {
        ScriptError::LoopLimit { function, .. } => assert_eq!(function, "onloop"),
        other => panic!("unexpected error: {other}"),
    }
}

/// Counted loop over `iterations` passes of the back edge, returning the
/// final counter.
fn counted_loop(event: &str, iterations: f64) -> Asm {
    let mut asm = Asm::new();
    asm.func(event)
        .name(Opcode::TypeVar, "i")
        .num(Opcode::TypeNumber, 0.0)
        .op(Opcode::Assign)
        .op(Opcode::CmdCall) // 3: loop head
        .name(Opcode::TypeVar, "i")
        .op(Opcode::ConvToFloat)
        .num(Opcode::TypeNumber, iterations)
        .op(Opcode::Lt)
        .num(Opcode::If, 12.0) // exit when i >= iterations
        .name(Opcode::TypeVar, "i")
        .op(Opcode::Inc)
        .num(Opcode::SetIndex, 3.0)
        .name(Opcode::TypeVar, "i") // 12
        .op(Opcode::ConvToFloat)
        .op(Opcode::Ret);
    asm
}

#[tokio::test]
async fn test_loop_at_limit_completes() {
    // Five iterations means six passes over the back edge: the first entry
    // plus five repeats, which a limit of 5 still allows.
    let env = ScriptEnv::new();
    env.set_loop_policy(LoopPolicy {
        limit: 5,
        exempt_events: Vec::new(),
    });
    let script = load(&env, &counted_loop("ontest", 5.0));
    let out = script.execute("ontest", Vec::new()).await.expect("execute");
    assert_eq!(out, Val::Num(5.0));

    // Guards reset between dispatches, so a second run is just as fine.
    let out = script.execute("ontest", Vec::new()).await.expect("execute");
    assert_eq!(out, Val::Num(5.0));
}

#[tokio::test]
async fn test_loop_past_limit_errors() {
    let env = ScriptEnv::new();
    env.set_loop_policy(LoopPolicy {
        limit: 5,
        exempt_events: Vec::new(),
    });
    let err = load(&env, &counted_loop("ontest", 7.0))
        .execute("ontest", Vec::new())
        .await
        .expect_err("should abort");
    assert!(matches!(err, ScriptError::LoopLimit { .. }));
}

#[tokio::test]
async fn test_exempt_event_is_never_aborted() {
    let asm = counted_loop("ontimeout", 20.0);
    let env = ScriptEnv::new();
    env.set_loop_policy(LoopPolicy {
        limit: 5,
        exempt_events: vec!["ontimeout".to_string()],
    });
    let out = load(&env, &asm)
        .execute("ontimeout", Vec::new())
        .await
        .expect("execute");
    assert_eq!(out, Val::Num(20.0));
}

#[tokio::test]
async fn test_first_dispatch_runs_prelude() {
    // Top-level code sits before the first function; the trailing jump
    // whose target equals the program length switches to the requested
    // function.
    let mut asm = Asm::new();
    asm.name(Opcode::TypeVar, "ready")
        .num(Opcode::TypeNumber, 1.0)
        .op(Opcode::Assign)
        .num(Opcode::SetIndex, 7.0);
    asm.func("onstart")
        .name(Opcode::TypeVar, "ready")
        .op(Opcode::ConvToFloat)
        .op(Opcode::Ret);
    let env = ScriptEnv::new();
    let script = load(&env, &asm);

    let out = script.execute("onstart", Vec::new()).await.expect("execute");
    assert_eq!(out, Val::Num(1.0));
    assert_eq!(env.globals.get("ready"), Some(Val::Num(1.0)));

    // Later dispatches start straight at the function.
    let out = script.execute("onstart", Vec::new()).await.expect("execute");
    assert_eq!(out, Val::Num(1.0));
}

#[tokio::test]
async fn test_foreach_iterates_in_order() {
    let mut asm = Asm::new();
    asm.func("ontest")
        .name(Opcode::TypeVar, "item")
        .op(Opcode::TypeArray)
        .num(Opcode::TypeNumber, 1.0)
        .num(Opcode::TypeNumber, 2.0)
        .num(Opcode::TypeNumber, 3.0)
        .op(Opcode::ArrayEnd)
        .num(Opcode::TypeNumber, 0.0)
        .num(Opcode::Foreach, 16.0) // 7: loop head
        .name(Opcode::TypeVar, "s")
        .name(Opcode::TypeVar, "s")
        .op(Opcode::ConvToFloat)
        .name(Opcode::TypeVar, "item")
        .op(Opcode::ConvToFloat)
        .op(Opcode::Add)
        .op(Opcode::Assign)
        .num(Opcode::SetIndex, 7.0)
        .name(Opcode::TypeVar, "s") // 16
        .op(Opcode::ConvToFloat)
        .op(Opcode::Ret);
    let env = ScriptEnv::new();
    let out = load(&env, &asm)
        .execute("ontest", Vec::new())
        .await
        .expect("execute");
    assert_eq!(out, Val::Num(6.0));
}

#[tokio::test]
async fn test_with_block_targets_object() {
    let env = ScriptEnv::new();
    let object = Scope::new();
    env.globals.set("o", Val::Object(object.clone()));

    let mut asm = Asm::new();
    asm.func("ontest")
        .name(Opcode::TypeVar, "o")
        .op(Opcode::With)
        .name(Opcode::TypeVar, "x")
        .num(Opcode::TypeNumber, 5.0)
        .op(Opcode::Assign)
        .op(Opcode::WithEnd)
        .op(Opcode::Ret);
    load(&env, &asm)
        .execute("ontest", Vec::new())
        .await
        .expect("execute");
    assert_eq!(object.get("x"), Some(Val::Num(5.0)));
    assert_eq!(env.globals.get("x"), None);
}

#[tokio::test]
async fn test_temp_prefix_keeps_new_name_local() {
    let env = ScriptEnv::new();

    let mut asm = Asm::new();
    asm.func("ontest")
        .op(Opcode::Temp)
        .name(Opcode::TypeVar, "x")
        .num(Opcode::TypeNumber, 9.0)
        .op(Opcode::Assign)
        .name(Opcode::TypeVar, "x")
        .op(Opcode::ConvToFloat)
        .op(Opcode::Ret);
    let out = load(&env, &asm)
        .execute("ontest", Vec::new())
        .await
        .expect("execute");
    assert_eq!(out, Val::Num(9.0));
    assert_eq!(env.globals.get("x"), None);
}

#[tokio::test]
async fn test_assign_writes_existing_slot_in_place() {
    // A name that already resolves is written through its slot even inside
    // a with block or under a pending temp prefix.
    let env = ScriptEnv::new();
    env.globals.set("g", Val::Num(1.0));
    let object = Scope::new();
    env.globals.set("o", Val::Object(object.clone()));

    let mut asm = Asm::new();
    asm.func("ontest")
        .name(Opcode::TypeVar, "o")
        .op(Opcode::With)
        .name(Opcode::TypeVar, "g")
        .num(Opcode::TypeNumber, 5.0)
        .op(Opcode::Assign)
        .op(Opcode::WithEnd)
        .op(Opcode::Temp)
        .name(Opcode::TypeVar, "g")
        .num(Opcode::TypeNumber, 7.0)
        .op(Opcode::Assign)
        .op(Opcode::Ret);
    load(&env, &asm)
        .execute("ontest", Vec::new())
        .await
        .expect("execute");
    assert_eq!(env.globals.get("g"), Some(Val::Num(7.0)));
    assert!(!object.contains("g"));
}
