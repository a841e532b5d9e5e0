use super::{Asm, load};
use crate::bytecode::Opcode;
use crate::script::ScriptEnv;
use crate::val::Val;

/// Assembles a single `ontest` function from the body and runs it.
async fn eval(body: impl FnOnce(&mut Asm)) -> Val {
    let mut asm = Asm::new();
    asm.func("ontest");
    body(&mut asm);
    asm.op(Opcode::Ret);
    let env = ScriptEnv::new();
    let script = load(&env, &asm);
    script.execute("ontest", Vec::new()).await.expect("execute")
}

#[tokio::test]
async fn test_operand_order() {
    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 10.0)
            .num(Opcode::TypeNumber, 4.0)
            .op(Opcode::Sub);
    })
    .await;
    assert_eq!(out, Val::Num(6.0));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 9.0)
            .num(Opcode::TypeNumber, 2.0)
            .op(Opcode::Div);
    })
    .await;
    assert_eq!(out, Val::Num(4.5));
}

#[tokio::test]
async fn test_mod_and_pow() {
    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 9.0)
            .num(Opcode::TypeNumber, 4.0)
            .op(Opcode::Mod);
    })
    .await;
    assert_eq!(out, Val::Num(1.0));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 2.0)
            .num(Opcode::TypeNumber, 10.0)
            .op(Opcode::Pow);
    })
    .await;
    assert_eq!(out, Val::Num(1024.0));
}

#[tokio::test]
async fn test_comparisons() {
    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 3.0)
            .num(Opcode::TypeNumber, 5.0)
            .op(Opcode::Lt);
    })
    .await;
    assert_eq!(out, Val::Bool(true));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 3.0)
            .num(Opcode::TypeNumber, 3.0)
            .op(Opcode::Gte);
    })
    .await;
    assert_eq!(out, Val::Bool(true));

    let out = eval(|a| {
        a.name(Opcode::TypeString, "abc")
            .name(Opcode::TypeString, "abc")
            .op(Opcode::Eq);
    })
    .await;
    assert_eq!(out, Val::Bool(true));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 1.0)
            .num(Opcode::TypeNumber, 2.0)
            .op(Opcode::Neq);
    })
    .await;
    assert_eq!(out, Val::Bool(true));
}

#[tokio::test]
async fn test_unary_ops() {
    let out = eval(|a| {
        a.op(Opcode::TypeTrue).op(Opcode::Not);
    })
    .await;
    assert_eq!(out, Val::Bool(false));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 4.0).op(Opcode::UnarySub);
    })
    .await;
    assert_eq!(out, Val::Num(-4.0));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, -3.7).op(Opcode::Int);
    })
    .await;
    assert_eq!(out, Val::Num(-3.0));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, -2.5).op(Opcode::Abs);
    })
    .await;
    assert_eq!(out, Val::Num(2.5));
}

#[tokio::test]
async fn test_bitwise() {
    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 6.0)
            .num(Opcode::TypeNumber, 3.0)
            .op(Opcode::Bwo);
    })
    .await;
    assert_eq!(out, Val::Num(7.0));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 6.0)
            .num(Opcode::TypeNumber, 3.0)
            .op(Opcode::Bwa);
    })
    .await;
    assert_eq!(out, Val::Num(2.0));
}

#[tokio::test]
async fn test_min_max() {
    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 2.0)
            .num(Opcode::TypeNumber, 5.0)
            .op(Opcode::Min);
    })
    .await;
    assert_eq!(out, Val::Num(2.0));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 2.0)
            .num(Opcode::TypeNumber, 5.0)
            .op(Opcode::Max);
    })
    .await;
    assert_eq!(out, Val::Num(5.0));
}

#[tokio::test]
async fn test_constants_and_conversions() {
    let out = eval(|a| {
        a.op(Opcode::Pi);
    })
    .await;
    assert_eq!(out, Val::Num(std::f64::consts::PI));

    let out = eval(|a| {
        a.name(Opcode::TypeString, "6.5").op(Opcode::ConvToFloat);
    })
    .await;
    assert_eq!(out, Val::Num(6.5));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 8.0).op(Opcode::ConvToString);
    })
    .await;
    assert_eq!(out, Val::from("8"));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 65.0).op(Opcode::Char);
    })
    .await;
    assert_eq!(out, Val::from("A"));
}

#[tokio::test]
async fn test_stack_shuffles() {
    // swap turns 2,5 into 5,2 so the subtraction sees 5 - 2.
    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 2.0)
            .num(Opcode::TypeNumber, 5.0)
            .op(Opcode::SwapLastOps)
            .op(Opcode::Sub);
    })
    .await;
    assert_eq!(out, Val::Num(3.0));

    let out = eval(|a| {
        a.num(Opcode::TypeNumber, 3.0)
            .op(Opcode::CopyLastOp)
            .op(Opcode::Mul);
    })
    .await;
    assert_eq!(out, Val::Num(9.0));
}

#[tokio::test]
async fn test_type_query() {
    let out = eval(|a| {
        a.name(Opcode::TypeString, "x").op(Opcode::ObjType);
    })
    .await;
    assert_eq!(out, Val::Num(1.0));

    let out = eval(|a| {
        a.op(Opcode::TypeArray)
            .num(Opcode::TypeNumber, 1.0)
            .op(Opcode::ArrayEnd)
            .op(Opcode::ObjType);
    })
    .await;
    assert_eq!(out, Val::Num(3.0));
}
