//! Integration tests for the lowering pipeline.

use polylower::ir::expr::{ExprNode, ForType};
use polylower::ir::mutate;
use polylower::prelude::*;
use polylower::utils::names::NameGenerator;

fn f32_() -> Type {
    Type::float(32)
}

/// C[i, j] = sum_k A[i, k] * B[k, j]
fn matmul(names: &NameGenerator) -> (Tensor, Tensor, Tensor) {
    let a = Tensor::placeholder("A", &[4, 3], f32_());
    let b = Tensor::placeholder("B", &[3, 4], f32_());
    let c = Tensor::reduce_with(names, "C", &[4, 4], ReduceKind::Sum, &[3], |ax, rk| {
        let lhs = a.at(vec![ax[0].clone(), rk[0].clone()])?;
        let rhs = b.at(vec![rk[0].clone(), ax[1].clone()])?;
        Expr::mul(lhs, rhs)
    })
    .unwrap();
    (a, b, c)
}

/// A (input) -> B (temporary) -> C (output)
fn chain() -> (Tensor, Tensor, Tensor) {
    let a = Tensor::placeholder("A", &[8], f32_());
    let b = Tensor::compute("B", &[8], |ax| Expr::add(a.at(ax.to_vec())?, Expr::float(1.0))).unwrap();
    let c = Tensor::compute("C", &[8], |ax| Expr::mul(b.at(ax.to_vec())?, b.at(ax.to_vec())?)).unwrap();
    (a, b, c)
}

fn plain_loops(f: &LoweredFunc) -> Vec<ForType> {
    let mut out = Vec::new();
    mutate::for_each(&f.body, &mut |e| {
        if let ExprNode::For(l) = e.node() {
            out.push(l.for_type);
        }
    });
    out
}

#[test]
fn test_lowering_is_deterministic() {
    let names = NameGenerator::new();
    let (a, b, c) = matmul(&names);
    c.vectorize(1, 4);
    let first = polylower::lower("matmul", &[a.clone(), b.clone(), c.clone()], &[], &[], LowerOptions::default()).unwrap();
    let second = polylower::lower("matmul", &[a, b, c], &[], &[], LowerOptions::default()).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn test_matmul_body() {
    let names = NameGenerator::new();
    let (a, b, c) = matmul(&names);
    let f = polylower::lower("matmul", &[a, b, c], &[], &[], LowerOptions::default()).unwrap();
    assert_eq!(
        f.body.to_string(),
        "{\n  for (c0, 0, 4)\n  {\n    for (c1, 0, 4)\n    {\n      _C[c0, c1] = 0.0\n      for (c2, 0, 3)\n      {\n        _C[c0, c1] = (_C[c0, c1] + (_A[c0, c2] * _B[c2, c1]))\n      }\n    }\n  }\n}"
    );
    assert!(f.temp_buffers.is_empty());
    let io: Vec<bool> = f.args.iter().map(Argument::is_output).collect();
    assert_eq!(io, vec![false, false, true]);
}

#[test]
fn test_argument_order() {
    let m = Var::new("m", f32_());
    let a = Tensor::placeholder("A", &[8], f32_());
    let b = Tensor::compute("B", &[8], |ax| Expr::mul(a.at(ax.to_vec())?, m.to_expr())).unwrap();

    let f = polylower::lower("scale", &[a.clone(), b.clone()], &[m.clone()], &[], LowerOptions::default()).unwrap();
    assert_eq!(f.arg_names(), vec!["m", "A", "B"]);
    assert!(f.args[0].is_scalar());
    assert_eq!(f.args[1].io, ArgIo::Input);
    assert_eq!(f.args[2].io, ArgIo::Output);
    assert!(f.to_string().starts_with("function scale (m, _A, _B)"));

    let f = polylower::lower("scale", &[b, a], &[m], &[], LowerOptions::default()).unwrap();
    assert_eq!(f.arg_names(), vec!["m", "B", "A"]);
}

#[test]
fn test_duplicate_name_rejected_before_graph() {
    // X reads an unsupplied placeholder, so graph construction would also fail
    let ghost = Tensor::placeholder("Ghost", &[4], f32_());
    let x = Tensor::compute("X", &[4], |ax| ghost.at(ax.to_vec())).unwrap();
    let err = polylower::lower("f", &[x], &[Var::new("X", f32_())], &[], LowerOptions::default()).unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::DuplicateArgument));
}

#[test]
fn test_temporary_set() {
    let (a, b, c) = chain();
    let lower = LowerImpl::new("f", &[a.clone(), c.clone()], &[], &[], LowerOptions::default()).unwrap();
    let temps: Vec<String> = lower.temporary_tensors().unwrap().iter().map(|t| t.name().to_string()).collect();
    assert_eq!(temps, vec!["B"]);

    let f = lower.lower().unwrap();
    assert_eq!(f.temp_buffers.len(), 1);
    assert_eq!(f.temp_buffers[0].name, "_B");
    assert_eq!(f.temp_buffers[0].shape, vec![8]);

    b.compute_inline();
    let f = polylower::lower("f", &[a, c], &[], &[], LowerOptions::default()).unwrap();
    assert!(f.temp_buffers.is_empty());
    assert_eq!(
        f.body.to_string(),
        "{\n  for (c0, 0, 8)\n  {\n    _C[c0] = ((_A[c0] + 1.0) * (_A[c0] + 1.0))\n  }\n}"
    );
}

#[test]
fn test_compute_at_shrinks_buffer() {
    let a = Tensor::placeholder("A", &[10, 10], f32_());
    let p = Tensor::compute("P", &[10, 10], |ax| Expr::mul(a.at(ax.to_vec())?, Expr::float(2.0))).unwrap();
    let c = Tensor::compute("C", &[10, 10], |ax| Expr::add(p.at(ax.to_vec())?, Expr::float(1.0))).unwrap();
    p.compute_at(&c, 0);

    let f = polylower::lower("fused", &[a, c], &[], &[], LowerOptions::default()).unwrap();
    let temp = f.temp_buffer("_P").unwrap();
    assert_eq!(temp.shape, vec![1, 10]);

    let mut loads = 0;
    mutate::for_each(&f.body, &mut |e| match e.node() {
        ExprNode::Load { tensor, indices } if tensor.name() == "P" => {
            loads += 1;
            assert_eq!(indices[0].as_int(), Some(0));
            assert_eq!(tensor.shape(), &[1, 10]);
        }
        ExprNode::Store { tensor, indices, .. } if tensor.name() == "P" => {
            assert_eq!(indices[0].to_string(), "(c1 - c0)");
            assert_eq!(tensor.shape(), &[1, 10]);
        }
        _ => {}
    });
    assert_eq!(loads, 1);
}

#[test]
fn test_compute_at_reduction_producer() {
    let names = NameGenerator::new();
    let a = Tensor::placeholder("A", &[10, 4], f32_());
    let p = Tensor::reduce_with(&names, "P", &[10], ReduceKind::Sum, &[4], |ax, rk| {
        a.at(vec![ax[0].clone(), rk[0].clone()])
    })
    .unwrap();
    let c = Tensor::compute("C", &[10], |ax| Expr::mul(p.at(ax.to_vec())?, Expr::float(2.0))).unwrap();
    p.compute_at(&c, 0);

    let f = polylower::lower("row_sum", &[a, c], &[], &[], LowerOptions::default()).unwrap();
    let text = f.body.to_string();
    assert!(text.contains("_P[(c1 - c0)] = 0.0"), "{}", text);
    assert!(text.contains("_P[(c1 - c0)] = (_P[(c1 - c0)] + _A[c1, c2])"), "{}", text);
    assert!(text.contains("_C[c0] = (_P[0] * 2.0)"), "{}", text);
    assert_eq!(f.temp_buffers, vec![Buffer { name: "_P".into(), dtype: f32_(), shape: vec![1] }]);
}

#[test]
fn test_compute_at_through_inlined_reader() {
    let a = Tensor::placeholder("A", &[11], f32_());
    let p = Tensor::compute("P", &[11], |ax| Expr::mul(a.at(ax.to_vec())?, Expr::float(2.0))).unwrap();
    let shifted = Tensor::compute("I", &[10], |ax| p.at(vec![Expr::add(ax[0].clone(), Expr::int(1))?])).unwrap();
    let c = Tensor::compute("C", &[10], |ax| Expr::add(p.at(ax.to_vec())?, shifted.at(ax.to_vec())?)).unwrap();
    shifted.compute_inline();
    p.compute_at(&c, 0);

    let f = polylower::lower("pair_sum", &[a, c], &[], &[], LowerOptions::default()).unwrap();
    let text = f.body.to_string();
    assert!(text.contains("_P[(c1 - c0)] = (_A[c1] * 2.0)"), "{}", text);
    assert!(text.contains("_C[c0] = (_P[0] + _P[1])"), "{}", text);
    assert_eq!(f.temp_buffer("_P").unwrap().shape, vec![2]);
}

#[test]
fn test_compute_at_window_offsets() {
    // reads one and two elements ahead: window starts at +1
    let a = Tensor::placeholder("A", &[12], f32_());
    let p = Tensor::compute("P", &[12], |ax| Expr::mul(a.at(ax.to_vec())?, Expr::float(2.0))).unwrap();
    let c = Tensor::compute("C", &[10], |ax| {
        let one = Expr::add(ax[0].clone(), Expr::int(1))?;
        let two = Expr::add(ax[0].clone(), Expr::int(2))?;
        Expr::add(p.at(vec![one])?, p.at(vec![two])?)
    })
    .unwrap();
    p.compute_at(&c, 0);
    let f = polylower::lower("ahead", &[a, c], &[], &[], LowerOptions::default()).unwrap();
    let text = f.body.to_string();
    assert!(text.contains("_C[c0] = (_P[0] + _P[1])"), "{}", text);
    assert_eq!(f.temp_buffer("_P").unwrap().shape, vec![2]);

    // reads the previous element: window starts at -1
    let a = Tensor::placeholder("A", &[10], f32_());
    let p = Tensor::compute("P", &[10], |ax| Expr::mul(a.at(ax.to_vec())?, Expr::float(2.0))).unwrap();
    let c = Tensor::compute("C", &[10], |ax| {
        let prev = Expr::sub(ax[0].clone(), Expr::int(1))?;
        Expr::add(p.at(ax.to_vec())?, p.at(vec![prev])?)
    })
    .unwrap();
    p.compute_at(&c, 0);
    let f = polylower::lower("behind", &[a, c], &[], &[], LowerOptions::default()).unwrap();
    let text = f.body.to_string();
    assert!(text.contains("_C[c0] = (_P[1] + _P[0])"), "{}", text);
    assert_eq!(f.temp_buffer("_P").unwrap().shape, vec![2]);

    let mut store_indices = Vec::new();
    mutate::for_each(&f.body, &mut |e| {
        if let ExprNode::Store { tensor, indices, .. } = e.node() {
            if tensor.name() == "P" {
                store_indices.push(indices[0].clone());
            }
        }
    });
    assert_eq!(store_indices.len(), 1);
    // producer iteration c1 == c0 - 1 lands in slot 0
    let bindings = std::collections::HashMap::from([
        ("c0".to_string(), Expr::int(5)),
        ("c1".to_string(), Expr::int(4)),
    ]);
    let slot = polylower::ir::simplify::simplify(&mutate::substitute(&store_indices[0], &bindings));
    assert_eq!(slot.as_int(), Some(0));
}

#[test]
fn test_vectorize_marks_one_level() {
    let a = Tensor::placeholder("A", &[4, 8, 16], f32_());
    let t = Tensor::compute("T", &[4, 8, 16], |ax| Expr::add(a.at(ax.to_vec())?, Expr::float(1.0))).unwrap();
    t.vectorize(1, 4);
    let f = polylower::lower("vec", &[a.clone(), t.clone()], &[], &[], LowerOptions::default()).unwrap();
    assert_eq!(plain_loops(&f), vec![ForType::Serial, ForType::Vectorized, ForType::Serial]);

    t.vectorize(5, 4);
    let err = polylower::lower("vec", &[a, t], &[], &[], LowerOptions::default()).unwrap_err();
    assert_eq!(err.config_kind(), Some(ConfigErrorKind::InvalidVectorize));
    assert!(err.to_string().contains("level 5"));
}

#[test]
fn test_unroll_levels() {
    let names = NameGenerator::new();
    let (a, b, c) = matmul(&names);
    c.unroll(2);
    let f = polylower::lower("matmul", &[a, b, c], &[], &[], LowerOptions::default()).unwrap();
    assert_eq!(plain_loops(&f), vec![ForType::Serial, ForType::Serial, ForType::Unrolled]);
    assert!(f.body.to_string().contains("unroll for (c2, 0, 3)"));
}

#[test]
fn test_cycle_rejected() {
    let fake_b = Tensor::placeholder("B", &[4], f32_());
    let a = Tensor::compute("A", &[4], |ax| fake_b.at(ax.to_vec())).unwrap();
    let b = Tensor::compute("B", &[4], |ax| a.at(ax.to_vec())).unwrap();
    let err = polylower::lower("cyclic", &[a, b], &[], &[], LowerOptions::default()).unwrap_err();
    assert_eq!(err.internal_kind(), Some(InternalErrorKind::CyclicGraph));
}

#[test]
fn test_no_placeholder_left() {
    let names = NameGenerator::new();
    let (a, b, c) = matmul(&names);
    let f = polylower::lower(
        "matmul",
        &[a, b, c],
        &[],
        &[],
        LowerOptions::default().with_passes(vec![]),
    )
    .unwrap();
    assert_eq!(mutate::count(&f.body, Expr::is_isl_call), 0);
    assert!(f.body.to_string().contains("poly_for"));
}

#[test]
fn test_runtime_call_folded() {
    let a = Tensor::placeholder("A", &[16], f32_());
    let out = Tensor::extern_call("Out", &[1], f32_(), |_| {
        Ok(Expr::runtime_call("softmax", vec![Expr::buffer_ref(&a)]))
    })
    .unwrap();
    let f = polylower::lower("softmax", &[a, out], &[], &[], LowerOptions::default()).unwrap();
    assert_eq!(f.body.to_string(), "{\n  for (c0, 0, 1)\n  {\n    softmax(_A, _Out)\n  }\n}");
    assert_eq!(f.arg("A").unwrap().io, ArgIo::Input);
    assert_eq!(f.arg("Out").unwrap().io, ArgIo::Output);
}

#[test]
fn test_shared_buffer_with_output() {
    let (a, b, c) = chain();
    b.share_buffer_with(&c);
    let f = polylower::lower("inplace", &[a, c], &[], &[], LowerOptions::default()).unwrap();
    assert!(f.temp_buffers.is_empty());
    assert!(f.body.to_string().contains("_C[c0] = (_A[c0] + 1.0)"));
}

#[test]
fn test_extra_dependency_orders_groups() {
    let a = Tensor::placeholder("A", &[8], f32_());
    let b = Tensor::compute("B", &[8], |ax| Expr::add(a.at(ax.to_vec())?, Expr::float(1.0))).unwrap();
    let c = Tensor::compute("C", &[8], |ax| Expr::add(a.at(ax.to_vec())?, Expr::float(2.0))).unwrap();
    c.ctrl_depend(&b);
    let f = polylower::lower("ordered", &[a, c, b], &[], &[], LowerOptions::default()).unwrap();
    let text = f.body.to_string();
    let b_pos = text.find("_B[c0] =").unwrap();
    let c_pos = text.find("_C[c0] =").unwrap();
    assert!(b_pos < c_pos);
}

#[test]
fn test_gpu_kernel() {
    let a = Tensor::placeholder("A", &[128, 256], f32_());
    let b = Tensor::compute("B", &[128, 256], |ax| Expr::max(a.at(ax.to_vec())?, Expr::float(0.0))).unwrap();
    b.bind(0, GpuAxis::BlockX);
    b.bind(1, GpuAxis::ThreadX);

    let f = polylower::lower("relu", &[a.clone(), b.clone()], &[], &[], LowerOptions::default().with_target(Target::Gpu))
        .unwrap();
    assert!(f.is_gpu_kernel());
    assert_eq!(f.gpu_grid_dims, vec![128]);
    assert_eq!(f.gpu_block_dims, vec![256]);
    assert!(plain_loops(&f).is_empty());
    assert_eq!(
        f.body.to_string(),
        "{\n  _B[blockIdx.x, threadIdx.x] = max(_A[blockIdx.x, threadIdx.x], 0.0)\n}"
    );

    let host = polylower::lower("relu", &[a, b], &[], &[], LowerOptions::default()).unwrap();
    assert!(!host.is_gpu_kernel());
    assert!(host.body.to_string().contains("bind[blockIdx.x] for (c0, 0, 128)"));
}
