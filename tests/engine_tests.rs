//! Cross-component scenarios: every primitive driven end to end
//! through build, multiply, mask, accumulate, and extraction.

use sparsering::{
    apply_unary, assign_scalar, config, ewise_add, mxm, reduce_scalar, select, transpose,
    AxbMethod, BinaryOp, BinaryOpcode, Config, Descriptor, IndexList, IndexUnaryOp,
    IndexUnaryOpcode, Matrix, Monoid, Scalar, Semiring, Type, UnaryOp, UnaryOpcode,
};

fn setup() {
    config::init(Config::default()).ok();
}

fn entries_i64(m: &Matrix) -> Vec<(usize, usize, i64)> {
    let (r, c, v) = m.clone().extract_tuples().unwrap();
    let mut out: Vec<_> = r
        .into_iter()
        .zip(c)
        .zip(v)
        .map(|((i, j), s)| (i, j, s.as_i64()))
        .collect();
    out.sort_unstable_by_key(|&(i, j, _)| (i, j));
    out
}

/// Dense reference multiply for checking the engine's arithmetic.
fn dense_mxm(a: &[[i64; 4]; 4], b: &[[i64; 4]; 4]) -> [[i64; 4]; 4] {
    let mut c = [[0i64; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            for k in 0..4 {
                c[i][j] += a[i][k] * b[k][j];
            }
        }
    }
    c
}

#[test]
fn test_square_and_sum_against_dense_reference() {
    setup();
    // A(i,j) = i + 1 - j, with A(0,0) left absent
    let mut a = Matrix::new(Type::INT64, 4, 4).unwrap();
    let mut dense = [[0i64; 4]; 4];
    let (mut rows, mut cols, mut vals) = (Vec::new(), Vec::new(), Vec::new());
    for i in 0..4usize {
        for j in 0..4usize {
            if (i, j) == (0, 0) {
                continue;
            }
            let v = i as i64 + 1 - j as i64;
            dense[i][j] = v;
            rows.push(i);
            cols.push(j);
            vals.push(Scalar::Int64(v));
        }
    }
    a.build(&rows, &cols, &vals, None).unwrap();

    let plus = Monoid::plus(Type::INT64).unwrap();
    let direct_sum: i64 = dense.iter().flatten().sum();
    assert_eq!(
        reduce_scalar(&plus, &a).unwrap(),
        Scalar::Int64(direct_sum)
    );

    // A := A * A
    let sr = Semiring::plus_times(Type::INT64).unwrap();
    let a0 = a.dup();
    mxm(&mut a, None, None, &sr, &a0, &a0, &Descriptor::default()).unwrap();
    let squared = dense_mxm(&dense, &dense);
    let squared_sum: i64 = squared.iter().flatten().sum();
    assert_eq!(
        reduce_scalar(&plus, &a).unwrap(),
        Scalar::Int64(squared_sum)
    );
}

#[test]
fn test_complemented_diagonal_mask() {
    setup();
    // C<!M> = A with M = I4 removes the diagonal of a matrix of ones
    let mut a = Matrix::new(Type::INT64, 4, 4).unwrap();
    let (mut rows, mut cols, mut vals) = (Vec::new(), Vec::new(), Vec::new());
    for i in 0..4usize {
        for j in 0..4usize {
            rows.push(i);
            cols.push(j);
            vals.push(Scalar::Int64(1));
        }
    }
    a.build(&rows, &cols, &vals, None).unwrap();

    let mut m = Matrix::new(Type::BOOL, 4, 4).unwrap();
    m.build(
        &[0, 1, 2, 3],
        &[0, 1, 2, 3],
        &[Scalar::Bool(true); 4].to_vec(),
        None,
    )
    .unwrap();

    let mut c = Matrix::new(Type::INT64, 4, 4).unwrap();
    let desc = Descriptor {
        mask_comp: true,
        ..Descriptor::default()
    };
    let ident = UnaryOp::builtin(UnaryOpcode::Identity, Type::INT64).unwrap();
    apply_unary(&mut c, Some(&m), None, &ident, &a, &desc).unwrap();

    assert_eq!(c.nvals().unwrap(), 12);
    for i in 0..4 {
        assert_eq!(c.extract_element(i, i).unwrap(), None);
    }
    assert_eq!(c.extract_element(0, 3).unwrap(), Some(Scalar::Int64(1)));
}

#[test]
fn test_reduce_terminal_with_infinity() {
    setup();
    let mut a = Matrix::random(Type::FP64, 50, 50, 0.2, 77).unwrap();
    a.set_element(13, 31, Scalar::Fp64(f64::INFINITY)).unwrap();
    let m = Monoid::max(Type::FP64).unwrap();
    assert_eq!(
        reduce_scalar(&m, &a).unwrap(),
        Scalar::Fp64(f64::INFINITY)
    );
}

#[test]
fn test_dot_and_gustavson_bit_identical() {
    setup();
    let a = Matrix::random(Type::INT64, 100, 100, 0.01, 1001).unwrap();
    let b = Matrix::random(Type::INT64, 100, 100, 0.01, 1002).unwrap();
    let sr = Semiring::plus_times(Type::INT64).unwrap();

    let mut by_dot = Matrix::new(Type::INT64, 100, 100).unwrap();
    mxm(
        &mut by_dot,
        None,
        None,
        &sr,
        &a,
        &b,
        &Descriptor {
            axb_method: AxbMethod::Dot,
            ..Descriptor::default()
        },
    )
    .unwrap();

    let mut by_gustavson = Matrix::new(Type::INT64, 100, 100).unwrap();
    mxm(
        &mut by_gustavson,
        None,
        None,
        &sr,
        &a,
        &b,
        &Descriptor {
            axb_method: AxbMethod::Gustavson,
            ..Descriptor::default()
        },
    )
    .unwrap();

    assert_eq!(entries_i64(&by_dot), entries_i64(&by_gustavson));

    let mut by_heap = Matrix::new(Type::INT64, 100, 100).unwrap();
    mxm(
        &mut by_heap,
        None,
        None,
        &sr,
        &a,
        &b,
        &Descriptor {
            axb_method: AxbMethod::Heap,
            ..Descriptor::default()
        },
    )
    .unwrap();
    assert_eq!(entries_i64(&by_dot), entries_i64(&by_heap));
}

#[test]
fn test_iso_build_round_trip() {
    setup();
    let mut m = Matrix::new(Type::FP32, 10, 10).unwrap();
    let rows: Vec<usize> = (0..10).collect();
    let cols: Vec<usize> = (0..10).rev().collect();
    let vals = vec![Scalar::Fp32(2.5); 10];
    m.build(&rows, &cols, &vals, None).unwrap();
    assert!(m.is_iso());
    let (_, _, got) = m.extract_tuples().unwrap();
    assert_eq!(got, vals);
}

#[test]
fn test_zombies_counted_without_assembly() {
    setup();
    let mut m = Matrix::new(Type::INT32, 8, 8).unwrap();
    for k in 0..8 {
        m.set_element(k, k, Scalar::Int32(k as i32)).unwrap();
    }
    m.wait().unwrap();
    for k in 0..4 {
        m.remove_element(2 * k, 2 * k).unwrap();
    }
    // deletions only marked zombies; the count already excludes them
    assert!(!m.is_finalized());
    assert_eq!(m.nvals().unwrap(), 4);
    assert!(!m.is_finalized());
    // extraction is the observer that forces assembly
    let (rows, _, _) = m.extract_tuples().unwrap();
    assert_eq!(rows, vec![1, 3, 5, 7]);
    assert!(m.is_finalized());
}

#[test]
fn test_mask_accum_identity_property() {
    setup();
    // with no mask, no accum, and replace, C ends logically equal to Z
    let z_src = Matrix::random(Type::INT64, 15, 15, 0.3, 55).unwrap();
    let mut c = Matrix::random(Type::INT64, 15, 15, 0.5, 56).unwrap();
    let ident = UnaryOp::builtin(UnaryOpcode::Identity, Type::INT64).unwrap();
    let desc = Descriptor {
        output_replace: true,
        ..Descriptor::default()
    };
    apply_unary(&mut c, None, None, &ident, &z_src, &desc).unwrap();
    assert_eq!(entries_i64(&c), entries_i64(&z_src));
}

#[test]
fn test_boolean_rename_equivalence() {
    setup();
    let a = Matrix::random(Type::BOOL, 25, 25, 0.2, 31).unwrap();
    let b = Matrix::random(Type::BOOL, 25, 25, 0.2, 32).unwrap();

    // PLUS_TIMES over bool renames to LOR_LAND internally
    let renamed = Semiring::new(
        Monoid::new(
            BinaryOp::builtin(BinaryOpcode::Plus, Type::BOOL).unwrap(),
            Scalar::Bool(false),
            None,
        )
        .unwrap(),
        BinaryOp::builtin(BinaryOpcode::Times, Type::BOOL).unwrap(),
    )
    .unwrap();
    let canonical = Semiring::lor_land();

    let mut c1 = Matrix::new(Type::BOOL, 25, 25).unwrap();
    mxm(&mut c1, None, None, &renamed, &a, &b, &Descriptor::default()).unwrap();
    let mut c2 = Matrix::new(Type::BOOL, 25, 25).unwrap();
    mxm(&mut c2, None, None, &canonical, &a, &b, &Descriptor::default()).unwrap();
    assert_eq!(
        c1.extract_tuples().unwrap(),
        c2.extract_tuples().unwrap()
    );
}

#[test]
fn test_pattern_only_semiring_ignores_values() {
    setup();
    // PLUS_PAIR sees only the pattern; scaling B's values cannot matter
    let a = Matrix::random(Type::INT64, 20, 20, 0.2, 41).unwrap();
    let b1 = Matrix::random(Type::INT64, 20, 20, 0.2, 42).unwrap();
    let mut b2 = b1.dup();
    {
        let ten = UnaryOp::user(
            std::sync::Arc::new(|z: &mut [u8], x: &[u8]| {
                let v = i64::from_le_bytes(x.try_into().unwrap());
                z.copy_from_slice(&(v * 10).to_le_bytes());
            }),
            Type::INT64,
            Type::INT64,
            "times_ten",
        );
        let src = b2.dup();
        apply_unary(&mut b2, None, None, &ten, &src, &Descriptor::default()).unwrap();
    }

    let sr = Semiring::new(
        Monoid::plus(Type::INT64).unwrap(),
        BinaryOp::builtin(BinaryOpcode::Pair, Type::INT64).unwrap(),
    )
    .unwrap();
    let mut c1 = Matrix::new(Type::INT64, 20, 20).unwrap();
    mxm(&mut c1, None, None, &sr, &a, &b1, &Descriptor::default()).unwrap();
    let mut c2 = Matrix::new(Type::INT64, 20, 20).unwrap();
    mxm(&mut c2, None, None, &sr, &a, &b2, &Descriptor::default()).unwrap();
    assert_eq!(entries_i64(&c1), entries_i64(&c2));
}

#[test]
fn test_self_multiply_via_dup_matches() {
    setup();
    // A := A*B computed through a duplicate equals C = A*B computed
    // into a fresh output
    let a = Matrix::random(Type::INT64, 18, 18, 0.25, 61).unwrap();
    let b = Matrix::random(Type::INT64, 18, 18, 0.25, 62).unwrap();
    let sr = Semiring::plus_times(Type::INT64).unwrap();

    let mut fresh = Matrix::new(Type::INT64, 18, 18).unwrap();
    mxm(&mut fresh, None, None, &sr, &a, &b, &Descriptor::default()).unwrap();

    let mut in_place = a.dup();
    let a_copy = a.dup();
    mxm(
        &mut in_place,
        None,
        None,
        &sr,
        &a_copy,
        &b,
        &Descriptor::default(),
    )
    .unwrap();
    assert_eq!(entries_i64(&fresh), entries_i64(&in_place));
}

#[test]
fn test_wait_idempotent_and_value_preserving() {
    setup();
    let mut m = Matrix::new(Type::INT32, 10, 10).unwrap();
    for k in 0..10 {
        m.set_element(9 - k, k, Scalar::Int32(k as i32)).unwrap();
    }
    m.remove_element(9, 0).unwrap();
    m.wait().unwrap();
    let once = m.clone().extract_tuples().unwrap();
    m.wait().unwrap();
    assert_eq!(m.extract_tuples().unwrap(), once);
}

#[test]
fn test_ewise_add_then_select_pipeline() {
    setup();
    let a = Matrix::random(Type::INT64, 12, 12, 0.3, 71).unwrap();
    let b = Matrix::random(Type::INT64, 12, 12, 0.3, 72).unwrap();
    let plus = BinaryOp::builtin(BinaryOpcode::Plus, Type::INT64).unwrap();
    let mut sum = Matrix::new(Type::INT64, 12, 12).unwrap();
    ewise_add(&mut sum, None, None, &plus, &a, &b, &Descriptor::default()).unwrap();

    let nonzero = IndexUnaryOp::builtin(IndexUnaryOpcode::Nonzero, Type::INT64).unwrap();
    let mut kept = Matrix::new(Type::INT64, 12, 12).unwrap();
    select(
        &mut kept,
        None,
        None,
        &nonzero,
        &sum,
        Scalar::Int64(0),
        &Descriptor::default(),
    )
    .unwrap();
    for (_, _, v) in entries_i64(&kept) {
        assert_ne!(v, 0);
    }
    assert!(kept.nvals().unwrap() <= sum.nvals().unwrap());
}

#[test]
fn test_transpose_involution_integration() {
    setup();
    let a = Matrix::random(Type::INT32, 17, 11, 0.35, 81).unwrap();
    let mut t = Matrix::new(Type::INT32, 11, 17).unwrap();
    transpose(&mut t, None, None, &a, &Descriptor::default()).unwrap();
    let mut tt = Matrix::new(Type::INT32, 17, 11).unwrap();
    transpose(&mut tt, None, None, &t, &Descriptor::default()).unwrap();
    assert_eq!(
        a.clone().extract_tuples().unwrap(),
        tt.extract_tuples().unwrap()
    );
}

#[test]
fn test_assign_then_multiply() {
    setup();
    // paint a block, then square the matrix
    let mut c = Matrix::new(Type::INT64, 6, 6).unwrap();
    assign_scalar(
        &mut c,
        None,
        None,
        Scalar::Int64(1),
        &IndexList::Range(0, 3),
        &IndexList::Range(0, 3),
        &Descriptor::default(),
    )
    .unwrap();
    assert_eq!(c.nvals().unwrap(), 9);

    let sr = Semiring::plus_times(Type::INT64).unwrap();
    let src = c.dup();
    mxm(&mut c, None, None, &sr, &src, &src, &Descriptor::default()).unwrap();
    // every cell of the 3x3 ones-block squares to 3
    assert_eq!(c.nvals().unwrap(), 9);
    assert_eq!(c.extract_element(1, 2).unwrap(), Some(Scalar::Int64(3)));
}

#[test]
fn test_user_type_through_generic_path() {
    setup();
    // a Gaussian-integer element: two packed i64 lanes (re, im)
    let gauss = sparsering::Type::user(16).unwrap();

    fn decode(b: &[u8]) -> (i64, i64) {
        (
            i64::from_le_bytes(b[..8].try_into().unwrap()),
            i64::from_le_bytes(b[8..16].try_into().unwrap()),
        )
    }
    fn encode(re: i64, im: i64) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&re.to_le_bytes());
        out.extend_from_slice(&im.to_le_bytes());
        out
    }

    let add_fn: std::sync::Arc<sparsering::ops::UserBinaryFn> =
        std::sync::Arc::new(|z, x, y| {
            let (ar, ai) = (
                i64::from_le_bytes(x[..8].try_into().unwrap()),
                i64::from_le_bytes(x[8..16].try_into().unwrap()),
            );
            let (br, bi) = (
                i64::from_le_bytes(y[..8].try_into().unwrap()),
                i64::from_le_bytes(y[8..16].try_into().unwrap()),
            );
            z[..8].copy_from_slice(&(ar + br).to_le_bytes());
            z[8..16].copy_from_slice(&(ai + bi).to_le_bytes());
        });
    let mult_fn: std::sync::Arc<sparsering::ops::UserBinaryFn> =
        std::sync::Arc::new(|z, x, y| {
            let (ar, ai) = (
                i64::from_le_bytes(x[..8].try_into().unwrap()),
                i64::from_le_bytes(x[8..16].try_into().unwrap()),
            );
            let (br, bi) = (
                i64::from_le_bytes(y[..8].try_into().unwrap()),
                i64::from_le_bytes(y[8..16].try_into().unwrap()),
            );
            z[..8].copy_from_slice(&(ar * br - ai * bi).to_le_bytes());
            z[8..16].copy_from_slice(&(ar * bi + ai * br).to_le_bytes());
        });

    let gadd = BinaryOp::user(add_fn, gauss, gauss, gauss, "gauss_add");
    let gmult = BinaryOp::user(mult_fn, gauss, gauss, gauss, "gauss_mult");
    let monoid = Monoid::new_user(gadd, &encode(0, 0), None).unwrap();
    let sr = Semiring::new(monoid, gmult).unwrap();

    // A = [[1+i, 0], [0, 2]],  B = [[i, 0], [0, 3]]
    let mut a = Matrix::new(gauss, 2, 2).unwrap();
    a.set_element_raw(0, 0, &encode(1, 1)).unwrap();
    a.set_element_raw(1, 1, &encode(2, 0)).unwrap();
    let mut b = Matrix::new(gauss, 2, 2).unwrap();
    b.set_element_raw(0, 0, &encode(0, 1)).unwrap();
    b.set_element_raw(1, 1, &encode(3, 0)).unwrap();

    let mut c = Matrix::new(gauss, 2, 2).unwrap();
    mxm(&mut c, None, None, &sr, &a, &b, &Descriptor::default()).unwrap();

    // (1+i)·i = -1+i ; 2·3 = 6
    assert_eq!(
        decode(&c.extract_element_raw(0, 0).unwrap().unwrap()),
        (-1, 1)
    );
    assert_eq!(
        decode(&c.extract_element_raw(1, 1).unwrap().unwrap()),
        (6, 0)
    );
    assert!(c.extract_element_raw(0, 1).unwrap().is_none());

    // whole-matrix reduction through the raw user monoid
    let gadd2 = BinaryOp::user(
        std::sync::Arc::new(|z: &mut [u8], x: &[u8], y: &[u8]| {
            let xr = i64::from_le_bytes(x[..8].try_into().unwrap());
            let xi = i64::from_le_bytes(x[8..16].try_into().unwrap());
            let yr = i64::from_le_bytes(y[..8].try_into().unwrap());
            let yi = i64::from_le_bytes(y[8..16].try_into().unwrap());
            z[..8].copy_from_slice(&(xr + yr).to_le_bytes());
            z[8..16].copy_from_slice(&(xi + yi).to_le_bytes());
        }),
        gauss,
        gauss,
        gauss,
        "gauss_add",
    );
    let sum_monoid = Monoid::new_user(gadd2, &encode(0, 0), None).unwrap();
    let total = sparsering::reduce_scalar_raw(&sum_monoid, &c).unwrap();
    assert_eq!(decode(&total), (5, 1));
}
