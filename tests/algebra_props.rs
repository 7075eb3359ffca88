//! Property tests for the algebraic invariants: format transitions,
//! transposition, opcode rewrites, and duplicate folding under
//! randomized inputs.

use proptest::collection::vec;
use proptest::prelude::*;

use sparsering::{
    config, ewise_add, mxm, transpose, BinaryOp, BinaryOpcode, Config, Descriptor, Matrix, Scalar,
    Semiring, Type,
};

fn setup() {
    config::init(Config::default()).ok();
}

const DIM: usize = 12;

prop_compose! {
    /// Random coordinate/value triples inside a DIM x DIM shape.
    fn tuples(max_len: usize)
        (entries in vec(((0..DIM), (0..DIM), -100i64..100), 0..max_len))
        -> Vec<(usize, usize, i64)>
    {
        entries
    }
}

fn build_from(entries: &[(usize, usize, i64)]) -> Matrix {
    let mut m = Matrix::new(Type::INT64, DIM, DIM).unwrap();
    let rows: Vec<usize> = entries.iter().map(|e| e.0).collect();
    let cols: Vec<usize> = entries.iter().map(|e| e.1).collect();
    let vals: Vec<Scalar> = entries.iter().map(|e| Scalar::Int64(e.2)).collect();
    let plus = BinaryOp::builtin(BinaryOpcode::Plus, Type::INT64).unwrap();
    m.build(&rows, &cols, &vals, Some(&plus)).unwrap();
    m
}

/// Reference value set: duplicates folded with +, sorted.
fn reference(entries: &[(usize, usize, i64)]) -> Vec<(usize, usize, i64)> {
    use std::collections::BTreeMap;
    let mut map: BTreeMap<(usize, usize), i64> = BTreeMap::new();
    for &(r, c, v) in entries {
        *map.entry((r, c)).or_insert(0) += v;
    }
    map.into_iter().map(|((r, c), v)| (r, c, v)).collect()
}

fn extracted(m: &Matrix) -> Vec<(usize, usize, i64)> {
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

proptest! {
    #[test]
    fn prop_build_extract_round_trip(entries in tuples(60)) {
        setup();
        let m = build_from(&entries);
        prop_assert_eq!(extracted(&m), reference(&entries));
    }

    #[test]
    fn prop_format_transitions_preserve_values(entries in tuples(60)) {
        setup();
        let mut m = build_from(&entries);
        let want = extracted(&m);
        for control in [
            sparsering::sparsity::SPARSE,
            sparsering::sparsity::HYPERSPARSE,
            sparsering::sparsity::SPARSE | sparsering::sparsity::BITMAP,
            sparsering::sparsity::AUTO,
        ] {
            m.set_sparsity_control(control).unwrap();
            prop_assert_eq!(extracted(&m), want.clone());
        }
    }

    #[test]
    fn prop_transpose_involution(entries in tuples(60)) {
        setup();
        let a = build_from(&entries);
        let mut t = Matrix::new(Type::INT64, DIM, DIM).unwrap();
        transpose(&mut t, None, None, &a, &Descriptor::default()).unwrap();
        let mut tt = Matrix::new(Type::INT64, DIM, DIM).unwrap();
        transpose(&mut tt, None, None, &t, &Descriptor::default()).unwrap();
        prop_assert_eq!(extracted(&a), extracted(&tt));
    }

    #[test]
    fn prop_ewise_add_commutes(ea in tuples(40), eb in tuples(40)) {
        setup();
        let a = build_from(&ea);
        let b = build_from(&eb);
        let plus = BinaryOp::builtin(BinaryOpcode::Plus, Type::INT64).unwrap();
        let mut ab = Matrix::new(Type::INT64, DIM, DIM).unwrap();
        ewise_add(&mut ab, None, None, &plus, &a, &b, &Descriptor::default()).unwrap();
        let mut ba = Matrix::new(Type::INT64, DIM, DIM).unwrap();
        ewise_add(&mut ba, None, None, &plus, &b, &a, &Descriptor::default()).unwrap();
        prop_assert_eq!(extracted(&ab), extracted(&ba));
    }

    #[test]
    fn prop_multiply_methods_agree(ea in tuples(40), eb in tuples(40)) {
        setup();
        let a = build_from(&ea);
        let b = build_from(&eb);
        let sr = Semiring::plus_times(Type::INT64).unwrap();
        let mut results = Vec::new();
        for method in [
            sparsering::AxbMethod::Gustavson,
            sparsering::AxbMethod::Heap,
            sparsering::AxbMethod::Dot,
        ] {
            let mut c = Matrix::new(Type::INT64, DIM, DIM).unwrap();
            mxm(
                &mut c,
                None,
                None,
                &sr,
                &a,
                &b,
                &Descriptor { axb_method: method, ..Descriptor::default() },
            )
            .unwrap();
            results.push(extracted(&c));
        }
        prop_assert_eq!(&results[0], &results[1]);
        prop_assert_eq!(&results[0], &results[2]);
    }

    #[test]
    fn prop_transpose_distributes_over_multiply(ea in tuples(30), eb in tuples(30)) {
        setup();
        // (A*B)' == B'*A' for PLUS_TIMES over integers
        let a = build_from(&ea);
        let b = build_from(&eb);
        let sr = Semiring::plus_times(Type::INT64).unwrap();

        let mut ab = Matrix::new(Type::INT64, DIM, DIM).unwrap();
        mxm(&mut ab, None, None, &sr, &a, &b, &Descriptor::default()).unwrap();
        let mut abt = Matrix::new(Type::INT64, DIM, DIM).unwrap();
        transpose(&mut abt, None, None, &ab, &Descriptor::default()).unwrap();

        let mut btat = Matrix::new(Type::INT64, DIM, DIM).unwrap();
        mxm(&mut btat, None, None, &sr, &b, &a, &Descriptor::t0t1()).unwrap();
        prop_assert_eq!(extracted(&abt), extracted(&btat));
    }
}
