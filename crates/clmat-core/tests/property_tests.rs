//! Host-only property tests for indexing, fitting and transpose.

use clmat_core::{fit, fit_shapes, MatError, Shape, Tensor};
use proptest::prelude::*;

fn dims(max_rank: usize) -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1..5usize, 0..=max_rank)
}

/// Dims where every entry is either the partner's entry or 1.
fn fitting_pair() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (dims(4), prop::collection::vec(any::<bool>(), 4), 0..=4usize).prop_map(|(a, ones, rank)| {
        let b: Vec<usize> = (0..rank)
            .map(|i| match a.get(i) {
                Some(&d) if !ones[i] => d,
                _ => 1,
            })
            .collect();
        (a, b)
    })
}

proptest! {
    #[test]
    fn test_index_round_trip(d in dims(4), seed in any::<usize>()) {
        let shape = Shape::new(&d);
        let linear = seed % shape.numel();
        let coord = shape.index_to_coord(linear).unwrap();
        prop_assert_eq!(shape.coord_to_offset(&coord).unwrap(), linear);
        prop_assert_eq!(shape.index_to_coord(shape.coord_to_offset(&coord).unwrap()).unwrap(), coord);
    }

    #[test]
    fn test_fit_is_symmetric(a in dims(4), b in dims(4)) {
        let (sa, sb) = (Shape::new(&a), Shape::new(&b));
        match (fit_shapes(&sa, &sb), fit_shapes(&sb, &sa)) {
            (Ok(x), Ok(y)) => prop_assert_eq!(x, y),
            (Err(_), Err(_)) => {}
            _ => prop_assert!(false, "fit of {:?} and {:?} is not symmetric", a, b),
        }
    }

    #[test]
    fn test_fit_fails_iff_incompatible(a in dims(4), b in dims(4)) {
        let rank = a.len().max(b.len());
        let compatible = (0..rank).all(|i| {
            let x = a.get(i).copied().unwrap_or(1);
            let y = b.get(i).copied().unwrap_or(1);
            x == y || x == 1 || y == 1
        });
        let result = fit_shapes(&Shape::new(&a), &Shape::new(&b));
        prop_assert_eq!(result.is_ok(), compatible);
        if let Err(e) = result {
            prop_assert!(matches!(e, MatError::UnfitShapes { .. }), "unexpected error: {}", e);
        }
    }

    #[test]
    fn test_fit_materialises_both((a, b) in fitting_pair()) {
        let ta = Tensor::from_data(a.clone(), (0..Shape::new(&a).numel()).map(|v| v as f64).collect()).unwrap();
        let tb = Tensor::filled(b, 1.0).unwrap();
        let (fa, fb) = fit(&ta, &tb).unwrap();
        prop_assert_eq!(fa.shape(), fb.shape());
        prop_assert_eq!(fa.literal_size(), fa.shape().numel());
        // every fitted element of `fa` comes from `ta` at the wrapped coordinate
        for linear in 0..fa.literal_size() {
            let coord = fa.index_to_coord(linear).unwrap();
            let src: Vec<usize> = (0..ta.ndims()).map(|i| coord[i] % a[i]).collect();
            prop_assert_eq!(fa.data()[linear], ta.get(&src).unwrap());
        }
    }

    #[test]
    fn test_matrix_transpose_twice_is_identity(w in 1..6usize, h in 1..6usize) {
        let t = Tensor::from_data([w, h], (0..w * h).map(|v| v as f64).collect()).unwrap();
        prop_assert_eq!(t.transpose().unwrap().transpose().unwrap(), t);
    }
}

#[test]
fn test_fit_single_against_matrix() {
    let one = Tensor::from_data([1], vec![2.5]).unwrap();
    let m = Tensor::new([2, 3]).unwrap();
    let (a, b) = fit(&one, &m).unwrap();
    assert_eq!(a.shape().dims(), &[2, 3]);
    assert_eq!(b.shape().dims(), &[2, 3]);
    assert_eq!(a.data(), &[2.5; 6]);
}

#[test]
fn test_scalar_construction() {
    let s = Tensor::scalar(20.0);
    assert_eq!(s.literal_size(), 1);
    assert_eq!(s.ndims(), 0);
}
