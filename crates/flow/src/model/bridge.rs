//! Tensor bridge: conversions between feature rows (`Vec<f32>`) produced by
//! the feature extractor and burn tensors consumed by the flow.

use burn::prelude::*;
use burn::tensor::TensorData;

/// Convert a batch of equally sized feature rows to a burn 2D tensor.
///
/// # Panics
/// Panics if `rows` is empty or if rows have inconsistent lengths.
pub fn rows_to_tensor<B: Backend>(rows: &[Vec<f32>], device: &B::Device) -> Tensor<B, 2> {
    assert!(!rows.is_empty(), "rows must not be empty");
    let dim = rows[0].len();
    assert!(dim > 0, "feature dimension must be > 0");
    for (i, row) in rows.iter().enumerate() {
        assert_eq!(
            row.len(),
            dim,
            "row {i} has length {}, expected {dim}",
            row.len()
        );
    }

    let batch = rows.len();
    let flat: Vec<f32> = rows.iter().flat_map(|v| v.iter().copied()).collect();
    Tensor::from_data(TensorData::new(flat, [batch, dim]), device)
}

/// Wrap a row-major buffer of `batch * dim` values as a `(batch, dim)` tensor.
pub fn flat_to_tensor<B: Backend>(
    flat: Vec<f32>,
    batch: usize,
    dim: usize,
    device: &B::Device,
) -> Tensor<B, 2> {
    assert_eq!(flat.len(), batch * dim, "buffer does not hold {batch}x{dim} values");
    Tensor::from_data(TensorData::new(flat, [batch, dim]), device)
}

/// Extract f64 values from a burn 1D tensor.
pub fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 1>) -> Vec<f64> {
    let data = tensor.into_data();
    data.iter::<f32>().map(f64::from).collect()
}

/// Extract a single f64 scalar from a burn 1D tensor.
///
/// # Panics
/// Panics if the tensor does not contain exactly one element.
pub fn tensor_to_f64<B: Backend>(tensor: Tensor<B, 1>) -> f64 {
    let val: f32 = tensor.into_scalar().elem();
    val as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_rows_round_trip() {
        let device = Default::default();
        let rows = vec![vec![1.0_f32, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]];

        let tensor = rows_to_tensor::<TestBackend>(&rows, &device);
        assert_eq!(tensor.dims(), [2, 4]);

        let row1: Vec<f32> = tensor
            .slice([1..2, 0..4])
            .reshape([4])
            .into_data()
            .to_vec()
            .unwrap();
        assert_eq!(row1, vec![5.0, 6.0, 7.0, 8.0]);
    }

    #[test]
    fn test_flat_to_tensor_shape() {
        let device = Default::default();
        let tensor = flat_to_tensor::<TestBackend>(vec![0.0; 12], 3, 4, &device);
        assert_eq!(tensor.dims(), [3, 4]);
    }

    #[test]
    #[should_panic(expected = "row 1 has length 2")]
    fn test_ragged_rows_panic() {
        let device = Default::default();
        let _ = rows_to_tensor::<TestBackend>(&[vec![1.0, 2.0, 3.0], vec![1.0, 2.0]], &device);
    }

    #[test]
    fn test_tensor_to_vec_and_scalar() {
        let device = Default::default();
        let tensor =
            Tensor::<TestBackend, 1>::from_data(TensorData::from([1.0_f32, 2.5, -3.0]), &device);

        let values = tensor_to_vec::<TestBackend>(tensor);
        assert_eq!(values.len(), 3);
        assert!((values[1] - 2.5).abs() < 1e-5);
        assert!((values[2] + 3.0).abs() < 1e-5);

        let scalar_tensor =
            Tensor::<TestBackend, 1>::from_data(TensorData::from([42.0_f32]), &device);
        assert!((tensor_to_f64::<TestBackend>(scalar_tensor) - 42.0).abs() < 1e-5);
    }
}
