use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    device::Platform,
    num::{DataType, Scalar},
    shape::Shape,
    tensor::{Tensor, TensorError},
};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec type error: record holds {0}, requested {1}")]
    Type(DataType, DataType),
    #[error("codec length error: {0} bytes do not fill {1} elements")]
    Length(usize, usize),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Persisted layout of one tensor: a name and the contiguous element
/// sequence of its dense traversal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorRecord {
    pub name: String,
    pub data_type: DataType,
    pub extents: Vec<usize>,
    pub data: Vec<u8>,
}

impl TensorRecord {
    /// Captures a view's elements in traversal order. Fetches through the
    /// host, so pending writes land first.
    pub fn encode<T: Scalar>(
        name: impl Into<String>,
        tensor: &Tensor<T>,
    ) -> Result<Self, CodecError> {
        let values: Vec<T> = tensor.host_values()?.collect();
        Ok(Self {
            name: name.into(),
            data_type: T::DATA_TYPE,
            extents: tensor.padded_extents(),
            data: bytemuck::cast_slice(&values).to_vec(),
        })
    }

    /// Constructs a fresh tensor initialized from the decoded sequence.
    pub fn decode<T: Scalar>(&self, platform: &Platform) -> Result<Tensor<T>, CodecError> {
        if self.data_type != T::DATA_TYPE {
            return Err(CodecError::Type(self.data_type, T::DATA_TYPE));
        }
        let shape = Shape::new(self.extents.clone());
        let size = size_of::<T>();
        if self.data.len() != shape.element_count() * size {
            return Err(CodecError::Length(self.data.len(), shape.element_count()));
        }
        let elements: Vec<T> = self
            .data
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        Ok(Tensor::new(platform, shape, &elements)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Platform;

    #[test]
    fn test_round_trip_preserves_values() {
        let platform = Platform::default();
        let elements: Vec<f32> = (0..6).map(|i| i as f32 * 1.5).collect();
        let m = Tensor::matrix(&platform, [2, 3], &elements).unwrap();
        let record = TensorRecord::encode("weights", &m).unwrap();
        assert_eq!(record.extents, vec![2, 3]);

        let decoded: Tensor<f32> = record.decode(&platform).unwrap();
        assert_eq!(decoded.count(), m.count());
        for r in 0..2 {
            for c in 0..3 {
                assert_eq!(
                    decoded.value(&[r, c]).unwrap(),
                    m.value(&[r, c]).unwrap(),
                );
            }
        }
    }

    #[test]
    fn test_round_trip_through_json() {
        let platform = Platform::default();
        let v = Tensor::vector(&platform, &[1u64, 2, 3]).unwrap();
        let record = TensorRecord::encode("ids", &v).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let parsed: TensorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
        let decoded: Tensor<u64> = parsed.decode(&platform).unwrap();
        assert_eq!(decoded.value(&[2]).unwrap(), 3);
    }

    #[test]
    fn test_type_mismatch_rejected() {
        let platform = Platform::default();
        let v = Tensor::vector(&platform, &[1.0f32, 2.0]).unwrap();
        let record = TensorRecord::encode("x", &v).unwrap();
        assert!(matches!(
            record.decode::<f64>(&platform),
            Err(CodecError::Type(DataType::F32, DataType::F64)),
        ));
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let platform = Platform::default();
        let v = Tensor::vector(&platform, &[1.0f32, 2.0]).unwrap();
        let mut record = TensorRecord::encode("x", &v).unwrap();
        record.data.pop();
        assert!(matches!(
            record.decode::<f32>(&platform),
            Err(CodecError::Length(7, 2)),
        ));
    }
}
