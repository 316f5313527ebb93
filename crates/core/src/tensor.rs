//! Host tensor type used for checkpoint storage and conversion
//!
//! Values are always held as `f32`; `dtype` records the storage precision
//! used when the tensor is written to disk.

use half::{bf16, f16};

use crate::error::{CoreError, Result};

/// Tensor storage data type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F32,
    F16,
    BF16,
}

impl DType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::F32 => 4,
            DType::F16 | DType::BF16 => 2,
        }
    }

    /// Lower-case name, as used in error messages and manifests
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F16 => "f16",
            DType::BF16 => "bf16",
        }
    }
}

/// Dense row-major tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    dtype: DType,
    data: Vec<f32>,
}

impl Tensor {
    /// Create an `F32` tensor, checking that `data` fills `shape`
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let Some(expected) = shape::checked_numel(&shape) else {
            return Err(CoreError::ShapeOverflow(shape));
        };
        if data.len() != expected {
            return Err(CoreError::DataLength {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self {
            shape,
            dtype: DType::F32,
            data,
        })
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let numel = shape::numel(&shape);
        Self {
            shape,
            dtype: DType::F32,
            data: vec![0.0; numel],
        }
    }

    pub fn ones(shape: Vec<usize>) -> Self {
        let numel = shape::numel(&shape);
        Self {
            shape,
            dtype: DType::F32,
            data: vec![1.0; numel],
        }
    }

    /// Change the storage dtype, rounding values to what that dtype can represent
    pub fn with_dtype(mut self, dtype: DType) -> Self {
        match dtype {
            DType::F32 => {}
            DType::F16 => self
                .data
                .iter_mut()
                .for_each(|v| *v = f16::from_f32(*v).to_f32()),
            DType::BF16 => self
                .data
                .iter_mut()
                .for_each(|v| *v = bf16::from_f32(*v).to_f32()),
        }
        self.dtype = dtype;
        self
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Serialized size in bytes at the storage dtype
    pub fn size_bytes(&self) -> usize {
        self.numel() * self.dtype.size_bytes()
    }

    /// Encode values as little-endian bytes in the storage dtype
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size_bytes());
        match self.dtype {
            DType::F32 => {
                for v in &self.data {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            DType::F16 => {
                for v in &self.data {
                    out.extend_from_slice(&f16::from_f32(*v).to_le_bytes());
                }
            }
            DType::BF16 => {
                for v in &self.data {
                    out.extend_from_slice(&bf16::from_f32(*v).to_le_bytes());
                }
            }
        }
        out
    }

    /// Decode little-endian bytes of the given dtype
    pub fn from_le_bytes(shape: Vec<usize>, dtype: DType, bytes: &[u8]) -> Result<Self> {
        let Some(expected) = shape::checked_numel(&shape)
            .and_then(|numel| numel.checked_mul(dtype.size_bytes()))
        else {
            return Err(CoreError::ShapeOverflow(shape));
        };
        if bytes.len() != expected {
            return Err(CoreError::ByteLength {
                expected,
                got: bytes.len(),
            });
        }

        let data: Vec<f32> = match dtype {
            DType::F32 => bytes
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            DType::F16 => bytes
                .chunks_exact(2)
                .map(|b| f16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
            DType::BF16 => bytes
                .chunks_exact(2)
                .map(|b| bf16::from_le_bytes([b[0], b[1]]).to_f32())
                .collect(),
        };

        Ok(Self { shape, dtype, data })
    }

    /// Swap the two axes of a rank-2 tensor
    pub fn transpose_2d(&self) -> Result<Self> {
        if self.rank() != 2 {
            return Err(CoreError::InvalidAxes {
                axes: vec![1, 0],
                rank: self.rank(),
            });
        }
        self.permute(&[1, 0])
    }

    /// Reorder axes. `axes[i]` is the source axis that becomes output axis `i`.
    pub fn permute(&self, axes: &[usize]) -> Result<Self> {
        let rank = self.rank();
        let mut seen = vec![false; rank];
        if axes.len() != rank {
            return Err(CoreError::InvalidAxes {
                axes: axes.to_vec(),
                rank,
            });
        }
        for &a in axes {
            if a >= rank || seen[a] {
                return Err(CoreError::InvalidAxes {
                    axes: axes.to_vec(),
                    rank,
                });
            }
            seen[a] = true;
        }

        let out_shape: Vec<usize> = axes.iter().map(|&a| self.shape[a]).collect();
        let in_strides = shape::compute_strides(&self.shape);
        let out_strides = shape::compute_strides(&out_shape);
        let mut data = vec![0.0f32; self.numel()];

        for (out_idx, slot) in data.iter_mut().enumerate() {
            let mut rem = out_idx;
            let mut src = 0usize;
            for (dim, &stride) in out_strides.iter().enumerate() {
                let coord = rem / stride;
                rem %= stride;
                src += coord * in_strides[axes[dim]];
            }
            *slot = self.data[src];
        }

        Ok(Self {
            shape: out_shape,
            dtype: self.dtype,
            data,
        })
    }

    /// Elementwise `self - other`
    pub fn sub(&self, other: &Tensor) -> Result<Self> {
        if self.shape != other.shape {
            return Err(CoreError::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(a, b)| a - b)
            .collect();
        Ok(Self {
            shape: self.shape.clone(),
            dtype: DType::F32,
            data,
        })
    }

    /// Sum of all elements
    pub fn sum(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    /// Sum of absolute elementwise differences
    pub fn abs_diff_sum(&self, other: &Tensor) -> Result<f64> {
        let diff = self.sub(other)?;
        Ok(diff.data.iter().map(|&v| (v as f64).abs()).sum())
    }
}

/// Tensor shape utilities
pub mod shape {
    /// Calculate the product of dimensions
    pub fn numel(shape: &[usize]) -> usize {
        shape.iter().product()
    }

    /// Product of dimensions, `None` if it does not fit in `usize`
    pub fn checked_numel(shape: &[usize]) -> Option<usize> {
        shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
    }

    /// Compute strides for row-major layout
    pub fn compute_strides(shape: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; shape.len()];
        for i in (0..shape.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * shape[i + 1];
        }
        strides
    }
}
