//! Precision policy shared by projections and attention kernels.
//!
//! Parameters may live in `f16`/`bf16` while matmuls run in `f32`. Softmax and
//! the attention accumulation always use a reduction dtype at least as wide as
//! `f32`. [`PrecisionPolicy`] records the three dtypes so every cast inside a
//! forward pass goes through one place.

use candle_core::{DType, Result, Tensor};

/// Dtypes used while storing parameters, running matmuls and reducing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrecisionPolicy {
    storage: DType,
    compute: DType,
    reduction: DType,
}

impl PrecisionPolicy {
    /// Constructs a policy from explicit dtype selections.
    pub fn new(storage: DType, compute: DType, reduction: DType) -> Self {
        Self {
            storage,
            compute,
            reduction,
        }
    }

    /// Derives a policy from the dtype the parameters are stored in.
    ///
    /// Half-precision storage promotes compute to `f32`; `f64` storage keeps
    /// every stage in `f64`.
    pub fn from_parameter_dtype(storage: DType) -> Self {
        let compute = match storage {
            DType::F16 | DType::BF16 => DType::F32,
            other => other,
        };
        let reduction = match compute {
            DType::F64 => DType::F64,
            _ => DType::F32,
        };
        Self::new(storage, compute, reduction)
    }

    pub fn storage(&self) -> DType {
        self.storage
    }

    pub fn compute(&self) -> DType {
        self.compute
    }

    pub fn reduction(&self) -> DType {
        self.reduction
    }

    /// Absolute tolerance expected when comparing storage-dtype outputs.
    pub fn storage_tolerance(&self) -> f32 {
        tolerance_for(self.storage)
    }

    /// Casts a tensor to the compute dtype ahead of a matmul.
    pub fn cast_for_matmul(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.compute)
    }

    /// Casts a tensor to the reduction dtype ahead of softmax/accumulation.
    pub fn cast_for_reduction(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.reduction)
    }

    /// Casts a tensor back to the storage dtype.
    pub fn cast_to_storage(&self, tensor: &Tensor) -> Result<Tensor> {
        cast_tensor(tensor, self.storage)
    }
}

fn cast_tensor(tensor: &Tensor, dtype: DType) -> Result<Tensor> {
    if tensor.dtype() == dtype {
        Ok(tensor.clone())
    } else {
        tensor.to_dtype(dtype)
    }
}

fn tolerance_for(dtype: DType) -> f32 {
    match dtype {
        DType::BF16 => 2e-2,
        DType::F16 => 5e-3,
        DType::F32 => 1e-5,
        DType::F64 => 1e-7,
        _ => 0.0,
    }
}
