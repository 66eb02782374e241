//! バックエンドの型エイリアス
//!
//! CPU (NdArray) は常に利用可能。GPU (WGPU) は `wgpu` フィーチャ有効時のみ。

use burn_autodiff::Autodiff;
use burn_ndarray::{NdArray, NdArrayDevice};

/// CPU 推論用
pub type CpuBackend = NdArray<f32>;
/// CPU 学習用
pub type CpuTrainBackend = Autodiff<CpuBackend>;

pub fn cpu_device() -> NdArrayDevice {
    NdArrayDevice::Cpu
}

#[cfg(feature = "wgpu")]
pub use self::gpu::*;

#[cfg(feature = "wgpu")]
mod gpu {
    use burn_autodiff::Autodiff;
    use burn_wgpu::{Wgpu, WgpuDevice};

    /// GPU 推論用
    pub type GpuBackend = Wgpu;
    /// GPU 学習用
    pub type GpuTrainBackend = Autodiff<GpuBackend>;

    /// 利用可能な中で最良のアダプタ
    pub fn gpu_device() -> WgpuDevice {
        WgpuDevice::default()
    }
}
