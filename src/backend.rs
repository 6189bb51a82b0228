//! Backend selection, driven by cargo features.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

pub type Element = f32;

#[cfg(feature = "ndarray")]
pub type MainBackend = burn::backend::NdArray<Element, i64>;
#[cfg(all(feature = "tch-cpu", not(feature = "ndarray")))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element, i8>;
#[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch-cpu"))))]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, i32>;

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;

/// Checkpoint format for the trainable head and the optimizer state.
pub type RecorderTy = burn::record::NamedMpkFileRecorder<burn::record::FullPrecisionSettings>;

pub trait MainDevice: Backend {
    fn main_device() -> <Self as Backend>::Device {
        Default::default()
    }
}

#[cfg(feature = "_has-backend")]
impl MainDevice for MainBackend {}

impl MainDevice for MainAutoBackend {
    fn main_device() -> <Self as Backend>::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }
}

#[cfg(not(feature = "_has-backend"))]
mod err {
    use super::*;
    std::compile_error!(
        "No backend selected. Enable one of the `ndarray`, `wgpu` or `tch-cpu` features."
    );

    // pretend to fallback to ndarray (to avoid too many other unrelated errors)
    pub type MainBackend = burn::backend::NdArray<Element, i64>;
    impl MainDevice for MainBackend {}
}
#[cfg(not(feature = "_has-backend"))]
pub use err::*;
