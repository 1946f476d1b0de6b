//! Sample MMIO devices the CLI loader registers on a [`vm64_core::MmioFabric`]:
//! a keyboard byte queue and a GPU framebuffer/control block. Neither is
//! part of the core — the core only depends on the `MmioHook` trait.

pub mod gpu;
pub mod keyboard;

pub use gpu::{Framebuffer, GpuControl};
pub use keyboard::{Keyboard, SharedKeyboard};
