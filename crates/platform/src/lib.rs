//! Platform layer for the ray-tracing viewer.
//!
//! Provides the winit window the renderer presents into. The window reports
//! its drawable size to the frame scheduler and hands raw handles to the
//! Vulkan backend for surface creation.

mod window;

pub use window::Window;

// Re-export winit types that users might need
pub use winit::event::{Event, WindowEvent};
pub use winit::event_loop::EventLoop;
