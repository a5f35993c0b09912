mod device;
mod instance;
mod swapchain;

pub use device::{QueueFamilyIndices, RenderDevice};
pub use instance::RenderInstance;
pub use swapchain::{Swapchain, clamp_image_count};

use std::sync::Arc;
use color_eyre::Result;
use winit::window::Window;

/// Instance and device bundled together so resource constructors take a
/// single context reference instead of reaching for globals.
pub struct RenderCore {
    pub device: RenderDevice,
    pub instance: RenderInstance,
}

impl RenderCore {
    pub fn new(window: Arc<Window>) -> Result<Self> {
        let instance = RenderInstance::new(&window)?;
        let device = RenderDevice::new(&instance)?;
        Ok(Self { device, instance })
    }
}
